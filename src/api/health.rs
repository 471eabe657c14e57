//! Health check endpoints.

use actix_web::{HttpResponse, get, web};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::config::PlacementKind;
use crate::error::ErrorResponse;
use crate::services::{AnalysisPipeline, Storage};

/// Health check response.
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

/// Readiness check response.
#[derive(Serialize, ToSchema)]
pub struct ReadyResponse {
    status: &'static str,
    /// `connected`, or `not_used` when images are placed through the warehouse
    storage: &'static str,
    warehouse: &'static str,
}

/// Health check endpoint.
///
/// Returns 200 if the service is running.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check endpoint.
///
/// Returns 200 when the blob container is reachable and a warehouse session can be opened.
#[utoipa::path(
    get,
    path = "/api/v1/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service unavailable", body = ErrorResponse)
    )
)]
#[get("/ready")]
pub async fn ready(
    pipeline: web::Data<AnalysisPipeline>,
    storage: web::Data<Storage>,
) -> HttpResponse {
    let storage_status = if pipeline.placement_kind() == PlacementKind::Blob {
        if let Err(e) = storage.check_bucket().await {
            warn!("Readiness: blob container unavailable: {}", e);
            return not_ready(format!("Blob container unavailable: {}", e));
        }
        "connected"
    } else {
        "not_used"
    };

    if let Err(e) = pipeline.check_warehouse().await {
        warn!("Readiness: warehouse unavailable: {}", e);
        return not_ready(format!("Warehouse unavailable: {}", e));
    }

    HttpResponse::Ok().json(ReadyResponse {
        status: "ready",
        storage: storage_status,
        warehouse: "connected",
    })
}

fn not_ready(message: String) -> HttpResponse {
    HttpResponse::ServiceUnavailable().json(ErrorResponse::new("NOT_READY", message))
}

/// Configure health routes.
pub fn configure_health_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(ready);
}
