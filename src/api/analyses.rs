//! Analysis endpoints.

use actix_multipart::{Field, Multipart};
use actix_web::{HttpResponse, get, post, web};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};
use crate::models::{AnalysisReport, CatalogEntry, ImageSubmission};
use crate::services::{AnalysisPipeline, AnalysisRequest, StagedAnalysisRequest};

/// Upper bound for the text fields of the upload form.
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

/// Request to analyze an image already in the stage.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StagedAnalysisBody {
    /// Stage-relative path, as listed by `GET /stage/images`
    pub relative_path: String,
    pub model: String,
    /// Prompt template with exactly one `{0}`; defaults to the configured prompt
    pub prompt: Option<String>,
    pub run_id: Option<String>,
}

/// Staged image listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct StagedImagesResponse {
    pub images: Vec<CatalogEntry>,
}

/// Configure analysis routes.
pub fn configure_analysis_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(analyze_staged)
        .service(analyze_upload)
        .service(list_staged_images);
}

/// Upload an image and analyze it.
///
/// Multipart fields: `file` (required), `model` (required), `prompt`, `run_id`.
/// Every call uploads a new object and runs a new analysis.
#[utoipa::path(
    post,
    path = "/api/v1/analyses",
    tag = "Analyses",
    request_body(content = inline(Object), content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Analysis report", body = AnalysisReport),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 413, description = "Upload too large", body = crate::error::ErrorResponse),
        (status = 422, description = "Image rejected for the selected model", body = crate::error::ErrorResponse),
        (status = 502, description = "Storage or warehouse failure", body = crate::error::ErrorResponse),
        (status = 503, description = "Setup required", body = crate::error::ErrorResponse)
    )
)]
#[post("/analyses")]
#[instrument(name = "api.analyze_upload", skip(pipeline, max_upload_size, payload))]
pub async fn analyze_upload(
    pipeline: web::Data<AnalysisPipeline>,
    max_upload_size: web::Data<usize>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let limit = *max_upload_size.get_ref();

    let mut image: Option<ImageSubmission> = None;
    let mut model: Option<String> = None;
    let mut prompt: Option<String> = None;
    let mut run_id: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::InvalidInput(format!("Multipart error: {}", e)))?;

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .ok_or_else(|| {
                        AppError::InvalidInput("Missing filename in multipart".to_string())
                    })?
                    .to_string();
                let content_type = field
                    .content_type()
                    .map(|mime| mime.essence_str().to_string())
                    .unwrap_or_default();

                let bytes = read_field(&mut field, limit).await.map_err(|e| match e {
                    AppError::PayloadTooLarge(_) => AppError::PayloadTooLarge(format!(
                        "Image exceeds the maximum upload size of {} bytes",
                        limit
                    )),
                    other => other,
                })?;

                image = Some(ImageSubmission::new(bytes, filename, content_type));
            }
            "model" => model = Some(read_text(&mut field).await?),
            "prompt" => prompt = Some(read_text(&mut field).await?),
            "run_id" => run_id = Some(read_text(&mut field).await?),
            _ => {
                // Drain unknown fields so the stream can advance
                read_field(&mut field, MAX_TEXT_FIELD_BYTES).await?;
            }
        }
    }

    let submission =
        image.ok_or_else(|| AppError::InvalidInput("Missing 'file' field".to_string()))?;
    let model = model
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Missing 'model' field".to_string()))?;

    info!(
        "Analysis requested: file={}, size={} bytes, model={}",
        submission.filename(),
        submission.size_bytes(),
        model
    );

    let report = pipeline
        .analyze(AnalysisRequest {
            submission,
            model,
            prompt,
            run_id: run_id.filter(|r| !r.trim().is_empty()),
        })
        .await?;

    Ok(HttpResponse::Ok().json(report))
}

/// Analyze an image already in the stage.
#[utoipa::path(
    post,
    path = "/api/v1/analyses/staged",
    tag = "Analyses",
    request_body = StagedAnalysisBody,
    responses(
        (status = 200, description = "Analysis report", body = AnalysisReport),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 502, description = "Warehouse failure or no result", body = crate::error::ErrorResponse),
        (status = 503, description = "Setup required", body = crate::error::ErrorResponse)
    )
)]
#[post("/analyses/staged")]
pub async fn analyze_staged(
    pipeline: web::Data<AnalysisPipeline>,
    body: web::Json<StagedAnalysisBody>,
) -> AppResult<HttpResponse> {
    let body = body.into_inner();

    let report = pipeline
        .analyze_staged(StagedAnalysisRequest {
            relative_path: body.relative_path,
            model: body.model,
            prompt: body.prompt,
            run_id: body.run_id,
        })
        .await?;

    Ok(HttpResponse::Ok().json(report))
}

/// List images already in the stage, newest first (at most 100).
#[utoipa::path(
    get,
    path = "/api/v1/stage/images",
    tag = "Analyses",
    responses(
        (status = 200, description = "Staged images", body = StagedImagesResponse),
        (status = 502, description = "Warehouse failure", body = crate::error::ErrorResponse),
        (status = 503, description = "Setup required", body = crate::error::ErrorResponse)
    )
)]
#[get("/stage/images")]
pub async fn list_staged_images(pipeline: web::Data<AnalysisPipeline>) -> AppResult<HttpResponse> {
    let images = pipeline.staged_images().await?;
    Ok(HttpResponse::Ok().json(StagedImagesResponse { images }))
}

/// Collect a field, failing once it grows past `limit` bytes.
async fn read_field(field: &mut Field, limit: usize) -> AppResult<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::InvalidInput(format!("Read error: {}", e)))?;
        if data.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "Field exceeds {} bytes",
                limit
            )));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn read_text(field: &mut Field) -> AppResult<String> {
    let bytes = read_field(field, MAX_TEXT_FIELD_BYTES).await?;
    String::from_utf8(bytes)
        .map_err(|_| AppError::InvalidInput("Form fields must be UTF-8 text".to_string()))
}
