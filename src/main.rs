//! Site Defect Analyzer - Main entry point.
//!
//! Starts the Actix-web server with configured routes and middleware.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, http::header, web};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use defect_analyzer_lib::api::{self, ApiDoc};
use defect_analyzer_lib::config::{Config, PlacementKind};
use defect_analyzer_lib::middleware;
use defect_analyzer_lib::services::{
    AnalysisPipeline, AssetPlacement, BlobPlacement, SnowflakeWarehouse, StagePlacement,
    StageTransfer, Storage,
};

/// Perform health check (for Docker healthcheck).
fn health_check() -> bool {
    // Simple check - just verify we can load config
    Config::from_env().is_ok()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Check for --health-check flag (used by Docker HEALTHCHECK)
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--health-check") {
        dotenvy::dotenv().ok();
        std::process::exit(if health_check() { 0 } else { 1 });
    }

    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - RUST_ENV must be set to 'development' or 'production'");
            error!("  - In production, S3 credentials and WAREHOUSE_ACCOUNT/USER must be set");
            error!("  - In production, WAREHOUSE_PASSWORD or WAREHOUSE_TOKEN must be set");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  Site Defect Analyzer");
    info!("  Environment: {}", config.environment);
    info!("========================================");

    if config.is_development() {
        warn!("Running in DEVELOPMENT mode - do not use in production!");
        info!("Using development defaults for MinIO and the warehouse endpoint");
    }

    let storage = Arc::new(Storage::new(&config.s3));

    let warehouse = match SnowflakeWarehouse::new(&config.warehouse) {
        Ok(w) => Arc::new(w),
        Err(e) => {
            error!("Failed to initialize warehouse client: {}", e);
            std::process::exit(1);
        }
    };

    let placement: Arc<dyn AssetPlacement> = match config.pipeline.placement {
        PlacementKind::Blob => {
            info!("Placing images in bucket {}", storage.bucket());
            Arc::new(BlobPlacement::new(storage.clone()))
        }
        PlacementKind::Stage => {
            let transfer = match StageTransfer::new() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to initialize stage transfer client: {}", e);
                    std::process::exit(1);
                }
            };
            info!("Placing images in @{} via PUT", config.warehouse.stage);
            Arc::new(StagePlacement::new(config.warehouse.stage.clone(), transfer))
        }
    };

    info!(
        "Stage: @{}, catalog fallback: {:?}, audit table: {}",
        config.warehouse.stage,
        config.pipeline.catalog_fallback,
        config.pipeline.audit_table.as_deref().unwrap_or("disabled")
    );

    let pipeline = web::Data::new(AnalysisPipeline::new(&config, warehouse, placement));
    let storage = web::Data::from(storage);

    let bind_address = config.bind_address();
    let max_upload_size = config.max_upload_size;
    let is_development = config.is_development();

    info!("Upload limit: {}MB per request", max_upload_size / 1024 / 1024);

    let worker_count = if is_development {
        info!(
            "Starting server at http://{} (4 workers - development mode)",
            bind_address
        );
        4
    } else {
        let cpus = num_cpus::get();
        info!(
            "Starting server at http://{} ({} workers)",
            bind_address, cpus
        );
        cpus
    };
    info!("API docs at http://{}/swagger-ui/", bind_address);

    let openapi = ApiDoc::openapi();

    // Start HTTP server
    let server = HttpServer::new(move || {
        // Configure CORS
        let cors = if is_development {
            // Permissive CORS for a local front end
            Cors::default()
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
                .max_age(3600)
        } else {
            // Restrictive CORS for production (same-origin only)
            Cors::default()
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
                .max_age(3600)
        };

        App::new()
            // Add CORS middleware (must be before other middleware)
            .wrap(cors)
            .wrap(middleware::RequestLogger)
            .app_data(pipeline.clone())
            .app_data(storage.clone())
            .app_data(web::Data::new(max_upload_size))
            // Multipart overhead on top of the image itself; the image limit is enforced while streaming
            .app_data(web::PayloadConfig::new(max_upload_size * 2))
            .service(web::scope("/api/v1").configure(api::configure_routes))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
    });

    server
        .workers(worker_count)
        .bind(&bind_address)?
        .run()
        .await
}
