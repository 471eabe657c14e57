//! OpenAPI documentation configuration.

use utoipa::OpenApi;

use crate::{api, error, models};

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Site Defect Analyzer",
        version = "0.1.0",
        description = "Validates construction-site photos, places them in a warehouse stage and runs a hosted AI completion that assesses structural defects"
    ),
    servers(
        (url = "/", description = "Local server")
    ),
    paths(
        // Health endpoints
        api::health::health,
        api::health::ready,
        // Model catalog
        api::models::list_models,
        // Analyses
        api::analyses::analyze_upload,
        api::analyses::analyze_staged,
        api::analyses::list_staged_images,
    ),
    components(
        schemas(
            // Common
            error::ErrorResponse,
            // Health
            api::health::HealthResponse,
            api::health::ReadyResponse,
            // Models
            models::ConstraintClass,
            api::models::ModelEntry,
            api::models::ProviderEntry,
            api::models::ModelCatalogResponse,
            // Analyses
            models::AnalysisReport,
            models::AnalysisResult,
            models::FileMetadata,
            models::ResponseShape,
            models::SummaryRow,
            models::TokenUsage,
            models::StoredAsset,
            models::CatalogEntry,
            api::analyses::StagedAnalysisBody,
            api::analyses::StagedImagesResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Models", description = "Selectable AI models and their limits"),
        (name = "Analyses", description = "Image upload, staged images and defect analysis")
    )
)]
pub struct ApiDoc;
