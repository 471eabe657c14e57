//! Model catalog endpoint.

use actix_web::{HttpResponse, get, web};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::ConstraintClass;
use crate::services::AnalysisPipeline;

/// A selectable model with its limits.
#[derive(Debug, Serialize, ToSchema)]
pub struct ModelEntry {
    pub name: String,
    pub class: ConstraintClass,
    pub max_size_mb: f64,
    /// Pixel bound on either axis; only stricter-class models have one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_resolution: Option<u32>,
}

/// Models offered by one provider.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderEntry {
    pub provider: String,
    pub models: Vec<ModelEntry>,
}

/// Model catalog response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ModelCatalogResponse {
    pub providers: Vec<ProviderEntry>,
    pub supported_formats: Vec<String>,
    /// Prompt used when a request does not carry one; contains `{0}`
    pub default_prompt: String,
}

/// List selectable models grouped by provider.
#[utoipa::path(
    get,
    path = "/api/v1/models",
    tag = "Models",
    responses(
        (status = 200, description = "Model catalog", body = ModelCatalogResponse)
    )
)]
#[get("/models")]
pub async fn list_models(pipeline: web::Data<AnalysisPipeline>) -> HttpResponse {
    let settings = pipeline.settings();

    let providers = settings
        .providers
        .iter()
        .map(|group| ProviderEntry {
            provider: group.provider.clone(),
            models: group
                .models
                .iter()
                .map(|name| {
                    let class = settings.class_of(name);
                    ModelEntry {
                        name: name.clone(),
                        class,
                        max_size_mb: settings.max_size_mb(class),
                        max_resolution: (class == ConstraintClass::Stricter)
                            .then_some(settings.max_resolution_strict),
                    }
                })
                .collect(),
        })
        .collect();

    HttpResponse::Ok().json(ModelCatalogResponse {
        providers,
        supported_formats: settings.supported_formats.clone(),
        default_prompt: settings.default_prompt.clone(),
    })
}

/// Configure model catalog routes.
pub fn configure_model_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(list_models);
}
