//! API endpoint modules.

pub mod analyses;
pub mod health;
pub mod models;
pub mod openapi;

pub use analyses::configure_analysis_routes;
pub use health::configure_health_routes;
pub use models::configure_model_routes;
pub use openapi::ApiDoc;

use actix_web::web;

/// Register every `/api/v1` route.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(configure_health_routes)
        .configure(configure_model_routes)
        .configure(configure_analysis_routes);
}
