//! Shared helpers for analysis E2E tests.

use actix_web::dev::{Service, ServiceResponse};
use actix_web::{App, test, web};
use secrecy::SecretString;
use std::sync::Arc;

use defect_analyzer_lib::api::configure_routes;
use defect_analyzer_lib::config::{
    AnalysisSettings, CatalogFallback, Config, Environment, PipelineSettings, PlacementKind,
    S3Config, WarehouseAuth, WarehouseConfig,
};
use defect_analyzer_lib::services::{
    AnalysisPipeline, AssetPlacement, BlobPlacement, SnowflakeWarehouse, StagePlacement,
    StageTransfer, Storage,
};

use crate::mock_warehouse::{TEST_PASSWORD, TEST_USER};

pub const TEST_STAGE: &str = "input_stage";
pub const BOUNDARY: &str = "----defect-analyzer-test-boundary";
pub const TEST_BUCKET: &str = "construction-building-defects";

/// Create a test configuration pointing the warehouse at `warehouse_url`.
pub fn test_config(warehouse_url: &str) -> Config {
    Config {
        environment: Environment::Development,
        host: "127.0.0.1".to_string(),
        port: 0,
        max_upload_size: 20 * 1024 * 1024,
        analysis: AnalysisSettings::default(),
        pipeline: PipelineSettings {
            placement: PlacementKind::Stage,
            key_prefix: "images".to_string(),
            unique_keys: false,
            catalog_fallback: CatalogFallback::Lenient,
            audit_table: None,
        },
        // No credentials: blob placement reports a setup error
        s3: S3Config {
            endpoint: Some("http://127.0.0.1:1".to_string()),
            bucket: TEST_BUCKET.to_string(),
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
        },
        warehouse: WarehouseConfig {
            base_url: warehouse_url.to_string(),
            account: "test-account".to_string(),
            user: TEST_USER.to_string(),
            auth: WarehouseAuth::Password(SecretString::from(TEST_PASSWORD)),
            role: None,
            warehouse: Some("COMPUTE_WH".to_string()),
            database: Some("SUPERSTORE".to_string()),
            schema: Some("DEMO".to_string()),
            stage: TEST_STAGE.to_string(),
        },
    }
}

/// Switch `config` to blob placement against the S3 endpoint at `endpoint`.
pub fn with_blob_storage(mut config: Config, endpoint: &str) -> Config {
    config.pipeline.placement = PlacementKind::Blob;
    config.s3.endpoint = Some(endpoint.to_string());
    config.s3.access_key = Some("minioadmin".to_string());
    config.s3.secret_key = Some(SecretString::from("minioadmin"));
    config
}

/// Create a test app wired the way `main` wires the server.
pub async fn create_test_app(
    config: Config,
) -> impl Service<actix_http::Request, Response = ServiceResponse, Error = actix_web::Error> {
    let storage = Arc::new(Storage::new(&config.s3));
    let warehouse =
        Arc::new(SnowflakeWarehouse::new(&config.warehouse).expect("warehouse client"));

    let placement: Arc<dyn AssetPlacement> = match config.pipeline.placement {
        PlacementKind::Blob => Arc::new(BlobPlacement::new(storage.clone())),
        PlacementKind::Stage => Arc::new(StagePlacement::new(
            config.warehouse.stage.clone(),
            StageTransfer::new().expect("stage transfer client"),
        )),
    };

    let pipeline = web::Data::new(AnalysisPipeline::new(&config, warehouse, placement));

    test::init_service(
        App::new()
            .app_data(pipeline)
            .app_data(web::Data::from(storage))
            .app_data(web::Data::new(config.max_upload_size))
            .service(web::scope("/api/v1").configure(configure_routes)),
    )
    .await
}

/// A form part: field name, optional file name, content.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub content: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            filename: None,
            content: value.as_bytes(),
        }
    }

    pub fn file(filename: &'a str, content: &'a [u8]) -> Self {
        Self {
            name: "file",
            filename: Some(filename),
            content,
        }
    }
}

/// Encode parts as a `multipart/form-data` body.
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part.filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        part.name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name)
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(part.content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Build a `POST /api/v1/analyses` request.
pub fn analysis_request(parts: &[Part<'_>]) -> actix_http::Request {
    test::TestRequest::post()
        .uri("/api/v1/analyses")
        .insert_header((
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(multipart_body(parts))
        .to_request()
}

/// Bytes that pass as an image for general-class models, which only check format and size.
pub fn fake_image(size: usize) -> Vec<u8> {
    vec![0xAB; size]
}

/// A real PNG of the given dimensions.
pub fn png_image(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbImage::new(width, height)
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .expect("encode png");
    bytes
}
