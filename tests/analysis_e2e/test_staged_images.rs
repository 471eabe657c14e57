//! Staged image browser: listing and analysis without upload.

use actix_web::test;
use serde_json::{Value, json};

use crate::mock_warehouse::MockWarehouse;
use crate::test_helpers::{create_test_app, test_config};

#[actix_rt::test]
async fn test_listing_is_newest_first() {
    let warehouse = MockWarehouse::start().await;
    warehouse.stage("images/20250101_090000_east.jpg", 1500);
    warehouse.stage("images/20250102_090000_west.png", 2500);
    let app = create_test_app(test_config(&warehouse.url)).await;

    let req = test::TestRequest::get().uri("/api/v1/stage/images").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    let images = body["images"].as_array().unwrap();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0]["relative_path"], "images/20250102_090000_west.png");
    assert_eq!(images[0]["size"], 2500);
    assert_eq!(images[1]["relative_path"], "images/20250101_090000_east.jpg");

    let statements = warehouse.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("RELATIVE_PATH ILIKE '%.jpg'"));
    assert!(statements[0].ends_with("LIMIT 100"));
    assert_eq!(warehouse.closes(), 1);
}

#[actix_rt::test]
async fn test_staged_analysis_skips_upload_and_refresh() {
    let warehouse = MockWarehouse::start().await;
    warehouse.stage("images/20250102_090000_west.png", 2500);
    let app = create_test_app(test_config(&warehouse.url)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/analyses/staged")
        .set_json(json!({
            "relative_path": "images/20250102_090000_west.png",
            "model": "pixtral-large"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let report: Value = test::read_body_json(resp).await;
    assert!(report.get("asset").is_none());
    assert_eq!(
        report["result"]["metadata"]["file_path"],
        "images/20250102_090000_west.png"
    );
    assert_eq!(report["result"]["model"], "pixtral-large");

    let statements = warehouse.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("WITH input_pics"));
    assert!(!warehouse.ran("PUT"));
    assert!(!warehouse.ran("ALTER STAGE"));
}

#[actix_rt::test]
async fn test_staged_analysis_of_unknown_path_has_no_result() {
    let warehouse = MockWarehouse::start().await;
    let app = create_test_app(test_config(&warehouse.url)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/analyses/staged")
        .set_json(json!({
            "relative_path": "images/missing.jpg",
            "model": "openai-gpt-4.1"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 502);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "NO_RESULT");
    assert_eq!(warehouse.closes(), 1);
}
