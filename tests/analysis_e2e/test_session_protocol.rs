//! Session protocol of the warehouse client against the mock.

use secrecy::SecretString;

use defect_analyzer_lib::config::WarehouseAuth;
use defect_analyzer_lib::error::AppError;
use defect_analyzer_lib::services::warehouse::StageLocation;
use defect_analyzer_lib::services::{SnowflakeWarehouse, Warehouse, WarehouseSession};

use crate::mock_warehouse::{MockWarehouse, STAGE_BUCKET};
use crate::test_helpers::test_config;

#[actix_rt::test]
async fn test_statements_run_on_an_authenticated_session() {
    let warehouse = MockWarehouse::start().await;
    warehouse.stage("images/a.jpg", 10);
    let config = test_config(&warehouse.url);
    let client = SnowflakeWarehouse::new(&config.warehouse).unwrap();

    let mut session: Box<dyn WarehouseSession> = client.connect().await.unwrap();
    let rows = session
        .execute("SELECT RELATIVE_PATH, SIZE, LAST_MODIFIED FROM DIRECTORY(@input_stage) LIMIT 1")
        .await
        .unwrap();
    session.close().await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("RELATIVE_PATH"), Some("images/a.jpg"));
    assert_eq!(rows[0].get("SIZE"), Some("10"));
    assert_eq!(warehouse.logins(), 1);
    assert_eq!(warehouse.closes(), 1);
}

#[actix_rt::test]
async fn test_rejected_login_reports_the_warehouse_message() {
    let warehouse = MockWarehouse::start().await;
    let mut config = test_config(&warehouse.url);
    config.warehouse.auth = WarehouseAuth::Password(SecretString::from("wrong"));
    let client = SnowflakeWarehouse::new(&config.warehouse).unwrap();

    let err = client.connect().await.err().unwrap();

    match err {
        AppError::Warehouse { message, code } => {
            assert!(message.contains("Incorrect username or password"), "{}", message);
            assert_eq!(code.as_deref(), Some("390100"));
        }
        other => panic!("expected warehouse error, got {:?}", other),
    }
}

#[actix_rt::test]
async fn test_statement_failure_keeps_code_and_message() {
    let warehouse = MockWarehouse::start().await;
    let config = test_config(&warehouse.url);
    let client = SnowflakeWarehouse::new(&config.warehouse).unwrap();

    let mut session = client.connect().await.unwrap();
    let err = session.execute("DROP STAGE input_stage").await.err().unwrap();
    session.close().await.unwrap();

    let message = err.to_string();
    assert!(message.contains("SQL compilation error"), "{}", message);
    assert!(
        matches!(&err, AppError::Warehouse { code: Some(code), .. } if code == "001003"),
        "{:?}",
        err
    );
}

#[actix_rt::test]
async fn test_put_returns_stage_storage_instead_of_rows() {
    let warehouse = MockWarehouse::start().await;
    let config = test_config(&warehouse.url);
    let client = SnowflakeWarehouse::new(&config.warehouse).unwrap();
    let put = "PUT 'file://wall.jpg' @input_stage/images AUTO_COMPRESS=FALSE OVERWRITE=TRUE";

    let mut session = client.connect().await.unwrap();
    let as_statement = session.execute(put).await.err().unwrap();
    let target = session.prepare_upload(put).await.unwrap();
    session.close().await.unwrap();

    assert!(as_statement.to_string().contains("UPLOAD"), "{}", as_statement);
    assert!(!target.client_side_encrypted);
    match target.location {
        StageLocation::S3 {
            bucket,
            prefix,
            endpoint,
            key_id,
            ..
        } => {
            assert_eq!(bucket, STAGE_BUCKET);
            assert_eq!(prefix, "stages/input_stage/images/");
            assert_eq!(endpoint.as_deref(), Some(warehouse.s3.url.as_str()));
            assert_eq!(key_id, "stage-key");
        }
        other => panic!("expected S3 stage storage, got {:?}", other),
    }
    // Nothing is staged until the client uploads
    assert!(warehouse.s3.objects_in(STAGE_BUCKET).is_empty());
}

#[actix_rt::test]
async fn test_unreachable_warehouse_is_a_warehouse_error() {
    let config = test_config("http://127.0.0.1:1");
    let client = SnowflakeWarehouse::new(&config.warehouse).unwrap();

    let err = client.connect().await.err().unwrap();
    assert!(matches!(err, AppError::Warehouse { code: None, .. }), "{:?}", err);
}
