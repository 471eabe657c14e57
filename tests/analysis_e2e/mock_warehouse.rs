//! Mock warehouse for E2E tests.
//!
//! Starts an in-process HTTP server speaking the session REST protocol: login, query
//! requests and session delete. Statements are answered from a small in-memory stage
//! whose files live in a [`MockS3`] bucket. A `PUT` is answered with an upload command
//! pointing the client at that bucket, the way the real service hands out stage storage.

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, post, web};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use crate::mock_s3::{MockS3, SharedObjects};

pub const TEST_USER: &str = "analyzer";
pub const TEST_PASSWORD: &str = "correct-horse";
const SESSION_TOKEN: &str = "mock-session-token";

/// Bucket backing the internal stage.
pub const STAGE_BUCKET: &str = "stage-bucket";

/// Key prefix of the internal stage inside [`STAGE_BUCKET`].
pub const STAGE_ROOT: &str = "stages/input_stage/";

/// A file in the mock stage.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub relative_path: String,
    pub size: u64,
    /// Visible to directory queries
    pub indexed: bool,
}

/// What the mock saw and how it should answer.
#[derive(Debug, Default)]
pub struct MockWarehouseState {
    pub logins: usize,
    pub closes: usize,
    pub statements: Vec<String>,
    pub staged: Vec<StagedFile>,
    /// Error returned by `ALTER STAGE ... REFRESH`: (code, message)
    pub refresh_error: Option<(String, String)>,
    /// Cell returned as RESULT_JSON; `None` yields SQL NULL
    pub analysis_payload: Option<String>,
    /// Error returned for `INSERT` statements
    pub insert_error: Option<String>,
    /// Leave uploaded files out of the directory index
    pub skip_indexing: bool,
    /// Objects the stage is built from
    pub storage: SharedObjects,
    pub storage_url: String,
    /// Bucket and key prefix the stage points at
    pub stage_source: (String, String),
}

impl MockWarehouseState {
    pub fn ran(&self, prefix: &str) -> bool {
        self.statements.iter().any(|s| s.trim_start().starts_with(prefix))
    }

    /// Pick up objects written to the stage's storage since the last statement.
    fn sync_stage(&mut self) {
        let (bucket, root) = self.stage_source.clone();
        let objects = self.storage.lock().unwrap().clone();

        for object in objects.iter().filter(|o| o.bucket == bucket) {
            let Some(relative_path) = object.key.strip_prefix(&root) else {
                continue;
            };
            let size = object.bytes.len() as u64;
            match self.staged.iter_mut().find(|f| f.relative_path == relative_path) {
                Some(file) => file.size = size,
                None => {
                    let indexed = !self.skip_indexing;
                    self.staged.push(StagedFile {
                        relative_path: relative_path.to_string(),
                        size,
                        indexed,
                    });
                }
            }
        }
    }
}

#[derive(Deserialize)]
struct LoginBody {
    data: LoginData,
}

#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginData {
    login_name: String,
    #[serde(default)]
    password: Option<String>,
    authenticator: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody {
    sql_text: String,
}

type SharedState = web::Data<Arc<Mutex<MockWarehouseState>>>;

fn failure(code: &str, message: &str) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": false,
        "code": code,
        "message": message,
        "data": null
    }))
}

fn rows(columns: &[&str], rowset: Vec<Vec<Value>>) -> HttpResponse {
    let rowtype: Vec<Value> = columns.iter().map(|c| json!({ "name": c })).collect();
    HttpResponse::Ok().json(json!({
        "success": true,
        "data": { "rowtype": rowtype, "rowset": rowset }
    }))
}

fn authorized(req: &HttpRequest) -> bool {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Snowflake Token=\"{}\"", SESSION_TOKEN))
}

#[post("/session/v1/login-request")]
async fn login(state: SharedState, body: web::Json<LoginBody>) -> HttpResponse {
    let mut state = state.lock().unwrap();

    let valid = body.data.authenticator == "SNOWFLAKE"
        && body.data.login_name == TEST_USER
        && body.data.password.as_deref() == Some(TEST_PASSWORD);
    if !valid {
        return failure("390100", "Incorrect username or password was specified.");
    }

    state.logins += 1;
    HttpResponse::Ok().json(json!({
        "success": true,
        "data": { "token": SESSION_TOKEN }
    }))
}

#[post("/session")]
async fn close(state: SharedState, req: HttpRequest) -> HttpResponse {
    if !authorized(&req) || req.query_string() != "delete=true" {
        return HttpResponse::Unauthorized().finish();
    }

    state.lock().unwrap().closes += 1;
    HttpResponse::Ok().json(json!({ "success": true, "data": null }))
}

#[post("/queries/v1/query-request")]
async fn query(state: SharedState, req: HttpRequest, body: web::Json<QueryBody>) -> HttpResponse {
    if !authorized(&req) {
        return HttpResponse::Unauthorized().finish();
    }

    let mut state = state.lock().unwrap();
    let sql = body.sql_text.trim().to_string();
    state.statements.push(sql.clone());
    state.sync_stage();

    if sql.starts_with("PUT ") {
        return put(&state, &sql);
    }

    if sql.starts_with("ALTER STAGE") {
        return match &state.refresh_error {
            Some((code, message)) => failure(code, message),
            None => rows(&["status"], vec![vec![json!("refreshed")]]),
        };
    }

    if sql.starts_with("SELECT RELATIVE_PATH") {
        let newest_first: Vec<Vec<Value>> = state
            .staged
            .iter()
            .rev()
            .filter(|f| f.indexed)
            .map(|f| {
                vec![
                    json!(f.relative_path),
                    json!(f.size.to_string()),
                    json!("2025-01-01 12:00:00.000"),
                ]
            })
            .collect();
        let limit = if sql.ends_with("LIMIT 1") { 1 } else { 100 };
        return rows(
            &["RELATIVE_PATH", "SIZE", "LAST_MODIFIED"],
            newest_first.into_iter().take(limit).collect(),
        );
    }

    if sql.starts_with("WITH input_pics") {
        let path = between(&sql, "WHERE d.RELATIVE_PATH = '", "'").unwrap_or_default();
        let Some(file) = state.staged.iter().find(|f| f.relative_path == path).cloned() else {
            return rows(
                &["CONTAINER_RELPATH", "FILE_SIZE_BYTES", "LAST_MODIFIED", "RESULT_JSON", "REQUESTED_BY"],
                Vec::new(),
            );
        };
        let payload = state
            .analysis_payload
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null);
        return rows(
            &["CONTAINER_RELPATH", "FILE_SIZE_BYTES", "LAST_MODIFIED", "RESULT_JSON", "REQUESTED_BY"],
            vec![vec![
                json!(file.relative_path),
                json!(file.size.to_string()),
                json!("2025-01-01 12:00:00.000"),
                payload,
                json!(TEST_USER.to_uppercase()),
            ]],
        );
    }

    if sql.starts_with("INSERT INTO") {
        if let Some(message) = &state.insert_error {
            return failure("003001", message);
        }
        return rows(&["number of rows inserted"], vec![vec![json!("1")]]);
    }

    failure("001003", &format!("SQL compilation error: unexpected '{}'", sql))
}

/// Answer a `PUT` with an upload command for the stage's storage.
fn put(state: &MockWarehouseState, sql: &str) -> HttpResponse {
    let Some(file_name) = between(sql, "PUT 'file://", "'") else {
        return failure("001003", "malformed PUT");
    };
    let target = sql
        .split_whitespace()
        .find(|part| part.starts_with('@'))
        .unwrap_or_default();
    let directory = target.split_once('/').map(|(_, dir)| dir).unwrap_or("");

    let location = if directory.is_empty() {
        format!("{}/{}", STAGE_BUCKET, STAGE_ROOT)
    } else {
        format!("{}/{}{}/", STAGE_BUCKET, STAGE_ROOT, directory)
    };

    HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "command": "UPLOAD",
            "src_locations": [file_name],
            "autoCompress": false,
            "overwrite": true,
            "stageInfo": {
                "locationType": "S3",
                "location": location,
                "region": "us-east-1",
                "endPoint": state.storage_url,
                "isClientSideEncrypted": false,
                "creds": {
                    "AWS_KEY_ID": "stage-key",
                    "AWS_SECRET_KEY": "stage-secret",
                    "AWS_TOKEN": "stage-token"
                }
            },
            "encryptionMaterial": null
        }
    }))
}

fn between(text: &str, start: &str, end: &str) -> Option<String> {
    let rest = &text[text.find(start)? + start.len()..];
    Some(rest[..rest.find(end)?].to_string())
}

/// Mock warehouse serving the session protocol.
pub struct MockWarehouse {
    pub url: String,
    pub state: Arc<Mutex<MockWarehouseState>>,
    /// Storage behind the stage
    pub s3: MockS3,
}

impl MockWarehouse {
    /// Start the mock warehouse and its stage storage on ephemeral ports.
    pub async fn start() -> Self {
        let s3 = MockS3::start().await;
        let state = Arc::new(Mutex::new(MockWarehouseState {
            analysis_payload: Some(
                json!({"material": "brick", "is_cracked": true, "defects": ["stair crack"]})
                    .to_string(),
            ),
            storage: s3.objects.clone(),
            storage_url: s3.url.clone(),
            stage_source: (STAGE_BUCKET.to_string(), STAGE_ROOT.to_string()),
            ..Default::default()
        }));

        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{}", port);

        let state_data = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state_data.clone()))
                .service(login)
                .service(close)
                .service(query)
        })
        .listen(listener)
        .expect("failed to listen")
        .workers(1)
        .disable_signals()
        .run();

        tokio::spawn(server);

        MockWarehouse { url, state, s3 }
    }

    /// Point the stage at a whole bucket, like an external stage over the image container.
    pub fn external_stage(&self, bucket: &str) {
        self.state.lock().unwrap().stage_source = (bucket.to_string(), String::new());
    }

    pub fn stage(&self, relative_path: &str, size: u64) {
        self.state.lock().unwrap().staged.push(StagedFile {
            relative_path: relative_path.to_string(),
            size,
            indexed: true,
        });
    }

    pub fn skip_indexing(&self) {
        self.state.lock().unwrap().skip_indexing = true;
    }

    pub fn set_payload(&self, payload: Option<Value>) {
        self.state.lock().unwrap().analysis_payload = payload.map(|p| p.to_string());
    }

    pub fn fail_refresh(&self, code: &str, message: &str) {
        self.state.lock().unwrap().refresh_error = Some((code.to_string(), message.to_string()));
    }

    pub fn fail_inserts(&self, message: &str) {
        self.state.lock().unwrap().insert_error = Some(message.to_string());
    }

    pub fn logins(&self) -> usize {
        self.state.lock().unwrap().logins
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.state.lock().unwrap().ran(prefix)
    }
}
