//! REST session client for the warehouse.
//!
//! Speaks the session protocol used by the official connectors:
//! - `POST /session/v1/login-request` exchanges credentials for a session token
//! - `POST /queries/v1/query-request` runs one statement and returns JSON rowsets
//! - `POST /session?delete=true` closes the session
//!
//! Only single-chunk results are read; every statement issued by this service is
//! bounded by a `LIMIT` or returns one row.
//!
//! A `PUT` is answered with an upload command instead of rows: the stage's storage
//! location and scoped credentials. The caller writes the file there itself.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{StageLocation, UploadTarget, Warehouse, WarehouseRow, WarehouseSession};
use crate::config::{WarehouseAuth, WarehouseConfig};
use crate::error::{AppError, AppResult};

/// HTTP connect timeout for warehouse calls.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP total timeout; completion queries on large images can run for minutes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const CLIENT_APP_ID: &str = "defect-analyzer";

const UPLOAD_COMMAND: &str = "UPLOAD";

/// Blob service suffix used when an Azure stage does not name one.
const DEFAULT_AZURE_ENDPOINT: &str = "blob.core.windows.net";

/// Warehouse reachable over the session REST protocol.
#[derive(Clone)]
pub struct SnowflakeWarehouse {
    http_client: reqwest::Client,
    config: WarehouseConfig,
}

/// Standard response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    /// Unwrap the payload or turn the warehouse's message into an error.
    fn into_data(self, action: &str) -> AppResult<T> {
        if !self.success {
            let message = self.message.unwrap_or_else(|| "unknown error".to_string());
            return Err(AppError::Warehouse {
                message: match &self.code {
                    Some(code) => format!("{} failed: {} ({})", action, message, code),
                    None => format!("{} failed: {}", action, message),
                },
                code: self.code,
            });
        }

        self.data
            .ok_or_else(|| AppError::warehouse(format!("{} returned no data", action)))
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    data: LoginData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginData<'a> {
    client_app_id: &'a str,
    client_app_version: &'a str,
    account_name: &'a str,
    login_name: &'a str,
    authenticator: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    session_parameters: SessionParameters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct SessionParameters {
    query_result_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    sql_text: &'a str,
    async_exec: bool,
    sequence_id: u64,
    query_submission_time: i64,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rowtype: Vec<ColumnType>,
    #[serde(default)]
    rowset: Vec<Vec<JsonValue>>,
    /// Set for file transfer statements
    #[serde(default)]
    command: Option<String>,
    #[serde(default, rename = "stageInfo")]
    stage_info: Option<StageInfo>,
    #[serde(default, rename = "encryptionMaterial")]
    encryption_material: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageInfo {
    location_type: String,
    /// `bucket/prefix/` or `container/prefix/`
    location: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default, rename = "endPoint")]
    end_point: Option<String>,
    #[serde(default)]
    storage_account: Option<String>,
    #[serde(default)]
    presigned_url: Option<String>,
    #[serde(default)]
    is_client_side_encrypted: bool,
    #[serde(default)]
    creds: HashMap<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
}

impl SnowflakeWarehouse {
    /// Create a client for the configured account.
    pub fn new(config: &WarehouseConfig) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::warehouse(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            "Warehouse client initialized (url={}, account={}, user={}, stage={})",
            config.base_url, config.account, config.user, config.stage
        );

        Ok(Self {
            http_client,
            config: config.clone(),
        })
    }

    fn login_url(&self) -> String {
        let mut params = vec![("requestId", Uuid::new_v4().to_string())];
        let optional = [
            ("warehouse", &self.config.warehouse),
            ("databaseName", &self.config.database),
            ("schemaName", &self.config.schema),
            ("roleName", &self.config.role),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                params.push((name, value.clone()));
            }
        }

        format!(
            "{}/session/v1/login-request?{}",
            self.config.base_url,
            query_string(&params)
        )
    }
}

#[async_trait]
impl Warehouse for SnowflakeWarehouse {
    async fn connect(&self) -> AppResult<Box<dyn WarehouseSession>> {
        let (authenticator, password, token) = match &self.config.auth {
            WarehouseAuth::Password(secret) => ("SNOWFLAKE", Some(secret.expose_secret()), None),
            WarehouseAuth::OAuthToken(secret) => ("OAUTH", None, Some(secret.expose_secret())),
            WarehouseAuth::Missing => {
                return Err(AppError::setup(
                    "Warehouse credentials are not configured",
                    "Set WAREHOUSE_PASSWORD, or WAREHOUSE_TOKEN for OAuth, and restart the server.",
                ));
            }
        };

        let body = LoginRequest {
            data: LoginData {
                client_app_id: CLIENT_APP_ID,
                client_app_version: env!("CARGO_PKG_VERSION"),
                account_name: &self.config.account,
                login_name: &self.config.user,
                authenticator,
                password,
                token,
                session_parameters: SessionParameters {
                    query_result_format: "JSON",
                },
            },
        };

        let response = self
            .http_client
            .post(self.login_url())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::warehouse(format!("Failed to reach warehouse: {}", e)))?;

        let envelope: Envelope<LoginResponse> = read_envelope(response, "Warehouse login").await?;
        let login = envelope.into_data("Warehouse login")?;

        debug!("Warehouse session opened for {}", self.config.user);

        Ok(Box::new(SnowflakeSession {
            http_client: self.http_client.clone(),
            base_url: self.config.base_url.clone(),
            token: SecretString::from(login.token),
            sequence_id: 0,
        }))
    }
}

/// An authenticated session; closing it invalidates the token.
struct SnowflakeSession {
    http_client: reqwest::Client,
    base_url: String,
    token: SecretString,
    sequence_id: u64,
}

impl SnowflakeSession {
    fn authorization(&self) -> String {
        format!("Snowflake Token=\"{}\"", self.token.expose_secret())
    }

    async fn query(&mut self, sql: &str) -> AppResult<QueryResponse> {
        self.sequence_id += 1;

        let url = format!(
            "{}/queries/v1/query-request?{}",
            self.base_url,
            query_string(&[("requestId", Uuid::new_v4().to_string())])
        );
        let body = QueryRequest {
            sql_text: sql,
            async_exec: false,
            sequence_id: self.sequence_id,
            query_submission_time: Utc::now().timestamp_millis(),
        };

        debug!(sequence_id = self.sequence_id, "Executing warehouse statement");

        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .header(reqwest::header::ACCEPT, "application/snowflake")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::warehouse(format!("Failed to reach warehouse: {}", e)))?;

        let envelope: Envelope<QueryResponse> = read_envelope(response, "SQL execution").await?;
        envelope.into_data("SQL execution")
    }
}

#[async_trait]
impl WarehouseSession for SnowflakeSession {
    async fn execute(&mut self, sql: &str) -> AppResult<Vec<WarehouseRow>> {
        let data = self.query(sql).await?;
        if let Some(command) = &data.command {
            return Err(AppError::warehouse(format!(
                "Statement returned a {} command; file transfers need an upload target",
                command
            )));
        }

        Ok(into_rows(data))
    }

    async fn prepare_upload(&mut self, sql: &str) -> AppResult<UploadTarget> {
        let data = self.query(sql).await?;
        upload_target(data)
    }

    async fn close(self: Box<Self>) -> AppResult<()> {
        let url = format!("{}/session?delete=true", self.base_url);

        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AppError::warehouse(format!("Failed to close session: {}", e)))?;

        let envelope: Envelope<JsonValue> = read_envelope(response, "Session close").await?;
        if !envelope.success {
            warn!(
                "Warehouse refused session close: {}",
                envelope.message.as_deref().unwrap_or("unknown error")
            );
            return Err(AppError::warehouse("Session close was rejected by the warehouse"));
        }

        debug!("Warehouse session closed");
        Ok(())
    }
}

/// Decode a response envelope, reporting HTTP failures verbatim.
async fn read_envelope<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    action: &str,
) -> AppResult<Envelope<T>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::warehouse(format!(
            "{} failed with HTTP {}: {}",
            action, status, body
        )));
    }

    response
        .json::<Envelope<T>>()
        .await
        .map_err(|e| AppError::warehouse(format!("{} returned an unreadable response: {}", action, e)))
}

/// Pair rowset values with column names. Scalars arrive as JSON strings.
fn into_rows(data: QueryResponse) -> Vec<WarehouseRow> {
    data.rowset
        .into_iter()
        .map(|values| {
            let columns = data
                .rowtype
                .iter()
                .zip(values)
                .map(|(column, value)| {
                    let value = match value {
                        JsonValue::Null => None,
                        JsonValue::String(s) => Some(s),
                        other => Some(other.to_string()),
                    };
                    (column.name.clone(), value)
                })
                .collect();
            WarehouseRow::new(columns)
        })
        .collect()
}

/// Turn an upload command into the storage location the file must be written to.
fn upload_target(data: QueryResponse) -> AppResult<UploadTarget> {
    if data.command.as_deref() != Some(UPLOAD_COMMAND) {
        return Err(AppError::warehouse(format!(
            "Expected an {} command for PUT, got {}",
            UPLOAD_COMMAND,
            data.command.as_deref().unwrap_or("a result set")
        )));
    }
    let info = data
        .stage_info
        .ok_or_else(|| AppError::warehouse("Upload command carried no stage location"))?;

    let client_side_encrypted = info.is_client_side_encrypted
        || data.encryption_material.as_ref().is_some_and(|m| !m.is_null());

    let (root, prefix) = split_location(&info.location);
    let location = match info.location_type.to_ascii_uppercase().as_str() {
        "S3" => StageLocation::S3 {
            bucket: root,
            prefix,
            region: info.region.filter(|r| !r.is_empty()),
            endpoint: info.end_point.filter(|e| !e.is_empty()),
            key_id: required_cred(&info.creds, "AWS_KEY_ID")?,
            secret_key: SecretString::from(required_cred(&info.creds, "AWS_SECRET_KEY")?),
            session_token: cred(&info.creds, "AWS_TOKEN").map(SecretString::from),
        },
        "AZURE" => StageLocation::Azure {
            account: info
                .storage_account
                .filter(|a| !a.is_empty())
                .ok_or_else(|| AppError::warehouse("Azure stage location has no storage account"))?,
            endpoint: info
                .end_point
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_AZURE_ENDPOINT.to_string()),
            container: root,
            prefix,
            sas_token: SecretString::from(required_cred(&info.creds, "AZURE_SAS_TOKEN")?),
        },
        "GCS" => {
            let presigned_url = info.presigned_url.filter(|u| !u.is_empty());
            let access_token = cred(&info.creds, "GCS_ACCESS_TOKEN").map(SecretString::from);
            if presigned_url.is_none() && access_token.is_none() {
                return Err(AppError::warehouse(
                    "GCS stage location has neither a presigned URL nor an access token",
                ));
            }
            StageLocation::Gcs {
                bucket: root,
                prefix,
                presigned_url,
                access_token,
            }
        }
        other => {
            return Err(AppError::warehouse(format!(
                "Unsupported stage location type: {}",
                other
            )));
        }
    };

    Ok(UploadTarget {
        location,
        client_side_encrypted,
    })
}

/// Split `root/some/prefix` into the root and a prefix ending in `/`.
fn split_location(location: &str) -> (String, String) {
    let location = location.trim_start_matches('/');
    match location.split_once('/') {
        Some((root, rest)) => {
            let rest = rest.trim_matches('/');
            let prefix = if rest.is_empty() {
                String::new()
            } else {
                format!("{}/", rest)
            };
            (root.to_string(), prefix)
        }
        None => (location.to_string(), String::new()),
    }
}

fn cred(creds: &HashMap<String, JsonValue>, name: &str) -> Option<String> {
    creds
        .get(name)
        .and_then(JsonValue::as_str)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn required_cred(creds: &HashMap<String, JsonValue>, name: &str) -> AppResult<String> {
    cred(creds, name)
        .ok_or_else(|| AppError::warehouse(format!("Upload command is missing {}", name)))
}

fn query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}
