//! Client-side file transfer into internal stage storage.
//!
//! The warehouse answers a `PUT` with the stage's storage location and scoped
//! credentials; this module writes the bytes there.

use std::time::Duration;

use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::services::storage::s3_client;
use crate::services::warehouse::{StageLocation, UploadTarget};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Region used when an S3 stage does not report one.
const DEFAULT_S3_REGION: &str = "us-east-1";

const GCS_UPLOAD_URL: &str = "https://storage.googleapis.com/upload/storage/v1/b";

/// Uploads files to the storage behind a stage.
#[derive(Clone)]
pub struct StageTransfer {
    http_client: reqwest::Client,
}

impl StageTransfer {
    pub fn new() -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Storage(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Write `bytes` as `file_name` under the target's prefix.
    pub async fn upload(
        &self,
        target: &UploadTarget,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> AppResult<()> {
        match &target.location {
            StageLocation::S3 {
                bucket,
                prefix,
                region,
                endpoint,
                key_id,
                secret_key,
                session_token,
            } => {
                let credentials = Credentials::new(
                    key_id,
                    secret_key.expose_secret(),
                    session_token.as_ref().map(|t| t.expose_secret().to_string()),
                    None,
                    "warehouse-stage",
                );
                let endpoint = endpoint.as_deref().map(with_scheme);
                let client = s3_client(
                    region.as_deref().unwrap_or(DEFAULT_S3_REGION),
                    credentials,
                    endpoint.as_deref(),
                );
                let key = format!("{}{}", prefix, file_name);

                client
                    .put_object()
                    .bucket(bucket)
                    .key(&key)
                    .content_type(content_type)
                    .body(ByteStream::from(bytes))
                    .send()
                    .await
                    .map_err(|e| {
                        AppError::Storage(format!(
                            "Failed to upload to stage storage: {}",
                            e.into_service_error()
                        ))
                    })?;

                debug!("Uploaded s3://{}/{}", bucket, key);
            }
            StageLocation::Azure {
                account,
                endpoint,
                container,
                prefix,
                sas_token,
            } => {
                let url = format!(
                    "https://{}.{}/{}/{}{}?{}",
                    account,
                    endpoint,
                    container,
                    prefix,
                    urlencoding::encode(file_name),
                    sas_token.expose_secret().trim_start_matches('?')
                );
                let request = self
                    .http_client
                    .put(url)
                    .header("x-ms-blob-type", "BlockBlob")
                    .header(reqwest::header::CONTENT_TYPE, content_type)
                    .body(bytes);
                self.send(request).await?;

                debug!("Uploaded azure://{}/{}{}", container, prefix, file_name);
            }
            StageLocation::Gcs {
                bucket,
                prefix,
                presigned_url,
                access_token,
            } => {
                let request = match (presigned_url, access_token) {
                    (Some(url), _) => self.http_client.put(url),
                    (None, Some(token)) => {
                        let name = format!("{}{}", prefix, file_name);
                        let url = format!(
                            "{}/{}/o?uploadType=media&name={}",
                            GCS_UPLOAD_URL,
                            bucket,
                            urlencoding::encode(&name)
                        );
                        self.http_client
                            .post(url)
                            .bearer_auth(token.expose_secret())
                    }
                    (None, None) => {
                        return Err(AppError::Storage(
                            "GCS stage location has no upload credentials".to_string(),
                        ));
                    }
                };
                self.send(
                    request
                        .header(reqwest::header::CONTENT_TYPE, content_type)
                        .body(bytes),
                )
                .await?;

                debug!("Uploaded gcs://{}/{}{}", bucket, prefix, file_name);
            }
        }

        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> AppResult<()> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to reach stage storage: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Storage(format!(
                "Stage storage rejected the upload with HTTP {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Stages report bare host names; the SDK wants a URL.
fn with_scheme(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}
