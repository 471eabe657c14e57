//! S3 storage service for uploaded images.
//!
//! The bucket plays the role of the blob container that the warehouse's external
//! stage points at. Supports both AWS S3 and MinIO for development.

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{
    Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::S3Config;
use crate::error::{AppError, AppResult};

/// S3 storage client wrapper.
#[derive(Clone)]
pub struct Storage {
    /// `None` when no credentials are configured; uploads then fail with a setup error.
    client: Option<Client>,
    bucket: String,
    region: String,
    endpoint: Option<String>,
}

impl Storage {
    /// Create a new S3 storage client from configuration.
    ///
    /// No network call is made here; a missing bucket surfaces on first use.
    pub fn new(config: &S3Config) -> Self {
        let client = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(
                    access_key,
                    secret_key.expose_secret(),
                    None,
                    None,
                    "defect-analyzer",
                );
                Some(s3_client(
                    &config.region,
                    credentials,
                    config.endpoint.as_deref(),
                ))
            }
            _ => {
                warn!("S3 credentials not configured; blob uploads will be rejected");
                None
            }
        };

        info!(
            "S3 storage configured: bucket={}, endpoint={:?}",
            config.bucket, config.endpoint
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn client(&self) -> AppResult<&Client> {
        self.client.as_ref().ok_or_else(|| {
            AppError::setup(
                "Blob storage credentials are not configured",
                "Set S3_ACCESS_KEY and S3_SECRET_KEY for the image container and restart the server.",
            )
        })
    }

    /// Check that the bucket is reachable with the configured credentials.
    pub async fn check_bucket(&self) -> AppResult<()> {
        self.client()?
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                AppError::Storage(format!(
                    "Failed to access bucket '{}': {}",
                    self.bucket,
                    e.into_service_error()
                ))
            })?;
        Ok(())
    }

    /// Get the content type for a file based on its extension.
    pub fn content_type_for_extension(ext: &str) -> &'static str {
        match ext.to_lowercase().as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            _ => "application/octet-stream",
        }
    }

    /// Upload an object, replacing any existing object at the same key.
    ///
    /// # Arguments
    /// * `key` - The S3 object key where the file will be uploaded
    /// * `data` - The file contents as bytes
    /// * `content_type` - Content type tag stored with the object
    pub async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> AppResult<()> {
        let client = self.client()?;
        let body = aws_sdk_s3::primitives::ByteStream::from(data);

        client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                AppError::Storage(format!(
                    "Failed to upload file to S3: {}",
                    e.into_service_error()
                ))
            })?;

        debug!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    /// Browsable URL of an object.
    ///
    /// Path-style against a custom endpoint, virtual-hosted style against AWS.
    pub fn object_url(&self, key: &str) -> String {
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        match self.endpoint {
            Some(ref endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                encoded_key
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, encoded_key
            ),
        }
    }
}

/// Build an S3 client with static credentials.
///
/// A custom endpoint switches to path-style addressing, which MinIO requires.
/// Checksums are only sent when an operation demands them; S3-compatible servers
/// reject the chunked checksum trailers.
pub(crate) fn s3_client(region: &str, credentials: Credentials, endpoint: Option<&str>) -> Client {
    let mut builder = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(credentials)
        .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
        .response_checksum_validation(ResponseChecksumValidation::WhenRequired);

    if let Some(endpoint) = endpoint {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }

    Client::from_conf(builder.build())
}
