//! Asset placement: where validated images land before the warehouse can see them.
//!
//! Two topologies share one contract:
//! - [`BlobPlacement`] writes to the object store backing an external stage
//! - [`StagePlacement`] issues a `PUT` and uploads to the storage location the
//!   warehouse hands back

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PlacementKind;
use crate::error::{AppError, AppResult};
use crate::models::{ImageSubmission, StoredAsset};
use crate::services::{StageTransfer, Storage};
use crate::services::warehouse::{WarehouseSession, escape_literal};

/// Stem used when sanitization leaves nothing behind.
const FALLBACK_STEM: &str = "image";

/// Places a validated submission at a destination key.
#[async_trait]
pub trait AssetPlacement: Send + Sync {
    fn kind(&self) -> PlacementKind;

    /// Write the whole object at `key`, overwriting any previous object.
    ///
    /// The session is only used by placements that write through the warehouse.
    async fn place(
        &self,
        submission: &ImageSubmission,
        key: &str,
        session: &mut dyn WarehouseSession,
    ) -> AppResult<StoredAsset>;
}

/// Object store placement.
pub struct BlobPlacement {
    storage: Arc<Storage>,
}

impl BlobPlacement {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl AssetPlacement for BlobPlacement {
    fn kind(&self) -> PlacementKind {
        PlacementKind::Blob
    }

    async fn place(
        &self,
        submission: &ImageSubmission,
        key: &str,
        _session: &mut dyn WarehouseSession,
    ) -> AppResult<StoredAsset> {
        self.storage
            .put(key, submission.bytes().to_vec(), content_type_of(submission))
            .await?;

        info!(
            "Uploaded {} ({} bytes) to bucket {}",
            key,
            submission.size_bytes(),
            self.storage.bucket()
        );

        Ok(StoredAsset {
            url: self.storage.object_url(key),
            path: key.to_string(),
        })
    }
}

/// Content type stored with the object.
///
/// The client's tag is kept when it names an image; otherwise the extension decides.
fn content_type_of(submission: &ImageSubmission) -> &str {
    if submission.content_type().starts_with("image/") {
        submission.content_type()
    } else {
        submission
            .extension()
            .map(|ext| Storage::content_type_for_extension(&ext))
            .unwrap_or("application/octet-stream")
    }
}

/// Internal stage placement through `PUT`.
pub struct StagePlacement {
    stage: String,
    transfer: StageTransfer,
}

impl StagePlacement {
    pub fn new(stage: impl Into<String>, transfer: StageTransfer) -> Self {
        Self {
            stage: stage.into(),
            transfer,
        }
    }
}

#[async_trait]
impl AssetPlacement for StagePlacement {
    fn kind(&self) -> PlacementKind {
        PlacementKind::Stage
    }

    async fn place(
        &self,
        submission: &ImageSubmission,
        key: &str,
        session: &mut dyn WarehouseSession,
    ) -> AppResult<StoredAsset> {
        let (directory, file_name) = key.rsplit_once('/').unwrap_or(("", key));

        let statement = put_statement(file_name, &self.stage, directory);
        debug!("Staging {} through PUT", key);
        let target = session.prepare_upload(&statement).await.map_err(|e| match e {
            AppError::Warehouse { message, .. } => {
                AppError::Storage(format!("Failed to stage {}: {}", key, message))
            }
            other => other,
        })?;

        if target.client_side_encrypted {
            return Err(AppError::setup(
                format!("Stage @{} requires client-side encryption", self.stage),
                format!(
                    "CREATE OR REPLACE STAGE {} ENCRYPTION = (TYPE = 'SNOWFLAKE_SSE') DIRECTORY = (ENABLE = TRUE);",
                    self.stage
                ),
            ));
        }

        self.transfer
            .upload(
                &target,
                file_name,
                submission.bytes().to_vec(),
                content_type_of(submission),
            )
            .await?;

        info!(
            "Staged {} ({} bytes) in @{}",
            key,
            submission.size_bytes(),
            self.stage
        );

        Ok(StoredAsset {
            url: format!("@{}/{}", self.stage, key),
            path: key.to_string(),
        })
    }
}

/// `PUT` a file into `@stage/<directory>` without compression.
///
/// The file is never read by the warehouse; only its name ends up in the stage.
pub fn put_statement(file_name: &str, stage: &str, directory: &str) -> String {
    let target = if directory.is_empty() {
        format!("@{}", stage)
    } else {
        format!("@{}/{}", stage, directory)
    };

    format!(
        "PUT 'file://{}' {} AUTO_COMPRESS=FALSE OVERWRITE=TRUE",
        escape_literal(file_name),
        target
    )
}

/// Reduce a client filename to a path-safe `stem.ext`.
///
/// The stem is cleaned by [`sanitize_segment`]. The extension is lower-cased and keeps
/// only ASCII alphanumerics.
pub fn sanitize_filename(filename: &str) -> String {
    // Browsers on Windows may send a full path
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (name, None),
    };

    let mut clean_stem = sanitize_segment(stem);
    if clean_stem.is_empty() {
        clean_stem = FALLBACK_STEM.to_string();
    }

    let clean_extension: String = extension
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if clean_extension.is_empty() {
        clean_stem
    } else {
        format!("{}.{}", clean_stem, clean_extension)
    }
}

/// Keep ASCII alphanumerics, `_` and `-`; anything else becomes `_`, runs of `_`
/// collapse and edge underscores are trimmed. May return an empty string.
pub fn sanitize_segment(segment: &str) -> String {
    let mut clean = String::with_capacity(segment.len());
    for c in segment.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' {
            c
        } else {
            '_'
        };
        if c == '_' && clean.ends_with('_') {
            continue;
        }
        clean.push(c);
    }

    clean.trim_matches('_').to_string()
}

/// Destination key `<prefix>/<YYYYmmdd_HHMMSS>_[<token>_]<sanitized name>`.
pub fn destination_key(
    prefix: &str,
    now: DateTime<Utc>,
    filename: &str,
    token: Option<&str>,
) -> String {
    let timestamp = now.format("%Y%m%d_%H%M%S");
    let name = sanitize_filename(filename);
    let leaf = match token {
        Some(token) => format!("{}_{}_{}", timestamp, token, name),
        None => format!("{}_{}", timestamp, name),
    };

    if prefix.is_empty() {
        leaf
    } else {
        format!("{}/{}", prefix, leaf)
    }
}

/// Short random token for unique destination keys.
pub fn unique_token() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
