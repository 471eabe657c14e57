//! Stored assets and stage directory entries.

use serde::Serialize;
use utoipa::ToSchema;

/// Durable copy of an uploaded image.
///
/// The store owns the object; this is only a reference to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StoredAsset {
    /// Browsable locator of the stored object.
    pub url: String,
    /// Destination key, relative to the stage root.
    pub path: String,
}

impl StoredAsset {
    /// Last path segment of the destination key.
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// An object as reported by the stage directory index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CatalogEntry {
    pub relative_path: String,
    pub size: Option<u64>,
    pub last_modified: Option<String>,
}
