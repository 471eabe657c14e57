//! Uploaded image submissions and their validation outcome.

use serde::Serialize;
use utoipa::ToSchema;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// An image received from the caller.
///
/// Immutable once built; the bytes are only ever borrowed by the pipeline steps.
#[derive(Debug, Clone)]
pub struct ImageSubmission {
    bytes: Vec<u8>,
    filename: String,
    content_type: String,
}

impl ImageSubmission {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            content_type: content_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Original filename as sent by the client.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn size_mb(&self) -> f64 {
        self.bytes.len() as f64 / BYTES_PER_MB
    }

    /// Lower-cased extension after the last dot, if any.
    pub fn extension(&self) -> Option<String> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// Result of validating a submission against a model profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct ValidationOutcome {
    /// Violation messages in check order (format, size, resolution).
    pub violations: Vec<String>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn push(&mut self, violation: String) {
        self.violations.push(violation);
    }
}
