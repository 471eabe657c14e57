//! Analysis results returned by the completion query.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

/// File metadata projected alongside the completion payload.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FileMetadata {
    /// Stage-relative path the query resolved.
    pub file_path: String,
    pub file_size_bytes: Option<u64>,
    pub last_modified: Option<String>,
}

/// Parsed completion payload plus request metadata.
///
/// `ai_result` is exactly what the warehouse parse step produced; it is never unwrapped
/// or reshaped here.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnalysisResult {
    #[schema(value_type = Object)]
    pub ai_result: JsonValue,
    pub metadata: FileMetadata,
    pub model: String,
    /// Warehouse identity that ran the query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}
