//! Report view of an analysis result.

use serde::Serialize;
use utoipa::ToSchema;

use super::{AnalysisResult, StoredAsset};

/// Detected shape of the completion payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// Envelope with a `choices` array.
    ChatCompletion,
    /// Assessment fields at the top level.
    DirectObject,
    PlainText,
    Unrecognized,
}

/// One labeled row of a summary table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SummaryRow {
    pub label: String,
    pub value: String,
}

impl SummaryRow {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Token counts reported by the completion envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct TokenUsage {
    pub total_tokens: Option<u64>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// Everything the caller needs to render an analysis.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnalysisReport {
    pub shape: ResponseShape,
    /// Assessment fields, when the payload carried them.
    pub summary: Vec<SummaryRow>,
    /// Message text of a chat completion, or the raw text of a plain payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Model, timestamp, image, status and token counts.
    pub run_summary: Vec<SummaryRow>,
    /// Non-fatal problems met along the way.
    pub warnings: Vec<String>,
    /// Set when this request uploaded the image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<StoredAsset>,
    pub result: AnalysisResult,
}

impl AnalysisReport {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Value of a summary row by label.
    pub fn summary_value(&self, label: &str) -> Option<&str> {
        self.summary
            .iter()
            .find(|row| row.label == label)
            .map(|row| row.value.as_str())
    }
}
