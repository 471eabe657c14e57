//! Analysis query construction and dispatch.
//!
//! The analysis runs entirely inside the warehouse: the staged file is bound with
//! `TO_FILE`, handed to `AI_COMPLETE` through `PROMPT`, and the completion text is
//! coerced to structured data with `PARSE_JSON`.

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{AnalysisResult, FileMetadata};
use crate::services::warehouse::{WarehouseSession, escape_literal};

/// Positional placeholder the completion function replaces with the image.
pub const IMAGE_PLACEHOLDER: &str = "{0}";

/// Builds and runs analysis queries against one stage.
#[derive(Debug, Clone)]
pub struct QueryDispatcher {
    stage: String,
    audit_table: Option<String>,
}

impl QueryDispatcher {
    pub fn new(stage: impl Into<String>, audit_table: Option<String>) -> Self {
        Self {
            stage: stage.into(),
            audit_table,
        }
    }

    /// Run the completion query for a staged file.
    ///
    /// The payload is returned exactly as parsed; shape handling belongs to presentation.
    pub async fn dispatch(
        &self,
        session: &mut dyn WarehouseSession,
        relative_path: &str,
        prompt: &str,
        model: &str,
        run_id: Option<String>,
    ) -> AppResult<AnalysisResult> {
        check_prompt_template(prompt)?;

        let query = analysis_query(&self.stage, relative_path, prompt, model);
        let rows = session.execute(&query).await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NoResult(relative_path.to_string()))?;

        let ai_result = row
            .get("RESULT_JSON")
            .and_then(parse_payload)
            .ok_or_else(|| AppError::EmptyResult(relative_path.to_string()))?;

        let metadata = FileMetadata {
            file_path: row
                .get("CONTAINER_RELPATH")
                .unwrap_or(relative_path)
                .to_string(),
            file_size_bytes: row.get("FILE_SIZE_BYTES").and_then(|s| s.parse().ok()),
            last_modified: row.get("LAST_MODIFIED").map(String::from),
        };

        info!(
            "Analysis completed for {} with {} ({} payload)",
            metadata.file_path,
            model,
            payload_kind(&ai_result)
        );

        Ok(AnalysisResult {
            ai_result,
            metadata,
            model: model.to_string(),
            requested_by: row.get("REQUESTED_BY").map(String::from),
            requested_at: Utc::now(),
            run_id,
        })
    }

    /// Append a result to the audit table, if one is configured.
    ///
    /// Returns a warning instead of failing; the analysis already succeeded.
    pub async fn record(
        &self,
        session: &mut dyn WarehouseSession,
        result: &AnalysisResult,
    ) -> Option<String> {
        let table = self.audit_table.as_deref()?;

        let statement = match audit_statement(table, result) {
            Ok(statement) => statement,
            Err(e) => return Some(format!("Audit log skipped: {}", e)),
        };

        match session.execute(&statement).await {
            Ok(_) => {
                info!("Recorded analysis of {} in {}", result.metadata.file_path, table);
                None
            }
            Err(e) => {
                warn!("Failed to record analysis in {}: {}", table, e);
                Some(format!("Audit log: {}", e))
            }
        }
    }
}

/// Reject prompt templates without exactly one image placeholder.
pub fn check_prompt_template(prompt: &str) -> AppResult<()> {
    match prompt.matches(IMAGE_PLACEHOLDER).count() {
        1 => Ok(()),
        0 => Err(AppError::InvalidInput(format!(
            "Prompt must contain the image placeholder {}",
            IMAGE_PLACEHOLDER
        ))),
        n => Err(AppError::InvalidInput(format!(
            "Prompt must contain the image placeholder {} exactly once (found {})",
            IMAGE_PLACEHOLDER, n
        ))),
    }
}

/// The CTE analysis query.
///
/// Every interpolated value is escaped as a string literal; the stage is a validated identifier.
pub fn analysis_query(stage: &str, relative_path: &str, prompt: &str, model: &str) -> String {
    let stage_ref = format!("@{}", stage);
    let path = escape_literal(relative_path);
    let prompt = escape_literal(prompt);
    let model = escape_literal(model);

    format!(
        "WITH input_pics AS (
    SELECT
        TO_FILE('{stage_ref}', '{path}') AS img,
        d.RELATIVE_PATH AS container_relpath,
        d.SIZE AS file_size_bytes,
        TO_TIMESTAMP_NTZ(d.LAST_MODIFIED) AS last_modified
    FROM DIRECTORY('{stage_ref}') d
    WHERE d.RELATIVE_PATH = '{path}'
),
ai_analysis AS (
    SELECT
        container_relpath,
        file_size_bytes,
        last_modified,
        PARSE_JSON(
            AI_COMPLETE(
                model => '{model}',
                prompt => PROMPT('{prompt}', img)
            )
        ) AS result_json
    FROM input_pics
)
SELECT
    container_relpath,
    file_size_bytes,
    last_modified,
    result_json,
    CURRENT_USER() AS requested_by
FROM ai_analysis"
    )
}

/// Audit insert carrying the result and its metadata.
pub fn audit_statement(table: &str, result: &AnalysisResult) -> AppResult<String> {
    let payload = serde_json::to_string(&result.ai_result)?;

    let text = |value: Option<&str>| match value {
        Some(v) => format!("'{}'", escape_literal(v)),
        None => "NULL".to_string(),
    };
    let size = result
        .metadata
        .file_size_bytes
        .map(|s| s.to_string())
        .unwrap_or_else(|| "NULL".to_string());

    Ok(format!(
        "INSERT INTO {table} (file_path, file_size_bytes, last_modified, model, requested_by, requested_at, run_id, ai_result) \
         SELECT {path}, {size}, {modified}, {model}, {user}, {at}, {run}, PARSE_JSON({payload})",
        table = table,
        path = text(Some(result.metadata.file_path.as_str())),
        size = size,
        modified = text(result.metadata.last_modified.as_deref()),
        model = text(Some(result.model.as_str())),
        user = text(result.requested_by.as_deref()),
        at = text(Some(result.requested_at.to_rfc3339().as_str())),
        run = text(result.run_id.as_deref()),
        payload = text(Some(payload.as_str())),
    ))
}

/// Parse a `RESULT_JSON` cell; `None` for an empty payload.
///
/// Text that is not JSON is kept as a plain string.
fn parse_payload(raw: &str) -> Option<JsonValue> {
    if raw.trim().is_empty() {
        return None;
    }

    let value = serde_json::from_str::<JsonValue>(raw)
        .unwrap_or_else(|_| JsonValue::String(raw.to_string()));

    let empty = match &value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        _ => false,
    };

    (!empty).then_some(value)
}

fn payload_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Object(map) if map.contains_key("choices") => "chat completion",
        JsonValue::Object(_) => "object",
        JsonValue::String(_) => "text",
        _ => "other",
    }
}

/// Normalize a list-shaped field.
///
/// Absent or null becomes empty, a mapping becomes its values ordered by key (numeric keys
/// numerically), a string becomes a single item and a sequence is returned unchanged.
pub fn normalize_list(value: Option<&JsonValue>) -> Vec<JsonValue> {
    match value {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) => items.clone(),
        Some(JsonValue::Object(map)) => {
            let mut entries: Vec<(&String, &JsonValue)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                (Err(_), Err(_)) => a.cmp(b),
            });
            entries.into_iter().map(|(_, v)| v.clone()).collect()
        }
        Some(other) => vec![other.clone()],
    }
}
