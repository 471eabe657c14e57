//! Turns analysis results into report views.
//!
//! Data-shape problems never fail here; they become warnings and the raw payload is
//! shown instead.

use serde_json::{Map, Value as JsonValue};

use crate::models::{
    AnalysisReport, AnalysisResult, ResponseShape, StoredAsset, SummaryRow, TokenUsage,
};
use crate::services::dispatcher::normalize_list;

const NOT_AVAILABLE: &str = "N/A";

/// Assessment fields requested by the default prompt, in display order.
const ASSESSMENT_FIELDS: &[(&str, &str, FieldKind)] = &[
    ("Material", "material", FieldKind::Text),
    ("Colour", "colour", FieldKind::Text),
    (
        "Distinguishing Features",
        "distinguishing_features",
        FieldKind::List,
    ),
    ("Cracked", "is_cracked", FieldKind::Flag),
    ("Defective", "is_defective", FieldKind::Flag),
    ("Defect Severity", "defect_severity", FieldKind::Text),
    ("Defects", "defects", FieldKind::List),
    ("Repairs Required", "repairs_required", FieldKind::List),
    (
        "Estimated Repair Time",
        "estimated_time_repairs_required",
        FieldKind::Text,
    ),
    (
        "Material Confidence",
        "confidence_level_on_material",
        FieldKind::Text,
    ),
    (
        "Estimated Repair Cost",
        "estimated_cost_of_repairs",
        FieldKind::Text,
    ),
];

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Text,
    Flag,
    List,
}

/// Classify a payload by its top-level shape.
pub fn detect_shape(payload: &JsonValue) -> ResponseShape {
    match payload {
        JsonValue::Object(map) if map.contains_key("choices") => ResponseShape::ChatCompletion,
        JsonValue::Object(_) => ResponseShape::DirectObject,
        JsonValue::String(_) => ResponseShape::PlainText,
        _ => ResponseShape::Unrecognized,
    }
}

/// Build the report for a result.
///
/// `warnings` carries what earlier pipeline steps degraded on.
pub fn present(
    result: AnalysisResult,
    image_name: &str,
    asset: Option<StoredAsset>,
    mut warnings: Vec<String>,
) -> AnalysisReport {
    let shape = detect_shape(&result.ai_result);
    let mut summary = Vec::new();
    let mut message_content = None;
    let mut usage = None;

    match (&shape, &result.ai_result) {
        (ResponseShape::ChatCompletion, JsonValue::Object(envelope)) => {
            usage = token_usage(envelope);

            match first_message(envelope) {
                Some(content) => {
                    if let Some(fields) = embedded_object(&content) {
                        summary = assessment_rows(&fields);
                    }
                    message_content = Some(content);
                }
                None => warnings
                    .push("Unexpected response format: the completion has no choices".to_string()),
            }
        }
        (ResponseShape::DirectObject, JsonValue::Object(fields)) => {
            summary = assessment_rows(fields);
        }
        (ResponseShape::PlainText, JsonValue::String(text)) => {
            match embedded_object(text) {
                Some(fields) => summary = assessment_rows(&fields),
                None => warnings.push(
                    "Could not parse structured output; showing the raw response".to_string(),
                ),
            }
            message_content = Some(text.clone());
        }
        _ => warnings.push(format!(
            "Unexpected response format: {} payload",
            json_type(&result.ai_result)
        )),
    }

    let run_summary = run_summary(&result, image_name, usage.as_ref(), warnings.is_empty());

    AnalysisReport {
        shape,
        summary,
        message_content,
        usage,
        run_summary,
        warnings,
        asset,
        result,
    }
}

/// `choices[0].message.content`, if present and textual.
fn first_message(envelope: &Map<String, JsonValue>) -> Option<String> {
    let choice = envelope.get("choices")?.as_array()?.first()?;
    match choice.get("message")?.get("content")? {
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn token_usage(envelope: &Map<String, JsonValue>) -> Option<TokenUsage> {
    let usage = envelope.get("usage")?.as_object()?;
    let count = |name: &str| usage.get(name).and_then(JsonValue::as_u64);

    Some(TokenUsage {
        total_tokens: count("total_tokens"),
        prompt_tokens: count("prompt_tokens"),
        completion_tokens: count("completion_tokens"),
    })
}

/// Parse message text as a JSON object, tolerating a Markdown code fence around it.
fn embedded_object(text: &str) -> Option<Map<String, JsonValue>> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    match serde_json::from_str::<JsonValue>(body.trim()) {
        Ok(JsonValue::Object(map)) => Some(map),
        _ => None,
    }
}

/// Summary rows for the assessment fields; missing fields show as `N/A`.
pub fn assessment_rows(fields: &Map<String, JsonValue>) -> Vec<SummaryRow> {
    ASSESSMENT_FIELDS
        .iter()
        .map(|(label, key, kind)| {
            let value = fields.get(*key);
            let text = match kind {
                FieldKind::Flag => flag_text(value),
                FieldKind::Text => value.map(scalar_text).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                FieldKind::List => match value {
                    None => NOT_AVAILABLE.to_string(),
                    Some(value) => {
                        let items = normalize_list(Some(value));
                        if items.is_empty() {
                            "None".to_string()
                        } else {
                            items.iter().map(scalar_text).collect::<Vec<_>>().join("; ")
                        }
                    }
                },
            };
            SummaryRow::new(*label, text)
        })
        .collect()
}

fn flag_text(value: Option<&JsonValue>) -> String {
    match value {
        Some(JsonValue::Bool(true)) => "Yes".to_string(),
        Some(JsonValue::Bool(false)) => "No".to_string(),
        Some(JsonValue::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" => "Yes".to_string(),
            "false" | "no" | "n" => "No".to_string(),
            _ => s.clone(),
        },
        Some(JsonValue::Null) | None => NOT_AVAILABLE.to_string(),
        Some(other) => other.to_string(),
    }
}

fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => NOT_AVAILABLE.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(true) => "Yes".to_string(),
        JsonValue::Bool(false) => "No".to_string(),
        other => other.to_string(),
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn run_summary(
    result: &AnalysisResult,
    image_name: &str,
    usage: Option<&TokenUsage>,
    clean: bool,
) -> Vec<SummaryRow> {
    let mut rows = vec![
        SummaryRow::new("Model", result.model.clone()),
        SummaryRow::new(
            "Timestamp",
            result.requested_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ),
        SummaryRow::new("Image", image_name),
        SummaryRow::new(
            "Status",
            if clean {
                "Completed"
            } else {
                "Completed with warnings"
            },
        ),
    ];

    if let Some(usage) = usage {
        let count = |n: Option<u64>| n.map(|n| n.to_string()).unwrap_or_else(|| NOT_AVAILABLE.to_string());
        rows.push(SummaryRow::new("Total Tokens", count(usage.total_tokens)));
        rows.push(SummaryRow::new("Prompt Tokens", count(usage.prompt_tokens)));
        rows.push(SummaryRow::new("Completion Tokens", count(usage.completion_tokens)));
    }

    rows
}
