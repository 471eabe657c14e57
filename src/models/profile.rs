//! AI model constraint profiles.

use serde::Serialize;
use utoipa::ToSchema;

/// Constraint class of a model.
///
/// Stricter-class models accept smaller files and enforce a resolution bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintClass {
    General,
    Stricter,
}

/// A selectable model and its constraint class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ModelProfile {
    /// Model identifier passed to the completion function (e.g. "claude-4-sonnet").
    pub name: String,
    /// Provider label shown in the model selector.
    pub provider: String,
    pub class: ConstraintClass,
}
