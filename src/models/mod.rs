//! Domain models for the defect analyzer.

pub mod analysis;
pub mod asset;
pub mod profile;
pub mod report;
pub mod submission;

// Re-export commonly used types
pub use analysis::{AnalysisResult, FileMetadata};
pub use asset::{CatalogEntry, StoredAsset};
pub use profile::{ConstraintClass, ModelProfile};
pub use report::{AnalysisReport, ResponseShape, SummaryRow, TokenUsage};
pub use submission::{ImageSubmission, ValidationOutcome};
