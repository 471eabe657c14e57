//! Image validation against a model's constraint profile.
//!
//! Checks run in a fixed order (format, size, resolution) and every violation is
//! collected so the caller sees all of them at once.

use std::io::Cursor;

use image::ImageReader;
use tracing::debug;

use crate::config::AnalysisSettings;
use crate::models::{ConstraintClass, ImageSubmission, ValidationOutcome};

/// Validates submissions against the configured limits.
#[derive(Debug, Clone)]
pub struct ImageValidator {
    settings: AnalysisSettings,
}

impl ImageValidator {
    pub fn new(settings: AnalysisSettings) -> Self {
        Self { settings }
    }

    /// Validate a submission for the given model.
    pub fn validate(&self, submission: &ImageSubmission, model: &str) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        let class = self.settings.class_of(model);

        if let Some(violation) = self.check_format(submission) {
            outcome.push(violation);
        }

        if let Some(violation) = self.check_size(submission, model, class) {
            outcome.push(violation);
        }

        if class == ConstraintClass::Stricter
            && let Some(violation) = self.check_resolution(submission, model)
        {
            outcome.push(violation);
        }

        debug!(
            filename = %submission.filename(),
            model = %model,
            violations = outcome.violations.len(),
            "Validated image submission"
        );

        outcome
    }

    fn check_format(&self, submission: &ImageSubmission) -> Option<String> {
        let extension = submission.extension();
        let supported = extension
            .as_deref()
            .is_some_and(|ext| self.settings.supported_formats.iter().any(|f| f == ext));

        if supported {
            return None;
        }

        let shown = extension
            .map(|ext| format!(".{}", ext))
            .unwrap_or_else(|| "(none)".to_string());
        Some(format!(
            "Unsupported format: {}. Supported formats: {}",
            shown,
            self.settings.supported_formats.join(", ")
        ))
    }

    fn check_size(
        &self,
        submission: &ImageSubmission,
        model: &str,
        class: ConstraintClass,
    ) -> Option<String> {
        let size_mb = submission.size_mb();
        let max_size = self.settings.max_size_mb(class);

        (size_mb > max_size).then(|| {
            format!(
                "File size ({:.2} MB) exceeds limit ({} MB) for {}",
                size_mb, max_size, model
            )
        })
    }

    fn check_resolution(&self, submission: &ImageSubmission, model: &str) -> Option<String> {
        let max = self.settings.max_resolution_strict;

        match read_dimensions(submission.bytes()) {
            Ok((width, height)) if width > max || height > max => Some(format!(
                "Image resolution ({}x{}) exceeds limit ({}x{} pixels) for {}",
                width, height, max, max, model
            )),
            Ok(_) => None,
            Err(reason) => Some(format!("Cannot read image dimensions: {}", reason)),
        }
    }
}

/// Read width and height from the image header.
///
/// Works on a fresh cursor over borrowed bytes, so callers never observe a consumed stream.
pub fn read_dimensions(bytes: &[u8]) -> Result<(u32, u32), String> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .into_dimensions()
        .map_err(|e| e.to_string())
}
