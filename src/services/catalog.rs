//! Stage directory index: refresh, path resolution and listing.

use tracing::{info, warn};

use crate::config::CatalogFallback;
use crate::error::{AppError, AppResult};
use crate::models::{CatalogEntry, StoredAsset};
use crate::services::warehouse::{
    WarehouseRow, WarehouseSession, escape_literal, is_missing_object,
};

/// Escape character used in `LIKE` patterns.
const LIKE_ESCAPE: char = '^';

/// Listing limit of the staged-image browser.
const LISTING_LIMIT: u32 = 100;

/// Path the analysis query should target, plus any degradation warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub relative_path: String,
    pub warning: Option<String>,
}

/// Directory index of one stage.
#[derive(Debug, Clone)]
pub struct StageCatalog {
    stage: String,
    fallback: CatalogFallback,
}

impl StageCatalog {
    pub fn new(stage: impl Into<String>, fallback: CatalogFallback) -> Self {
        Self {
            stage: stage.into(),
            fallback,
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Resynchronize the directory index with the underlying storage.
    ///
    /// A missing or unauthorized stage is fatal and carries the statement that creates it.
    /// Any other failure comes back as a warning.
    pub async fn refresh(&self, session: &mut dyn WarehouseSession) -> AppResult<Option<String>> {
        match session
            .execute(&format!("ALTER STAGE {} REFRESH", self.stage))
            .await
        {
            Ok(_) => {
                info!("Stage {} refreshed", self.stage);
                Ok(None)
            }
            Err(e) => {
                if is_missing_object(&e) {
                    return Err(AppError::setup(
                        format!("Stage '{}' does not exist or is not authorized", self.stage),
                        stage_remediation(&self.stage),
                    ));
                }

                warn!("Stage refresh failed: {}", e);
                Ok(Some(format!("Stage refresh: {}", e)))
            }
        }
    }

    /// Find the catalog path of a just-placed asset.
    ///
    /// The most recently modified entry whose path contains the asset's basename wins.
    pub async fn resolve(
        &self,
        session: &mut dyn WarehouseSession,
        asset: &StoredAsset,
    ) -> AppResult<ResolvedPath> {
        let statement = lookup_statement(&self.stage, asset.basename());

        let lookup = session.execute(&statement).await.map(|rows| {
            rows.first()
                .and_then(|row| row.get("RELATIVE_PATH"))
                .filter(|path| !path.is_empty())
                .map(String::from)
        });

        let warning = match lookup {
            Ok(Some(relative_path)) => {
                info!("Resolved {} to stage path {}", asset.path, relative_path);
                return Ok(ResolvedPath {
                    relative_path,
                    warning: None,
                });
            }
            Ok(None) => format!("File not found in directory table, using: {}", asset.path),
            Err(e) => format!("Could not query directory: {}", e),
        };

        match self.fallback {
            CatalogFallback::Lenient => {
                warn!("{}", warning);
                Ok(ResolvedPath {
                    relative_path: asset.path.clone(),
                    warning: Some(warning),
                })
            }
            CatalogFallback::Strict => Err(AppError::NotFound(format!(
                "Staged file '{}' in @{}",
                asset.path, self.stage
            ))),
        }
    }

    /// Most recently modified images in the stage.
    pub async fn list_images(
        &self,
        session: &mut dyn WarehouseSession,
        formats: &[String],
    ) -> AppResult<Vec<CatalogEntry>> {
        let rows = session
            .execute(&listing_statement(&self.stage, formats))
            .await?;

        Ok(rows.iter().filter_map(catalog_entry).collect())
    }
}

fn catalog_entry(row: &WarehouseRow) -> Option<CatalogEntry> {
    Some(CatalogEntry {
        relative_path: row.get("RELATIVE_PATH")?.to_string(),
        size: row.get("SIZE").and_then(|s| s.parse().ok()),
        last_modified: row.get("LAST_MODIFIED").map(String::from),
    })
}

/// Statement that creates the stage with a directory index.
pub fn stage_remediation(stage: &str) -> String {
    format!(
        "CREATE OR REPLACE STAGE {} URL = '<container url>' STORAGE_INTEGRATION = <integration> DIRECTORY = (ENABLE = TRUE);",
        stage
    )
}

/// Escape `LIKE` wildcards so the value matches literally.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_') || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escape_literal(&escaped)
}

/// Directory lookup for entries containing `basename`, newest first.
pub fn lookup_statement(stage: &str, basename: &str) -> String {
    format!(
        "SELECT RELATIVE_PATH, SIZE, LAST_MODIFIED FROM DIRECTORY(@{stage}) \
         WHERE RELATIVE_PATH LIKE '%{pattern}%' ESCAPE '{escape}' \
         ORDER BY LAST_MODIFIED DESC LIMIT 1",
        stage = stage,
        pattern = escape_like(basename),
        escape = LIKE_ESCAPE
    )
}

/// Directory listing of every file with a supported extension.
pub fn listing_statement(stage: &str, formats: &[String]) -> String {
    let filter = formats
        .iter()
        .map(|ext| format!("RELATIVE_PATH ILIKE '%.{}' ESCAPE '{}'", escape_like(ext), LIKE_ESCAPE))
        .collect::<Vec<_>>()
        .join(" OR ");

    format!(
        "SELECT RELATIVE_PATH, SIZE, LAST_MODIFIED FROM DIRECTORY(@{}) WHERE {} \
         ORDER BY LAST_MODIFIED DESC LIMIT {}",
        stage, filter, LISTING_LIMIT
    )
}
