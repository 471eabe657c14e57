//! The analysis pipeline.
//!
//! Validate, place, refresh the catalog, resolve the path, dispatch, audit, present.
//! Steps run strictly in order; a warehouse session is opened once validation has
//! passed and is closed exactly once whatever the outcome.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::config::{AnalysisSettings, Config, PlacementKind};
use crate::error::{AppError, AppResult};
use crate::models::{AnalysisReport, CatalogEntry, ImageSubmission, ModelProfile, StoredAsset};
use crate::services::catalog::StageCatalog;
use crate::services::dispatcher::{QueryDispatcher, check_prompt_template};
use crate::services::placement::{AssetPlacement, destination_key, unique_token};
use crate::services::presentation::present;
use crate::services::validator::ImageValidator;
use crate::services::warehouse::{Warehouse, WarehouseSession};

/// An uploaded image to analyze.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub submission: ImageSubmission,
    pub model: String,
    /// Defaults to the configured prompt when absent or blank.
    pub prompt: Option<String>,
    pub run_id: Option<String>,
}

/// An image already in the stage.
#[derive(Debug, Clone)]
pub struct StagedAnalysisRequest {
    pub relative_path: String,
    pub model: String,
    pub prompt: Option<String>,
    pub run_id: Option<String>,
}

/// Sequences one analysis per call; holds no per-request state.
pub struct AnalysisPipeline {
    settings: AnalysisSettings,
    validator: ImageValidator,
    warehouse: Arc<dyn Warehouse>,
    placement: Arc<dyn AssetPlacement>,
    catalog: StageCatalog,
    dispatcher: QueryDispatcher,
    key_prefix: String,
    unique_keys: bool,
}

impl AnalysisPipeline {
    pub fn new(
        config: &Config,
        warehouse: Arc<dyn Warehouse>,
        placement: Arc<dyn AssetPlacement>,
    ) -> Self {
        Self {
            settings: config.analysis.clone(),
            validator: ImageValidator::new(config.analysis.clone()),
            warehouse,
            placement,
            catalog: StageCatalog::new(&config.warehouse.stage, config.pipeline.catalog_fallback),
            dispatcher: QueryDispatcher::new(
                &config.warehouse.stage,
                config.pipeline.audit_table.clone(),
            ),
            key_prefix: config.pipeline.key_prefix.clone(),
            unique_keys: config.pipeline.unique_keys,
        }
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub fn placement_kind(&self) -> PlacementKind {
        self.placement.kind()
    }

    /// Upload an image and analyze it.
    #[instrument(
        name = "pipeline.analyze",
        skip(self, request),
        fields(model = %request.model, filename = %request.submission.filename())
    )]
    pub async fn analyze(&self, request: AnalysisRequest) -> AppResult<AnalysisReport> {
        let profile = self.profile(&request.model)?;
        let prompt = self.prompt(request.prompt.as_deref())?;

        let outcome = self.validator.validate(&request.submission, &profile.name);
        if !outcome.is_valid() {
            info!(
                "Rejected {}: {}",
                request.submission.filename(),
                outcome.violations.join("; ")
            );
            return Err(AppError::Validation(outcome.violations));
        }

        let token = self.unique_keys.then(unique_token);
        let key = destination_key(
            &self.key_prefix,
            Utc::now(),
            request.submission.filename(),
            token.as_deref(),
        );

        let mut session = self.warehouse.connect().await?;
        let result = self
            .upload_and_analyze(session.as_mut(), &request, &key, &prompt)
            .await;
        close_session(session).await;

        result
    }

    /// Analyze an image already in the stage; nothing is uploaded or refreshed.
    #[instrument(
        name = "pipeline.analyze_staged",
        skip(self, request),
        fields(model = %request.model, path = %request.relative_path)
    )]
    pub async fn analyze_staged(&self, request: StagedAnalysisRequest) -> AppResult<AnalysisReport> {
        self.profile(&request.model)?;
        let prompt = self.prompt(request.prompt.as_deref())?;

        if request.relative_path.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "relative_path must not be empty".to_string(),
            ));
        }

        let mut session = self.warehouse.connect().await?;
        let result = self
            .dispatch_and_present(
                session.as_mut(),
                &request.relative_path,
                &prompt,
                &request.model,
                request.run_id.clone(),
                None,
                Vec::new(),
            )
            .await;
        close_session(session).await;

        result
    }

    /// Images currently in the stage, newest first.
    pub async fn staged_images(&self) -> AppResult<Vec<CatalogEntry>> {
        let mut session = self.warehouse.connect().await?;
        let result = self
            .catalog
            .list_images(session.as_mut(), &self.settings.supported_formats)
            .await;
        close_session(session).await;

        result
    }

    /// Open and close a session to prove credentials and connectivity.
    pub async fn check_warehouse(&self) -> AppResult<()> {
        let session = self.warehouse.connect().await?;
        session.close().await
    }

    async fn upload_and_analyze(
        &self,
        session: &mut dyn WarehouseSession,
        request: &AnalysisRequest,
        key: &str,
        prompt: &str,
    ) -> AppResult<AnalysisReport> {
        let mut warnings = Vec::new();

        let asset = self
            .placement
            .place(&request.submission, key, session)
            .await?;

        if let Some(warning) = self.catalog.refresh(session).await? {
            warnings.push(warning);
        }

        let resolved = self.catalog.resolve(session, &asset).await?;
        warnings.extend(resolved.warning);

        self.dispatch_and_present(
            session,
            &resolved.relative_path,
            prompt,
            &request.model,
            request.run_id.clone(),
            Some(asset),
            warnings,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_and_present(
        &self,
        session: &mut dyn WarehouseSession,
        relative_path: &str,
        prompt: &str,
        model: &str,
        run_id: Option<String>,
        asset: Option<StoredAsset>,
        mut warnings: Vec<String>,
    ) -> AppResult<AnalysisReport> {
        let result = self
            .dispatcher
            .dispatch(session, relative_path, prompt, model, run_id)
            .await?;

        warnings.extend(self.dispatcher.record(session, &result).await);

        let image_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        Ok(present(result, image_name, asset, warnings))
    }

    fn profile(&self, model: &str) -> AppResult<ModelProfile> {
        self.settings
            .profile(model)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown model '{}'", model)))
    }

    fn prompt(&self, prompt: Option<&str>) -> AppResult<String> {
        let prompt = match prompt {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => self.settings.default_prompt.clone(),
        };
        check_prompt_template(&prompt)?;
        Ok(prompt)
    }
}

/// Close a session; a failed close is logged since the request outcome is already known.
async fn close_session(session: Box<dyn WarehouseSession>) {
    if let Err(e) = session.close().await {
        warn!("Failed to close warehouse session: {}", e);
    }
}
