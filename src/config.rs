//! Application configuration loaded from environment variables.
//!
//! The configuration is built once at startup and handed to each component at
//! construction time. Nothing reads the environment after `Config::from_env` returns.

use std::env;
use std::str::FromStr;

use secrecy::SecretString;

use crate::models::{ConstraintClass, ModelProfile};
use crate::services::placement::sanitize_segment;

/// Development default values - NEVER use in production.
pub mod defaults {
    pub const DEV_HOST: &str = "127.0.0.1";
    pub const DEV_PORT: u16 = 8080;
    pub const DEV_MAX_UPLOAD_SIZE: usize = 20_971_520; // 20MB per multipart request

    // S3/MinIO defaults for development
    pub const DEV_S3_ENDPOINT: &str = "http://localhost:9100";
    pub const DEV_S3_BUCKET: &str = "construction-building-defects";
    pub const DEV_S3_REGION: &str = "us-east-1";
    pub const DEV_S3_ACCESS_KEY: &str = "minioadmin";
    pub const DEV_S3_SECRET_KEY: &str = "minioadmin";

    // Warehouse defaults for development
    pub const DEV_WAREHOUSE_URL: &str = "http://localhost:8085";
    pub const DEV_WAREHOUSE_ACCOUNT: &str = "dev-account";
    pub const DEV_WAREHOUSE_USER: &str = "dev-user";
    pub const DEV_WAREHOUSE_STAGE: &str = "input_stage";

    // Model constraint profile
    pub const SUPPORTED_FORMATS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
    pub const MAX_SIZE_MB_GENERAL: f64 = 10.0;
    pub const MAX_SIZE_MB_STRICT: f64 = 3.75;
    pub const MAX_RESOLUTION_STRICT: u32 = 8000;
    pub const KEY_PREFIX: &str = "images";

    pub const STRICT_MODELS: &[&str] = &[
        "claude-3.5-sonnet",
        "claude-3.7-sonnet",
        "claude-4-sonnet",
        "claude-4-opus",
    ];

    pub const MODELS: &[(&str, &[&str])] = &[
        ("OpenAI", &["openai-gpt-4.1", "openai-o4-mini"]),
        (
            "Anthropic (Claude)",
            &[
                "claude-3.5-sonnet",
                "claude-3.7-sonnet",
                "claude-4-sonnet",
                "claude-4-opus",
            ],
        ),
        ("Meta (Llama)", &["llama4-maverick", "llama4-scout"]),
        ("Mistral", &["pixtral-large"]),
    ];

    pub const DEFAULT_PROMPT: &str = "Describe the key characteristics of this wall as seen in this image {0}, noting this is part of a building. Keep descriptions concise and focus on structural defects. Respond in JSON with fields: material, colour, distinguishing_features, is_cracked, is_defective, defect_severity, defects, repairs_required, estimated_time_repairs_required, confidence_level_on_material, estimated_cost_of_repairs";
}

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Parse environment from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// S3 storage configuration (the blob container).
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 endpoint URL (for MinIO or custom S3-compatible services)
    pub endpoint: Option<String>,
    /// Bucket holding the uploaded images
    pub bucket: String,
    pub region: String,
    /// Access key ID; absent means uploads fail with a setup error
    pub access_key: Option<String>,
    pub secret_key: Option<SecretString>,
}

/// How the service authenticates to the warehouse.
#[derive(Debug, Clone)]
pub enum WarehouseAuth {
    Password(SecretString),
    /// Alternate authenticator: a pre-issued OAuth access token.
    OAuthToken(SecretString),
    Missing,
}

/// Warehouse connection parameters.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Base URL of the warehouse REST endpoint (derived from the account when unset)
    pub base_url: String,
    pub account: String,
    pub user: String,
    pub auth: WarehouseAuth,
    pub role: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    /// External stage the blob container is mounted as
    pub stage: String,
}

/// Where validated images are placed before analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementKind {
    /// Object store backing an external stage.
    Blob,
    /// Internal stage written through the warehouse session.
    Stage,
}

impl PlacementKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "blob" | "s3" => Some(Self::Blob),
            "stage" => Some(Self::Stage),
            _ => None,
        }
    }
}

/// Behavior when the directory index has no entry for a just-uploaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFallback {
    /// Use the computed destination key and attach a warning.
    Lenient,
    /// Fail the request before dispatching the analysis query.
    Strict,
}

impl CatalogFallback {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "lenient" => Some(Self::Lenient),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Models offered by one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderModels {
    pub provider: String,
    pub models: Vec<String>,
}

/// Validation limits and the selectable model catalog.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Lower-case extensions without the leading dot
    pub supported_formats: Vec<String>,
    pub max_size_mb_general: f64,
    pub max_size_mb_strict: f64,
    /// Applies to both axes
    pub max_resolution_strict: u32,
    pub strict_models: Vec<String>,
    pub providers: Vec<ProviderModels>,
    pub default_prompt: String,
}

impl AnalysisSettings {
    /// Look up the constraint profile of a selectable model.
    pub fn profile(&self, model: &str) -> Option<ModelProfile> {
        self.providers.iter().find_map(|p| {
            p.models.iter().any(|m| m == model).then(|| ModelProfile {
                name: model.to_string(),
                provider: p.provider.clone(),
                class: self.class_of(model),
            })
        })
    }

    /// Constraint class of a model name; unknown names are general-class.
    pub fn class_of(&self, model: &str) -> ConstraintClass {
        if self.strict_models.iter().any(|m| m == model) {
            ConstraintClass::Stricter
        } else {
            ConstraintClass::General
        }
    }

    /// Size threshold in megabytes for a constraint class.
    pub fn max_size_mb(&self, class: ConstraintClass) -> f64 {
        match class {
            ConstraintClass::Stricter => self.max_size_mb_strict,
            ConstraintClass::General => self.max_size_mb_general,
        }
    }
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            supported_formats: defaults::SUPPORTED_FORMATS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_size_mb_general: defaults::MAX_SIZE_MB_GENERAL,
            max_size_mb_strict: defaults::MAX_SIZE_MB_STRICT,
            max_resolution_strict: defaults::MAX_RESOLUTION_STRICT,
            strict_models: defaults::STRICT_MODELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            providers: defaults::MODELS
                .iter()
                .map(|(provider, models)| ProviderModels {
                    provider: provider.to_string(),
                    models: models.iter().map(|m| m.to_string()).collect(),
                })
                .collect(),
            default_prompt: defaults::DEFAULT_PROMPT.to_string(),
        }
    }
}

/// Pipeline behavior switches.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub placement: PlacementKind,
    /// First segment of every destination key
    pub key_prefix: String,
    /// Insert a random token into destination keys
    pub unique_keys: bool,
    pub catalog_fallback: CatalogFallback,
    /// Append-only table receiving each successful result
    pub audit_table: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            placement: PlacementKind::Blob,
            key_prefix: defaults::KEY_PREFIX.to_string(),
            unique_keys: false,
            catalog_fallback: CatalogFallback::Lenient,
            audit_table: None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    /// Maximum multipart request size in bytes (default: 20MB)
    pub max_upload_size: usize,
    pub analysis: AnalysisSettings,
    pub pipeline: PipelineSettings,
    pub s3: S3Config,
    pub warehouse: WarehouseConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In development mode (RUST_ENV=development) every variable has a default
    /// pointing at local MinIO and a local warehouse endpoint.
    ///
    /// In production mode (RUST_ENV=production) the server will NOT start if
    /// storage or warehouse settings still use development defaults.
    ///
    /// Environment variables:
    /// - `RUST_ENV`: Environment (development/production) - REQUIRED
    /// - `DEFECT_HOST` / `DEFECT_PORT`: bind address (default: 127.0.0.1:8080)
    /// - `DEFECT_MAX_UPLOAD_SIZE`: max multipart size in bytes (default: 20MB)
    /// - `DEFECT_PLACEMENT`: `blob` or `stage` (default: blob)
    /// - `DEFECT_KEY_PREFIX`: destination key prefix (default: images)
    /// - `DEFECT_UNIQUE_KEYS`: add a random token to keys (default: false)
    /// - `DEFECT_CATALOG_FALLBACK`: `lenient` or `strict` (default: lenient)
    /// - `DEFECT_AUDIT_TABLE`: optional audit table name
    /// - `DEFECT_MAX_SIZE_MB_GENERAL` / `DEFECT_MAX_SIZE_MB_STRICT`: size limits
    /// - `DEFECT_MAX_RESOLUTION_STRICT`: pixel limit for stricter-class models
    /// - `DEFECT_SUPPORTED_FORMATS`: comma-separated extensions
    /// - `DEFECT_STRICT_MODELS`: comma-separated stricter-class model names
    /// - `DEFECT_MODELS`: `Provider=model,model;Provider=model`
    /// - `S3_ENDPOINT`, `S3_BUCKET`, `S3_REGION`, `S3_ACCESS_KEY`, `S3_SECRET_KEY`
    /// - `WAREHOUSE_ACCOUNT`, `WAREHOUSE_URL`, `WAREHOUSE_USER`, `WAREHOUSE_PASSWORD`,
    ///   `WAREHOUSE_TOKEN`, `WAREHOUSE_ROLE`, `WAREHOUSE_NAME`, `WAREHOUSE_DATABASE`,
    ///   `WAREHOUSE_SCHEMA`, `WAREHOUSE_STAGE`
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_str = env::var("RUST_ENV").map_err(|_| ConfigError::MissingEnvVar("RUST_ENV"))?;

        let environment = Environment::parse(&env_str).ok_or(ConfigError::InvalidValue(
            "RUST_ENV must be 'development' or 'production'",
        ))?;

        let host = env::var("DEFECT_HOST").unwrap_or_else(|_| defaults::DEV_HOST.to_string());
        let port = parse_var(
            "DEFECT_PORT",
            defaults::DEV_PORT,
            "DEFECT_PORT must be a valid port number",
        )?;
        let max_upload_size = parse_var(
            "DEFECT_MAX_UPLOAD_SIZE",
            defaults::DEV_MAX_UPLOAD_SIZE,
            "DEFECT_MAX_UPLOAD_SIZE must be a valid number",
        )?;

        let analysis = Self::analysis_from_env()?;
        let pipeline = Self::pipeline_from_env()?;

        let s3 = S3Config {
            endpoint: env::var("S3_ENDPOINT").ok().or_else(|| {
                environment
                    .is_development()
                    .then(|| defaults::DEV_S3_ENDPOINT.to_string())
            }),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| defaults::DEV_S3_BUCKET.to_string()),
            region: env::var("S3_REGION").unwrap_or_else(|_| defaults::DEV_S3_REGION.to_string()),
            access_key: env::var("S3_ACCESS_KEY").ok().or_else(|| {
                environment
                    .is_development()
                    .then(|| defaults::DEV_S3_ACCESS_KEY.to_string())
            }),
            secret_key: env::var("S3_SECRET_KEY")
                .ok()
                .or_else(|| {
                    environment
                        .is_development()
                        .then(|| defaults::DEV_S3_SECRET_KEY.to_string())
                })
                .map(SecretString::from),
        };

        let warehouse = Self::warehouse_from_env(environment)?;

        let config = Config {
            environment,
            host,
            port,
            max_upload_size,
            analysis,
            pipeline,
            s3,
            warehouse,
        };

        if environment.is_production() {
            config.validate_production()?;
        }

        Ok(config)
    }

    fn analysis_from_env() -> Result<AnalysisSettings, ConfigError> {
        let base = AnalysisSettings::default();

        let supported_formats = match env::var("DEFECT_SUPPORTED_FORMATS") {
            Ok(raw) => split_list(&raw)
                .into_iter()
                .map(|f| f.trim_start_matches('.').to_lowercase())
                .collect(),
            Err(_) => base.supported_formats,
        };
        let strict_models = match env::var("DEFECT_STRICT_MODELS") {
            Ok(raw) => split_list(&raw),
            Err(_) => base.strict_models,
        };
        let providers = match env::var("DEFECT_MODELS") {
            Ok(raw) => parse_model_catalog(&raw)?,
            Err(_) => base.providers,
        };

        let settings = AnalysisSettings {
            supported_formats,
            max_size_mb_general: parse_var(
                "DEFECT_MAX_SIZE_MB_GENERAL",
                defaults::MAX_SIZE_MB_GENERAL,
                "DEFECT_MAX_SIZE_MB_GENERAL must be a number of megabytes",
            )?,
            max_size_mb_strict: parse_var(
                "DEFECT_MAX_SIZE_MB_STRICT",
                defaults::MAX_SIZE_MB_STRICT,
                "DEFECT_MAX_SIZE_MB_STRICT must be a number of megabytes",
            )?,
            max_resolution_strict: parse_var(
                "DEFECT_MAX_RESOLUTION_STRICT",
                defaults::MAX_RESOLUTION_STRICT,
                "DEFECT_MAX_RESOLUTION_STRICT must be a pixel count",
            )?,
            strict_models,
            providers,
            default_prompt: base.default_prompt,
        };

        if settings.supported_formats.is_empty() {
            return Err(ConfigError::InvalidValue(
                "DEFECT_SUPPORTED_FORMATS must list at least one extension",
            ));
        }

        Ok(settings)
    }

    fn pipeline_from_env() -> Result<PipelineSettings, ConfigError> {
        let base = PipelineSettings::default();

        let placement = match env::var("DEFECT_PLACEMENT") {
            Ok(raw) => PlacementKind::parse(&raw).ok_or(ConfigError::InvalidValue(
                "DEFECT_PLACEMENT must be 'blob' or 'stage'",
            ))?,
            Err(_) => base.placement,
        };
        let catalog_fallback = match env::var("DEFECT_CATALOG_FALLBACK") {
            Ok(raw) => CatalogFallback::parse(&raw).ok_or(ConfigError::InvalidValue(
                "DEFECT_CATALOG_FALLBACK must be 'lenient' or 'strict'",
            ))?,
            Err(_) => base.catalog_fallback,
        };

        let key_prefix = match env::var("DEFECT_KEY_PREFIX") {
            Ok(raw) => clean_key_prefix(&raw)?,
            Err(_) => base.key_prefix,
        };

        let audit_table = env::var("DEFECT_AUDIT_TABLE")
            .ok()
            .filter(|t| !t.trim().is_empty());
        if let Some(ref table) = audit_table {
            ensure_identifier("DEFECT_AUDIT_TABLE", table)?;
        }

        Ok(PipelineSettings {
            placement,
            key_prefix,
            unique_keys: parse_var(
                "DEFECT_UNIQUE_KEYS",
                base.unique_keys,
                "DEFECT_UNIQUE_KEYS must be 'true' or 'false'",
            )?,
            catalog_fallback,
            audit_table,
        })
    }

    fn warehouse_from_env(environment: Environment) -> Result<WarehouseConfig, ConfigError> {
        let account = env::var("WAREHOUSE_ACCOUNT")
            .unwrap_or_else(|_| defaults::DEV_WAREHOUSE_ACCOUNT.to_string());

        let base_url = match env::var("WAREHOUSE_URL") {
            Ok(url) => url.trim_end_matches('/').to_string(),
            Err(_) if environment.is_development() => defaults::DEV_WAREHOUSE_URL.to_string(),
            Err(_) => format!("https://{}.snowflakecomputing.com", account),
        };

        // A token selects the alternate authenticator; otherwise fall back to password
        let auth = match (env::var("WAREHOUSE_TOKEN"), env::var("WAREHOUSE_PASSWORD")) {
            (Ok(token), _) => WarehouseAuth::OAuthToken(SecretString::from(token)),
            (Err(_), Ok(password)) => WarehouseAuth::Password(SecretString::from(password)),
            _ => WarehouseAuth::Missing,
        };

        let stage = env::var("WAREHOUSE_STAGE")
            .unwrap_or_else(|_| defaults::DEV_WAREHOUSE_STAGE.to_string());
        ensure_identifier("WAREHOUSE_STAGE", &stage)?;

        Ok(WarehouseConfig {
            base_url,
            account,
            user: env::var("WAREHOUSE_USER")
                .unwrap_or_else(|_| defaults::DEV_WAREHOUSE_USER.to_string()),
            auth,
            role: env::var("WAREHOUSE_ROLE").ok(),
            warehouse: env::var("WAREHOUSE_NAME").ok(),
            database: env::var("WAREHOUSE_DATABASE").ok(),
            schema: env::var("WAREHOUSE_SCHEMA").ok(),
            stage,
        })
    }

    /// Validate that production configuration does not use development defaults.
    fn validate_production(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.s3.access_key.as_deref() == Some(defaults::DEV_S3_ACCESS_KEY) {
            errors.push(
                "S3_ACCESS_KEY/S3_SECRET_KEY are using development defaults. Set production S3 credentials."
                    .to_string(),
            );
        }

        if self.warehouse.account == defaults::DEV_WAREHOUSE_ACCOUNT {
            errors.push("WAREHOUSE_ACCOUNT is not set. Set the warehouse account identifier.".to_string());
        }

        if self.warehouse.user == defaults::DEV_WAREHOUSE_USER {
            errors.push("WAREHOUSE_USER is not set. Set the warehouse login name.".to_string());
        }

        if matches!(self.warehouse.auth, WarehouseAuth::Missing) {
            errors.push("Set WAREHOUSE_PASSWORD or WAREHOUSE_TOKEN for warehouse authentication.".to_string());
        }

        if !errors.is_empty() {
            return Err(ConfigError::ProductionValidation(errors));
        }

        Ok(())
    }

    /// Get the server bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment.is_development()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(&'static str),

    #[error("Invalid configuration value for {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("Production configuration validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    ProductionValidation(Vec<String>),
}

/// Read and parse an optional variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T, message: &'static str) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(message)),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `Provider=model,model;Provider=model` into the model catalog.
pub fn parse_model_catalog(raw: &str) -> Result<Vec<ProviderModels>, ConfigError> {
    let mut providers = Vec::new();

    for group in raw.split(';').map(str::trim).filter(|g| !g.is_empty()) {
        let (provider, models) = group
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidSetting {
                name: "DEFECT_MODELS",
                reason: format!("'{}' is not in Provider=model,model form", group),
            })?;

        let models = split_list(models);
        if models.is_empty() {
            return Err(ConfigError::InvalidSetting {
                name: "DEFECT_MODELS",
                reason: format!("provider '{}' lists no models", provider.trim()),
            });
        }

        providers.push(ProviderModels {
            provider: provider.trim().to_string(),
            models,
        });
    }

    if providers.is_empty() {
        return Err(ConfigError::InvalidValue(
            "DEFECT_MODELS must list at least one provider",
        ));
    }

    Ok(providers)
}

/// Object names are spliced into statements unquoted, so only plain identifiers pass.
/// Reduce a key prefix to path-safe segments.
///
/// Each `/`-separated segment is cleaned like a filename stem; empty segments are dropped.
/// A prefix that had content but cleans to nothing is rejected.
fn clean_key_prefix(raw: &str) -> Result<String, ConfigError> {
    let cleaned = raw
        .split('/')
        .map(sanitize_segment)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if cleaned.is_empty() && !raw.trim_matches('/').trim().is_empty() {
        return Err(ConfigError::InvalidSetting {
            name: "DEFECT_KEY_PREFIX",
            reason: format!("'{}' has no letters or digits", raw),
        });
    }
    Ok(cleaned)
}

fn ensure_identifier(name: &'static str, value: &str) -> Result<(), ConfigError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'));

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidSetting {
            name,
            reason: format!("'{}' is not a plain object identifier", value),
        })
    }
}
