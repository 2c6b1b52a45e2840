use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::environment::DeploymentStage;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Deployment environment; anything other than "production" runs staging policy
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// ISO currency code all intents are opened in
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub currency: String,

    /// Smallest nonzero amount the gateway will charge, in minor units
    #[serde(default = "default_minimum_charge")]
    #[validate(range(min = 0))]
    pub minimum_charge: i64,

    pub gateway_base_url: String,
    #[serde(default)]
    pub gateway_secret_key: String,

    pub erp_base_url: String,
    #[serde(default)]
    pub erp_api_key: String,
    /// Secret used to sign outbound settlement bodies
    #[serde(default)]
    pub erp_signing_secret: Option<String>,
    #[serde(default = "default_erp_settlement_endpoint")]
    pub erp_settlement_endpoint: String,
    /// Secret the ERP uses to sign fulfillment callbacks
    #[serde(default)]
    pub erp_callback_secret: Option<String>,
    #[serde(default = "default_callback_tolerance_secs")]
    pub erp_callback_tolerance_secs: u64,

    #[serde(default)]
    pub notification_webhook_url: Option<String>,
    #[serde(default)]
    pub notification_webhook_secret: Option<String>,

    /// HS256 secret for customer bearer tokens
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Upper bound for every gateway/ERP/notification call
    #[serde(default = "default_external_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub external_timeout_secs: u64,

    /// Comma-separated list of allowed CORS origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

impl AppConfig {
    /// Configuration with every optional setting at its default.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            currency: default_currency(),
            minimum_charge: default_minimum_charge(),
            gateway_base_url: "http://localhost:12111".to_string(),
            gateway_secret_key: String::new(),
            erp_base_url: "http://localhost:9300".to_string(),
            erp_api_key: String::new(),
            erp_signing_secret: None,
            erp_settlement_endpoint: default_erp_settlement_endpoint(),
            erp_callback_secret: None,
            erp_callback_tolerance_secs: default_callback_tolerance_secs(),
            notification_webhook_url: None,
            notification_webhook_secret: None,
            jwt_secret,
            external_timeout_secs: default_external_timeout_secs(),
            cors_allowed_origins: None,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn stage(&self) -> DeploymentStage {
        if self.is_production() {
            DeploymentStage::Production
        } else {
            DeploymentStage::Staging
        }
    }

    pub fn external_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.external_timeout_secs)
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Production must talk to real collaborators with real credentials.
    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if !self.is_production() {
            return Ok(());
        }

        if self.gateway_secret_key.trim().is_empty() {
            let mut err = ValidationError::new("gateway_secret_key_required");
            err.message = Some("Set APP__GATEWAY_SECRET_KEY in production".into());
            errors.add("gateway_secret_key", err);
        }
        if self.erp_api_key.trim().is_empty() {
            let mut err = ValidationError::new("erp_api_key_required");
            err.message = Some("Set APP__ERP_API_KEY in production".into());
            errors.add("erp_api_key", err);
        }
        if self.erp_callback_secret.is_none() {
            let mut err = ValidationError::new("erp_callback_secret_required");
            err.message =
                Some("Fulfillment callbacks must be signed in production".into());
            errors.add("erp_callback_secret", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_minimum_charge() -> i64 {
    50
}

fn default_erp_settlement_endpoint() -> String {
    "orders".to_string()
}

fn default_callback_tolerance_secs() -> u64 {
    300
}

fn default_external_timeout_secs() -> u64 {
    10
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_currency(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("currency must be a three-letter ISO code".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("order_settlement={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. `config/default.*`
/// 3. `config/{RUN_ENV}.*`
/// 4. Environment variables (`APP__*`)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    let config = Config::builder()
        .set_default("database_url", "sqlite://settlement.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("gateway_base_url", "http://localhost:12111")?
        .set_default("erp_base_url", "http://localhost:9300")?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;
    app_config.validate_additional_constraints().map_err(|e| {
        error!("Production configuration is incomplete: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SECRET: &str = "a_test_secret_that_is_long_enough_for_hs256_use";

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            SECRET.into(),
            "production".into(),
        )
    }

    #[test]
    fn production_requires_collaborator_credentials() {
        let cfg = base_config();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("gateway_secret_key"));
        assert!(fields.contains_key("erp_api_key"));
        assert!(fields.contains_key("erp_callback_secret"));
    }

    #[test]
    fn staging_skips_production_constraints() {
        let mut cfg = base_config();
        cfg.environment = "staging".into();
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(cfg.stage(), DeploymentStage::Staging);
    }

    #[test]
    fn currency_and_timeouts_are_validated() {
        let mut cfg = base_config();
        cfg.currency = "dollars".into();
        cfg.external_timeout_secs = 0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("currency"));
        assert!(errors.field_errors().contains_key("external_timeout_secs"));
    }

    #[test]
    fn loads_layered_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            format!(
                "jwt_secret = \"{}\"\ncurrency = \"jpy\"\nminimum_charge = 0\n",
                SECRET
            ),
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            "erp_settlement_endpoint = \"sales-orders\"\n",
        )
        .unwrap();

        let cfg = load_config_from(dir.path(), "staging").unwrap();
        assert_eq!(cfg.currency, "jpy");
        assert_eq!(cfg.minimum_charge, 0);
        assert_eq!(cfg.erp_settlement_endpoint, "sales-orders");
        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.external_timeout_secs, 10);
    }

    #[test]
    fn missing_jwt_secret_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = load_config_from(dir.path(), "test-missing-secret");
        assert!(matches!(result, Err(AppConfigError::Load(_))));
    }
}
