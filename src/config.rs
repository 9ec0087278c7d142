use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";

/// Application configuration, layered from defaults, config files and `APP__*` variables
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL (postgres:// or sqlite://)
    pub database_url: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development, staging, production)
    #[validate(length(min = 1))]
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format
    #[serde(default)]
    pub log_json: bool,

    /// Run embedded migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// HS256 secret used to verify bearer tokens
    #[validate(custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Payment gateway REST base URL
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Gateway API key id (basic auth user)
    #[serde(default)]
    pub gateway_key_id: String,

    /// Gateway API key secret; also signs client-side payment confirmations
    #[serde(default)]
    pub gateway_key_secret: String,

    /// Shared secret for webhook body signatures
    #[serde(default)]
    pub payment_webhook_secret: String,

    #[serde(default = "default_reaper_interval_secs")]
    #[validate(custom = "validate_positive_secs")]
    pub reaper_interval_secs: u64,

    /// Age after which an unpaid PENDING order is cancelled
    #[serde(default = "default_pending_order_ttl_secs")]
    #[validate(custom = "validate_positive_secs")]
    pub pending_order_ttl_secs: u64,

    #[serde(default = "default_promo_cache_ttl_secs")]
    pub promo_cache_ttl_secs: u64,

    #[serde(default = "default_promo_cache_capacity")]
    #[validate(custom = "validate_non_zero_capacity")]
    pub promo_cache_capacity: usize,

    #[serde(default = "default_max_items_per_order")]
    #[validate(custom = "validate_non_zero_capacity")]
    pub max_items_per_order: usize,

    #[serde(default = "default_max_membership_months")]
    #[validate(range(min = 1, max = 120))]
    pub max_membership_months: u32,

    /// Capacity of the domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_non_zero_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default = "default_email_from")]
    pub email_from: String,

    #[serde(default = "default_support_email")]
    pub support_email: String,
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl AppConfig {
    /// Builds a configuration with defaults for everything except the essentials.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            jwt_secret,
            gateway_base_url: default_gateway_base_url(),
            gateway_key_id: String::new(),
            gateway_key_secret: String::new(),
            payment_webhook_secret: String::new(),
            reaper_interval_secs: default_reaper_interval_secs(),
            pending_order_ttl_secs: default_pending_order_ttl_secs(),
            promo_cache_ttl_secs: default_promo_cache_ttl_secs(),
            promo_cache_capacity: default_promo_cache_capacity(),
            max_items_per_order: default_max_items_per_order(),
            max_membership_months: default_max_membership_months(),
            event_channel_capacity: default_event_channel_capacity(),
            email_from: default_email_from(),
            support_email: default_support_email(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn pending_order_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_order_ttl_secs)
    }

    pub fn promo_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.promo_cache_ttl_secs)
    }

    /// Secrets that must be present outside development.
    fn validate_payment_secrets(&self) -> Result<(), ValidationError> {
        if !self.is_production() {
            return Ok(());
        }
        if self.gateway_key_secret.trim().is_empty()
            || self.payment_webhook_secret.trim().is_empty()
        {
            let mut err = ValidationError::new("payment_secrets");
            err.message = Some(
                "gateway_key_secret and payment_webhook_secret are required in production".into(),
            );
            return Err(err);
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_db_max_connections() -> u32 {
    20
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    10
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_gateway_base_url() -> String {
    "https://api.razorpay.com".to_string()
}
fn default_reaper_interval_secs() -> u64 {
    120
}
fn default_pending_order_ttl_secs() -> u64 {
    120
}
fn default_promo_cache_ttl_secs() -> u64 {
    300
}
fn default_promo_cache_capacity() -> usize {
    100
}
fn default_max_items_per_order() -> usize {
    50
}
fn default_max_membership_months() -> u32 {
    12
}
fn default_event_channel_capacity() -> usize {
    1024
}
fn default_email_from() -> String {
    "no-reply@storefront.local".to_string()
}
fn default_support_email() -> String {
    "support@storefront.local".to_string()
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

fn validate_positive_secs(secs: u64) -> Result<(), ValidationError> {
    if secs == 0 {
        let mut err = ValidationError::new("interval");
        err.message = Some("interval must be at least one second".into());
        return Err(err);
    }
    Ok(())
}

fn validate_non_zero_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("capacity");
        err.message = Some("capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 32 {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be at least 32 characters".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    if ["changeme", "password", "your-secret-key"]
        .iter()
        .any(|weak| lower.contains(weak))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret appears to be a placeholder".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("storefront_api={},tower_http=debug", level));

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. `config/default.toml`
/// 3. `config/{RUN_ENV}.toml`
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // jwt_secret has no default on purpose
    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    if let Err(e) = app_config.validate_payment_secrets() {
        error!("Configuration validation failed: {:?}", e);
        let mut errors = validator::ValidationErrors::new();
        errors.add("payment_secrets", e);
        return Err(AppConfigError::Validation(errors));
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}
