use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::{error, info};
use validator::Validate;

const CONFIG_DIR: &str = "config";
const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";

fn default_currency() -> String {
    "BRL".to_string()
}

fn default_email_from() -> String {
    "GolClub <noreply@golclub.com.br>".to_string()
}

fn default_mercado_pago_base_url() -> String {
    "https://api.mercadopago.com".to_string()
}

fn default_resend_base_url() -> String {
    "https://api.resend.com".to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

fn default_reconciler_interval_secs() -> u64 {
    60
}

fn default_reconciler_batch_size() -> u64 {
    50
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(length(min = 1, message = "database_url must not be empty"))]
    pub database_url: String,

    pub host: String,
    pub port: u16,

    /// development | staging | production
    pub environment: String,

    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,

    /// Run embedded migrations on startup.
    #[serde(default)]
    pub auto_migrate: bool,

    #[validate(length(min = 32, message = "jwt_secret must be at least 32 characters"))]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: i64,

    /// Comma-separated origins, or "*" outside production.
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// Mercado Pago access token. Absent means the gateway is unconfigured
    /// and checkout fails with a configuration error, not a panic.
    #[serde(default)]
    pub mercado_pago_access_token: Option<String>,
    #[serde(default = "default_mercado_pago_base_url")]
    pub mercado_pago_base_url: String,

    /// Secret for Mercado Pago webhook signature verification. Absent means
    /// webhook deliveries are rejected.
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,
    #[serde(default = "default_webhook_tolerance_secs")]
    pub payment_webhook_tolerance_secs: u64,

    #[serde(default = "default_reconciler_interval_secs")]
    pub reconciler_interval_secs: u64,
    #[serde(default = "default_reconciler_batch_size")]
    pub reconciler_batch_size: u64,

    /// Resend API key; absent means order emails are skipped.
    #[serde(default)]
    pub resend_api_key: Option<String>,
    #[serde(default = "default_resend_base_url")]
    pub resend_base_url: String,
    #[serde(default = "default_email_from")]
    pub email_from: String,
}

fn default_jwt_expiration() -> i64 {
    3600
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Config suitable for tests: in-memory SQLite, throwaway secrets, no
    /// external services configured.
    pub fn new_for_test() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            log_level: "debug".to_string(),
            log_json: false,
            auto_migrate: true,
            jwt_secret: "test-secret-test-secret-test-secret-test".to_string(),
            jwt_expiration: 3600,
            cors_allowed_origins: None,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: 5,
            request_timeout_secs: 30,
            currency: default_currency(),
            mercado_pago_access_token: None,
            mercado_pago_base_url: default_mercado_pago_base_url(),
            payment_webhook_secret: Some("test-webhook-secret".to_string()),
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            reconciler_interval_secs: default_reconciler_interval_secs(),
            reconciler_batch_size: default_reconciler_batch_size(),
            resend_api_key: None,
            resend_base_url: default_resend_base_url(),
            email_from: default_email_from(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

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

    // jwt_secret deliberately has no default; it must come from a config
    // file or APP__JWT_SECRET.
    let builder = Config::builder()
        .set_default("database_url", "sqlite://golclub.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("auto_migrate", true)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET with a secure random string.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter))
            .json()
            .try_init();
    } else {
        let _ = fmt().with_env_filter(EnvFilter::new(filter)).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_usable() {
        let cfg = AppConfig::new_for_test();
        assert!(cfg.validate().is_ok());
        assert!(!cfg.is_production());
        assert_eq!(cfg.currency, "BRL");
        assert_eq!(cfg.server_addr(), "127.0.0.1:0");
    }

    #[test]
    fn short_jwt_secret_fails_validation() {
        let mut cfg = AppConfig::new_for_test();
        cfg.jwt_secret = "short".to_string();
        assert!(cfg.validate().is_err());
    }
}
