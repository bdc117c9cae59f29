use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 30;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_NAMESPACE: &str = "parfum:rl";
const DEFAULT_PAYPAL_BASE_URL: &str = "https://api-m.sandbox.paypal.com";
pub const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Storefront-wide settings, loaded once at startup and handed to the services that need them.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SiteSettings {
    #[serde(default = "default_store_name")]
    pub store_name: String,

    /// Currency prices and order totals are expressed in (ISO 4217)
    #[serde(default = "default_display_currency")]
    #[validate(length(equal = 3))]
    pub display_currency: String,

    /// Currency the payment provider is charged in
    #[serde(default = "default_paypal_currency")]
    #[validate(length(equal = 3))]
    pub paypal_currency: String,

    /// Multiplier from display currency to PayPal currency
    #[serde(default = "default_paypal_exchange_rate")]
    #[validate(custom = "validate_exchange_rate")]
    pub paypal_exchange_rate: Decimal,

    #[serde(default = "default_language")]
    pub default_language: String,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            store_name: default_store_name(),
            display_currency: default_display_currency(),
            paypal_currency: default_paypal_currency(),
            paypal_exchange_rate: default_paypal_exchange_rate(),
            default_language: default_language(),
        }
    }
}

/// PayPal REST credentials and redirect targets
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PayPalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    /// Sandbox or live REST endpoint
    #[serde(default = "default_paypal_base_url")]
    pub base_url: String,

    /// Outbound request timeout; calls are never retried
    #[serde(default = "default_paypal_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    #[serde(default = "default_paypal_return_url")]
    pub return_url: String,

    #[serde(default = "default_paypal_cancel_url")]
    pub cancel_url: String,
}

impl Default for PayPalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            client_id: None,
            client_secret: None,
            base_url: default_paypal_base_url(),
            timeout_secs: default_paypal_timeout_secs(),
            return_url: default_paypal_return_url(),
            cancel_url: default_paypal_cancel_url(),
        }
    }
}

impl PayPalConfig {
    pub fn has_credentials(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        filled(&self.client_id) && filled(&self.client_secret)
    }
}

/// Contact and sample-request intake heuristics
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct IntakeConfig {
    /// Trailing window for duplicate detection, in days
    #[serde(default = "default_duplicate_window_days")]
    #[validate(range(min = 1, max = 365))]
    pub duplicate_window_days: i64,

    /// Score at or above which a contact message is auto-closed
    #[serde(default = "default_spam_threshold")]
    #[validate(range(min = 1))]
    pub spam_threshold: u32,

    /// Distinct links tolerated before the link signal fires
    #[serde(default = "default_link_threshold")]
    pub link_threshold: usize,

    #[serde(default = "default_hourly_limit")]
    pub hourly_limit: u64,

    #[serde(default = "default_daily_limit")]
    pub daily_limit: u64,

    #[serde(default = "default_suspicious_domains")]
    pub suspicious_domains: Vec<String>,

    #[serde(default = "default_spam_keywords")]
    pub spam_keywords: Vec<String>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            duplicate_window_days: default_duplicate_window_days(),
            spam_threshold: default_spam_threshold(),
            link_threshold: default_link_threshold(),
            hourly_limit: default_hourly_limit(),
            daily_limit: default_daily_limit(),
            suspicious_domains: default_suspicious_domains(),
            spam_keywords: default_spam_keywords(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (rate limiter backend, optional)
    pub redis_url: String,

    /// JWT secret key (minimum 64 characters)
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    #[validate(range(min = 300, max = 86400))]
    pub jwt_expiration: usize,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
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

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool sizing and timeouts (seconds)
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

    /// Whole-request timeout applied by the HTTP stack
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Public-route rate limiting: requests per window per client IP
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests_per_window: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_seconds: u64,
    #[serde(default = "default_true_bool")]
    pub rate_limit_enable_headers: bool,
    #[serde(default)]
    pub rate_limit_use_redis: bool,
    #[serde(default = "default_rate_limit_namespace")]
    pub rate_limit_namespace: String,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// JWT issuer and audience checked on admin tokens
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,
    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    #[serde(default)]
    #[validate]
    pub site: SiteSettings,

    #[serde(default)]
    #[validate]
    pub paypal: PayPalConfig,

    #[serde(default)]
    #[validate]
    pub intake: IntakeConfig,
}

impl AppConfig {
    /// Creates a new configuration with every optional section at its default
    pub fn new(
        database_url: String,
        redis_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            redis_url,
            jwt_secret,
            jwt_expiration,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            rate_limit_requests_per_window: default_rate_limit_requests(),
            rate_limit_window_seconds: default_rate_limit_window_secs(),
            rate_limit_enable_headers: default_true_bool(),
            rate_limit_use_redis: false,
            rate_limit_namespace: default_rate_limit_namespace(),
            event_channel_capacity: default_event_channel_capacity(),
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            site: SiteSettings::default(),
            paypal: PayPalConfig::default(),
            intake: IntakeConfig::default(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub(crate) fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.paypal.enabled && !self.paypal.has_credentials() {
            let mut err = ValidationError::new("paypal_credentials_required");
            err.message = Some(
                "PayPal is enabled but APP__PAYPAL__CLIENT_ID / APP__PAYPAL__CLIENT_SECRET are missing"
                    .into(),
            );
            errors.add("paypal", err);
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
    Validation(#[from] validator::ValidationErrors),
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
fn default_request_timeout_secs() -> u64 {
    30
}

fn default_rate_limit_requests() -> u32 {
    DEFAULT_RATE_LIMIT_REQUESTS
}
fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}
fn default_rate_limit_namespace() -> String {
    DEFAULT_RATE_LIMIT_NAMESPACE.to_string()
}
fn default_true_bool() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_auth_issuer() -> String {
    "parfum-api".to_string()
}

fn default_auth_audience() -> String {
    "parfum-admin".to_string()
}

fn default_store_name() -> String {
    "Maison Parfum".to_string()
}
fn default_display_currency() -> String {
    "MAD".to_string()
}
fn default_paypal_currency() -> String {
    "USD".to_string()
}
fn default_paypal_exchange_rate() -> Decimal {
    dec!(0.10)
}
fn default_language() -> String {
    "fr".to_string()
}

fn default_paypal_base_url() -> String {
    DEFAULT_PAYPAL_BASE_URL.to_string()
}
fn default_paypal_timeout_secs() -> u64 {
    15
}
fn default_paypal_return_url() -> String {
    "http://localhost:3000/checkout/success".to_string()
}
fn default_paypal_cancel_url() -> String {
    "http://localhost:3000/checkout/cancel".to_string()
}

fn default_duplicate_window_days() -> i64 {
    30
}
fn default_spam_threshold() -> u32 {
    50
}
fn default_link_threshold() -> usize {
    3
}
fn default_hourly_limit() -> u64 {
    3
}
fn default_daily_limit() -> u64 {
    10
}
fn default_suspicious_domains() -> Vec<String> {
    [
        "mailinator.com",
        "tempmail.com",
        "guerrillamail.com",
        "10minutemail.com",
        "yopmail.com",
        "trashmail.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_spam_keywords() -> Vec<String> {
    [
        "viagra", "casino", "crypto", "bitcoin", "lottery", "loan", "seo services", "winner",
        "forex",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Validates log level values
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

fn validate_exchange_rate(rate: &Decimal) -> Result<(), ValidationError> {
    if rate.is_sign_negative() || rate.is_zero() {
        let mut err = ValidationError::new("paypal_exchange_rate");
        err.message = Some("paypal_exchange_rate must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 64 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must be at least 64 characters for adequate security".into());
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
    let weak_fragments = ["changeme", "password", "12345", "abcdef"];
    if weak_fragments.iter().any(|pattern| lower.contains(pattern)) {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some(
            "JWT secret appears to be weak; use a cryptographically strong random string".into(),
        );
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("parfum_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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

    // jwt_secret has no default; it must come from a file or APP__JWT_SECRET.
    let config = Config::builder()
        .set_default("database_url", "sqlite://parfum.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET to a secure random string (minimum 64 characters).");
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

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!(
        environment = %app_config.environment,
        paypal_enabled = app_config.paypal.enabled,
        "Configuration loaded successfully"
    );
    Ok(app_config)
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite://parfum.db?mode=memory".into(),
            "redis://127.0.0.1:6379".into(),
            "k3Jq9vXw2LmP8rTz5NbY7cHd4FgS6aUe1WiO0pQx-Rt_Vy.Zu!Mn@Lk#Jh$Gf%Ds^Aq&".into(),
            3600,
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_allows_override_flag() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://parfum.example".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn dev_secret_rejected_outside_development() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.into();
        let errs = cfg.validate_additional_constraints().unwrap_err();
        assert!(errs.field_errors().contains_key("jwt_secret"));

        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn enabled_paypal_needs_credentials() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.paypal.enabled = true;
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.paypal.client_id = Some("client".into());
        cfg.paypal.client_secret = Some("secret".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn defaults_pass_field_validation() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.intake.spam_threshold, 50);
        assert_eq!(cfg.intake.duplicate_window_days, 30);
    }

    #[test]
    fn weak_secrets_are_rejected() {
        assert!(validate_jwt_secret("short").is_err());
        assert!(validate_jwt_secret(&"a".repeat(80)).is_err());
        assert!(validate_jwt_secret(&format!("{}password", "x1y2z3".repeat(12))).is_err());
    }

    #[test]
    fn exchange_rate_must_be_positive() {
        assert!(validate_exchange_rate(&dec!(0)).is_err());
        assert!(validate_exchange_rate(&dec!(-1.2)).is_err());
        assert!(validate_exchange_rate(&dec!(0.1)).is_ok());
    }
}
