use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "CHECKOUT";
const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/v1/";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_COUNTDOWN_SECS: u64 = 300;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_RETURN_URL: &str = "storefront://checkout/return";
const DEFAULT_CANCEL_URL: &str = "storefront://checkout/cancel";
const DEFAULT_FREE_SHIPPING_THRESHOLD: i64 = 500_000;
const DEFAULT_SHIPPING_FEE: i64 = 30_000;
const DEFAULT_MAX_REDEMPTION: i64 = 100_000;
const DEFAULT_POINT_VALUE: i64 = 1;
const DEFAULT_MAX_LINE_QUANTITY: i64 = crate::models::cart::MAX_LINE_QUANTITY;
const DEFAULT_CURRENCY: &str = crate::backend::wire::DEFAULT_CURRENCY;
const DEFAULT_SUCCESS_STATUSES: [&str; 5] =
    ["paid", "success", "succeeded", "completed", "confirmed"];
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Backend connection settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// Base URL of the storefront REST API
    #[serde(default = "default_base_url")]
    #[validate(url)]
    pub base_url: String,

    /// Bearer token of the signed-in shopper
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Payment session timing and redirect targets
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Seconds the shopper has to pay once the payment link is issued
    #[serde(default = "default_countdown_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub countdown_secs: u64,

    /// Seconds between payment status queries
    #[serde(default = "default_poll_interval_secs")]
    #[validate(range(min = 1, max = 300))]
    pub poll_interval_secs: u64,

    /// Where the provider sends the payer after a successful payment
    #[serde(default = "default_return_url")]
    pub return_url: String,

    /// Where the provider sends the payer after abandoning
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown_secs: default_countdown_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            return_url: default_return_url(),
            cancel_url: default_cancel_url(),
        }
    }
}

impl SessionConfig {
    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Shipping and loyalty redemption rules. Amounts are in minor currency units.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Subtotal at or above which shipping is free
    #[serde(default = "default_free_shipping_threshold")]
    #[validate(range(min = 0))]
    pub free_shipping_threshold: i64,

    /// Flat fee charged below the threshold
    #[serde(default = "default_shipping_fee")]
    #[validate(range(min = 0))]
    pub shipping_fee: i64,

    /// Largest discount a single order may redeem
    #[serde(default = "default_max_redemption")]
    #[validate(range(min = 0))]
    pub max_redemption: i64,

    /// Value of one loyalty point
    #[serde(default = "default_point_value")]
    #[validate(range(min = 0))]
    pub point_value: i64,

    /// Largest quantity accepted on a single cart line
    #[serde(default = "default_max_line_quantity")]
    #[validate(range(min = 1, max = 999))]
    pub max_line_quantity: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            free_shipping_threshold: default_free_shipping_threshold(),
            shipping_fee: default_shipping_fee(),
            max_redemption: default_max_redemption(),
            point_value: default_point_value(),
            max_line_quantity: default_max_line_quantity(),
        }
    }
}

/// Payment verification settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    /// ISO currency code sent with confirmations
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Backend statuses (case-insensitive) that count as paid
    #[serde(default = "default_success_statuses")]
    #[validate(custom = "validate_success_statuses")]
    pub success_statuses: Vec<String>,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            success_statuses: default_success_statuses(),
        }
    }
}

/// Checkout configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    #[serde(default)]
    #[validate]
    pub api: ApiConfig,

    #[serde(default)]
    #[validate]
    pub session: SessionConfig,

    #[serde(default)]
    #[validate]
    pub pricing: PricingConfig,

    #[serde(default)]
    #[validate]
    pub payment: PaymentConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Capacity of the checkout event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            session: SessionConfig::default(),
            pricing: PricingConfig::default(),
            payment: PaymentConfig::default(),
            log_level: default_log_level(),
            log_json: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl CheckoutConfig {
    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.session.countdown_secs <= self.session.poll_interval_secs {
            let mut err = ValidationError::new("countdown_shorter_than_poll");
            err.message = Some(
                "session.countdown_secs must be longer than session.poll_interval_secs".into(),
            );
            errors.add("session", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Runs field validation plus cross-field checks.
    pub fn validate_all(&self) -> Result<(), AppConfigError> {
        self.validate().map_err(|e| {
            error!("Configuration validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })?;
        self.validate_additional_constraints().map_err(|e| {
            error!("Configuration constraint validation failed: {:?}", e);
            AppConfigError::Validation(e)
        })
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

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_countdown_secs() -> u64 {
    DEFAULT_COUNTDOWN_SECS
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_return_url() -> String {
    DEFAULT_RETURN_URL.to_string()
}

fn default_cancel_url() -> String {
    DEFAULT_CANCEL_URL.to_string()
}

fn default_free_shipping_threshold() -> i64 {
    DEFAULT_FREE_SHIPPING_THRESHOLD
}

fn default_shipping_fee() -> i64 {
    DEFAULT_SHIPPING_FEE
}

fn default_max_redemption() -> i64 {
    DEFAULT_MAX_REDEMPTION
}

fn default_point_value() -> i64 {
    DEFAULT_POINT_VALUE
}

fn default_max_line_quantity() -> i64 {
    DEFAULT_MAX_LINE_QUANTITY
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_success_statuses() -> Vec<String> {
    DEFAULT_SUCCESS_STATUSES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
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

fn validate_success_statuses(statuses: &Vec<String>) -> Result<(), ValidationError> {
    if statuses.is_empty() || statuses.iter().any(|s| s.trim().is_empty()) {
        let mut err = ValidationError::new("success_statuses");
        err.message = Some("success_statuses must list at least one non-blank status".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_checkout={},checkout_cli={}", level, level);
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

/// Loads checkout configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (CHECKOUT__SECTION__KEY)
pub fn load_config() -> Result<CheckoutConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] with an explicit config directory.
pub fn load_config_from(config_dir: &Path) -> Result<CheckoutConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("payment.success_statuses"),
        )
        .build()?;

    let checkout_config: CheckoutConfig = config.try_deserialize()?;
    checkout_config.validate_all()?;

    info!("Configuration loaded successfully");
    Ok(checkout_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_reference_behaviour() {
        let cfg = CheckoutConfig::default();
        assert_eq!(cfg.session.countdown(), Duration::from_secs(300));
        assert_eq!(cfg.session.poll_interval(), Duration::from_secs(10));
        assert_eq!(cfg.pricing.free_shipping_threshold, 500_000);
        assert_eq!(cfg.pricing.shipping_fee, 30_000);
        assert_eq!(cfg.payment.currency, "VND");
        assert!(cfg.validate_all().is_ok());
    }

    #[test]
    fn countdown_must_exceed_poll_interval() {
        let mut cfg = CheckoutConfig::default();
        cfg.session.countdown_secs = 10;
        cfg.session.poll_interval_secs = 10;
        assert!(matches!(
            cfg.validate_all(),
            Err(AppConfigError::Validation(_))
        ));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let cfg = CheckoutConfig {
            log_level: "chatty".into(),
            ..Default::default()
        };
        assert!(cfg.validate_all().is_err());
    }

    #[test]
    fn loads_file_layer() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
                log_level = "debug"

                [api]
                base_url = "https://shop.example.com/api"

                [session]
                countdown_secs = 120
                poll_interval_secs = 5
            "#,
        )
        .unwrap();

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.api.base_url, "https://shop.example.com/api");
        assert_eq!(cfg.session.countdown_secs, 120);
        assert_eq!(cfg.session.poll_interval_secs, 5);
        assert_eq!(cfg.pricing.shipping_fee, 30_000);
        assert_eq!(cfg.log_level(), "debug");
    }

    #[test]
    fn empty_directory_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.session.countdown_secs, DEFAULT_COUNTDOWN_SECS);
        assert_eq!(cfg.payment.success_statuses.len(), 5);
    }
}
