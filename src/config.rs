use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::PaymentProvider;

/// Application configuration loaded from layered sources:
/// `config/default.toml`, an optional `config/{environment}.toml`, and
/// `APP__`-prefixed environment variables (separator `__`).
#[derive(Debug, Deserialize, Clone, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL (Postgres in deployment, SQLite in tests).
    pub database_url: String,

    /// Host address to bind the HTTP server to.
    pub host: String,

    /// Port to bind the HTTP server to.
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    /// Environment name: development, test, staging, production.
    pub environment: String,

    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit logs as JSON (useful in deployment, noisy locally).
    #[serde(default)]
    pub log_json: bool,

    /// Run pending migrations on startup.
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,

    /// Allowed CORS origins. Empty means no cross-origin access in
    /// production; development falls back to permissive CORS.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    /// Explicitly allow any origin. Rejected in production by
    /// `validate_additional_constraints`.
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// Allow credentials on CORS responses. Incompatible with
    /// `cors_allow_any_origin`.
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// Maximum database connections in the pool.
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1, max = 1024))]
    pub db_max_connections: u32,

    /// Minimum idle connections kept in the pool.
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Seconds to wait when opening a new database connection.
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Seconds an idle connection may live before being reaped.
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Seconds to wait when acquiring a connection from the pool.
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Capacity of the in-process event channel.
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 16, max = 65536))]
    pub event_channel_capacity: usize,

    /// ISO 4217 currency used when a request does not specify one.
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub default_currency: String,

    /// Page size applied to list endpoints when the caller omits one.
    #[serde(default = "default_api_page_size")]
    #[validate(range(min = 1, max = 500))]
    pub api_default_page_size: u64,

    /// Hard ceiling on caller-supplied page sizes.
    #[serde(default = "default_api_max_page_size")]
    #[validate(range(min = 1, max = 1000))]
    pub api_max_page_size: u64,

    /// Minutes a payment may sit in Pending without a provider
    /// transaction id before the sweep fails it.
    #[serde(default = "default_pending_payment_timeout_mins")]
    #[validate(range(min = 1, max = 1440))]
    pub pending_payment_timeout_mins: i64,

    /// Seconds between reconciliation sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    #[validate(range(min = 5, max = 86400))]
    pub sweep_interval_secs: u64,

    /// Maximum stale payments examined per sweep run.
    #[serde(default = "default_sweep_batch_size")]
    #[validate(range(min = 1, max = 10000))]
    pub sweep_batch_size: u64,

    /// Provider used for online payments when initiating.
    #[serde(default = "default_online_provider")]
    pub online_provider: PaymentProvider,

    /// Landing URL the gateway redirects payers back to.
    #[serde(default = "default_payment_return_url")]
    #[validate(url)]
    pub payment_return_url: String,

    /// SwiftPay gateway settings. Optional so tests and COD-only
    /// deployments can omit the whole block.
    #[serde(default)]
    #[validate]
    pub swiftpay: SwiftPayConfig,
}

/// Connection settings for the SwiftPay gateway.
#[derive(Debug, Deserialize, Clone, Validate)]
#[serde(deny_unknown_fields)]
pub struct SwiftPayConfig {
    /// Register the gateway at startup.
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the SwiftPay REST API.
    #[serde(default = "default_swiftpay_base_url")]
    #[validate(url)]
    pub base_url: String,

    /// API key sent as a bearer token.
    #[serde(default)]
    pub api_key: String,

    /// Shared secret for webhook HMAC signatures.
    #[serde(default)]
    pub webhook_secret: String,

    /// Seconds before an outbound gateway call times out.
    #[serde(default = "default_swiftpay_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    /// Accepted clock skew, in seconds, for webhook timestamps.
    #[serde(default = "default_swiftpay_signature_tolerance_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub signature_tolerance_secs: i64,
}

impl Default for SwiftPayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_swiftpay_base_url(),
            api_key: String::new(),
            webhook_secret: String::new(),
            timeout_secs: default_swiftpay_timeout_secs(),
            signature_tolerance_secs: default_swiftpay_signature_tolerance_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_auto_migrate() -> bool {
    true
}

fn default_db_max_connections() -> u32 {
    100
}

fn default_db_min_connections() -> u32 {
    5
}

fn default_db_connect_timeout_secs() -> u64 {
    10
}

fn default_db_idle_timeout_secs() -> u64 {
    300
}

fn default_db_acquire_timeout_secs() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_currency() -> String {
    "SAR".to_string()
}

fn default_api_page_size() -> u64 {
    20
}

fn default_api_max_page_size() -> u64 {
    100
}

fn default_pending_payment_timeout_mins() -> i64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_sweep_batch_size() -> u64 {
    100
}

fn default_online_provider() -> PaymentProvider {
    PaymentProvider::SwiftPay
}

fn default_payment_return_url() -> String {
    "https://app.carepay.example/payments/return".to_string()
}

fn default_swiftpay_base_url() -> String {
    "https://sandbox.swiftpay.example/v2".to_string()
}

fn default_swiftpay_timeout_secs() -> u64 {
    10
}

fn default_swiftpay_signature_tolerance_secs() -> i64 {
    300
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level")),
    }
}

fn validate_currency(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_currency_code"))
    }
}

impl AppConfig {
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: default_auto_migrate(),
            cors_allowed_origins: Vec::new(),
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            default_currency: default_currency(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            pending_payment_timeout_mins: default_pending_payment_timeout_mins(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_size: default_sweep_batch_size(),
            online_provider: default_online_provider(),
            payment_return_url: default_payment_return_url(),
            swiftpay: SwiftPayConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        !self.cors_allowed_origins.is_empty()
    }

    /// Permissive CORS is only acceptable outside production, and only
    /// when no explicit origin list is configured.
    pub fn should_allow_permissive_cors(&self) -> bool {
        !self.is_production() && !self.has_cors_allowed_origins()
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Cross-field rules that `validator` derive cannot express.
    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && self.cors_allow_any_origin {
            errors.add(
                "cors_allow_any_origin",
                ValidationError::new("any_origin_forbidden_in_production"),
            );
        }

        if self.cors_allow_any_origin && self.cors_allow_credentials {
            errors.add(
                "cors_allow_credentials",
                ValidationError::new("credentials_require_explicit_origins"),
            );
        }

        if self.db_min_connections > self.db_max_connections {
            errors.add(
                "db_min_connections",
                ValidationError::new("min_exceeds_max_connections"),
            );
        }

        if self.api_default_page_size > self.api_max_page_size {
            errors.add(
                "api_default_page_size",
                ValidationError::new("default_page_size_exceeds_max"),
            );
        }

        if self.swiftpay.enabled && !self.is_development() {
            if self.swiftpay.api_key.is_empty() {
                errors.add("swiftpay.api_key", ValidationError::new("api_key_required"));
            }
            if self.swiftpay.webhook_secret.is_empty() {
                errors.add(
                    "swiftpay.webhook_secret",
                    ValidationError::new("webhook_secret_required"),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("io error while loading configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn init_tracing(level: &str, json: bool) -> Result<(), AppConfigError> {
    use tracing_subscriber::EnvFilter;

    let default_directive = format!("carepay_api={},tower_http=debug", level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let init_result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // A second init (tests) is not an error worth failing startup over.
    if let Err(e) = init_result {
        tracing::debug!("tracing subscriber already initialized: {}", e);
    }

    Ok(())
}

/// Load configuration from files and environment, then validate it.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = std::env::var("RUN_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string());

    let config = Config::builder()
        .set_default("database_url", "sqlite://carepay.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", run_env.clone())?
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{}", run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;
    app_config.validate_additional_constraints()?;

    Ok(app_config)
}
