//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PAYMENT_GATEWAY_URL` - Base URL of the charge-authorization service
//! - `PAYMENT_GATEWAY_SECRET_KEY` - Gateway API key (validated for entropy)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STORE_CURRENCY` - ISO 4217 store currency (default: USD)
//! - `SHIPPING_FEE` - Flat shipping fee in the store currency (default: 10.00)
//! - `PAYMENT_GATEWAY_TIMEOUT_SECS` - Per-request gateway timeout (default: 10)
//! - `CHECKOUT_RETRY_MAX_ATTEMPTS` - Gateway retry budget (default: 5)
//! - `CHECKOUT_RETRY_BASE_MS` - Backoff base delay (default: 200)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use devsnippets_core::CurrencyCode;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Store currency; all prices and charges use it
    pub currency: CurrencyCode,
    /// Flat shipping fee added to every checkout
    pub shipping_fee: Decimal,
    /// Payment gateway configuration
    pub gateway: PaymentGatewayConfig,
    /// Retry budget for transient checkout failures
    pub retry: RetryConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Payment gateway connection configuration.
///
/// Implements `Debug` manually to redact the secret key.
#[derive(Clone)]
pub struct PaymentGatewayConfig {
    /// Base URL of the charge-authorization service
    pub endpoint: Url,
    /// Gateway API key (server-side only)
    pub secret_key: SecretString,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for PaymentGatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGatewayConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("secret_key", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Bounded exponential backoff parameters for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts including the first (cap 5 by default).
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the gateway key fails validation (placeholder detection, entropy
    /// check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = get_env_or_default("STOREFRONT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_HOST".to_string(), e.to_string())
            })?;
        let port = get_env_or_default("STOREFRONT_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_PORT".to_string(), e.to_string())
            })?;
        let currency = get_env_or_default("STORE_CURRENCY", "USD")
            .parse::<CurrencyCode>()
            .map_err(|e| ConfigError::InvalidEnvVar("STORE_CURRENCY".to_string(), e))?;
        let shipping_fee = parse_fee(&get_env_or_default("SHIPPING_FEE", "10.00"))?;

        let gateway = PaymentGatewayConfig::from_env()?;
        let retry = RetryConfig::from_env()?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            host,
            port,
            currency,
            shipping_fee,
            gateway,
            retry,
            sentry_dsn,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl PaymentGatewayConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let endpoint = get_required_env("PAYMENT_GATEWAY_URL")?;
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            ConfigError::InvalidEnvVar("PAYMENT_GATEWAY_URL".to_string(), e.to_string())
        })?;

        let timeout_secs = get_env_or_default("PAYMENT_GATEWAY_TIMEOUT_SECS", "10")
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar(
                    "PAYMENT_GATEWAY_TIMEOUT_SECS".to_string(),
                    e.to_string(),
                )
            })?;

        Ok(Self {
            endpoint,
            secret_key: get_validated_secret("PAYMENT_GATEWAY_SECRET_KEY")?,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl RetryConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let max_attempts = get_env_or_default("CHECKOUT_RETRY_MAX_ATTEMPTS", "5")
            .parse::<u32>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar(
                    "CHECKOUT_RETRY_MAX_ATTEMPTS".to_string(),
                    e.to_string(),
                )
            })?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CHECKOUT_RETRY_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let base_ms = get_env_or_default("CHECKOUT_RETRY_BASE_MS", "200")
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("CHECKOUT_RETRY_BASE_MS".to_string(), e.to_string())
            })?;

        Ok(Self {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a non-negative money amount with at most two decimal places.
fn parse_fee(raw: &str) -> Result<Decimal, ConfigError> {
    let fee = raw.parse::<Decimal>().map_err(|e| {
        ConfigError::InvalidEnvVar("SHIPPING_FEE".to_string(), e.to_string())
    })?;
    if fee.is_sign_negative() || fee.scale() > 2 {
        return Err(ConfigError::InvalidEnvVar(
            "SHIPPING_FEE".to_string(),
            "must be non-negative with at most 2 decimal places".to_string(),
        ));
    }
    Ok(fee)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Check entropy (real secrets like API keys have high entropy)
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
