//! Session Controller configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults. Billing parameters are validated at load time: a bad interval
//! or split must fail startup, never a live settlement.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default wire protocol bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:7410";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Canonical billing interval in seconds.
pub const DEFAULT_BILLING_INTERVAL_SECONDS: u64 = 60;

/// Elapsed time since the last tick beyond which a final partial interval
/// is billed at settlement.
pub const DEFAULT_PRORATION_THRESHOLD_SECONDS: u64 = 30;

/// Base delay for reconnection backoff.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Cap on the reconnection backoff delay.
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 16_000;

/// Maximum renegotiation attempts before the session terminates.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Window after acceptance within which the connection must become live.
pub const DEFAULT_STARTUP_DEADLINE_SECONDS: u64 = 90;

/// Provider share of settled revenue, in percent.
pub const DEFAULT_PROVIDER_SHARE_PERCENT: u8 = 70;

/// Default SC instance ID prefix.
pub const DEFAULT_SC_ID_PREFIX: &str = "sc";

/// Session Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Wire protocol bind address (default: "0.0.0.0:7410").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this SC instance.
    pub sc_id: String,

    /// Maximum concurrent sessions this SC can handle.
    pub max_sessions: u32,

    /// Billing interval (default: 60s).
    pub billing_interval: Duration,

    /// Proration threshold (default: 30s).
    pub proration_threshold: Duration,

    /// Reconnection backoff base delay (default: 1s).
    pub reconnect_base_delay: Duration,

    /// Reconnection backoff cap (default: 16s).
    pub reconnect_max_delay: Duration,

    /// Maximum renegotiation attempts (default: 5).
    pub reconnect_max_attempts: u32,

    /// Deadline for the connection to become live after acceptance.
    pub startup_deadline: Duration,

    /// Provider share of settled revenue in percent (default: 70).
    pub provider_share_percent: u8,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_sessions = vars
            .get("SC_MAX_SESSIONS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);

        let billing_interval_seconds = vars
            .get("SC_BILLING_INTERVAL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BILLING_INTERVAL_SECONDS);
        if billing_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_BILLING_INTERVAL_SECONDS must be > 0".to_string(),
            ));
        }

        let proration_threshold_seconds = vars
            .get("SC_PRORATION_THRESHOLD_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PRORATION_THRESHOLD_SECONDS);

        let reconnect_base_delay_ms = vars
            .get("SC_RECONNECT_BASE_DELAY_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONNECT_BASE_DELAY_MS);

        let reconnect_max_delay_ms = vars
            .get("SC_RECONNECT_MAX_DELAY_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONNECT_MAX_DELAY_MS);

        let reconnect_max_attempts = vars
            .get("SC_RECONNECT_MAX_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONNECT_MAX_ATTEMPTS);

        let startup_deadline_seconds = vars
            .get("SC_STARTUP_DEADLINE_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_STARTUP_DEADLINE_SECONDS);

        let provider_share_percent = vars
            .get("SC_PROVIDER_SHARE_PERCENT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PROVIDER_SHARE_PERCENT);
        if provider_share_percent > 100 {
            return Err(ConfigError::InvalidValue(
                "SC_PROVIDER_SHARE_PERCENT must be <= 100".to_string(),
            ));
        }

        // Generate SC instance ID
        let sc_id = vars.get("SC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            sc_id,
            max_sessions,
            billing_interval: Duration::from_secs(billing_interval_seconds),
            proration_threshold: Duration::from_secs(proration_threshold_seconds),
            reconnect_base_delay: Duration::from_millis(reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_millis(reconnect_max_delay_ms),
            reconnect_max_attempts,
            startup_deadline: Duration::from_secs(startup_deadline_seconds),
            provider_share_percent,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.max_sessions, 1000);
        assert_eq!(config.billing_interval, Duration::from_secs(60));
        assert_eq!(config.proration_threshold, Duration::from_secs(30));
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(16));
        assert_eq!(config.reconnect_max_attempts, 5);
        assert_eq!(config.startup_deadline, Duration::from_secs(90));
        assert_eq!(config.provider_share_percent, 70);
        assert!(config.sc_id.starts_with("sc-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            ("SC_BIND_ADDRESS".to_string(), "127.0.0.1:7411".to_string()),
            (
                "SC_HEALTH_BIND_ADDRESS".to_string(),
                "127.0.0.1:8082".to_string(),
            ),
            ("SC_MAX_SESSIONS".to_string(), "50".to_string()),
            ("SC_BILLING_INTERVAL_SECONDS".to_string(), "30".to_string()),
            (
                "SC_PRORATION_THRESHOLD_SECONDS".to_string(),
                "15".to_string(),
            ),
            ("SC_RECONNECT_MAX_ATTEMPTS".to_string(), "3".to_string()),
            ("SC_PROVIDER_SHARE_PERCENT".to_string(), "80".to_string()),
            ("SC_ID".to_string(), "sc-custom-001".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load");

        assert_eq!(config.bind_address, "127.0.0.1:7411");
        assert_eq!(config.health_bind_address, "127.0.0.1:8082");
        assert_eq!(config.max_sessions, 50);
        assert_eq!(config.billing_interval, Duration::from_secs(30));
        assert_eq!(config.proration_threshold, Duration::from_secs(15));
        assert_eq!(config.reconnect_max_attempts, 3);
        assert_eq!(config.provider_share_percent, 80);
        assert_eq!(config.sc_id, "sc-custom-001");
    }

    #[test]
    fn test_zero_billing_interval_rejected() {
        let vars = HashMap::from([("SC_BILLING_INTERVAL_SECONDS".to_string(), "0".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_over_100_percent_share_rejected() {
        let vars = HashMap::from([("SC_PROVIDER_SHARE_PERCENT".to_string(), "101".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
