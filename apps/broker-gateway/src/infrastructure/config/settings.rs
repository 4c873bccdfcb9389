//! Gateway Configuration Settings
//!
//! Configuration types for the broker gateway, loaded from environment
//! variables.

use std::time::Duration;

use crate::application::ports::GatewayEndpoint;
use crate::application::services::OrderTrackerConfig;
use crate::infrastructure::resilience::{CircuitBreakerConfig, ReconnectConfig};

/// Gateway endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Client identifier presented at handshake.
    pub client_id: u32,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Defer the first connect until the first request.
    pub lazy_connect: bool,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4002,
            client_id: 1,
            connect_timeout: Duration::from_secs(10),
            lazy_connect: true,
        }
    }
}

/// Per-request deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSettings {
    /// Deadline for read-only queries.
    pub request: Duration,
    /// Deadline for order placement and cancellation.
    pub order: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(10),
            order: Duration::from_secs(15),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Endpoint settings.
    pub endpoint: EndpointSettings,
    /// Reconnection behavior.
    pub reconnect: ReconnectConfig,
    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Request deadlines.
    pub timeouts: TimeoutSettings,
    /// Order history retention.
    pub order_tracker: OrderTrackerConfig,
    /// Latency samples kept for the metrics snapshot.
    pub latency_window: usize,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointSettings::default(),
            reconnect: ReconnectConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            timeouts: TimeoutSettings::default(),
            order_tracker: OrderTrackerConfig::default(),
            latency_window: 256,
            health_port: 8083,
        }
    }
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`GatewayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let endpoint = EndpointSettings {
            host: env
                .string("GATEWAY_HOST")
                .unwrap_or(defaults.endpoint.host),
            port: env.parse("GATEWAY_PORT", defaults.endpoint.port)?,
            client_id: env.parse("GATEWAY_CLIENT_ID", defaults.endpoint.client_id)?,
            connect_timeout: env.millis(
                "GATEWAY_CONNECT_TIMEOUT_MS",
                defaults.endpoint.connect_timeout,
            )?,
            lazy_connect: env.flag("GATEWAY_LAZY_CONNECT", defaults.endpoint.lazy_connect)?,
        };

        let reconnect = ReconnectConfig {
            enabled: env.flag("GATEWAY_RECONNECT_ENABLED", defaults.reconnect.enabled)?,
            base_delay: env.millis("GATEWAY_BACKOFF_BASE_MS", defaults.reconnect.base_delay)?,
            max_delay: env.millis("GATEWAY_BACKOFF_MAX_MS", defaults.reconnect.max_delay)?,
            multiplier: env.parse("GATEWAY_BACKOFF_MULTIPLIER", defaults.reconnect.multiplier)?,
            jitter_factor: env.parse("GATEWAY_BACKOFF_JITTER", defaults.reconnect.jitter_factor)?,
            max_attempts: env.parse(
                "GATEWAY_MAX_RECONNECT_ATTEMPTS",
                defaults.reconnect.max_attempts,
            )?,
        };

        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: env.parse(
                "GATEWAY_CIRCUIT_FAILURE_THRESHOLD",
                defaults.circuit_breaker.failure_threshold,
            )?,
            cooldown: env.millis(
                "GATEWAY_CIRCUIT_COOLDOWN_MS",
                defaults.circuit_breaker.cooldown,
            )?,
        };

        let timeouts = TimeoutSettings {
            request: env.millis("GATEWAY_REQUEST_TIMEOUT_MS", defaults.timeouts.request)?,
            order: env.millis("GATEWAY_ORDER_TIMEOUT_MS", defaults.timeouts.order)?,
        };

        let order_tracker = OrderTrackerConfig {
            history_capacity: env.parse(
                "GATEWAY_ORDER_HISTORY_CAPACITY",
                defaults.order_tracker.history_capacity,
            )?,
            history_retention: Duration::from_secs(env.parse(
                "GATEWAY_ORDER_HISTORY_RETENTION_SECS",
                defaults.order_tracker.history_retention.as_secs(),
            )?),
        };

        let config = Self {
            endpoint,
            reconnect,
            circuit_breaker,
            timeouts,
            order_tracker,
            latency_window: env.parse("GATEWAY_LATENCY_WINDOW", defaults.latency_window)?,
            health_port: env.parse("GATEWAY_HEALTH_PORT", defaults.health_port)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| {
            Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.endpoint.host.trim().is_empty() {
            return invalid("GATEWAY_HOST", "must not be empty");
        }
        if self.endpoint.connect_timeout.is_zero() {
            return invalid("GATEWAY_CONNECT_TIMEOUT_MS", "must be positive");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return invalid("GATEWAY_CIRCUIT_FAILURE_THRESHOLD", "must be at least 1");
        }
        if self.reconnect.multiplier < 1.0 || !self.reconnect.multiplier.is_finite() {
            return invalid("GATEWAY_BACKOFF_MULTIPLIER", "must be at least 1.0");
        }
        if !(0.0..1.0).contains(&self.reconnect.jitter_factor) {
            return invalid("GATEWAY_BACKOFF_JITTER", "must be in [0, 1)");
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            return invalid("GATEWAY_BACKOFF_MAX_MS", "must not be below the base delay");
        }
        if self.timeouts.request.is_zero() {
            return invalid("GATEWAY_REQUEST_TIMEOUT_MS", "must be positive");
        }
        if self.timeouts.order.is_zero() {
            return invalid("GATEWAY_ORDER_TIMEOUT_MS", "must be positive");
        }
        if self.latency_window == 0 {
            return invalid("GATEWAY_LATENCY_WINDOW", "must be at least 1");
        }
        Ok(())
    }

    /// Endpoint handed to the vendor client.
    #[must_use]
    pub fn gateway_endpoint(&self) -> GatewayEndpoint {
        GatewayEndpoint {
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            client_id: self.endpoint.client_id,
            connect_timeout: self.endpoint.connect_timeout,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    Parse {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Setting violates a constraint.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// What is wrong.
        reason: String,
    },
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Parse {
                key: key.to_string(),
                value,
            }),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, default_ms).map(Duration::from_millis)
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(value) => match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Parse {
                    key: key.to_string(),
                    value,
                }),
            },
        }
    }
}
