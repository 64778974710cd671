//! Process configuration.
//!
//! Everything is read from the environment (after `.env` has been loaded by
//! the binary), falling back to defaults that work for a local single-node
//! deployment.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::api::server::ApiServerConfig;
use crate::notification::BackpressurePolicy;

/// Default SQLite database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:notify-relay.db?mode=rwc";

/// Default log directory.
pub const DEFAULT_LOG_DIR: &str = "./logs";

/// Delivery channel tuning for live push connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Bounded capacity of each connection's delivery queue.
    pub queue_capacity: usize,
    /// What to do when a connection's queue is full.
    pub backpressure: BackpressurePolicy,
    /// How often the server pings each connection.
    pub heartbeat_interval: Duration,
    /// Connections silent for longer than this are evicted.
    pub heartbeat_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            backpressure: BackpressurePolicy::DropOldest,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(75),
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub database_url: String,
    pub log_dir: String,
    pub api: ApiServerConfig,
    pub delivery: DeliveryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            api: ApiServerConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `DATABASE_URL`
    /// - `LOG_DIR`
    /// - `API_BIND_ADDRESS`, `API_PORT`, `ENABLE_CORS`
    /// - `DELIVERY_QUEUE_CAPACITY`
    /// - `BACKPRESSURE_POLICY` (`drop_oldest` or `disconnect`)
    /// - `HEARTBEAT_INTERVAL_SECS`, `HEARTBEAT_TIMEOUT_SECS`
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = non_empty(&lookup, "DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = non_empty(&lookup, "LOG_DIR") {
            config.log_dir = dir;
        }

        if let Some(bind_address) = non_empty(&lookup, "API_BIND_ADDRESS") {
            config.api.bind_address = bind_address;
        }
        if let Some(port) = parsed::<u16, _>(&lookup, "API_PORT") {
            config.api.port = port;
        }
        if let Some(enable_cors) = parsed::<bool, _>(&lookup, "ENABLE_CORS") {
            config.api.enable_cors = enable_cors;
        }

        if let Some(capacity) = parsed::<usize, _>(&lookup, "DELIVERY_QUEUE_CAPACITY") {
            if capacity == 0 {
                warn!("DELIVERY_QUEUE_CAPACITY must be positive; keeping default");
            } else {
                config.delivery.queue_capacity = capacity;
            }
        }
        if let Some(policy) = parsed::<BackpressurePolicy, _>(&lookup, "BACKPRESSURE_POLICY") {
            config.delivery.backpressure = policy;
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "HEARTBEAT_INTERVAL_SECS") {
            config.delivery.heartbeat_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parsed::<u64, _>(&lookup, "HEARTBEAT_TIMEOUT_SECS") {
            config.delivery.heartbeat_timeout = Duration::from_secs(secs.max(1));
        }

        if config.delivery.heartbeat_timeout <= config.delivery.heartbeat_interval {
            warn!(
                interval_secs = config.delivery.heartbeat_interval.as_secs(),
                timeout_secs = config.delivery.heartbeat_timeout.as_secs(),
                "Heartbeat timeout should exceed the ping interval; widening it"
            );
            config.delivery.heartbeat_timeout = config.delivery.heartbeat_interval * 2;
        }

        config
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = non_empty(lookup, key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring unparsable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::from_lookup(|_| None);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.delivery.queue_capacity, 64);
        assert_eq!(config.delivery.backpressure, BackpressurePolicy::DropOldest);
        assert!(config.delivery.heartbeat_timeout > config.delivery.heartbeat_interval);
    }

    #[test]
    fn test_overrides() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("API_PORT", "8080"),
            ("DELIVERY_QUEUE_CAPACITY", "8"),
            ("BACKPRESSURE_POLICY", "disconnect"),
            ("HEARTBEAT_INTERVAL_SECS", "5"),
            ("HEARTBEAT_TIMEOUT_SECS", "12"),
        ]));
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.delivery.queue_capacity, 8);
        assert_eq!(config.delivery.backpressure, BackpressurePolicy::Disconnect);
        assert_eq!(config.delivery.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.delivery.heartbeat_timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("API_PORT", "not-a-port"),
            ("DELIVERY_QUEUE_CAPACITY", "0"),
            ("BACKPRESSURE_POLICY", "unbounded"),
        ]));
        assert_eq!(config.api.port, ApiServerConfig::default().port);
        assert_eq!(config.delivery.queue_capacity, 64);
        assert_eq!(config.delivery.backpressure, BackpressurePolicy::DropOldest);
    }

    #[test]
    fn test_timeout_widened_when_not_above_interval() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("HEARTBEAT_INTERVAL_SECS", "20"),
            ("HEARTBEAT_TIMEOUT_SECS", "10"),
        ]));
        assert_eq!(config.delivery.heartbeat_timeout, Duration::from_secs(40));
    }
}
