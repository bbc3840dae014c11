//! Configuration management for Ratekeeper.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RatekeeperError, Result};

/// Key holding the algorithm selector inside a [`RateConfig`].
pub const ALGO_KEY: &str = "algo";

/// Main configuration for the Ratekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Flat limiter configuration handed to the factory
    #[serde(default)]
    pub limiter: RateConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl ServiceConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading service configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatekeeperError::Config(format!("Failed to parse service config: {}", e)))
    }
}

/// Scalar accepted as a configuration value. Everything is stored as text.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl ScalarValue {
    fn into_text(self) -> String {
        match self {
            ScalarValue::Text(s) => s,
            ScalarValue::Integer(i) => i.to_string(),
            ScalarValue::Float(f) => f.to_string(),
            ScalarValue::Bool(b) => b.to_string(),
        }
    }
}

/// A flat, string-keyed limiter configuration.
///
/// Values are kept as text and only interpreted by the factory, which fails
/// fast on a missing or malformed required key. The `algo` key selects the
/// algorithm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, ScalarValue>",
    into = "BTreeMap<String, String>"
)]
pub struct RateConfig {
    values: BTreeMap<String, String>,
}

impl From<BTreeMap<String, ScalarValue>> for RateConfig {
    fn from(raw: BTreeMap<String, ScalarValue>) -> Self {
        Self {
            values: raw.into_iter().map(|(k, v)| (k, v.into_text())).collect(),
        }
    }
}

impl From<RateConfig> for BTreeMap<String, String> {
    fn from(config: RateConfig) -> Self {
        config.values
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RateConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl RateConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`RateConfig::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Get the raw value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The algorithm selector, if any.
    pub fn selector(&self) -> Option<&str> {
        self.get(ALGO_KEY)
    }

    /// Iterate over all key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .map(str::trim)
            .ok_or_else(|| RatekeeperError::missing(key))
    }

    /// Parse a required unsigned integer.
    pub fn require_u64(&self, key: &str) -> Result<u64> {
        let raw = self.require(key)?;
        raw.parse::<u64>()
            .map_err(|e| RatekeeperError::invalid(key, raw, e))
    }

    /// Parse a required finite float.
    pub fn require_f64(&self, key: &str) -> Result<f64> {
        let raw = self.require(key)?;
        let value = raw
            .parse::<f64>()
            .map_err(|e| RatekeeperError::invalid(key, raw, e))?;
        if !value.is_finite() {
            return Err(RatekeeperError::invalid(key, raw, "value must be finite"));
        }
        Ok(value)
    }

    /// Parse a required duration such as `10s`, `500ms` or `1m30s`.
    pub fn require_duration(&self, key: &str) -> Result<Duration> {
        let raw = self.require(key)?;
        humantime::parse_duration(raw).map_err(|e| RatekeeperError::invalid(key, raw, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.listen_addr.to_string(), "127.0.0.1:8080");
        assert!(config.limiter.selector().is_none());
    }

    #[test]
    fn test_parse_service_config() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:9000
limiter:
  algo: fixed_window_counter
  max_request_count: 5
  window_size: 10s
"#;
        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.limiter.selector(), Some("fixed_window_counter"));
        assert_eq!(config.limiter.get("max_request_count"), Some("5"));
        assert_eq!(config.limiter.require_u64("max_request_count").unwrap(), 5);
        assert_eq!(
            config.limiter.require_duration("window_size").unwrap(),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_parse_float_scalars() {
        let yaml = r#"
limiter:
  algo: token_bucket
  capacity: 5
  refill_rate: 2.5
"#;
        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.require_f64("refill_rate").unwrap(), 2.5);
        assert_eq!(config.server.listen_addr.port(), 8080);
    }

    #[test]
    fn test_rate_config_from_json() {
        let config: RateConfig =
            serde_json::from_str(r#"{"algo": "sliding_window_log", "request_per_sec": 2, "window_size": "10s"}"#)
                .unwrap();
        assert_eq!(config.require_u64("request_per_sec").unwrap(), 2);
    }

    #[test]
    fn test_missing_key() {
        let config = RateConfig::new();
        match config.require_u64("capacity") {
            Err(RatekeeperError::MissingKey { key }) => assert_eq!(key, "capacity"),
            other => panic!("expected MissingKey, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_values() {
        let config = RateConfig::new()
            .with("capacity", "-3")
            .with("refill_rate", "NaN")
            .with("window_size", "ten seconds");

        assert!(matches!(
            config.require_u64("capacity"),
            Err(RatekeeperError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.require_f64("refill_rate"),
            Err(RatekeeperError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.require_duration("window_size"),
            Err(RatekeeperError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_compound_duration() {
        let config = RateConfig::new().with("token_push_interval", "1m30s");
        assert_eq!(
            config.require_duration("token_push_interval").unwrap(),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_invalid_yaml() {
        let result = ServiceConfig::from_yaml("server: [not, a, map]");
        assert!(matches!(result, Err(RatekeeperError::Config(_))));
    }
}
