//! Client configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TRANSPORT_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_SNAPSHOT_URL: &str = "http://localhost:8080/api/data";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_DELAY_MS: u64 = 5000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_HEALTH_URL: &str = "http://localhost:8080/api/system/status";
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 60_000;

/// Constructor-time settings for a [`RealtimeFleetClient`](crate::RealtimeFleetClient).
///
/// ```toml
/// transport_url = "ws://fleet.internal:8080/ws"
/// snapshot_url = "http://fleet.internal:8080/api/data"
/// max_attempts = 5
/// delay_ms = 5000
/// connect_timeout_ms = 10000
/// request_timeout_ms = 10000
/// health_url = "http://fleet.internal:8080/api/system/status"
/// health_interval_ms = 60000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint for the event stream.
    pub transport_url: String,
    /// HTTP endpoint returning a fleet snapshot.
    pub snapshot_url: String,
    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Fixed wait between reconnect attempts.
    pub delay_ms: u64,
    /// How long opening the event stream may take before it counts as failed.
    pub connect_timeout_ms: u64,
    /// Limit on each snapshot or health request.
    pub request_timeout_ms: u64,
    /// HTTP endpoint hit by health checks.
    pub health_url: String,
    /// Period between health checks; 0 disables them.
    pub health_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport_url: DEFAULT_TRANSPORT_URL.to_string(),
            snapshot_url: DEFAULT_SNAPSHOT_URL.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_DELAY_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            health_url: DEFAULT_HEALTH_URL.to_string(),
            health_interval_ms: DEFAULT_HEALTH_INTERVAL_MS,
        }
    }
}

impl ClientConfig {
    pub fn new(transport_url: impl Into<String>, snapshot_url: impl Into<String>) -> Self {
        Self {
            transport_url: transport_url.into(),
            snapshot_url: snapshot_url.into(),
            ..Self::default()
        }
    }

    /// Parse and validate TOML config text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_scheme("transport_url", &self.transport_url, &["ws://", "wss://"])?;
        check_scheme("snapshot_url", &self.snapshot_url, &["http://", "https://"])?;
        check_scheme("health_url", &self.health_url, &["http://", "https://"])?;
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be at least 1ms".into()));
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    /// `None` when health checks are disabled.
    pub fn health_interval(&self) -> Option<Duration> {
        (self.health_interval_ms > 0).then(|| Duration::from_millis(self.health_interval_ms))
    }
}

fn check_scheme(key: &str, url: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = url.trim();
    match schemes.iter().find(|scheme| url.starts_with(*scheme)) {
        Some(scheme) if url.len() > scheme.len() => Ok(()),
        _ => Err(ConfigError::Invalid(format!(
            "{key} must be a {} url, got '{url}'",
            schemes.join(" or ")
        ))),
    }
}

/// How the event stream recovers from a dropped connection.
///
/// The delay is fixed: every retry waits the same amount of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether another retry is allowed after `attempts` retries.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let config = ClientConfig::from_toml_str("max_attempts = 2").unwrap();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.delay_ms, DEFAULT_DELAY_MS);
        assert_eq!(config.transport_url, DEFAULT_TRANSPORT_URL);
        assert_eq!(config.snapshot_url, DEFAULT_SNAPSHOT_URL);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.health_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn timeouts_and_health() {
        let config = ClientConfig::from_toml_str(
            "connect_timeout_ms = 250\nrequest_timeout_ms = 500\nhealth_interval_ms = 0\n",
        )
        .unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.request_timeout(), Duration::from_millis(500));
        assert_eq!(config.health_interval(), None);

        let err = ClientConfig::from_toml_str("connect_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("timeouts")));

        let err = ClientConfig::from_toml_str(r#"health_url = "ws://localhost/status""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("health_url")));
    }

    #[test]
    fn empty_text_is_the_default() {
        assert_eq!(ClientConfig::from_toml_str("").unwrap(), ClientConfig::default());
    }

    #[test]
    fn rejects_wrong_schemes() {
        let err = ClientConfig::from_toml_str(r#"transport_url = "http://localhost/ws""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("transport_url")));

        let err = ClientConfig::from_toml_str(r#"snapshot_url = "ws://localhost""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("snapshot_url")));

        let err = ClientConfig::from_toml_str(r#"transport_url = "ws://""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_toml() {
        let err = ClientConfig::from_toml_str("max_attempts = -1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetwatch.toml");
        std::fs::write(
            &path,
            "transport_url = \"wss://fleet.example/ws\"\ndelay_ms = 250\n",
        )
        .unwrap();
        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.transport_url, "wss://fleet.example/ws");
        assert_eq!(config.reconnect_policy().delay(), Duration::from_millis(250));

        let missing = ClientConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }

    #[test]
    fn retry_budget() {
        let policy = ReconnectPolicy::new(2, Duration::ZERO);
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
        assert!(!ReconnectPolicy::new(0, Duration::ZERO).allows_retry(0));
    }
}
