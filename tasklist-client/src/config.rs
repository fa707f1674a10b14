use std::env;
use std::str::FromStr;
use std::time::Duration;
use tasklist_core::{errors::ClientError, SyncResult};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:tasklist.db?mode=rwc";
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Settings for a [`crate::TaskClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub database_url: String,
    pub server_url: String,
    /// Period of the online drain timer.
    pub sync_interval: Duration,
    /// Failed deliveries after which a queue entry is dropped.
    pub max_attempts: u32,
    /// Upper bound for a single remote call.
    pub request_timeout: Duration,
    /// Period of the reachability probe.
    pub probe_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            sync_interval: Duration::from_secs(30),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn new(database_url: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `TASKLIST_*` environment variables.
    pub fn from_env() -> SyncResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("TASKLIST_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(url) = env::var("TASKLIST_SERVER_URL") {
            config.server_url = url;
        }
        if let Some(secs) = parse_var::<u64>("TASKLIST_SYNC_INTERVAL_SECS")? {
            config.sync_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var::<u32>("TASKLIST_MAX_ATTEMPTS")? {
            config.max_attempts = attempts;
        }
        if let Some(secs) = parse_var::<u64>("TASKLIST_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("TASKLIST_PROBE_INTERVAL_SECS")? {
            config.probe_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.database_url.trim().is_empty() {
            return Err(invalid("database_url must not be empty"));
        }
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(invalid(&format!(
                "server_url must be a ws:// or wss:// URL, got '{}'",
                self.server_url
            )));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        for (name, value) in [
            ("sync_interval", self.sync_interval),
            ("request_timeout", self.request_timeout),
            ("probe_interval", self.probe_interval),
        ] {
            if value.is_zero() {
                return Err(invalid(&format!("{} must be greater than zero", name)));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> tasklist_core::errors::SyncError {
    ClientError::InvalidConfig(message.to_string()).into()
}

fn parse_var<T: FromStr>(name: &str) -> SyncResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(&format!("{} has an invalid value '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = ClientConfig::new("sqlite::memory:", "http://localhost:8080");
        assert!(config.validate().is_err());

        let config = ClientConfig::new("sqlite::memory:", "ws://localhost:8080/ws")
            .with_max_attempts(0);
        assert!(config.validate().is_err());

        let config = ClientConfig::new("sqlite::memory:", "ws://localhost:8080/ws")
            .with_sync_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
