//! Queue configuration.
//!
//! Recognized keys:
//!
//! | Key | Meaning |
//! |---|---|
//! | `name`, `queue` | queue identifier (`queue` wins) |
//! | `listen_interval`, `options.listen_interval` | listen poll interval in ms (`options.` wins) |
//! | `options.autosubscribe` | subscribe to the transport when the queue opens |
//! | `options.lock_timeout` | lease duration in ms for received messages |
//! | `connection.*` | connection parameters |
//! | `credential.*` | credential parameters |
//!
//! Configuration is loaded with the `config` crate. Sources are applied in
//! order, later sources override earlier ones: an optional file, then
//! environment variables `<PREFIX>__<KEY>` with `__` as the nesting separator
//! (e.g. `MQ__OPTIONS__LISTEN_INTERVAL=250`).

use crate::connection::{ConnectionParams, CredentialParams};
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Listen interval used when none is configured
pub const DEFAULT_LISTEN_INTERVAL: Duration = Duration::from_millis(1000);

/// Configuration of a single message queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_interval: Option<u64>,
    pub options: QueueOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialParams>,
}

/// The `options` section of a queue configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autosubscribe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_timeout: Option<u64>,
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue identifier
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Set the listen poll interval
    pub fn with_listen_interval(mut self, interval: Duration) -> Self {
        self.options.listen_interval = Some(duration_to_millis(interval));
        self
    }

    /// Enable or disable subscribing on open
    pub fn with_auto_subscribe(mut self, auto_subscribe: bool) -> Self {
        self.options.autosubscribe = Some(auto_subscribe);
        self
    }

    /// Set the lease duration of received messages
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.options.lock_timeout = Some(duration_to_millis(timeout));
        self
    }

    pub fn with_connection(mut self, connection: ConnectionParams) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_credential(mut self, credential: CredentialParams) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Configured queue identifier; `queue` takes precedence over `name`
    pub fn resolve_name(&self) -> Option<&str> {
        self.queue.as_deref().or(self.name.as_deref())
    }

    /// Listen poll interval; `options.listen_interval` takes precedence
    pub fn listen_interval(&self) -> Duration {
        self.options
            .listen_interval
            .or(self.listen_interval)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LISTEN_INTERVAL)
    }

    pub fn auto_subscribe(&self) -> bool {
        self.options.autosubscribe.unwrap_or(false)
    }

    /// Lease duration of received messages, if configured separately from
    /// the receive wait timeout
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.options.lock_timeout.map(Duration::from_millis)
    }

    /// Check the configuration for values no queue can work with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (key, value) in [("name", &self.name), ("queue", &self.queue)] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ConfigurationError::Invalid {
                    message: format!("'{}' must not be empty", key),
                });
            }
        }

        let intervals = [
            ("listen_interval", self.listen_interval),
            ("options.listen_interval", self.options.listen_interval),
            ("options.lock_timeout", self.options.lock_timeout),
        ];
        for (key, value) in intervals {
            if value == Some(0) {
                return Err(ConfigurationError::Invalid {
                    message: format!("'{}' must be greater than zero", key),
                });
            }
        }

        Ok(())
    }

    /// Deserialize from an already built configuration
    pub fn from_config(config: &config::Config) -> Result<Self, ConfigurationError> {
        let queue_config: Self = config.clone().try_deserialize()?;
        queue_config.validate()?;
        Ok(queue_config)
    }

    /// Parse configuration text in the given format
    pub fn from_str(content: &str, format: config::FileFormat) -> Result<Self, ConfigurationError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(content, format))
            .build()?;
        Self::from_config(&config)
    }

    /// Load configuration from an optional file and the environment.
    ///
    /// The file format is derived from its extension. Environment variables
    /// named `<env_prefix>__<KEY>` override file values.
    pub fn load(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_config(&config)
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
