//! Connection and credential parameters, and the resolvers that supply them.
//!
//! Queues resolve their parameters lazily when they are opened. Real
//! deployments plug in resolvers backed by a discovery service or a secret
//! store; the configured resolvers here simply hand back the sections of the
//! queue configuration.

use crate::context::Context;
use crate::error::QueueError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;

/// Keys whose values are never written to logs or debug output
const SECRET_KEY_MARKERS: [&str; 4] = ["password", "secret", "token", "key"];

const REDACTED: &str = "<REDACTED>";

// ============================================================================
// Connection Parameters
// ============================================================================

/// Key/value connection parameters (host, port, uri, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionParams(HashMap<String, String>);

impl ConnectionParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build parameters from key/value pairs
    pub fn from_tuples(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn uri(&self) -> Option<&str> {
        self.get("uri")
    }

    pub fn protocol(&self) -> Option<&str> {
        self.get("protocol")
    }

    pub fn host(&self) -> Option<&str> {
        self.get("host")
    }

    /// Port number, `None` when absent or not a valid port
    pub fn port(&self) -> Option<u16> {
        self.get("port").and_then(|port| port.parse().ok())
    }
}

// ============================================================================
// Credential Parameters
// ============================================================================

/// Key/value credential parameters.
///
/// Debug output redacts every value whose key looks like a secret.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialParams(HashMap<String, String>);

impl CredentialParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build parameters from key/value pairs
    pub fn from_tuples(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn username(&self) -> Option<&str> {
        self.get("username")
    }

    pub fn password(&self) -> Option<&str> {
        self.get("password")
    }

    pub fn access_id(&self) -> Option<&str> {
        self.get("access_id")
    }

    pub fn access_key(&self) -> Option<&str> {
        self.get("access_key")
    }

    /// Copy with every secret value replaced, safe to print
    pub fn redacted(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|(key, value)| {
                    let value = if is_secret_key(key) { REDACTED } else { value.as_str() };
                    (key.clone(), value.to_string())
                })
                .collect(),
        )
    }
}

impl fmt::Debug for CredentialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .0
            .iter()
            .map(|(key, value)| {
                if is_secret_key(key) {
                    (key.as_str(), REDACTED)
                } else {
                    (key.as_str(), value.as_str())
                }
            })
            .collect();
        f.debug_tuple("CredentialParams").field(&redacted).finish()
    }
}

fn is_secret_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SECRET_KEY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

// ============================================================================
// Resolvers
// ============================================================================

/// Supplies the connection parameters of a queue when it is opened
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn resolve(&self, context: &Context) -> Result<Option<ConnectionParams>, QueueError>;
}

/// Supplies the credential parameters of a queue when it is opened
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn lookup(&self, context: &Context) -> Result<Option<CredentialParams>, QueueError>;
}

/// Resolver returning the statically configured connection section
#[derive(Debug, Clone, Default)]
pub struct ConfiguredConnectionResolver {
    connection: Option<ConnectionParams>,
}

impl ConfiguredConnectionResolver {
    pub fn new(connection: Option<ConnectionParams>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ConnectionResolver for ConfiguredConnectionResolver {
    async fn resolve(&self, _context: &Context) -> Result<Option<ConnectionParams>, QueueError> {
        Ok(self.connection.clone())
    }
}

/// Resolver returning the statically configured credential section
#[derive(Debug, Clone, Default)]
pub struct ConfiguredCredentialResolver {
    credential: Option<CredentialParams>,
}

impl ConfiguredCredentialResolver {
    pub fn new(credential: Option<CredentialParams>) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialResolver for ConfiguredCredentialResolver {
    async fn lookup(&self, _context: &Context) -> Result<Option<CredentialParams>, QueueError> {
        Ok(self.credential.clone())
    }
}
