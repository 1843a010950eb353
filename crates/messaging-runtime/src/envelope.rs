//! Message envelope and the identifiers attached to it.

use crate::context::Context;
use crate::error::SerializationError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.simple().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Opaque handle of the lease held on a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockToken(u64);

impl LockToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp `duration` after this one, saturating at the latest
    /// representable instant
    pub fn after(&self, duration: std::time::Duration) -> Self {
        let later = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delta| self.0.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self(later)
    }

    /// Check whether this instant has been reached
    pub fn has_passed(&self) -> bool {
        Utc::now() >= self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Envelope
// ============================================================================

/// A message together with its routing and trace metadata.
///
/// The payload is an opaque JSON value. It can be read raw, as a string, or
/// deserialized into a typed value. The lock reference is set by the queue
/// while the envelope is leased and is never serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(default)]
    message_id: Option<MessageId>,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    trace_id: Option<String>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    sent_time: Option<Timestamp>,
    #[serde(skip)]
    reference: Option<LockToken>,
}

impl MessageEnvelope {
    /// Envelope with every field absent
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create an envelope with a generated id and the trace id of `context`
    pub fn new(context: &Context, message_type: impl Into<String>, message: impl Into<Value>) -> Self {
        Self {
            message_id: Some(MessageId::new()),
            message_type: Some(message_type.into()),
            trace_id: context.trace_id().map(str::to_string),
            message: Some(message.into()),
            sent_time: None,
            reference: None,
        }
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    pub fn set_message_id(&mut self, message_id: MessageId) {
        self.message_id = Some(message_id);
    }

    pub fn message_type(&self) -> Option<&str> {
        self.message_type.as_deref()
    }

    pub fn set_message_type(&mut self, message_type: impl Into<String>) {
        self.message_type = Some(message_type.into());
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn set_trace_id(&mut self, trace_id: Option<String>) {
        self.trace_id = trace_id;
    }

    /// Context carrying this envelope's trace id
    pub fn context(&self) -> Context {
        Context::from_optional_trace_id(self.trace_id())
    }

    pub fn sent_time(&self) -> Option<Timestamp> {
        self.sent_time
    }

    pub fn set_sent_time(&mut self, sent_time: Timestamp) {
        self.sent_time = Some(sent_time);
    }

    /// Lock reference, present only while the envelope is leased
    pub fn reference(&self) -> Option<LockToken> {
        self.reference
    }

    pub fn set_reference(&mut self, reference: Option<LockToken>) {
        self.reference = reference;
    }

    /// Take the lock reference out, leaving the envelope unleased
    pub fn take_reference(&mut self) -> Option<LockToken> {
        self.reference.take()
    }

    /// Raw payload
    pub fn message(&self) -> Option<&Value> {
        self.message.as_ref()
    }

    pub fn set_message(&mut self, message: Option<Value>) {
        self.message = message;
    }

    /// Payload as text: strings are returned as-is, other values as JSON
    pub fn message_as_string(&self) -> Option<String> {
        match self.message.as_ref()? {
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn set_message_as_string(&mut self, message: impl Into<String>) {
        self.message = Some(Value::String(message.into()));
    }

    /// Payload deserialized into `T`.
    ///
    /// String payloads are parsed as JSON text; structured payloads are
    /// converted directly. Returns `Ok(None)` when there is no payload.
    pub fn message_as<T: DeserializeOwned>(&self) -> Result<Option<T>, SerializationError> {
        let value = match self.message.as_ref() {
            None => return Ok(None),
            Some(Value::String(text)) => serde_json::from_str(text)?,
            Some(other) => serde_json::from_value(other.clone())?,
        };
        Ok(Some(value))
    }

    /// Store the JSON text of `value` as the payload
    pub fn set_message_as_object<T: Serialize>(
        &mut self,
        value: &T,
    ) -> Result<(), SerializationError> {
        let text = serde_json::to_string(value)?;
        self.message = Some(Value::String(text));
        Ok(())
    }

    /// Serialize the envelope (without its lock reference) to JSON text
    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope from JSON text
    pub fn from_json(text: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl fmt::Display for MessageEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = self.message_as_string();
        write!(
            f,
            "[{},{},{}]",
            self.trace_id.as_deref().unwrap_or("---"),
            self.message_type.as_deref().unwrap_or("---"),
            payload.as_deref().unwrap_or("---")
        )
    }
}
