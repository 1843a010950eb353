//! # Messaging Runtime
//!
//! Message queue engine with a common contract over interchangeable backends.
//!
//! This library provides:
//! - A backend-agnostic [`MessageQueue`] contract with capability checks
//! - Lease based, at-least-once delivery with renewable locks
//! - Abandon/requeue and dead-letter handling
//! - Cancellable listen loops pushing messages to a [`MessageReceiver`]
//! - A message cache giving push-only transports pull semantics
//!
//! ## Module Organization
//!
//! - [`envelope`] - Message envelope, ids, lock tokens and timestamps
//! - [`capabilities`] - Capability descriptor of a queue backend
//! - [`queue`] - Queue and receiver contracts, shared queue core
//! - [`providers`] - In-memory reference queue
//! - [`cached`] - Cached queue over push-only transports
//! - [`factory`] - Queue factories
//! - [`config`] - Queue configuration loading
//! - [`connection`] - Connection and credential parameters and resolvers
//! - [`monitoring`] - Counter collection
//! - [`error`] - Error types for all queue operations
//! - [`testing`] - Receivers and transports for tests

// Module declarations
pub mod cached;
pub mod capabilities;
pub mod config;
pub mod connection;
pub mod context;
pub mod envelope;
pub mod error;
pub mod factory;
pub mod monitoring;
pub mod providers;
pub mod queue;
pub mod testing;

// Re-export commonly used types at crate root for convenience
pub use cached::{CachedMessageQueue, MessageSink, MessageTransport};
pub use capabilities::{MessagingCapabilities, QueueOperation};
pub use config::{QueueConfig, QueueOptions};
pub use connection::{
    ConfiguredConnectionResolver, ConfiguredCredentialResolver, ConnectionParams,
    ConnectionResolver, CredentialParams, CredentialResolver,
};
pub use context::Context;
pub use envelope::{LockToken, MessageEnvelope, MessageId, Timestamp};
pub use error::{ConfigurationError, ErrorCategory, QueueError, SerializationError};
pub use factory::{MemoryMessageQueueFactory, MessageQueueFactory};
pub use monitoring::{
    InMemoryMetricsCollector, LogMetricsCollector, MetricsCollector, NoOpMetricsCollector,
};
pub use providers::MemoryMessageQueue;
pub use queue::{MessageQueue, MessageReceiver, QueueCore, QueueDependencies};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
