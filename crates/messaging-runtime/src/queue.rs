//! The message queue contract shared by every queue implementation.
//!
//! [`MessageQueue`] is the full operation surface. Implementations embed a
//! [`QueueCore`] which owns the pieces every queue needs in the same way:
//! naming, the capability descriptor, closed-queue checks, lazy resolution
//! of connection and credential parameters, and counter naming.
//!
//! Operation preconditions are checked in a fixed order: capability first
//! ([`QueueError::Unsupported`]), then lifecycle ([`QueueError::NotOpened`]).

use crate::capabilities::{MessagingCapabilities, QueueOperation};
use crate::config::QueueConfig;
use crate::connection::{
    ConfiguredConnectionResolver, ConfiguredCredentialResolver, ConnectionParams,
    ConnectionResolver, CredentialParams, CredentialResolver,
};
use crate::context::Context;
use crate::envelope::MessageEnvelope;
use crate::error::QueueError;
use crate::monitoring::{MetricsCollector, NoOpMetricsCollector};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, trace};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Name reported by queues that were never given one
pub const UNDEFINED_QUEUE_NAME: &str = "undefined";

// ============================================================================
// Contracts
// ============================================================================

/// Callback invoked for every message pushed to a listener.
///
/// The receiver runs on the queue's own task and must not block
/// indefinitely. It is expected to resolve the message through `queue`
/// (complete, abandon, ...). An error is logged by the queue and otherwise
/// ignored; the message then stays leased until its lock expires.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    async fn receive_message(
        &self,
        envelope: &mut MessageEnvelope,
        queue: &dyn MessageQueue,
    ) -> anyhow::Result<()>;
}

/// Interface implemented by every message queue
#[async_trait]
pub trait MessageQueue: Send + Sync + 'static {
    /// Queue name, or `"undefined"` when none was configured
    fn name(&self) -> &str;

    /// Operations supported by this queue
    fn capabilities(&self) -> MessagingCapabilities;

    fn is_open(&self) -> bool;

    /// Resolve connection parameters and open the queue. No-op when open.
    async fn open(&self, context: &Context) -> Result<(), QueueError>;

    /// Close the queue. Idempotent.
    async fn close(&self, context: &Context) -> Result<(), QueueError>;

    /// Remove every message from the queue
    async fn clear(&self, context: &Context) -> Result<(), QueueError>;

    /// Number of messages waiting to be received
    async fn read_message_count(&self) -> Result<usize, QueueError>;

    /// Append a message to the queue
    async fn send(&self, context: &Context, envelope: MessageEnvelope) -> Result<(), QueueError>;

    /// Wrap `message` into a new envelope and send it
    async fn send_as_object(
        &self,
        context: &Context,
        message_type: &str,
        message: Value,
    ) -> Result<(), QueueError> {
        let envelope = MessageEnvelope::new(context, message_type, message);
        self.send(context, envelope).await
    }

    /// First waiting message, without removing or leasing it
    async fn peek(&self, context: &Context) -> Result<Option<MessageEnvelope>, QueueError>;

    /// Up to `max_messages` waiting messages, without removing or leasing them
    async fn peek_batch(
        &self,
        context: &Context,
        max_messages: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError>;

    /// Take the next message, waiting up to `wait_timeout` for one to arrive.
    /// Returns `None` when the wait times out.
    async fn receive(
        &self,
        context: &Context,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError>;

    /// Extend the lease of a received message by `lock_timeout` from now
    async fn renew_lock(
        &self,
        envelope: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError>;

    /// Remove a received message permanently after successful processing
    async fn complete(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Return a received message to the queue so it can be received again
    async fn abandon(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Remove a received message and hand it to dead-letter handling
    async fn move_to_dead_letter(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Deliver incoming messages to `receiver`
    async fn listen(
        &self,
        context: &Context,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), QueueError>;

    /// Run [`listen`](MessageQueue::listen) on a background task.
    ///
    /// Errors escaping the listen loop are logged.
    fn begin_listen(
        self: Arc<Self>,
        context: Context,
        receiver: Arc<dyn MessageReceiver>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.listen(&context, receiver).await {
                error!(
                    queue = self.name(),
                    trace_id = %context,
                    error = %e,
                    "Failed to listen for messages"
                );
            }
        })
    }

    /// Stop a running listen loop
    async fn end_listen(&self, context: &Context) -> Result<(), QueueError>;
}

/// Invoke `receiver` for `envelope`, logging instead of propagating failures
pub(crate) async fn dispatch(
    receiver: &dyn MessageReceiver,
    envelope: &mut MessageEnvelope,
    queue: &dyn MessageQueue,
) {
    trace!(
        queue = queue.name(),
        trace_id = envelope.trace_id().unwrap_or("---"),
        message = %envelope,
        "Dispatching message to receiver"
    );

    if let Err(e) = receiver.receive_message(envelope, queue).await {
        error!(
            queue = queue.name(),
            trace_id = envelope.trace_id().unwrap_or("---"),
            message = %envelope,
            error = %e,
            "Failed to process the message"
        );
    }
}

// ============================================================================
// Shared Queue State
// ============================================================================

/// Collaborators injected into a queue
#[derive(Clone)]
pub struct QueueDependencies {
    pub metrics: Arc<dyn MetricsCollector>,
    pub connection_resolver: Arc<dyn ConnectionResolver>,
    pub credential_resolver: Arc<dyn CredentialResolver>,
}

impl QueueDependencies {
    /// Dependencies resolving the connection and credential sections of
    /// `config`, with counters discarded
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            metrics: Arc::new(NoOpMetricsCollector),
            connection_resolver: Arc::new(ConfiguredConnectionResolver::new(
                config.connection.clone(),
            )),
            credential_resolver: Arc::new(ConfiguredCredentialResolver::new(
                config.credential.clone(),
            )),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_connection_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.connection_resolver = resolver;
        self
    }

    pub fn with_credential_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.credential_resolver = resolver;
        self
    }
}

impl Default for QueueDependencies {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl fmt::Debug for QueueDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueDependencies").finish_non_exhaustive()
    }
}

/// State and helpers shared by all queue implementations
#[derive(Debug, Clone)]
pub struct QueueCore {
    name: String,
    capabilities: MessagingCapabilities,
    dependencies: QueueDependencies,
}

impl QueueCore {
    pub fn new(name: Option<&str>, capabilities: MessagingCapabilities) -> Self {
        Self {
            name: name.unwrap_or(UNDEFINED_QUEUE_NAME).to_string(),
            capabilities,
            dependencies: QueueDependencies::default(),
        }
    }

    /// Apply the configured name, keeping the current one when none is set
    pub fn configure(&mut self, config: &QueueConfig) {
        if let Some(name) = config.resolve_name() {
            self.name = name.to_string();
        }
    }

    pub fn set_dependencies(&mut self, dependencies: QueueDependencies) {
        self.dependencies = dependencies;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> MessagingCapabilities {
        self.capabilities
    }

    pub fn set_capabilities(&mut self, capabilities: MessagingCapabilities) {
        self.capabilities = capabilities;
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.dependencies.metrics
    }

    /// Fail with [`QueueError::Unsupported`] unless `operation` is supported
    pub fn require(&self, operation: QueueOperation) -> Result<(), QueueError> {
        self.capabilities.ensure(operation, &self.name)
    }

    /// Fail with [`QueueError::NotOpened`] unless the queue is open
    pub fn check_open(&self, is_open: bool, context: &Context) -> Result<(), QueueError> {
        if is_open {
            Ok(())
        } else {
            Err(QueueError::NotOpened {
                queue: self.name.clone(),
                trace_id: context.trace_id().map(str::to_string),
            })
        }
    }

    /// Resolve the connection and credential parameters used to open the queue
    pub async fn resolve_params(
        &self,
        context: &Context,
    ) -> Result<(Option<ConnectionParams>, Option<CredentialParams>), QueueError> {
        let connection = self.dependencies.connection_resolver.resolve(context).await?;
        let credential = self.dependencies.credential_resolver.lookup(context).await?;
        Ok((connection, credential))
    }

    /// Full name of a per-queue counter, `queue.<name>.<counter>`
    pub fn counter_name(&self, counter: &str) -> String {
        format!("queue.{}.{}", self.name, counter)
    }

    pub fn increment_counter(&self, counter: &str) {
        self.dependencies
            .metrics
            .increment_one(&self.counter_name(counter));
    }
}
