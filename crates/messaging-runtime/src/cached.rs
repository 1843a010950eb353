//! Message cache over push-only transports.
//!
//! Many brokers only push messages to a subscriber. [`CachedMessageQueue`]
//! keeps the pushed messages in a local FIFO so that count, peek, batch
//! peek, receive and listen work the same way they do on a pull based queue.
//!
//! The broker side is a [`MessageTransport`]. When the queue subscribes, the
//! transport is handed a [`MessageSink`] through which it delivers incoming
//! messages. A delivered message goes straight to the active listener, or is
//! cached until somebody receives it.

use crate::capabilities::{MessagingCapabilities, QueueOperation};
use crate::config::QueueConfig;
use crate::connection::{ConnectionParams, CredentialParams};
use crate::context::Context;
use crate::envelope::MessageEnvelope;
use crate::error::QueueError;
use crate::queue::{dispatch, MessageQueue, MessageReceiver, QueueCore, QueueDependencies};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

#[cfg(test)]
#[path = "cached_tests.rs"]
mod tests;

/// Longest single wait inside `receive` before the cache is checked again
const WAIT_SLICE: Duration = Duration::from_millis(100);

// ============================================================================
// Transport Contract
// ============================================================================

/// Push based message transport wrapped by [`CachedMessageQueue`].
///
/// Lock related operations are optional; apart from `complete` the defaults
/// report them as unsupported. The capability descriptor decides which of
/// them the cached queue forwards at all.
#[async_trait]
pub trait MessageTransport: Send + Sync + 'static {
    /// Transport name used in log events and errors
    fn name(&self) -> &str;

    /// Operations the transport supports natively
    fn capabilities(&self) -> MessagingCapabilities;

    /// Connect using the resolved parameters
    async fn open(
        &self,
        context: &Context,
        connection: Option<ConnectionParams>,
        credential: Option<CredentialParams>,
    ) -> Result<(), QueueError>;

    async fn close(&self, context: &Context) -> Result<(), QueueError>;

    /// Start pushing incoming messages into `sink`
    async fn subscribe(&self, context: &Context, sink: MessageSink) -> Result<(), QueueError>;

    /// Stop pushing messages
    async fn unsubscribe(&self, context: &Context) -> Result<(), QueueError>;

    async fn send(&self, context: &Context, envelope: &MessageEnvelope) -> Result<(), QueueError>;

    async fn renew_lock(
        &self,
        _envelope: &MessageEnvelope,
        _lock_timeout: Duration,
    ) -> Result<(), QueueError> {
        Err(unsupported(self.name(), QueueOperation::RenewLock))
    }

    /// Acknowledge a processed message. Transports without acknowledgement
    /// only drop the lock reference.
    async fn complete(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        envelope.set_reference(None);
        Ok(())
    }

    async fn abandon(&self, _envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        Err(unsupported(self.name(), QueueOperation::Abandon))
    }

    async fn move_to_dead_letter(&self, _envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        Err(unsupported(self.name(), QueueOperation::DeadLetter))
    }
}

fn unsupported(transport: &str, operation: QueueOperation) -> QueueError {
    QueueError::Unsupported {
        queue: transport.to_string(),
        operation,
    }
}

// ============================================================================
// Shared Cache State
// ============================================================================

#[derive(Default)]
struct CacheState {
    /// Delivered messages not yet consumed (FIFO order)
    messages: VecDeque<MessageEnvelope>,
    /// Listener receiving pushed messages directly
    receiver: Option<Arc<dyn MessageReceiver>>,
}

#[derive(Default)]
struct CacheShared {
    state: Mutex<CacheState>,
    available: Notify,
    opened: AtomicBool,
    subscribed: AtomicBool,
}

/// Entry point for messages pushed by a [`MessageTransport`].
///
/// Cloneable; every clone feeds the same queue.
#[derive(Clone)]
pub struct MessageSink {
    shared: Arc<CacheShared>,
    queue: Weak<dyn MessageQueue>,
}

impl MessageSink {
    /// Hand an incoming message to the listener, or cache it.
    ///
    /// Messages delivered after the queue was closed or dropped are ignored.
    pub async fn deliver(&self, mut envelope: MessageEnvelope) {
        let Some(queue) = self.queue.upgrade() else {
            trace!(message = %envelope, "Queue is gone, delivered message ignored");
            return;
        };

        if !self.shared.opened.load(Ordering::SeqCst) {
            trace!(
                queue = queue.name(),
                message = %envelope,
                "Queue is closed, delivered message ignored"
            );
            return;
        }

        let receiver = {
            let mut state = self.shared.state.lock().await;
            // Close clears the cache under this lock after marking the queue closed
            if !self.shared.opened.load(Ordering::SeqCst) {
                trace!(
                    queue = queue.name(),
                    message = %envelope,
                    "Queue closed during delivery, message ignored"
                );
                return;
            }

            let receiver = state.receiver.clone();
            if receiver.is_none() {
                debug!(queue = queue.name(), message = %envelope, "Cached delivered message");
                state.messages.push_back(envelope);
                drop(state);
                self.shared.available.notify_one();
                return;
            }
            receiver
        };

        if let Some(receiver) = receiver {
            dispatch(receiver.as_ref(), &mut envelope, queue.as_ref()).await;
        }
    }
}

impl fmt::Debug for MessageSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSink")
            .field("attached", &(self.queue.strong_count() > 0))
            .finish()
    }
}

// ============================================================================
// Cached Message Queue
// ============================================================================

/// Message queue serving pull operations from a cache of pushed messages.
///
/// Always handled through an `Arc`, since the subscription keeps a weak
/// reference back to the queue to hand it to listeners.
pub struct CachedMessageQueue<T: MessageTransport> {
    core: QueueCore,
    transport: T,
    shared: Arc<CacheShared>,
    auto_subscribe: bool,
    self_ref: Weak<Self>,
}

impl<T: MessageTransport> CachedMessageQueue<T> {
    /// Create a closed queue over `transport`
    pub fn new(name: impl Into<String>, transport: T) -> Arc<Self> {
        let name = name.into();
        Self::build(QueueCore::new(Some(&name), MessagingCapabilities::none()), false, transport)
    }

    /// Create a closed queue from configuration
    pub fn from_config(
        config: &QueueConfig,
        dependencies: QueueDependencies,
        transport: T,
    ) -> Result<Arc<Self>, QueueError> {
        config.validate()?;

        let mut core = QueueCore::new(None, MessagingCapabilities::none());
        core.configure(config);
        core.set_dependencies(dependencies);
        Ok(Self::build(core, config.auto_subscribe(), transport))
    }

    fn build(mut core: QueueCore, auto_subscribe: bool, transport: T) -> Arc<Self> {
        core.set_capabilities(transport.capabilities().with_cached_operations());

        Arc::new_cyclic(|self_ref| Self {
            core,
            transport,
            shared: Arc::new(CacheShared::default()),
            auto_subscribe,
            self_ref: self_ref.clone(),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn auto_subscribe(&self) -> bool {
        self.auto_subscribe
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.subscribed.load(Ordering::SeqCst)
    }

    fn check_open(&self, context: &Context) -> Result<(), QueueError> {
        self.core.check_open(self.is_open(), context)
    }

    fn sink(&self) -> MessageSink {
        let queue: Weak<dyn MessageQueue> = self.self_ref.clone();
        MessageSink {
            shared: Arc::clone(&self.shared),
            queue,
        }
    }

    /// Subscribe to the transport unless already subscribed
    async fn subscribe(&self, context: &Context) -> Result<(), QueueError> {
        if self
            .shared
            .subscribed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        if let Err(e) = self.transport.subscribe(context, self.sink()).await {
            self.shared.subscribed.store(false, Ordering::SeqCst);
            return Err(e);
        }

        trace!(
            queue = self.name(),
            transport = self.transport.name(),
            trace_id = %context,
            "Subscribed to transport"
        );
        Ok(())
    }
}

impl<T: MessageTransport> fmt::Debug for CachedMessageQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedMessageQueue")
            .field("name", &self.core.name())
            .field("transport", &self.transport.name())
            .field("opened", &self.is_open())
            .field("subscribed", &self.is_subscribed())
            .field("auto_subscribe", &self.auto_subscribe)
            .finish()
    }
}

#[async_trait]
impl<T: MessageTransport> MessageQueue for CachedMessageQueue<T> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn capabilities(&self) -> MessagingCapabilities {
        self.core.capabilities()
    }

    fn is_open(&self) -> bool {
        self.shared.opened.load(Ordering::SeqCst)
    }

    async fn open(&self, context: &Context) -> Result<(), QueueError> {
        if self.is_open() {
            return Ok(());
        }

        let (connection, credential) = self.core.resolve_params(context).await?;
        self.transport.open(context, connection, credential).await?;
        self.shared.opened.store(true, Ordering::SeqCst);

        if self.auto_subscribe {
            if let Err(e) = self.subscribe(context).await {
                error!(
                    queue = self.name(),
                    transport = self.transport.name(),
                    trace_id = %context,
                    error = %e,
                    "Failed to subscribe on open, closing queue"
                );
                self.close(context).await?;
                return Err(e);
            }
        }

        trace!(
            queue = self.name(),
            transport = self.transport.name(),
            trace_id = %context,
            "Opened queue"
        );
        Ok(())
    }

    async fn close(&self, context: &Context) -> Result<(), QueueError> {
        if self.shared.subscribed.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.transport.unsubscribe(context).await {
                warn!(
                    queue = self.name(),
                    transport = self.transport.name(),
                    trace_id = %context,
                    error = %e,
                    "Failed to unsubscribe from transport"
                );
            }
        }

        if self.shared.opened.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.transport.close(context).await {
                warn!(
                    queue = self.name(),
                    transport = self.transport.name(),
                    trace_id = %context,
                    error = %e,
                    "Failed to close transport"
                );
            }
        }

        {
            let mut state = self.shared.state.lock().await;
            state.messages.clear();
            state.receiver = None;
        }
        self.shared.available.notify_waiters();

        trace!(queue = self.name(), trace_id = %context, "Closed queue");
        Ok(())
    }

    async fn clear(&self, context: &Context) -> Result<(), QueueError> {
        self.core.require(QueueOperation::Clear)?;

        self.shared.state.lock().await.messages.clear();

        trace!(queue = self.name(), trace_id = %context, "Cleared queue");
        Ok(())
    }

    async fn read_message_count(&self) -> Result<usize, QueueError> {
        self.core.require(QueueOperation::MessageCount)?;
        Ok(self.shared.state.lock().await.messages.len())
    }

    async fn send(&self, context: &Context, envelope: MessageEnvelope) -> Result<(), QueueError> {
        self.core.require(QueueOperation::Send)?;
        self.check_open(context)?;

        self.transport.send(context, &envelope).await?;

        debug!(
            queue = self.name(),
            trace_id = %context,
            message = %envelope,
            "Sent message"
        );
        Ok(())
    }

    async fn peek(&self, context: &Context) -> Result<Option<MessageEnvelope>, QueueError> {
        self.core.require(QueueOperation::Peek)?;
        self.check_open(context)?;
        self.subscribe(context).await?;

        Ok(self.shared.state.lock().await.messages.front().cloned())
    }

    async fn peek_batch(
        &self,
        context: &Context,
        max_messages: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        self.core.require(QueueOperation::PeekBatch)?;
        self.check_open(context)?;
        self.subscribe(context).await?;

        let state = self.shared.state.lock().await;
        Ok(state.messages.iter().take(max_messages).cloned().collect())
    }

    async fn receive(
        &self,
        context: &Context,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        self.core.require(QueueOperation::Receive)?;
        self.check_open(context)?;
        self.subscribe(context).await?;

        // No deadline when the timeout is past the representable range
        let deadline = Instant::now().checked_add(wait_timeout);

        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_open() {
                return Ok(None);
            }

            if let Some(envelope) = self.shared.state.lock().await.messages.pop_front() {
                debug!(
                    queue = self.name(),
                    trace_id = %context,
                    message = %envelope,
                    "Received message"
                );
                return Ok(Some(envelope));
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    WAIT_SLICE.min(deadline - now)
                }
                None => WAIT_SLICE,
            };
            let _ = tokio::time::timeout(slice, notified).await;
        }
    }

    async fn renew_lock(
        &self,
        envelope: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError> {
        self.core.require(QueueOperation::RenewLock)?;
        self.check_open(&envelope.context())?;

        self.transport.renew_lock(envelope, lock_timeout).await
    }

    async fn complete(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.check_open(&envelope.context())?;

        self.transport.complete(envelope).await
    }

    async fn abandon(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.core.require(QueueOperation::Abandon)?;
        self.check_open(&envelope.context())?;

        self.transport.abandon(envelope).await
    }

    async fn move_to_dead_letter(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.core.require(QueueOperation::DeadLetter)?;
        self.check_open(&envelope.context())?;

        self.transport.move_to_dead_letter(envelope).await
    }

    async fn listen(
        &self,
        context: &Context,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), QueueError> {
        self.check_open(context)?;
        self.subscribe(context).await?;

        trace!(queue = self.name(), trace_id = %context, "Started listening messages");

        // Drain the cache; the receiver only becomes the push target once the
        // cache is observed empty under the lock.
        loop {
            let next = {
                let mut state = self.shared.state.lock().await;
                match state.messages.pop_front() {
                    Some(envelope) => Some(envelope),
                    None => {
                        state.receiver = Some(Arc::clone(&receiver));
                        None
                    }
                }
            };

            match next {
                Some(mut envelope) => dispatch(receiver.as_ref(), &mut envelope, self).await,
                None => break,
            }
        }

        Ok(())
    }

    async fn end_listen(&self, context: &Context) -> Result<(), QueueError> {
        self.shared.state.lock().await.receiver = None;

        trace!(queue = self.name(), trace_id = %context, "Ended listening messages");
        Ok(())
    }
}
