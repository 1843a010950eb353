//! In-memory message queue with lease based delivery.
//!
//! This module provides a fully functional in-memory queue that:
//! - Delivers messages in FIFO order, at least once
//! - Leases received messages under lock tokens until they are completed,
//!   abandoned or moved to dead letter
//! - Supports renewable locks and an optional dead-letter queue
//! - Runs a single cancellable listen loop per instance
//!
//! This queue is intended for:
//! - Unit testing of queue consumers
//! - Development and prototyping
//! - Reference behaviour for transport backed queues
//!
//! Expired leases are not swept. A message whose lease ran out stays
//! unreachable until it is completed, dead-lettered, or abandoned (which
//! drops it instead of requeueing it).

use crate::capabilities::{MessagingCapabilities, QueueOperation};
use crate::config::{QueueConfig, DEFAULT_LISTEN_INTERVAL};
use crate::context::Context;
use crate::envelope::{LockToken, MessageEnvelope, Timestamp};
use crate::error::QueueError;
use crate::queue::{dispatch, MessageQueue, MessageReceiver, QueueCore, QueueDependencies};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Longest single wait inside `receive` before the backlog is checked again
const WAIT_SLICE: Duration = Duration::from_millis(100);

// ============================================================================
// Internal State
// ============================================================================

/// A received message and its lease
struct LockedMessage {
    message: MessageEnvelope,
    expiration_time: Timestamp,
    timeout: Duration,
}

/// The running listen loop
struct ListenerSlot {
    id: u64,
    token: CancellationToken,
}

/// Everything guarded by the queue lock
#[derive(Default)]
struct QueueState {
    /// Messages waiting to be received (FIFO order)
    messages: VecDeque<MessageEnvelope>,
    /// Leased messages keyed by lock token
    locked_messages: HashMap<LockToken, LockedMessage>,
    lock_token_sequence: u64,
    listener: Option<ListenerSlot>,
    listener_sequence: u64,
}

impl QueueState {
    fn next_lock_token(&mut self) -> LockToken {
        let token = LockToken::new(self.lock_token_sequence);
        self.lock_token_sequence = self.lock_token_sequence.wrapping_add(1);
        token
    }
}

// ============================================================================
// Memory Message Queue
// ============================================================================

/// Self-contained in-memory message queue.
///
/// All capabilities are supported. The lease of a received message lasts
/// for the configured lock timeout, or for the receive wait timeout when no
/// lock timeout is configured.
///
/// # Examples
///
/// ```rust
/// use messaging_runtime::{Context, MemoryMessageQueue, MessageEnvelope, MessageQueue};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let queue = MemoryMessageQueue::new("orders");
/// let context = Context::from_trace_id("123");
/// queue.open(&context).await.unwrap();
///
/// queue
///     .send(&context, MessageEnvelope::new(&context, "order_created", "ABC"))
///     .await
///     .unwrap();
///
/// let mut envelope = queue
///     .receive(&context, Duration::from_secs(1))
///     .await
///     .unwrap()
///     .unwrap();
/// assert_eq!(envelope.message_as_string().as_deref(), Some("ABC"));
///
/// queue.complete(&mut envelope).await.unwrap();
/// assert_eq!(queue.read_message_count().await.unwrap(), 0);
/// # });
/// ```
pub struct MemoryMessageQueue {
    core: QueueCore,
    state: Mutex<QueueState>,
    available: Notify,
    opened: AtomicBool,
    listen_interval: Duration,
    lock_timeout: Option<Duration>,
    dead_letter: Option<Arc<dyn MessageQueue>>,
}

impl MemoryMessageQueue {
    /// Create a closed queue with the given name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::with_core(QueueCore::new(Some(&name), MessagingCapabilities::all()))
    }

    /// Create a closed queue from configuration.
    ///
    /// The queue is named after the configured `queue` or `name` key, or
    /// `"undefined"` when neither is set.
    pub fn from_config(
        config: &QueueConfig,
        dependencies: QueueDependencies,
    ) -> Result<Self, QueueError> {
        config.validate()?;

        let mut queue = Self::with_core(QueueCore::new(None, MessagingCapabilities::all()))
            .with_dependencies(dependencies);
        queue.configure(config);
        Ok(queue)
    }

    fn with_core(core: QueueCore) -> Self {
        Self {
            core,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            opened: AtomicBool::new(false),
            listen_interval: DEFAULT_LISTEN_INTERVAL,
            lock_timeout: None,
            dead_letter: None,
        }
    }

    /// Apply name, listen interval and lock timeout from configuration
    pub fn configure(&mut self, config: &QueueConfig) {
        self.core.configure(config);
        self.listen_interval = config.listen_interval();
        self.lock_timeout = config.lock_timeout();
    }

    pub fn with_dependencies(mut self, dependencies: QueueDependencies) -> Self {
        self.core.set_dependencies(dependencies);
        self
    }

    /// Forward dead-lettered messages to `queue`
    pub fn with_dead_letter_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    pub fn listen_interval(&self) -> Duration {
        self.listen_interval
    }

    /// Lease duration used for received messages, when configured
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    /// Number of messages currently leased
    pub async fn locked_message_count(&self) -> usize {
        self.state.lock().await.locked_messages.len()
    }

    fn check_open(&self, context: &Context) -> Result<(), QueueError> {
        self.core.check_open(self.is_open(), context)
    }

    /// Pop and lease the head of the backlog, if there is one
    async fn try_receive(&self, wait_timeout: Duration) -> Option<MessageEnvelope> {
        let mut state = self.state.lock().await;
        let mut envelope = state.messages.pop_front()?;

        let timeout = self.lock_timeout.unwrap_or(wait_timeout);
        let token = state.next_lock_token();
        envelope.set_reference(Some(token));
        state.locked_messages.insert(
            token,
            LockedMessage {
                message: envelope.clone(),
                expiration_time: Timestamp::now().after(timeout),
                timeout,
            },
        );

        Some(envelope)
    }

    /// Release the lease of `envelope` and put it back at the head of the
    /// backlog, ahead of messages sent after it was received
    async fn return_to_head(&self, context: &Context, envelope: &mut MessageEnvelope) {
        let Some(token) = envelope.take_reference() else {
            return;
        };

        let mut state = self.state.lock().await;
        if state.locked_messages.remove(&token).is_none() {
            return;
        }
        state.messages.push_front(envelope.clone());
        drop(state);
        self.available.notify_one();

        trace!(
            queue = self.name(),
            trace_id = %context,
            message = %envelope,
            "Returned message to the head of the queue"
        );
    }

    async fn listen_loop(
        &self,
        context: &Context,
        receiver: &dyn MessageReceiver,
        token: &CancellationToken,
    ) -> Result<(), QueueError> {
        loop {
            let received = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = self.receive(context, self.listen_interval) => received,
            };

            let mut envelope = match received {
                Ok(Some(envelope)) => envelope,
                Ok(None) if self.is_open() => continue,
                Ok(None) => break,
                Err(QueueError::NotOpened { .. }) => break,
                Err(e) => return Err(e),
            };

            if token.is_cancelled() {
                // Stopped while the message was being leased
                self.return_to_head(context, &mut envelope).await;
                break;
            }

            dispatch(receiver, &mut envelope, self).await;
        }

        Ok(())
    }
}

impl Default for MemoryMessageQueue {
    fn default() -> Self {
        Self::with_core(QueueCore::new(None, MessagingCapabilities::all()))
    }
}

impl fmt::Debug for MemoryMessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMessageQueue")
            .field("name", &self.core.name())
            .field("opened", &self.is_open())
            .field("listen_interval", &self.listen_interval)
            .field("lock_timeout", &self.lock_timeout)
            .field("dead_letter", &self.dead_letter.as_ref().map(|q| q.name()))
            .finish()
    }
}

#[async_trait]
impl MessageQueue for MemoryMessageQueue {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn capabilities(&self) -> MessagingCapabilities {
        self.core.capabilities()
    }

    fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    async fn open(&self, context: &Context) -> Result<(), QueueError> {
        if self.is_open() {
            return Ok(());
        }

        let (connection, _credential) = self.core.resolve_params(context).await?;

        let _state = self.state.lock().await;
        self.opened.store(true, Ordering::SeqCst);

        trace!(
            queue = self.name(),
            trace_id = %context,
            uri = connection.as_ref().and_then(|c| c.uri()),
            "Opened queue"
        );
        Ok(())
    }

    async fn close(&self, context: &Context) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        self.opened.store(false, Ordering::SeqCst);
        if let Some(listener) = state.listener.take() {
            listener.token.cancel();
        }
        state.locked_messages.clear();
        drop(state);

        self.available.notify_waiters();

        trace!(queue = self.name(), trace_id = %context, "Closed queue");
        Ok(())
    }

    async fn clear(&self, context: &Context) -> Result<(), QueueError> {
        self.core.require(QueueOperation::Clear)?;

        let mut state = self.state.lock().await;
        state.messages.clear();
        state.locked_messages.clear();
        drop(state);

        trace!(queue = self.name(), trace_id = %context, "Cleared queue");
        Ok(())
    }

    async fn read_message_count(&self) -> Result<usize, QueueError> {
        self.core.require(QueueOperation::MessageCount)?;
        Ok(self.state.lock().await.messages.len())
    }

    async fn send(&self, context: &Context, mut envelope: MessageEnvelope) -> Result<(), QueueError> {
        self.core.require(QueueOperation::Send)?;
        self.check_open(context)?;

        envelope.set_sent_time(Timestamp::now());
        debug!(
            queue = self.name(),
            trace_id = %context,
            message = %envelope,
            "Sent message"
        );

        self.state.lock().await.messages.push_back(envelope);
        self.available.notify_one();

        self.core.increment_counter("sent_messages");
        Ok(())
    }

    async fn peek(&self, context: &Context) -> Result<Option<MessageEnvelope>, QueueError> {
        self.core.require(QueueOperation::Peek)?;
        self.check_open(context)?;

        let message = self.state.lock().await.messages.front().cloned();
        if let Some(envelope) = &message {
            trace!(queue = self.name(), trace_id = %context, message = %envelope, "Peeked message");
        }
        Ok(message)
    }

    async fn peek_batch(
        &self,
        context: &Context,
        max_messages: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        self.core.require(QueueOperation::PeekBatch)?;
        self.check_open(context)?;

        let messages: Vec<MessageEnvelope> = self
            .state
            .lock()
            .await
            .messages
            .iter()
            .take(max_messages)
            .cloned()
            .collect();

        trace!(
            queue = self.name(),
            trace_id = %context,
            count = messages.len(),
            "Peeked messages"
        );
        Ok(messages)
    }

    async fn receive(
        &self,
        context: &Context,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        self.core.require(QueueOperation::Receive)?;
        self.check_open(context)?;

        // No deadline when the timeout is past the representable range
        let deadline = Instant::now().checked_add(wait_timeout);

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_open() {
                return Ok(None);
            }

            if let Some(envelope) = self.try_receive(wait_timeout).await {
                self.core.increment_counter("received_messages");
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
        let context = envelope.context();
        self.check_open(&context)?;

        let Some(token) = envelope.reference() else {
            return Ok(());
        };

        let renewed = {
            let mut state = self.state.lock().await;
            match state.locked_messages.get_mut(&token) {
                Some(locked) => {
                    locked.expiration_time = Timestamp::now().after(lock_timeout);
                    locked.timeout = lock_timeout;
                    true
                }
                None => false,
            }
        };

        if renewed {
            trace!(
                queue = self.name(),
                trace_id = %context,
                message = %envelope,
                lock_token = %token,
                "Renewed lock for message"
            );
        }
        Ok(())
    }

    async fn complete(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        let context = envelope.context();
        self.check_open(&context)?;

        let Some(token) = envelope.take_reference() else {
            return Ok(());
        };

        self.state.lock().await.locked_messages.remove(&token);

        trace!(
            queue = self.name(),
            trace_id = %context,
            message = %envelope,
            "Completed message"
        );
        Ok(())
    }

    async fn abandon(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.core.require(QueueOperation::Abandon)?;
        let context = envelope.context();
        self.check_open(&context)?;

        let Some(token) = envelope.reference() else {
            return Ok(());
        };

        let locked = {
            let mut state = self.state.lock().await;
            match state.locked_messages.remove(&token) {
                Some(locked) => locked,
                None => return Ok(()),
            }
        };
        envelope.set_reference(None);

        if locked.expiration_time.has_passed() {
            debug!(
                queue = self.name(),
                trace_id = %context,
                message = %envelope,
                lease = ?locked.timeout,
                "Lease expired, abandoned message is dropped"
            );
            return Ok(());
        }

        trace!(
            queue = self.name(),
            trace_id = %context,
            message = %envelope,
            "Abandoned message"
        );
        self.send(&context, envelope.clone()).await
    }

    async fn move_to_dead_letter(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.core.require(QueueOperation::DeadLetter)?;
        let context = envelope.context();
        self.check_open(&context)?;

        let Some(token) = envelope.take_reference() else {
            return Ok(());
        };

        self.state.lock().await.locked_messages.remove(&token);
        self.core.increment_counter("dead_messages");

        trace!(
            queue = self.name(),
            trace_id = %context,
            message = %envelope,
            "Moved message to dead letter"
        );

        if let Some(dead_letter) = &self.dead_letter {
            dead_letter.send(&context, envelope.clone()).await?;
        }
        Ok(())
    }

    async fn listen(
        &self,
        context: &Context,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), QueueError> {
        self.check_open(context)?;

        let (listener_id, token) = {
            let mut state = self.state.lock().await;
            if state.listener.is_some() {
                error!(queue = self.name(), trace_id = %context, "Already listening queue");
                return Ok(());
            }

            let id = state.listener_sequence;
            state.listener_sequence = state.listener_sequence.wrapping_add(1);
            let token = CancellationToken::new();
            state.listener = Some(ListenerSlot {
                id,
                token: token.clone(),
            });
            (id, token)
        };

        trace!(queue = self.name(), trace_id = %context, "Started listening messages");

        let result = self.listen_loop(context, receiver.as_ref(), &token).await;

        {
            let mut state = self.state.lock().await;
            if state
                .listener
                .as_ref()
                .is_some_and(|listener| listener.id == listener_id)
            {
                state.listener = None;
            }
        }

        trace!(queue = self.name(), trace_id = %context, "Stopped listening messages");
        result
    }

    async fn end_listen(&self, context: &Context) -> Result<(), QueueError> {
        let listener = self.state.lock().await.listener.take();
        if let Some(listener) = listener {
            listener.token.cancel();
            trace!(queue = self.name(), trace_id = %context, "Ended listening messages");
        }
        Ok(())
    }
}
