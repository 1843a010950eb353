//! Helpers for testing code that uses message queues.
//!
//! - [`TestMessageReceiver`] collects every message pushed to it.
//! - [`LoopbackTransport`] is a push-only transport that delivers sent
//!   messages straight back to its subscriber, for exercising
//!   [`CachedMessageQueue`](crate::cached::CachedMessageQueue) without a broker.

use crate::cached::{MessageSink, MessageTransport};
use crate::capabilities::MessagingCapabilities;
use crate::connection::{ConnectionParams, CredentialParams};
use crate::context::Context;
use crate::envelope::{MessageEnvelope, Timestamp};
use crate::error::QueueError;
use crate::queue::{MessageQueue, MessageReceiver};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[cfg(test)]
#[path = "testing_tests.rs"]
mod tests;

/// Interval at which [`TestMessageReceiver::wait_for_messages`] re-checks
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Message Receiver
// ============================================================================

/// Receiver that records the messages it is given.
///
/// Messages are not completed; resolving them is left to the test.
#[derive(Debug, Default)]
pub struct TestMessageReceiver {
    messages: Mutex<Vec<MessageEnvelope>>,
    failing: AtomicBool,
}

impl TestMessageReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver that records every message and then reports an error
    pub fn failing() -> Self {
        let receiver = Self::default();
        receiver.set_failing(true);
        receiver
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Received messages in arrival order
    pub fn messages(&self) -> Vec<MessageEnvelope> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forget all received messages
    pub fn clear(&self) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Wait until at least `count` messages arrived. Returns `false` when
    /// `timeout` elapses first.
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.message_count() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl MessageReceiver for TestMessageReceiver {
    async fn receive_message(
        &self,
        envelope: &mut MessageEnvelope,
        _queue: &dyn MessageQueue,
    ) -> anyhow::Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());

        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("test receiver failure");
        }
        Ok(())
    }
}

// ============================================================================
// Loopback Transport
// ============================================================================

/// Push-only transport that loops sent messages back to its subscriber.
///
/// Messages sent while nobody is subscribed are held back and delivered
/// when a subscription starts.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    sink: Mutex<Option<MessageSink>>,
    pending: Mutex<Vec<MessageEnvelope>>,
    connection: Mutex<Option<ConnectionParams>>,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    fail_subscribe: AtomicBool,
    fail_unsubscribe: AtomicBool,
}

impl LoopbackTransport {
    pub const NAME: &'static str = "loopback";

    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `subscribe` call fail
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make every following `unsubscribe` call fail
    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Connection parameters the transport was last opened with
    pub fn connection(&self) -> Option<ConnectionParams> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of sent messages waiting for a subscriber
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn current_sink(&self) -> Option<MessageSink> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn failure(&self, operation: &str) -> QueueError {
        QueueError::TransportError {
            transport: Self::NAME.to_string(),
            message: format!("{} failed", operation),
        }
    }
}

#[async_trait]
impl MessageTransport for LoopbackTransport {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities::new(false, true, false, false, false, false, false, false, false)
    }

    async fn open(
        &self,
        _context: &Context,
        connection: Option<ConnectionParams>,
        _credential: Option<CredentialParams>,
    ) -> Result<(), QueueError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        *self.connection.lock().unwrap_or_else(PoisonError::into_inner) = connection;
        Ok(())
    }

    async fn close(&self, _context: &Context) -> Result<(), QueueError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, _context: &Context, sink: MessageSink) -> Result<(), QueueError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(self.failure("subscribe"));
        }

        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink.clone());

        let pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        for envelope in pending {
            sink.deliver(envelope).await;
        }
        Ok(())
    }

    async fn unsubscribe(&self, _context: &Context) -> Result<(), QueueError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(self.failure("unsubscribe"));
        }

        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    async fn send(&self, _context: &Context, envelope: &MessageEnvelope) -> Result<(), QueueError> {
        let mut envelope = envelope.clone();
        envelope.set_sent_time(Timestamp::now());

        match self.current_sink() {
            Some(sink) => sink.deliver(envelope).await,
            None => self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(envelope),
        }
        Ok(())
    }
}
