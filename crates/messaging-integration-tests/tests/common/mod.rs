//! Common test utilities for messaging-runtime integration tests
//!
//! This module provides:
//! - Builders for opened queues of every engine
//! - A contract fixture exercising behaviour every queue must share

use messaging_runtime::testing::{LoopbackTransport, TestMessageReceiver};
use messaging_runtime::{
    CachedMessageQueue, Context, MemoryMessageQueue, MessageEnvelope, MessageQueue, QueueConfig,
    QueueDependencies, QueueError,
};
use std::sync::Arc;
use tokio::time::Duration;

/// Generous wait used where a message is expected to arrive
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_millis(5000);

// ============================================================================
// Queue Builders
// ============================================================================

/// Opened in-memory queue
#[allow(dead_code)]
pub async fn memory_queue(name: &str) -> Arc<dyn MessageQueue> {
    let config = QueueConfig::new()
        .with_queue(name)
        .with_listen_interval(Duration::from_millis(100));
    let queue = MemoryMessageQueue::from_config(&config, QueueDependencies::default())
        .expect("valid memory queue configuration");
    open(Arc::new(queue)).await
}

/// Opened cached queue over a loopback transport
#[allow(dead_code)]
pub async fn cached_queue(name: &str) -> Arc<dyn MessageQueue> {
    let config = QueueConfig::new().with_queue(name).with_auto_subscribe(true);
    let queue = CachedMessageQueue::from_config(
        &config,
        QueueDependencies::default(),
        LoopbackTransport::new(),
    )
    .expect("valid cached queue configuration");
    open(queue).await
}

#[allow(dead_code)]
async fn open(queue: Arc<dyn MessageQueue>) -> Arc<dyn MessageQueue> {
    queue.open(&Context::new()).await.expect("queue opens");
    queue.clear(&Context::new()).await.expect("queue clears");
    queue
}

/// Envelope carrying a string payload under the fixture trace id
#[allow(dead_code)]
pub fn test_envelope(payload: &str) -> MessageEnvelope {
    MessageEnvelope::new(&Context::from_trace_id("123"), "test_message", payload)
}

// ============================================================================
// Contract Fixture
// ============================================================================

/// Behaviour shared by every message queue, run against an opened queue
#[allow(dead_code)]
pub struct MessageQueueFixture {
    queue: Arc<dyn MessageQueue>,
}

#[allow(dead_code)]
impl MessageQueueFixture {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }

    /// Sent message is received with its content intact
    pub async fn test_send_receive_message(&self) {
        let context = Context::new();
        let envelope = test_envelope("Test message");

        self.queue.send(&context, envelope.clone()).await.unwrap();
        let received = self.queue.receive(&context, WAIT).await.unwrap().unwrap();

        assert_eq!(received.message_id(), envelope.message_id());
        assert_eq!(received.message_type(), envelope.message_type());
        assert_eq!(received.trace_id(), envelope.trace_id());
        assert_eq!(received.message_as_string(), envelope.message_as_string());
        assert!(received.sent_time().is_some());
    }

    /// A waiting receive picks up a message sent later
    pub async fn test_receive_send_message(&self) {
        let envelope = test_envelope("Delayed message");

        let sender = Arc::clone(&self.queue);
        let sent = envelope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            sender.send(&Context::new(), sent).await.unwrap();
        });

        let received = self
            .queue
            .receive(&Context::new(), WAIT)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(received.message_id(), envelope.message_id());
    }

    /// Completed message leaves the queue
    pub async fn test_receive_complete_message(&self) {
        let context = Context::new();
        self.queue
            .send(&context, test_envelope("Complete me"))
            .await
            .unwrap();

        let count = self.queue.read_message_count().await.unwrap();
        assert!(count > 0);

        let mut received = self.queue.receive(&context, WAIT).await.unwrap().unwrap();
        self.queue.complete(&mut received).await.unwrap();

        assert!(received.reference().is_none());
        assert_eq!(self.queue.read_message_count().await.unwrap(), 0);
    }

    /// Abandoned message can be received again, or abandon is reported
    /// unsupported
    pub async fn test_receive_abandon_message(&self) {
        let context = Context::new();
        let envelope = test_envelope("Abandon me");
        self.queue.send(&context, envelope.clone()).await.unwrap();
        let mut received = self.queue.receive(&context, WAIT).await.unwrap().unwrap();

        let result = self.queue.abandon(&mut received).await;

        if !self.queue.capabilities().can_abandon() {
            assert!(matches!(result, Err(QueueError::Unsupported { .. })));
            return;
        }
        result.unwrap();

        let again = self.queue.receive(&context, WAIT).await.unwrap().unwrap();
        assert_eq!(again.message_id(), envelope.message_id());
    }

    /// Peek returns the head without consuming it
    pub async fn test_send_peek_message(&self) {
        let context = Context::new();
        let envelope = test_envelope("Peek me");
        self.queue.send(&context, envelope.clone()).await.unwrap();

        // Cached queues see the message once the transport delivered it
        tokio::time::sleep(Duration::from_millis(100)).await;

        let peeked = self.queue.peek(&context).await.unwrap().unwrap();
        assert_eq!(peeked.message_id(), envelope.message_id());
        assert_eq!(self.queue.read_message_count().await.unwrap(), 1);
    }

    /// Peek on an empty queue returns nothing
    pub async fn test_peek_no_message(&self) {
        let peeked = self.queue.peek(&Context::new()).await.unwrap();

        assert!(peeked.is_none());
    }

    /// Dead-lettered message leaves the queue, or dead letter is reported
    /// unsupported
    pub async fn test_move_to_dead_message(&self) {
        let context = Context::new();
        self.queue
            .send(&context, test_envelope("Poison"))
            .await
            .unwrap();
        let mut received = self.queue.receive(&context, WAIT).await.unwrap().unwrap();

        let result = self.queue.move_to_dead_letter(&mut received).await;

        if !self.queue.capabilities().can_dead_letter() {
            assert!(matches!(result, Err(QueueError::Unsupported { .. })));
            return;
        }
        result.unwrap();
        assert_eq!(self.queue.read_message_count().await.unwrap(), 0);
    }

    /// Listener receives messages sent while it listens
    pub async fn test_on_message(&self) {
        let context = Context::new();
        let receiver = Arc::new(TestMessageReceiver::new());
        let handle = Arc::clone(&self.queue).begin_listen(context.clone(), receiver.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let envelope = test_envelope("Listen to me");
        self.queue.send(&context, envelope.clone()).await.unwrap();

        assert!(receiver.wait_for_messages(1, WAIT).await);
        let delivered = receiver.messages();
        assert_eq!(delivered[0].message_id(), envelope.message_id());

        self.queue.end_listen(&context).await.unwrap();
        tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    }
}
