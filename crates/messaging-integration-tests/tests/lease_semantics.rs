//! Integration tests for lease based delivery of the in-memory queue
//!
//! These tests verify:
//! - Lock tokens and backlog order across complete and abandon
//! - Requeue after abandon within the lease
//! - Listen loop start and stop
//! - Dead-letter forwarding between queues

mod common;

use common::{memory_queue, test_envelope, WAIT};
use messaging_runtime::testing::TestMessageReceiver;
use messaging_runtime::{
    Context, InMemoryMetricsCollector, LockToken, MemoryMessageQueue, MessageQueue,
    QueueDependencies,
};
use std::sync::Arc;
use std::time::Duration;

/// Verify tokens 0 and 1 are handed out and the abandoned message goes to
/// the back of the backlog
#[tokio::test]
async fn test_complete_and_abandon_reorder_backlog() {
    // Arrange
    let context = Context::new();
    let queue = memory_queue("abc").await;
    for payload in ["A", "B", "C"] {
        queue.send(&context, test_envelope(payload)).await.unwrap();
    }

    // Act
    let mut a = queue.receive(&context, WAIT).await.unwrap().unwrap();
    let mut b = queue.receive(&context, WAIT).await.unwrap().unwrap();
    queue.complete(&mut a).await.unwrap();
    queue.abandon(&mut b).await.unwrap();

    // Assert
    assert_eq!(a.message_as_string().as_deref(), Some("A"));
    assert_eq!(b.message_as_string().as_deref(), Some("B"));
    let backlog: Vec<String> = queue
        .peek_batch(&context, 10)
        .await
        .unwrap()
        .iter()
        .filter_map(|m| m.message_as_string())
        .collect();
    assert_eq!(backlog, vec!["C", "B"]);
}

/// Verify the first two receives hold tokens 0 and 1
#[tokio::test]
async fn test_lock_tokens_start_at_zero() {
    let context = Context::new();
    let queue = memory_queue("tokens").await;
    queue.send(&context, test_envelope("A")).await.unwrap();
    queue.send(&context, test_envelope("B")).await.unwrap();

    let a = queue.receive(&context, WAIT).await.unwrap().unwrap();
    let b = queue.receive(&context, WAIT).await.unwrap().unwrap();

    assert_eq!(a.reference(), Some(LockToken::new(0)));
    assert_eq!(b.reference(), Some(LockToken::new(1)));
}

/// Verify an abandoned message is counted and received again
#[tokio::test]
async fn test_requeue_after_abandon() {
    let context = Context::new();
    let queue = memory_queue("requeue").await;
    queue.send(&context, test_envelope("retry")).await.unwrap();

    let mut first = queue.receive(&context, WAIT).await.unwrap().unwrap();
    assert_eq!(queue.read_message_count().await.unwrap(), 0);

    queue.abandon(&mut first).await.unwrap();
    assert_eq!(queue.read_message_count().await.unwrap(), 1);

    let second = queue.receive(&context, WAIT).await.unwrap().unwrap();
    assert_eq!(second.message_id(), first.message_id());
}

/// Verify three messages reach the listener and a fourth, sent after
/// end_listen, stays in the backlog
#[tokio::test]
async fn test_listen_then_end_listen() {
    let context = Context::new();
    let queue = memory_queue("listen").await;
    let receiver = Arc::new(TestMessageReceiver::new());

    let handle = Arc::clone(&queue).begin_listen(context.clone(), receiver.clone());
    for payload in ["1", "2", "3"] {
        queue.send(&context, test_envelope(payload)).await.unwrap();
    }
    assert!(receiver.wait_for_messages(3, WAIT).await);

    queue.end_listen(&context).await.unwrap();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();

    queue.send(&context, test_envelope("4")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(receiver.message_count(), 3);
    assert_eq!(queue.read_message_count().await.unwrap(), 1);
}

/// Verify dead-lettered messages land in the attached dead-letter queue
#[tokio::test]
async fn test_dead_letter_forwarding() {
    let context = Context::new();
    let metrics = Arc::new(InMemoryMetricsCollector::new());
    let dead_letter = memory_queue("orders-dlq").await;
    let queue = MemoryMessageQueue::new("orders")
        .with_dependencies(QueueDependencies::default().with_metrics(metrics.clone()))
        .with_dead_letter_queue(Arc::clone(&dead_letter));
    queue.open(&context).await.unwrap();
    queue.send(&context, test_envelope("poison")).await.unwrap();

    let mut message = queue.receive(&context, WAIT).await.unwrap().unwrap();
    queue.move_to_dead_letter(&mut message).await.unwrap();

    assert_eq!(queue.read_message_count().await.unwrap(), 0);
    assert_eq!(dead_letter.read_message_count().await.unwrap(), 1);
    assert_eq!(metrics.count("queue.orders.dead_messages"), 1);
}
