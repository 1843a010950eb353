//! Tests for the shared queue core.

use super::*;
use crate::monitoring::InMemoryMetricsCollector;
use crate::providers::MemoryMessageQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_core_defaults_to_undefined_name() {
    let core = QueueCore::new(None, MessagingCapabilities::all());

    assert_eq!(core.name(), UNDEFINED_QUEUE_NAME);
    assert_eq!(core.counter_name("sent_messages"), "queue.undefined.sent_messages");
}

#[test]
fn test_configure_applies_resolved_name() {
    let mut core = QueueCore::new(Some("initial"), MessagingCapabilities::all());

    core.configure(&QueueConfig::default());
    assert_eq!(core.name(), "initial");

    core.configure(&QueueConfig {
        name: Some("by-name".to_string()),
        queue: Some("by-queue".to_string()),
        ..QueueConfig::default()
    });
    assert_eq!(core.name(), "by-queue");
}

#[test]
fn test_require_checks_capabilities() {
    let core = QueueCore::new(Some("orders"), MessagingCapabilities::none());

    let error = core.require(QueueOperation::Peek).unwrap_err();

    assert!(matches!(
        error,
        QueueError::Unsupported {
            operation: QueueOperation::Peek,
            ..
        }
    ));
}

#[test]
fn test_check_open_carries_trace_id() {
    let core = QueueCore::new(Some("orders"), MessagingCapabilities::all());

    assert!(core.check_open(true, &Context::new()).is_ok());

    let error = core
        .check_open(false, &Context::from_trace_id("trace-1"))
        .unwrap_err();
    assert_eq!(error.code(), "NOT_OPENED");
    assert_eq!(error.trace_id(), Some("trace-1"));
}

#[test]
fn test_increment_counter_uses_injected_metrics() {
    let metrics = Arc::new(InMemoryMetricsCollector::new());
    let mut core = QueueCore::new(Some("orders"), MessagingCapabilities::all());
    core.set_dependencies(QueueDependencies::default().with_metrics(metrics.clone()));

    core.increment_counter("dead_messages");
    core.increment_counter("dead_messages");

    assert_eq!(metrics.count("queue.orders.dead_messages"), 2);
}

#[tokio::test]
async fn test_resolve_params_from_config() {
    let config = QueueConfig::new()
        .with_connection(ConnectionParams::from_tuples(&[("uri", "memory://orders")]))
        .with_credential(CredentialParams::from_tuples(&[("username", "admin")]));
    let mut core = QueueCore::new(None, MessagingCapabilities::all());
    core.set_dependencies(QueueDependencies::from_config(&config));

    let (connection, credential) = core.resolve_params(&Context::new()).await.unwrap();

    assert_eq!(connection.unwrap().uri(), Some("memory://orders"));
    assert_eq!(credential.unwrap().username(), Some("admin"));
}

#[tokio::test]
async fn test_resolve_params_defaults_to_none() {
    let core = QueueCore::new(None, MessagingCapabilities::all());

    let (connection, credential) = core.resolve_params(&Context::new()).await.unwrap();

    assert!(connection.is_none());
    assert!(credential.is_none());
}

struct FailingReceiver {
    calls: AtomicUsize,
}

#[async_trait]
impl MessageReceiver for FailingReceiver {
    async fn receive_message(
        &self,
        _envelope: &mut MessageEnvelope,
        _queue: &dyn MessageQueue,
    ) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("receiver rejected the message")
    }
}

#[tokio::test]
async fn test_dispatch_swallows_receiver_errors() {
    let queue = MemoryMessageQueue::new("orders");
    let receiver = FailingReceiver {
        calls: AtomicUsize::new(0),
    };
    let mut envelope = MessageEnvelope::new(&Context::new(), "type", "payload");

    dispatch(&receiver, &mut envelope, &queue).await;

    assert_eq!(receiver.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_send_as_object_wraps_value() {
    let queue = MemoryMessageQueue::new("orders");
    let context = Context::from_trace_id("trace-7");
    queue.open(&context).await.unwrap();

    queue
        .send_as_object(&context, "order_created", serde_json::json!({"id": 7}))
        .await
        .unwrap();

    let envelope = queue.peek(&context).await.unwrap().unwrap();
    assert_eq!(envelope.message_type(), Some("order_created"));
    assert_eq!(envelope.trace_id(), Some("trace-7"));
    assert_eq!(envelope.message(), Some(&serde_json::json!({"id": 7})));
    assert!(envelope.message_id().is_some());
}
