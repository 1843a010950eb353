//! Tests for message envelopes.

use super::*;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u32,
    item: String,
}

#[test]
fn test_new_envelope_takes_trace_id_from_context() {
    let context = Context::from_trace_id("123");
    let envelope = MessageEnvelope::new(&context, "Test", "Test message");

    assert_eq!(envelope.trace_id(), Some("123"));
    assert_eq!(envelope.message_type(), Some("Test"));
    assert_eq!(envelope.message(), Some(&json!("Test message")));
    assert!(envelope.message_id().is_some());
    assert!(envelope.sent_time().is_none());
    assert!(envelope.reference().is_none());
}

#[test]
fn test_generated_ids_are_unique() {
    let context = Context::new();
    let first = MessageEnvelope::new(&context, "Test", 1);
    let second = MessageEnvelope::new(&context, "Test", 1);

    assert_ne!(first.message_id(), second.message_id());
    assert!(!first.message_id().unwrap().as_str().is_empty());
}

#[test]
fn test_empty_envelope_has_no_fields() {
    let envelope = MessageEnvelope::empty();

    assert!(envelope.message_id().is_none());
    assert!(envelope.message_type().is_none());
    assert!(envelope.trace_id().is_none());
    assert!(envelope.message().is_none());
    assert_eq!(envelope.message_as_string(), None);
    assert_eq!(envelope.message_as::<Order>().unwrap(), None);
}

#[test]
fn test_message_as_string_serializes_structured_payloads() {
    let context = Context::new();
    let text = MessageEnvelope::new(&context, "Test", "plain text");
    let structured = MessageEnvelope::new(&context, "Test", json!({"id": 1}));

    assert_eq!(text.message_as_string().as_deref(), Some("plain text"));
    assert_eq!(structured.message_as_string().as_deref(), Some(r#"{"id":1}"#));
}

#[test]
fn test_typed_projection_from_string_and_value() {
    let context = Context::new();
    let from_text = MessageEnvelope::new(&context, "Order", r#"{"id":7,"item":"pen"}"#);
    let from_value = MessageEnvelope::new(&context, "Order", json!({"id": 7, "item": "pen"}));

    let expected = Order {
        id: 7,
        item: "pen".to_string(),
    };
    assert_eq!(from_text.message_as::<Order>().unwrap(), Some(expected));
    assert_eq!(
        from_value.message_as::<Order>().unwrap(),
        from_text.message_as::<Order>().unwrap()
    );
}

#[test]
fn test_typed_projection_rejects_mismatched_payload() {
    let envelope = MessageEnvelope::new(&Context::new(), "Order", "not json");

    assert!(envelope.message_as::<Order>().is_err());
}

#[test]
fn test_set_message_as_object_stores_json_text() {
    let mut envelope = MessageEnvelope::empty();
    let order = Order {
        id: 3,
        item: "cup".to_string(),
    };

    envelope.set_message_as_object(&order).unwrap();

    assert_eq!(
        envelope.message(),
        Some(&json!(r#"{"id":3,"item":"cup"}"#))
    );
    assert_eq!(envelope.message_as::<Order>().unwrap(), Some(order));
}

#[test]
fn test_display_uses_placeholders() {
    let envelope = MessageEnvelope::new(&Context::from_trace_id("123"), "Test", "hello");
    assert_eq!(envelope.to_string(), "[123,Test,hello]");

    assert_eq!(MessageEnvelope::empty().to_string(), "[---,---,---]");
}

#[test]
fn test_json_skips_lock_reference() {
    let mut envelope = MessageEnvelope::new(&Context::from_trace_id("abc"), "Test", json!([1, 2]));
    envelope.set_sent_time(Timestamp::now());
    envelope.set_reference(Some(LockToken::new(4)));

    let text = envelope.to_json().unwrap();
    assert!(text.contains("\"message_type\":\"Test\""));
    assert!(text.contains("\"trace_id\":\"abc\""));
    assert!(!text.contains("reference"));

    let parsed = MessageEnvelope::from_json(&text).unwrap();
    assert_eq!(parsed.message_id(), envelope.message_id());
    assert_eq!(parsed.sent_time(), envelope.sent_time());
    assert_eq!(parsed.message(), envelope.message());
    assert_eq!(parsed.reference(), None);
}

#[test]
fn test_take_reference_clears_lease() {
    let mut envelope = MessageEnvelope::empty();
    envelope.set_reference(Some(LockToken::new(9)));

    assert_eq!(envelope.take_reference(), Some(LockToken::new(9)));
    assert_eq!(envelope.reference(), None);
}

#[test]
fn test_timestamp_after_saturates() {
    let now = Timestamp::now();

    assert!(now.after(std::time::Duration::from_secs(60)) > now);
    assert_eq!(
        now.after(std::time::Duration::MAX).as_datetime(),
        DateTime::<Utc>::MAX_UTC
    );
    assert!(now.has_passed());
}
