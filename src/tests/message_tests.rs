//! Wire format round trips and id generation.

use std::collections::HashSet;

use proptest::prelude::*;
use serde_json::json;

use crate::discovery::{DiscoveryEntry, ProviderScope};
use crate::error::RpcError;
use crate::message::{
    BroadcastSubscriptionRequest, Message, Reply, Request, SubscriptionRequest,
    new_subscription_id,
};
use crate::subscription::SubscriptionQos;
use crate::tests::support::test_entry;
use crate::util::now_ms;

#[test]
fn message_envelope_round_trips() {
    let request = Request::new("getTrue");
    let message = Message::request("p2", "p1", 1_000, &request).unwrap();

    let serialized = serde_json::to_string(&message).unwrap();
    let decoded: Message = serde_json::from_str(&serialized).unwrap();

    assert_eq!(decoded, message);
    assert_eq!(decoded.decode_payload::<Request>().unwrap(), request);
}

#[test]
fn message_expiry_is_ttl_from_now() {
    let message = Message::request("p2", "p1", 5_000, &Request::new("m")).unwrap();
    let expiry = message.header.expiry_date_ms;
    assert!(expiry > now_ms());
    assert!(expiry <= now_ms() + 5_000);
    assert!(message.remaining_ttl_ms() <= 5_000);
}

#[test]
fn unknown_kind_tag_is_refused() {
    let raw = json!({
        "kind": "mysteryKind",
        "header": {
            "from": "a",
            "to": "b",
            "expiryDateMs": 1,
            "messageId": "m"
        },
        "payload": []
    });
    assert!(serde_json::from_value::<Message>(raw).is_err());
}

#[test]
fn reply_with_error_round_trips() {
    let reply = Reply::error(
        "r1",
        RpcError::PublicationMissed {
            subscription_id: "s1".to_string(),
        },
    );
    let serialized = serde_json::to_string(&reply).unwrap();
    let decoded: Reply = serde_json::from_str(&serialized).unwrap();
    assert_eq!(decoded, reply);
    assert!(decoded.response.is_empty());
}

#[test]
fn successful_reply_omits_error_field() {
    let reply = Reply::response("r1", vec![json!(1)]);
    let serialized = serde_json::to_string(&reply).unwrap();
    assert!(!serialized.contains("error"));
}

#[test]
fn broadcast_request_converts_to_subscription_request() {
    let broadcast = BroadcastSubscriptionRequest {
        subscription_id: "s1".to_string(),
        subscribe_to_name: "speedChanged".to_string(),
        qos: SubscriptionQos::periodic(100, 200),
        filter_parameters: Some(json!({"minSpeed": 10})),
    };
    let request: SubscriptionRequest = broadcast.into();
    assert_eq!(request.subscription_id, "s1");
    assert_eq!(request.subscribe_to_name, "speedChanged");
    assert_eq!(request.qos.period_ms, 100);
}

#[test]
fn discovery_entry_serialization_is_stable() {
    let entry = test_entry("d", "I", "p1", ProviderScope::Global, 60_000);
    let first = serde_json::to_string(&entry).unwrap();
    let decoded: DiscoveryEntry = serde_json::from_str(&first).unwrap();
    let second = serde_json::to_string(&decoded).unwrap();
    assert_eq!(first, second);
}

proptest! {
    #[test]
    fn generated_subscription_ids_are_unique(count in 1usize..500) {
        let mut ids = HashSet::new();
        for _ in 0..count {
            prop_assert!(ids.insert(new_subscription_id()));
        }
        prop_assert_eq!(ids.len(), count);
    }

    #[test]
    fn request_payload_round_trips(
        method_name in "[a-zA-Z][a-zA-Z0-9_]{0,24}",
        values in prop::collection::vec(any::<i64>(), 0..8),
    ) {
        let mut request = Request::new(method_name);
        for value in &values {
            request = request.with_param("Long", json!(value));
        }
        let message = Message::request("from", "to", 1_000, &request).unwrap();
        let decoded: Request = message.decode_payload().unwrap();
        prop_assert_eq!(decoded, request);
    }
}
