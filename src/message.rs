//! Wire message envelope and payload types.
//!
//! Every message carries a kind tag, a routing header and an opaque JSON
//! payload. Payloads form a closed set per kind; unknown kind tags refuse
//! to decode.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{RpcError, RpcResult};
use crate::subscription::SubscriptionQos;
use crate::util::now_ms;

// =============================================================================
// Identifiers
// =============================================================================

/// Mint a fresh participant id.
pub fn new_participant_id() -> String {
    Uuid::now_v7().to_string()
}

/// Mint a fresh request-reply correlation id.
pub fn new_request_reply_id() -> String {
    Uuid::now_v7().to_string()
}

/// Mint a fresh subscription id.
pub fn new_subscription_id() -> String {
    Uuid::now_v7().to_string()
}

// =============================================================================
// Envelope
// =============================================================================

/// Message classification used by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Request,
    Reply,
    OneWayRequest,
    SubscriptionRequest,
    BroadcastSubscriptionRequest,
    MulticastSubscriptionRequest,
    SubscriptionReply,
    SubscriptionStop,
    Publication,
}

/// Routing header carried by every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    pub from: String,
    pub to: String,
    /// Absolute expiry timestamp in epoch milliseconds.
    pub expiry_date_ms: i64,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// A wire message: kind tag, header and serialized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub kind: MessageKind,
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message whose expiry is `ttl_ms` from now.
    pub fn new<P: Serialize>(
        kind: MessageKind,
        from: impl Into<String>,
        to: impl Into<String>,
        ttl_ms: i64,
        payload: &P,
    ) -> RpcResult<Self> {
        Ok(Self {
            kind,
            header: MessageHeader {
                from: from.into(),
                to: to.into(),
                expiry_date_ms: now_ms().saturating_add(ttl_ms),
                message_id: Uuid::now_v7().to_string(),
                reply_to: None,
            },
            payload: serde_json::to_vec(payload)?,
        })
    }

    pub fn request(
        from: impl Into<String>,
        to: impl Into<String>,
        ttl_ms: i64,
        request: &Request,
    ) -> RpcResult<Self> {
        Self::new(MessageKind::Request, from, to, ttl_ms, request)
    }

    pub fn reply(
        from: impl Into<String>,
        to: impl Into<String>,
        ttl_ms: i64,
        reply: &Reply,
    ) -> RpcResult<Self> {
        Self::new(MessageKind::Reply, from, to, ttl_ms, reply)
    }

    pub fn subscription_request(
        from: impl Into<String>,
        to: impl Into<String>,
        ttl_ms: i64,
        request: &SubscriptionRequest,
    ) -> RpcResult<Self> {
        Self::new(MessageKind::SubscriptionRequest, from, to, ttl_ms, request)
    }

    pub fn subscription_stop(
        from: impl Into<String>,
        to: impl Into<String>,
        ttl_ms: i64,
        stop: &SubscriptionStop,
    ) -> RpcResult<Self> {
        Self::new(MessageKind::SubscriptionStop, from, to, ttl_ms, stop)
    }

    pub fn publication(
        from: impl Into<String>,
        to: impl Into<String>,
        ttl_ms: i64,
        publication: &SubscriptionPublication,
    ) -> RpcResult<Self> {
        Self::new(MessageKind::Publication, from, to, ttl_ms, publication)
    }

    /// Decode the payload as the given type.
    pub fn decode_payload<P: DeserializeOwned>(&self) -> RpcResult<P> {
        serde_json::from_slice(&self.payload).map_err(RpcError::from)
    }

    /// Milliseconds until this message expires; negative once expired.
    pub fn remaining_ttl_ms(&self) -> i64 {
        self.header.expiry_date_ms.saturating_sub(now_ms())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Method call or attribute access addressed to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub method_name: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub param_datatypes: Vec<String>,
    pub request_reply_id: String,
}

impl Request {
    pub fn new(method_name: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
            params: Vec::new(),
            param_datatypes: Vec::new(),
            request_reply_id: new_request_reply_id(),
        }
    }

    pub fn with_param(mut self, datatype: impl Into<String>, value: Value) -> Self {
        self.param_datatypes.push(datatype.into());
        self.params.push(value);
        self
    }
}

/// A request without reply correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneWayRequest {
    pub method_name: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub param_datatypes: Vec<String>,
}

/// Reply to a [`Request`], correlated by request-reply id. Carries either
/// the response values or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub request_reply_id: String,
    #[serde(default)]
    pub response: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Reply {
    pub fn response(request_reply_id: impl Into<String>, response: Vec<Value>) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            response,
            error: None,
        }
    }

    pub fn error(request_reply_id: impl Into<String>, error: RpcError) -> Self {
        Self {
            request_reply_id: request_reply_id.into(),
            response: Vec::new(),
            error: Some(error),
        }
    }
}

/// Standing interest in an attribute, registered with a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub subscription_id: String,
    pub subscribe_to_name: String,
    pub qos: SubscriptionQos,
}

impl SubscriptionRequest {
    pub fn new() -> Self {
        Self {
            subscription_id: new_subscription_id(),
            subscribe_to_name: String::new(),
            qos: SubscriptionQos::default(),
        }
    }
}

impl Default for SubscriptionRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription to a broadcast, optionally filtered on the provider side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSubscriptionRequest {
    pub subscription_id: String,
    pub subscribe_to_name: String,
    pub qos: SubscriptionQos,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_parameters: Option<Value>,
}

impl From<BroadcastSubscriptionRequest> for SubscriptionRequest {
    fn from(request: BroadcastSubscriptionRequest) -> Self {
        Self {
            subscription_id: request.subscription_id,
            subscribe_to_name: request.subscribe_to_name,
            qos: request.qos,
        }
    }
}

/// Provider acknowledgement of a subscription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionReply {
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// One published value or error for a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPublication {
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Consumer-initiated end of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStop {
    pub subscription_id: String,
}
