//! Seams towards the messaging layer.
//!
//! Transports themselves live outside this crate; the runtime only needs
//! to hand finished messages to a sender and keep the router's next-hop
//! table in sync with discovery.

use serde_json::Value;

use crate::message::Message;

/// Outbound transport seam. Implementations route the message towards
/// `message.header.to` and may complete asynchronously.
pub trait MessageSender: Send + Sync {
    fn send(&self, message: Message);
}

/// Next-hop table consumed by discovery. The directory holds this as a
/// weak reference; when the router is gone the call is elided.
pub trait MessageRouter: Send + Sync {
    fn add_next_hop(
        &self,
        participant_id: &str,
        address: Value,
        is_globally_visible: bool,
        expiry_date_ms: i64,
        is_sticky: bool,
    );

    fn remove_next_hop(&self, participant_id: &str);
}
