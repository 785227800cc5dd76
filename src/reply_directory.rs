//! Pending-reply continuations with per-entry time-to-live.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::RpcError;
use crate::timer::{TimerHandle, TimerService};
use crate::util::now_ms;

/// Continuation waiting for one reply. Exactly one of the two outcomes is
/// consumed; the other is dropped with the struct.
pub struct ReplyCaller {
    on_value: Box<dyn FnOnce(Vec<Value>) + Send>,
    on_error: Box<dyn FnOnce(RpcError) + Send>,
}

impl ReplyCaller {
    pub fn new(
        on_value: impl FnOnce(Vec<Value>) + Send + 'static,
        on_error: impl FnOnce(RpcError) + Send + 'static,
    ) -> Self {
        Self {
            on_value: Box::new(on_value),
            on_error: Box::new(on_error),
        }
    }

    pub fn resolve(self, response: Vec<Value>) {
        (self.on_value)(response);
    }

    pub fn reject(self, error: RpcError) {
        (self.on_error)(error);
    }
}

struct PendingReply {
    caller: ReplyCaller,
    expiry_timer: Option<TimerHandle>,
    registered_at_ms: i64,
}

/// Map from request-reply id to the continuation waiting for that reply.
///
/// Each entry carries a TTL; whichever of delivery and expiry happens
/// first consumes the continuation, so at most one of the two callbacks
/// ever fires.
pub struct ReplyCallerDirectory {
    pending: Arc<Mutex<HashMap<String, PendingReply>>>,
    timer: Arc<TimerService>,
}

impl ReplyCallerDirectory {
    pub fn new(timer: Arc<TimerService>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            timer,
        }
    }

    /// Insert a continuation and schedule its expiry `ttl_ms` from now.
    /// A zero or negative TTL is accepted but expires immediately.
    pub fn add(&self, request_reply_id: impl Into<String>, caller: ReplyCaller, ttl_ms: i64) {
        let request_reply_id = request_reply_id.into();
        if ttl_ms <= 0 {
            caller.reject(RpcError::ReplyTtlExpired { request_reply_id });
            return;
        }

        self.pending.lock().expect("reply directory poisoned").insert(
            request_reply_id.clone(),
            PendingReply {
                caller,
                expiry_timer: None,
                registered_at_ms: now_ms(),
            },
        );

        let pending = Arc::clone(&self.pending);
        let expiring_id = request_reply_id.clone();
        let expiry_timer = self.timer.schedule_once(
            Duration::from_millis(ttl_ms as u64),
            move || {
                let expired = pending
                    .lock()
                    .expect("reply directory poisoned")
                    .remove(&expiring_id);
                if let Some(entry) = expired {
                    debug!(request_reply_id = %expiring_id, "reply caller expired");
                    entry.caller.reject(RpcError::ReplyTtlExpired {
                        request_reply_id: expiring_id.clone(),
                    });
                }
            },
        );

        let mut pending = self.pending.lock().expect("reply directory poisoned");
        match pending.get_mut(&request_reply_id) {
            Some(entry) => entry.expiry_timer = Some(expiry_timer),
            // Delivered or expired in the meantime; the handle is stale.
            None => self.timer.cancel(expiry_timer),
        }
    }

    /// Whether a continuation is still pending under this id.
    pub fn contains(&self, request_reply_id: &str) -> bool {
        self.pending
            .lock()
            .expect("reply directory poisoned")
            .contains_key(request_reply_id)
    }

    /// Remove and return the continuation, cancelling its expiry. Returns
    /// `None` when the id is unknown or already expired.
    pub fn remove(&self, request_reply_id: &str) -> Option<ReplyCaller> {
        let entry = self
            .pending
            .lock()
            .expect("reply directory poisoned")
            .remove(request_reply_id)?;
        if let Some(handle) = entry.expiry_timer {
            self.timer.cancel(handle);
        }
        debug!(
            request_reply_id,
            pending_for_ms = now_ms() - entry.registered_at_ms,
            "reply caller removed"
        );
        Some(entry.caller)
    }
}
