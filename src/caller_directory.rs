//! Installed provider callables keyed by participant id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::provider::RequestCaller;

/// Plain insert/lookup/remove map with exclusive mutation.
#[derive(Default)]
pub struct RequestCallerDirectory {
    callers: Mutex<HashMap<String, Arc<dyn RequestCaller>>>,
}

impl RequestCallerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, participant_id: impl Into<String>, caller: Arc<dyn RequestCaller>) {
        let participant_id = participant_id.into();
        debug!(%participant_id, interface = caller.interface_name(), "request caller added");
        self.callers
            .lock()
            .expect("caller directory poisoned")
            .insert(participant_id, caller);
    }

    pub fn lookup(&self, participant_id: &str) -> Option<Arc<dyn RequestCaller>> {
        self.callers
            .lock()
            .expect("caller directory poisoned")
            .get(participant_id)
            .cloned()
    }

    pub fn remove(&self, participant_id: &str) -> Option<Arc<dyn RequestCaller>> {
        debug!(participant_id, "request caller removed");
        self.callers
            .lock()
            .expect("caller directory poisoned")
            .remove(participant_id)
    }

    pub fn len(&self) -> usize {
        self.callers.lock().expect("caller directory poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
