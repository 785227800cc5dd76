//! In-memory capability store with participant-id and interface indexes.

use std::collections::HashMap;

use crate::discovery::{DiscoveryEntry, InterfaceAddress};

/// No age limit on cached entries.
pub(crate) const ANY_AGE: i64 = -1;

struct StoredEntry {
    entry: DiscoveryEntry,
    /// When this store learned the entry, for max-age checks.
    received_at_ms: i64,
}

/// Capability entries keyed by participant id, with a secondary index by
/// (domain, interface). Re-inserting a participant id replaces the prior
/// entry, so ids stay unique within one store.
#[derive(Default)]
pub struct DiscoveryEntryStore {
    by_participant: HashMap<String, StoredEntry>,
    by_interface: HashMap<InterfaceAddress, Vec<String>>,
}

impl DiscoveryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: DiscoveryEntry, now_ms: i64) {
        let _ = self.remove(&entry.participant_id);
        let address = entry.interface_address();
        self.by_interface
            .entry(address)
            .or_default()
            .push(entry.participant_id.clone());
        self.by_participant.insert(
            entry.participant_id.clone(),
            StoredEntry {
                entry,
                received_at_ms: now_ms,
            },
        );
    }

    pub fn remove(&mut self, participant_id: &str) -> Option<DiscoveryEntry> {
        let stored = self.by_participant.remove(participant_id)?;
        let address = stored.entry.interface_address();
        let now_empty = match self.by_interface.get_mut(&address) {
            Some(ids) => {
                ids.retain(|id| id != participant_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            let _ = self.by_interface.remove(&address);
        }
        Some(stored.entry)
    }

    pub fn lookup_by_participant_id(&self, participant_id: &str) -> Option<DiscoveryEntry> {
        self.by_participant
            .get(participant_id)
            .map(|stored| stored.entry.clone())
    }

    /// Like [`Self::lookup_by_participant_id`] but ignoring entries older
    /// than `max_age_ms` ([`ANY_AGE`] disables the check).
    pub fn lookup_cached_by_participant_id(
        &self,
        participant_id: &str,
        max_age_ms: i64,
        now_ms: i64,
    ) -> Option<DiscoveryEntry> {
        self.by_participant
            .get(participant_id)
            .filter(|stored| fresh_enough(stored.received_at_ms, max_age_ms, now_ms))
            .map(|stored| stored.entry.clone())
    }

    pub fn lookup_by_interface_address(
        &self,
        address: &InterfaceAddress,
        max_age_ms: i64,
        now_ms: i64,
    ) -> Vec<DiscoveryEntry> {
        let Some(ids) = self.by_interface.get(address) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.by_participant.get(id))
            .filter(|stored| fresh_enough(stored.received_at_ms, max_age_ms, now_ms))
            .map(|stored| stored.entry.clone())
            .collect()
    }

    /// Remove and return every entry whose expiry lies in the past.
    pub fn remove_expired(&mut self, now_ms: i64) -> Vec<DiscoveryEntry> {
        let expired: Vec<String> = self
            .by_participant
            .iter()
            .filter(|(_, stored)| stored.entry.expiry_date_ms < now_ms)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.remove(&id))
            .collect()
    }

    pub fn entries(&self) -> Vec<DiscoveryEntry> {
        self.by_participant
            .values()
            .map(|stored| stored.entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_participant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_participant.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_participant.clear();
        self.by_interface.clear();
    }
}

fn fresh_enough(received_at_ms: i64, max_age_ms: i64, now_ms: i64) -> bool {
    max_age_ms == ANY_AGE || now_ms.saturating_sub(received_at_ms) <= max_age_ms
}
