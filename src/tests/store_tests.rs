//! Discovery entry store indexing and expiry.

use crate::discovery::{InterfaceAddress, ProviderScope};
use crate::store::{ANY_AGE, DiscoveryEntryStore};
use crate::tests::support::test_entry;
use crate::util::now_ms;

#[test]
fn insert_and_lookup_by_participant_id() {
    let mut store = DiscoveryEntryStore::new();
    store.insert(
        test_entry("d", "I", "p1", ProviderScope::Local, 60_000),
        now_ms(),
    );

    assert_eq!(store.len(), 1);
    let entry = store.lookup_by_participant_id("p1").unwrap();
    assert_eq!(entry.domain, "d");
    assert!(store.lookup_by_participant_id("p2").is_none());
}

#[test]
fn reinsert_replaces_and_reindexes() {
    let mut store = DiscoveryEntryStore::new();
    store.insert(
        test_entry("d1", "I", "p1", ProviderScope::Local, 60_000),
        now_ms(),
    );
    store.insert(
        test_entry("d2", "I", "p1", ProviderScope::Local, 60_000),
        now_ms(),
    );

    assert_eq!(store.len(), 1);
    let old_address = InterfaceAddress::new("d1", "I");
    let new_address = InterfaceAddress::new("d2", "I");
    assert!(
        store
            .lookup_by_interface_address(&old_address, ANY_AGE, now_ms())
            .is_empty()
    );
    assert_eq!(
        store
            .lookup_by_interface_address(&new_address, ANY_AGE, now_ms())
            .len(),
        1
    );
}

#[test]
fn interface_lookup_respects_max_age() {
    let mut store = DiscoveryEntryStore::new();
    let received_at = now_ms() - 5_000;
    store.insert(
        test_entry("d", "I", "p1", ProviderScope::Global, 60_000),
        received_at,
    );

    let address = InterfaceAddress::new("d", "I");
    assert_eq!(
        store
            .lookup_by_interface_address(&address, ANY_AGE, now_ms())
            .len(),
        1
    );
    assert_eq!(
        store
            .lookup_by_interface_address(&address, 60_000, now_ms())
            .len(),
        1
    );
    assert!(
        store
            .lookup_by_interface_address(&address, 1_000, now_ms())
            .is_empty()
    );
}

#[test]
fn participant_lookup_respects_max_age() {
    let mut store = DiscoveryEntryStore::new();
    store.insert(
        test_entry("d", "I", "p1", ProviderScope::Global, 60_000),
        now_ms() - 5_000,
    );

    assert!(
        store
            .lookup_cached_by_participant_id("p1", 60_000, now_ms())
            .is_some()
    );
    assert!(
        store
            .lookup_cached_by_participant_id("p1", 1_000, now_ms())
            .is_none()
    );
}

#[test]
fn remove_expired_returns_only_stale_entries() {
    let mut store = DiscoveryEntryStore::new();
    let mut stale = test_entry("d", "I", "p-old", ProviderScope::Local, 60_000);
    stale.expiry_date_ms = now_ms() - 1;
    store.insert(stale, now_ms());
    store.insert(
        test_entry("d", "I", "p-new", ProviderScope::Local, 60_000),
        now_ms(),
    );

    let removed = store.remove_expired(now_ms());
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].participant_id, "p-old");
    assert_eq!(store.len(), 1);
    assert!(store.lookup_by_participant_id("p-new").is_some());

    // Second sweep finds nothing.
    assert!(store.remove_expired(now_ms()).is_empty());
}

#[test]
fn remove_clears_interface_index() {
    let mut store = DiscoveryEntryStore::new();
    store.insert(
        test_entry("d", "I", "p1", ProviderScope::Local, 60_000),
        now_ms(),
    );
    let removed = store.remove("p1").unwrap();
    assert_eq!(removed.participant_id, "p1");

    let address = InterfaceAddress::new("d", "I");
    assert!(
        store
            .lookup_by_interface_address(&address, ANY_AGE, now_ms())
            .is_empty()
    );
    assert!(store.is_empty());
}
