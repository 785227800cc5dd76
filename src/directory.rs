//! Local capabilities directory.
//!
//! Authoritative index of locally registered providers plus a time-bounded
//! cache of globally discovered ones. Coordinates local lookups,
//! asynchronous lookups against the global directory, access-control
//! checks, expiry sweeps, the freshness heartbeat and persistence.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::access::{AccessController, TrustLevel};
use crate::capabilities_client::{ClientError, ClientSuccess, GlobalCapabilitiesClient};
use crate::config::DirectoryConfig;
use crate::discovery::{
    DiscoveryEntry, DiscoveryEntryWithMetaInfo, DiscoveryQos, DiscoveryScope,
    GlobalDiscoveryEntry, InterfaceAddress, with_meta_info,
};
use crate::error::RpcError;
use crate::routing::MessageRouter;
use crate::store::{ANY_AGE, DiscoveryEntryStore};
use crate::timer::{TimerHandle, TimerService};
use crate::util::now_ms;

// =============================================================================
// Callbacks
// =============================================================================

pub type OnRegistered = Box<dyn FnOnce() + Send>;
pub type OnRegistrationError = Box<dyn FnOnce(RpcError) + Send>;

type OnLookupSuccess = Box<dyn FnOnce(Vec<DiscoveryEntryWithMetaInfo>) + Send>;
type OnLookupError = Box<dyn FnOnce(RpcError) + Send>;

/// One-shot lookup continuation. A callback parked in the pending-lookups
/// map is compared by identity, so clones of the same `Arc` refer to the
/// same pending delivery.
pub struct LookupCallback {
    inner: Mutex<Option<(OnLookupSuccess, OnLookupError)>>,
}

impl LookupCallback {
    pub fn new(
        on_success: impl FnOnce(Vec<DiscoveryEntryWithMetaInfo>) + Send + 'static,
        on_error: impl FnOnce(RpcError) + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Some((Box::new(on_success), Box::new(on_error)))),
        })
    }

    pub fn capabilities_received(&self, capabilities: Vec<DiscoveryEntryWithMetaInfo>) {
        if let Some((on_success, _)) = self.inner.lock().expect("lookup callback poisoned").take()
        {
            on_success(capabilities);
        }
    }

    pub fn error(&self, error: RpcError) {
        if let Some((_, on_error)) = self.inner.lock().expect("lookup callback poisoned").take() {
            on_error(error);
        }
    }
}

/// Notified after a provider registration lands in or leaves the local
/// registry. Callbacks run without any directory lock held.
pub trait ProviderRegistrationObserver: Send + Sync {
    fn on_provider_add(&self, entry: &DiscoveryEntry);
    fn on_provider_remove(&self, entry: &DiscoveryEntry);
}

// =============================================================================
// Directory
// =============================================================================

/// Both capability stores live under one lock.
struct CapabilityStores {
    local: DiscoveryEntryStore,
    global_cache: DiscoveryEntryStore,
}

type PendingLookups = HashMap<InterfaceAddress, Vec<Arc<LookupCallback>>>;

pub struct LocalCapabilitiesDirectory {
    config: DirectoryConfig,
    capabilities_client: Arc<dyn GlobalCapabilitiesClient>,
    /// Serialized transport address announced with global registrations.
    local_address: String,
    stores: Mutex<CapabilityStores>,
    pending_lookups: Mutex<PendingLookups>,
    message_router: Weak<dyn MessageRouter>,
    observers: Mutex<Vec<Arc<dyn ProviderRegistrationObserver>>>,
    access_controller: Mutex<Option<Arc<dyn AccessController>>>,
    timer: Arc<TimerService>,
    sweep_timer: Mutex<Option<TimerHandle>>,
    freshness_timer: Mutex<Option<TimerHandle>>,
    weak_self: Weak<LocalCapabilitiesDirectory>,
}

impl LocalCapabilitiesDirectory {
    pub fn new(
        config: DirectoryConfig,
        capabilities_client: Arc<dyn GlobalCapabilitiesClient>,
        local_address: impl Into<String>,
        message_router: Weak<dyn MessageRouter>,
        timer: Arc<TimerService>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            config,
            capabilities_client,
            local_address: local_address.into(),
            stores: Mutex::new(CapabilityStores {
                local: DiscoveryEntryStore::new(),
                global_cache: DiscoveryEntryStore::new(),
            }),
            pending_lookups: Mutex::new(HashMap::new()),
            message_router,
            observers: Mutex::new(Vec::new()),
            access_controller: Mutex::new(None),
            timer,
            sweep_timer: Mutex::new(None),
            freshness_timer: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    /// Load persisted registrations and start the expiry sweep and the
    /// freshness heartbeat. The timer callbacks hold only a weak
    /// reference and silently stop firing effects once the directory is
    /// dropped.
    pub fn start(&self) {
        self.load_persisted_entries();

        let sweep_interval =
            Duration::from_millis(self.config.purge_expired_discovery_entries_interval_ms as u64);
        let weak = self.weak_self.clone();
        let sweep = self.timer.schedule_recurring(sweep_interval, sweep_interval, move || {
            if let Some(directory) = weak.upgrade() {
                directory.purge_expired_entries();
            }
        });
        *self.sweep_timer.lock().expect("directory timers poisoned") = Some(sweep);

        let freshness_interval =
            Duration::from_millis(self.config.freshness_update_interval_ms as u64);
        let weak = self.weak_self.clone();
        let freshness =
            self.timer
                .schedule_recurring(freshness_interval, freshness_interval, move || {
                    if let Some(directory) = weak.upgrade() {
                        directory.send_freshness_update();
                    }
                });
        *self
            .freshness_timer
            .lock()
            .expect("directory timers poisoned") = Some(freshness);
    }

    /// Cancel the repeating timers.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweep_timer.lock().expect("directory timers poisoned").take() {
            self.timer.cancel(handle);
        }
        if let Some(handle) = self
            .freshness_timer
            .lock()
            .expect("directory timers poisoned")
            .take()
        {
            self.timer.cancel(handle);
        }
    }

    pub fn set_access_controller(&self, access_controller: Arc<dyn AccessController>) {
        *self
            .access_controller
            .lock()
            .expect("access controller poisoned") = Some(access_controller);
    }

    pub fn add_provider_registration_observer(
        &self,
        observer: Arc<dyn ProviderRegistrationObserver>,
    ) {
        self.observers
            .lock()
            .expect("observers poisoned")
            .push(observer);
    }

    pub fn remove_provider_registration_observer(
        &self,
        observer: &Arc<dyn ProviderRegistrationObserver>,
    ) {
        self.observers
            .lock()
            .expect("observers poisoned")
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a provider capability.
    ///
    /// Non-global entries and global entries not awaiting the global
    /// registration land in the local registry immediately. Global entries
    /// are also submitted to the global directory; with
    /// `await_global_registration` the local insert and the success
    /// callback wait for that submission to succeed, and a failed
    /// submission surfaces through `on_error` without any local insert.
    pub fn add(
        &self,
        entry: DiscoveryEntry,
        await_global_registration: bool,
        on_success: OnRegistered,
        on_error: OnRegistrationError,
    ) {
        if !self.has_provider_permission(&entry) {
            on_error(RpcError::permission(format!(
                "provider does not have permission to register interface {} on domain {}",
                entry.interface_name, entry.domain
            )));
            return;
        }

        let is_global = entry.is_global();
        if !is_global || !await_global_registration {
            self.insert_locally(&entry);
        }

        if is_global {
            let global_entry = self.to_global_entry(&entry);
            if await_global_registration {
                let weak = self.weak_self.clone();
                let registered = entry.clone();
                let client_on_success: ClientSuccess = Box::new(move || {
                    if let Some(directory) = weak.upgrade() {
                        info!(
                            participant_id = %registered.participant_id,
                            "global capability registered"
                        );
                        directory.insert_locally(&registered);
                        on_success();
                    }
                });
                let failed_id = entry.participant_id.clone();
                let client_on_error: ClientError = Box::new(move |err| {
                    // The local insert did not happen, nothing to undo.
                    error!(
                        %err,
                        participant_id = %failed_id,
                        "global capability registration failed"
                    );
                    on_error(RpcError::provider_runtime(err.to_string()));
                });
                self.capabilities_client
                    .add(global_entry, client_on_success, client_on_error);
            } else {
                let failed_id = entry.participant_id.clone();
                self.capabilities_client.add(
                    global_entry,
                    Box::new(|| {}),
                    Box::new(move |err| {
                        // The entry stays locally registered but is not
                        // globally discoverable.
                        error!(
                            %err,
                            participant_id = %failed_id,
                            "global capability registration failed"
                        );
                    }),
                );
                on_success();
            }
        } else {
            on_success();
        }
    }

    /// Remove a locally registered capability. Unknown participants log
    /// and return.
    pub fn remove(
        &self,
        participant_id: &str,
        remove_globally: bool,
        remove_from_global_lookup_cache: bool,
    ) {
        let removed = {
            let mut stores = self.stores.lock().expect("capability stores poisoned");
            let Some(entry) = stores.local.lookup_by_participant_id(participant_id) else {
                info!(participant_id, "participant not found, cannot be removed");
                return;
            };
            if entry.is_global() && remove_from_global_lookup_cache {
                let _ = stores.global_cache.remove(participant_id);
            }
            let _ = stores.local.remove(participant_id);
            info!(
                participant_id,
                local_capabilities = stores.local.len(),
                "removed locally registered capability"
            );
            entry
        };

        if removed.is_global() && remove_globally {
            self.capabilities_client.remove(participant_id);
        }
        self.notify_observers_on_remove(&removed);
        match self.message_router.upgrade() {
            Some(router) => router.remove_next_hop(participant_id),
            None => error!(
                participant_id,
                "cannot remove next hop, message router is no longer available"
            ),
        }
        self.persist();
    }

    /// Resubmit every globally scoped local registration to the global
    /// directory, discarding the outcomes. `on_success` completes once
    /// everything is enqueued.
    pub fn trigger_global_provider_reregistration(&self, on_success: OnRegistered) {
        let global_entries: Vec<DiscoveryEntry> = {
            let stores = self.stores.lock().expect("capability stores poisoned");
            stores
                .local
                .entries()
                .into_iter()
                .filter(DiscoveryEntry::is_global)
                .collect()
        };
        for entry in global_entries {
            self.capabilities_client.add(
                self.to_global_entry(&entry),
                Box::new(|| {}),
                Box::new(|_| {}),
            );
        }
        on_success();
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Look up one participant, implicitly LOCAL_THEN_GLOBAL. Delivers the
    /// matching entries through `callback`; with
    /// `use_global_capabilities_directory` unset, a miss becomes a
    /// not-found error instead of a global lookup.
    pub fn lookup_participant(
        &self,
        participant_id: &str,
        callback: Arc<LookupCallback>,
        use_global_capabilities_directory: bool,
    ) {
        let qos = DiscoveryQos::default();
        let (local, cached_global) = {
            let stores = self.stores.lock().expect("capability stores poisoned");
            let local: Vec<DiscoveryEntry> = stores
                .local
                .lookup_by_participant_id(participant_id)
                .into_iter()
                .collect();
            let cached_global: Vec<DiscoveryEntry> = if local.is_empty() {
                stores
                    .global_cache
                    .lookup_cached_by_participant_id(
                        participant_id,
                        qos.cache_max_age_ms,
                        now_ms(),
                    )
                    .into_iter()
                    .collect()
            } else {
                Vec::new()
            };
            (local, cached_global)
        };

        if self.deliver_if_possible(qos.scope, local, cached_global, &callback) {
            return;
        }

        if !use_global_capabilities_directory {
            callback.error(RpcError::discovery_not_found(format!(
                "no local capabilities found for participant {}",
                participant_id
            )));
            return;
        }

        let weak = self.weak_self.clone();
        let looked_up = participant_id.to_string();
        let success_callback = Arc::clone(&callback);
        let error_callback = Arc::clone(&callback);
        self.capabilities_client.lookup_participant(
            participant_id,
            Box::new(move |results| {
                if let Some(directory) = weak.upgrade() {
                    // A matching local provider may have appeared while the
                    // global lookup was in flight.
                    let local_meanwhile = directory.local_entries_for_participant(&looked_up);
                    directory.deliver_global_results(
                        results,
                        local_meanwhile,
                        &success_callback,
                        DiscoveryScope::LocalThenGlobal,
                    );
                }
            }),
            Box::new(move |err| error_callback.error(err)),
        );
    }

    /// Single-entry participant lookup: empty results become a not-found
    /// error, more than one entry logs and delivers the first.
    pub fn lookup_participant_entry(
        &self,
        participant_id: &str,
        use_global_capabilities_directory: bool,
        on_success: impl FnOnce(DiscoveryEntryWithMetaInfo) + Send + 'static,
        on_error: impl FnOnce(RpcError) + Send + 'static,
    ) {
        let shared_error: Arc<Mutex<Option<OnLookupError>>> =
            Arc::new(Mutex::new(Some(Box::new(on_error))));
        let success_error = Arc::clone(&shared_error);
        let looked_up = participant_id.to_string();
        let callback = LookupCallback::new(
            move |capabilities: Vec<DiscoveryEntryWithMetaInfo>| {
                if capabilities.is_empty() {
                    if let Some(on_error) =
                        success_error.lock().expect("lookup error poisoned").take()
                    {
                        on_error(RpcError::discovery_not_found(format!(
                            "no capabilities found for participant {}",
                            looked_up
                        )));
                    }
                    return;
                }
                if capabilities.len() > 1 {
                    error!(
                        participant_id = %looked_up,
                        count = capabilities.len(),
                        "participant has more than one capability entry"
                    );
                }
                if let Some(first) = capabilities.into_iter().next() {
                    on_success(first);
                }
            },
            move |err| {
                if let Some(on_error) = shared_error.lock().expect("lookup error poisoned").take()
                {
                    on_error(err);
                }
            },
        );
        self.lookup_participant(participant_id, callback, use_global_capabilities_directory);
    }

    /// Look up providers for `interface_name` in the given domains.
    /// Exactly one domain is supported.
    pub fn lookup(
        &self,
        domains: &[String],
        interface_name: &str,
        callback: Arc<LookupCallback>,
        qos: DiscoveryQos,
    ) {
        if domains.len() != 1 {
            callback.error(RpcError::provider_runtime(
                "lookup on multiple domains is not supported",
            ));
            return;
        }
        let addresses: Vec<InterfaceAddress> = domains
            .iter()
            .map(|domain| InterfaceAddress::new(domain, interface_name))
            .collect();

        let (local, cached_global) = self.search_stores(&addresses, qos.cache_max_age_ms);
        if self.deliver_if_possible(qos.scope, local, cached_global, &callback) {
            return;
        }

        let weak = self.weak_self.clone();
        let success_addresses = addresses.clone();
        let success_callback = Arc::clone(&callback);
        let success_qos = qos.clone();
        let on_success = Box::new(move |results| {
            if let Some(directory) = weak.upgrade() {
                let mut pending = directory
                    .pending_lookups
                    .lock()
                    .expect("pending lookups poisoned");
                if !is_callback_satisfied(
                    &pending,
                    &success_addresses,
                    &success_callback,
                    &success_qos,
                ) {
                    let local_meanwhile =
                        directory.local_entries_for_addresses(&success_addresses);
                    directory.deliver_global_results(
                        results,
                        local_meanwhile,
                        &success_callback,
                        success_qos.scope,
                    );
                }
                clear_pending_callback(&mut pending, &success_addresses, &success_callback);
            }
        });

        let weak = self.weak_self.clone();
        let error_addresses = addresses.clone();
        let error_callback = Arc::clone(&callback);
        let error_qos = qos.clone();
        let on_error = Box::new(move |err: RpcError| {
            if let Some(directory) = weak.upgrade() {
                let mut pending = directory
                    .pending_lookups
                    .lock()
                    .expect("pending lookups poisoned");
                if !is_callback_satisfied(&pending, &error_addresses, &error_callback, &error_qos)
                {
                    error_callback.error(RpcError::provider_runtime(format!(
                        "unable to collect capabilities from global directory: {}",
                        err
                    )));
                }
                clear_pending_callback(&mut pending, &error_addresses, &error_callback);
            }
        });

        if qos.scope == DiscoveryScope::LocalThenGlobal {
            let mut pending = self
                .pending_lookups
                .lock()
                .expect("pending lookups poisoned");
            for address in &addresses {
                pending
                    .entry(address.clone())
                    .or_default()
                    .push(Arc::clone(&callback));
            }
        }
        self.capabilities_client.lookup(
            domains,
            interface_name,
            qos.discovery_timeout_ms,
            on_success,
            on_error,
        );
    }

    /// Apply the scope policy to local and cached-global results. Returns
    /// whether the callback was invoked; `false` means a global lookup is
    /// required.
    fn deliver_if_possible(
        &self,
        scope: DiscoveryScope,
        local: Vec<DiscoveryEntry>,
        cached_global: Vec<DiscoveryEntry>,
        callback: &LookupCallback,
    ) -> bool {
        match scope {
            DiscoveryScope::LocalOnly => {
                callback.capabilities_received(with_meta_info(true, local));
                true
            }
            DiscoveryScope::LocalThenGlobal => {
                if !local.is_empty() {
                    callback.capabilities_received(with_meta_info(true, local));
                    true
                } else if !cached_global.is_empty() {
                    callback.capabilities_received(with_meta_info(false, cached_global));
                    true
                } else {
                    false
                }
            }
            DiscoveryScope::LocalAndGlobal => {
                if cached_global.is_empty() {
                    false
                } else {
                    callback.capabilities_received(filter_duplicates(
                        with_meta_info(true, local),
                        with_meta_info(false, cached_global),
                    ));
                    true
                }
            }
            DiscoveryScope::GlobalOnly => {
                let local_global: Vec<DiscoveryEntry> = local
                    .into_iter()
                    .filter(DiscoveryEntry::is_global)
                    .collect();
                if cached_global.is_empty() && local_global.is_empty() {
                    false
                } else {
                    callback.capabilities_received(filter_duplicates(
                        with_meta_info(true, local_global),
                        with_meta_info(false, cached_global),
                    ));
                    true
                }
            }
        }
    }

    /// Handle a global lookup result: install routing and cache entries,
    /// then deliver with local entries merged in where the scope wants
    /// them.
    fn deliver_global_results(
        &self,
        results: Vec<GlobalDiscoveryEntry>,
        local_entries: Vec<DiscoveryEntry>,
        callback: &LookupCallback,
        scope: DiscoveryScope,
    ) {
        let global_entries = self.register_received_capabilities(results);
        let merged = match scope {
            DiscoveryScope::LocalThenGlobal | DiscoveryScope::LocalAndGlobal => {
                filter_duplicates(with_meta_info(true, local_entries), global_entries)
            }
            _ => global_entries,
        };
        callback.capabilities_received(merged);
    }

    /// Install entries learned from the global directory: deserialize each
    /// transport address, add a next hop and cache the entry. A bad
    /// address skips that entry, never the batch.
    fn register_received_capabilities(
        &self,
        results: Vec<GlobalDiscoveryEntry>,
    ) -> Vec<DiscoveryEntryWithMetaInfo> {
        let mut converted = Vec::with_capacity(results.len());
        for global_entry in results {
            let address: serde_json::Value = match serde_json::from_str(&global_entry.address) {
                Ok(address) => address,
                Err(err) => {
                    error!(
                        %err,
                        address = %global_entry.address,
                        "could not deserialize transport address, skipping entry"
                    );
                    continue;
                }
            };
            let entry = global_entry.entry;
            match self.message_router.upgrade() {
                Some(router) => {
                    // The directory owns entry expiry; the routing layer
                    // keeps the hop until told otherwise.
                    router.add_next_hop(
                        &entry.participant_id,
                        address,
                        entry.is_global(),
                        i64::MAX,
                        false,
                    );
                }
                None => error!(
                    participant_id = %entry.participant_id,
                    "cannot add next hop, message router is no longer available"
                ),
            }
            self.stores
                .lock()
                .expect("capability stores poisoned")
                .global_cache
                .insert(entry.clone(), now_ms());
            converted.push(DiscoveryEntryWithMetaInfo::new(false, entry));
        }
        converted
    }

    /// Seed the global cache and the routing table from externally
    /// provided global entries.
    pub fn inject_global_capabilities(&self, entries: Vec<GlobalDiscoveryEntry>) {
        if entries.is_empty() {
            return;
        }
        self.register_received_capabilities(entries);
    }

    /// Seed the global cache and the routing table from a JSON file of
    /// global entries. An unreadable or malformed file loads nothing;
    /// entries whose transport address does not deserialize are skipped
    /// individually.
    pub fn inject_global_capabilities_from_file(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            warn!("empty file name provided, cannot load global capabilities");
            return;
        }
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(err) => {
                error!(
                    %err,
                    path = %path.display(),
                    "could not read global capabilities file"
                );
                return;
            }
        };
        if json.is_empty() {
            return;
        }
        let entries: Vec<GlobalDiscoveryEntry> = match serde_json::from_str(&json) {
            Ok(entries) => entries,
            Err(err) => {
                error!(
                    %err,
                    path = %path.display(),
                    "could not deserialize injected global capabilities"
                );
                return;
            }
        };
        self.inject_global_capabilities(entries);
    }

    // =========================================================================
    // Pending lookups
    // =========================================================================

    /// Fire pending lookups for `address` with fresh local entries, then
    /// clear them. No-op while no local entry matches.
    fn call_pending_lookups(&self, pending: &mut PendingLookups, address: &InterfaceAddress) {
        if !pending.contains_key(address) {
            return;
        }
        let local = {
            let stores = self.stores.lock().expect("capability stores poisoned");
            stores
                .local
                .lookup_by_interface_address(address, ANY_AGE, now_ms())
        };
        if local.is_empty() {
            return;
        }
        let with_meta = with_meta_info(true, local);
        if let Some(callbacks) = pending.remove(address) {
            for callback in callbacks {
                callback.capabilities_received(with_meta.clone());
            }
        }
    }

    pub fn has_pending_lookups(&self) -> bool {
        !self
            .pending_lookups
            .lock()
            .expect("pending lookups poisoned")
            .is_empty()
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Remove expired entries from both stores, drop their next hops and
    /// persist when anything was removed.
    pub fn purge_expired_entries(&self) {
        let (removed_local, removed_global) = {
            let mut stores = self.stores.lock().expect("capability stores poisoned");
            let now = now_ms();
            (
                stores.local.remove_expired(now),
                stores.global_cache.remove_expired(now),
            )
        };
        if removed_local.is_empty() && removed_global.is_empty() {
            return;
        }
        info!(
            expired_local = removed_local.len(),
            expired_global = removed_global.len(),
            "discovery entries expired"
        );
        match self.message_router.upgrade() {
            Some(router) => {
                for entry in removed_local.iter().chain(removed_global.iter()) {
                    router.remove_next_hop(&entry.participant_id);
                }
            }
            None => error!("cannot remove next hops, message router is no longer available"),
        }
        self.persist();
    }

    /// Keep this process's global registrations alive.
    fn send_freshness_update(&self) {
        self.capabilities_client.touch(
            &self.config.cluster_controller_id,
            Box::new(|| {}),
            Box::new(|err| error!(%err, "error sending freshness update")),
        );
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    fn persistence_target(&self) -> Option<&Path> {
        if !self.config.persistence_enabled || self.config.persistence_file.as_os_str().is_empty()
        {
            return None;
        }
        Some(self.config.persistence_file.as_path())
    }

    /// Serialize the local registry to the configured file. Written via a
    /// temporary file and rename so readers never observe a torn write.
    fn persist(&self) {
        let Some(path) = self.persistence_target() else {
            return;
        };
        let serialized = {
            let stores = self.stores.lock().expect("capability stores poisoned");
            let mut entries = stores.local.entries();
            entries.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
            serde_json::to_string_pretty(&entries)
        };
        let result = serialized
            .map_err(std::io::Error::other)
            .and_then(|json| atomic_write(path, &json));
        if let Err(err) = result {
            error!(%err, path = %path.display(), "failed to persist local capabilities");
        }
    }

    /// Reload persisted registrations; global-scope entries also seed the
    /// global cache so a restart does not lose already announced
    /// providers. A missing file is not an error.
    fn load_persisted_entries(&self) {
        let Some(path) = self.persistence_target() else {
            return;
        };
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(_) => {
                info!(path = %path.display(), "no persisted capabilities found");
                return;
            }
        };
        if json.is_empty() {
            return;
        }
        let entries: Vec<DiscoveryEntry> = match serde_json::from_str(&json) {
            Ok(entries) => entries,
            Err(err) => {
                error!(%err, "could not deserialize persisted capabilities");
                return;
            }
        };
        let mut stores = self.stores.lock().expect("capability stores poisoned");
        let now = now_ms();
        for entry in entries {
            if entry.is_global() {
                stores.global_cache.insert(entry.clone(), now);
            }
            stores.local.insert(entry, now);
        }
        debug!(
            local_capabilities = stores.local.len(),
            "restored persisted capabilities"
        );
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Snapshot of the global lookup cache.
    pub fn cached_global_discovery_entries(&self) -> Vec<DiscoveryEntry> {
        self.stores
            .lock()
            .expect("capability stores poisoned")
            .global_cache
            .entries()
    }

    pub fn local_capability_count(&self) -> usize {
        self.stores
            .lock()
            .expect("capability stores poisoned")
            .local
            .len()
    }

    /// Drop all entries from both stores.
    pub fn clear(&self) {
        let mut stores = self.stores.lock().expect("capability stores poisoned");
        stores.local.clear();
        stores.global_cache.clear();
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn has_provider_permission(&self, entry: &DiscoveryEntry) -> bool {
        if !self.config.enable_access_controller {
            return true;
        }
        let controller = self
            .access_controller
            .lock()
            .expect("access controller poisoned")
            .clone();
        let Some(controller) = controller else {
            // Controller enabled but absent: deny rather than bypass.
            return false;
        };
        let owner_id = entry.participant_id.as_str();
        trace!(owner_id, "checking provider permission");
        let permitted = controller.has_provider_permission(
            owner_id,
            TrustLevel::High,
            &entry.domain,
            &entry.interface_name,
        );
        if self.config.acl_audit {
            if permitted {
                debug!(
                    owner_id,
                    interface_name = %entry.interface_name,
                    domain = %entry.domain,
                    "acl audit: registration allowed"
                );
            } else {
                error!(
                    owner_id,
                    interface_name = %entry.interface_name,
                    domain = %entry.domain,
                    "acl audit: registration would be denied"
                );
            }
            return true;
        }
        permitted
    }

    fn to_global_entry(&self, entry: &DiscoveryEntry) -> GlobalDiscoveryEntry {
        GlobalDiscoveryEntry::new(entry.clone(), self.local_address.clone())
    }

    /// Insert into the local registry (and global cache for global
    /// entries), notify observers, persist and drain matching pending
    /// lookups.
    fn insert_locally(&self, entry: &DiscoveryEntry) {
        {
            let mut stores = self.stores.lock().expect("capability stores poisoned");
            let now = now_ms();
            stores.local.insert(entry.clone(), now);
            if entry.is_global() {
                stores.global_cache.insert(entry.clone(), now);
            }
            info!(
                participant_id = %entry.participant_id,
                local_capabilities = stores.local.len(),
                "added local capability"
            );
        }
        self.notify_observers_on_add(entry);
        self.persist();
        let mut pending = self
            .pending_lookups
            .lock()
            .expect("pending lookups poisoned");
        self.call_pending_lookups(&mut pending, &entry.interface_address());
    }

    fn search_stores(
        &self,
        addresses: &[InterfaceAddress],
        cache_max_age_ms: i64,
    ) -> (Vec<DiscoveryEntry>, Vec<DiscoveryEntry>) {
        let stores = self.stores.lock().expect("capability stores poisoned");
        let now = now_ms();
        let mut local = Vec::new();
        let mut cached_global = Vec::new();
        for address in addresses {
            local.extend(stores.local.lookup_by_interface_address(address, ANY_AGE, now));
            cached_global.extend(stores.global_cache.lookup_by_interface_address(
                address,
                cache_max_age_ms,
                now,
            ));
        }
        (local, cached_global)
    }

    fn local_entries_for_participant(&self, participant_id: &str) -> Vec<DiscoveryEntry> {
        self.stores
            .lock()
            .expect("capability stores poisoned")
            .local
            .lookup_by_participant_id(participant_id)
            .into_iter()
            .collect()
    }

    fn local_entries_for_addresses(&self, addresses: &[InterfaceAddress]) -> Vec<DiscoveryEntry> {
        let stores = self.stores.lock().expect("capability stores poisoned");
        let now = now_ms();
        addresses
            .iter()
            .flat_map(|address| stores.local.lookup_by_interface_address(address, ANY_AGE, now))
            .collect()
    }

    fn notify_observers_on_add(&self, entry: &DiscoveryEntry) {
        let observers = self.observers.lock().expect("observers poisoned").clone();
        for observer in observers {
            observer.on_provider_add(entry);
        }
    }

    fn notify_observers_on_remove(&self, entry: &DiscoveryEntry) {
        let observers = self.observers.lock().expect("observers poisoned").clone();
        for observer in observers {
            observer.on_provider_remove(entry);
        }
    }
}

// =============================================================================
// Free helpers
// =============================================================================

/// Merge lookup results, keeping at most one entry per participant id.
/// Local entries come first, so the local form wins a conflict.
fn filter_duplicates(
    local: Vec<DiscoveryEntryWithMetaInfo>,
    global: Vec<DiscoveryEntryWithMetaInfo>,
) -> Vec<DiscoveryEntryWithMetaInfo> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(local.len() + global.len());
    for candidate in local.into_iter().chain(global) {
        if seen.insert(candidate.entry.participant_id.clone()) {
            merged.push(candidate);
        }
    }
    merged
}

/// Whether a LOCAL_THEN_GLOBAL callback was already satisfied by a
/// concurrent local registration draining its pending entry.
fn is_callback_satisfied(
    pending: &PendingLookups,
    addresses: &[InterfaceAddress],
    callback: &Arc<LookupCallback>,
    qos: &DiscoveryQos,
) -> bool {
    if qos.scope != DiscoveryScope::LocalThenGlobal {
        return false;
    }
    for address in addresses {
        match pending.get(address) {
            None => return true,
            Some(callbacks) => {
                if !callbacks.iter().any(|parked| Arc::ptr_eq(parked, callback)) {
                    return true;
                }
            }
        }
    }
    false
}

/// Drop `callback` from the pending lists of all `addresses`.
fn clear_pending_callback(
    pending: &mut PendingLookups,
    addresses: &[InterfaceAddress],
    callback: &Arc<LookupCallback>,
) {
    for address in addresses {
        let now_empty = match pending.get_mut(address) {
            Some(callbacks) => {
                callbacks.retain(|parked| !Arc::ptr_eq(parked, callback));
                callbacks.is_empty()
            }
            None => false,
        };
        if now_empty {
            let _ = pending.remove(address);
        }
    }
}

fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let temporary = path.with_extension("tmp");
    std::fs::write(&temporary, contents)?;
    std::fs::rename(&temporary, path)
}
