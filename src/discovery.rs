//! Discovery data model: capability entries and lookup quality of service.

use serde::{Deserialize, Serialize};

use crate::provider::Version;
use crate::util::now_ms;

/// Visibility of a registered provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderScope {
    /// Visible only inside this process or cluster.
    Local,
    /// Announced to the global capabilities directory.
    Global,
}

/// Quality of service a provider advertises with its registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderQos {
    pub scope: ProviderScope,
    pub priority: i64,
    pub supports_on_change_subscriptions: bool,
}

impl Default for ProviderQos {
    fn default() -> Self {
        Self {
            scope: ProviderScope::Local,
            priority: 0,
            supports_on_change_subscriptions: false,
        }
    }
}

impl ProviderQos {
    pub fn global() -> Self {
        Self {
            scope: ProviderScope::Global,
            ..Self::default()
        }
    }
}

/// Metadata advertising one provider: who, where, which interface and
/// version, and the validity window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEntry {
    pub provider_version: Version,
    pub domain: String,
    pub interface_name: String,
    pub participant_id: String,
    pub qos: ProviderQos,
    pub last_seen_date_ms: i64,
    pub expiry_date_ms: i64,
    pub public_key_id: String,
}

impl DiscoveryEntry {
    /// New entry seen now and valid for `validity_ms`.
    pub fn new(
        provider_version: Version,
        domain: impl Into<String>,
        interface_name: impl Into<String>,
        participant_id: impl Into<String>,
        qos: ProviderQos,
        validity_ms: i64,
    ) -> Self {
        let last_seen_date_ms = now_ms();
        Self {
            provider_version,
            domain: domain.into(),
            interface_name: interface_name.into(),
            participant_id: participant_id.into(),
            qos,
            last_seen_date_ms,
            expiry_date_ms: last_seen_date_ms.saturating_add(validity_ms.max(1)),
            public_key_id: String::new(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.qos.scope == ProviderScope::Global
    }

    pub fn interface_address(&self) -> InterfaceAddress {
        InterfaceAddress::new(&self.domain, &self.interface_name)
    }
}

/// Globally announced entry: a [`DiscoveryEntry`] plus the serialized
/// transport address under which the provider is reachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalDiscoveryEntry {
    #[serde(flatten)]
    pub entry: DiscoveryEntry,
    pub address: String,
}

impl GlobalDiscoveryEntry {
    pub fn new(entry: DiscoveryEntry, address: impl Into<String>) -> Self {
        Self {
            entry,
            address: address.into(),
        }
    }
}

/// Lookup result entry, flagged with where it was found. When the same
/// participant id is known both locally and globally, the local form wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEntryWithMetaInfo {
    #[serde(flatten)]
    pub entry: DiscoveryEntry,
    pub is_local: bool,
}

impl DiscoveryEntryWithMetaInfo {
    pub fn new(is_local: bool, entry: DiscoveryEntry) -> Self {
        Self { entry, is_local }
    }
}

/// Convert a batch of entries, stamping the origin flag.
pub(crate) fn with_meta_info(
    is_local: bool,
    entries: Vec<DiscoveryEntry>,
) -> Vec<DiscoveryEntryWithMetaInfo> {
    entries
        .into_iter()
        .map(|entry| DiscoveryEntryWithMetaInfo::new(is_local, entry))
        .collect()
}

/// Search target for interface-based lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceAddress {
    pub domain: String,
    pub interface_name: String,
}

impl InterfaceAddress {
    pub fn new(domain: impl Into<String>, interface_name: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            interface_name: interface_name.into(),
        }
    }
}

/// Which stores a lookup consults and how results merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscoveryScope {
    LocalOnly,
    LocalThenGlobal,
    LocalAndGlobal,
    GlobalOnly,
}

/// Lookup quality of service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryQos {
    pub scope: DiscoveryScope,
    /// Maximum age of a cached global entry before it is ignored.
    pub cache_max_age_ms: i64,
    /// Timeout handed to the global directory client.
    pub discovery_timeout_ms: i64,
}

impl Default for DiscoveryQos {
    fn default() -> Self {
        Self {
            scope: DiscoveryScope::LocalThenGlobal,
            cache_max_age_ms: 60 * 60 * 1000,
            discovery_timeout_ms: 30_000,
        }
    }
}

impl DiscoveryQos {
    pub fn with_scope(mut self, scope: DiscoveryScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_cache_max_age_ms(mut self, cache_max_age_ms: i64) -> Self {
        self.cache_max_age_ms = cache_max_age_ms;
        self
    }

    pub fn with_discovery_timeout_ms(mut self, discovery_timeout_ms: i64) -> Self {
        self.discovery_timeout_ms = discovery_timeout_ms;
        self
    }
}
