//! Runtime configuration.
//!
//! All fields have defaults that let the runtime function out of the box;
//! `with_*` builders customize individual knobs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the dispatcher's worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of workers processing inbound messages (default: 4).
    pub max_workers: usize,
    /// Bound of the FIFO task queue; messages arriving beyond it are
    /// dropped with an error log (default: 1024).
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            queue_capacity: 1024,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 {
            return Err("max_workers must be at least 1".into());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be at least 1".into());
        }
        Ok(())
    }
}

/// Configuration for the local capabilities directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Persist the local registry to disk on every mutation (default: false).
    pub persistence_enabled: bool,
    /// Persistence file path; an empty path disables persistence too.
    pub persistence_file: PathBuf,
    /// Interval of the liveness heartbeat towards the global directory
    /// (default: 6 hours).
    pub freshness_update_interval_ms: i64,
    /// Interval of the expired-entry sweep (default: 1 hour).
    pub purge_expired_discovery_entries_interval_ms: i64,
    /// Consult the access controller on provider registration (default: false).
    pub enable_access_controller: bool,
    /// Audit mode: log access-control denials but permit them (default: false).
    pub acl_audit: bool,
    /// Identity reported by the freshness heartbeat.
    pub cluster_controller_id: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            persistence_enabled: false,
            persistence_file: PathBuf::new(),
            freshness_update_interval_ms: 6 * 60 * 60 * 1000,
            purge_expired_discovery_entries_interval_ms: 60 * 60 * 1000,
            enable_access_controller: false,
            acl_audit: false,
            cluster_controller_id: String::new(),
        }
    }
}

impl DirectoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistence_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence_file = path.into();
        self.persistence_enabled = true;
        self
    }

    pub fn with_persistence_enabled(mut self, enabled: bool) -> Self {
        self.persistence_enabled = enabled;
        self
    }

    pub fn with_freshness_update_interval_ms(mut self, interval_ms: i64) -> Self {
        self.freshness_update_interval_ms = interval_ms;
        self
    }

    pub fn with_purge_expired_discovery_entries_interval_ms(mut self, interval_ms: i64) -> Self {
        self.purge_expired_discovery_entries_interval_ms = interval_ms;
        self
    }

    pub fn with_access_controller_enabled(mut self, enabled: bool) -> Self {
        self.enable_access_controller = enabled;
        self
    }

    pub fn with_acl_audit(mut self, audit: bool) -> Self {
        self.acl_audit = audit;
        self
    }

    pub fn with_cluster_controller_id(mut self, id: impl Into<String>) -> Self {
        self.cluster_controller_id = id.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.freshness_update_interval_ms <= 0 {
            return Err("freshness_update_interval_ms must be positive".into());
        }
        if self.purge_expired_discovery_entries_interval_ms <= 0 {
            return Err("purge_expired_discovery_entries_interval_ms must be positive".into());
        }
        if self.persistence_enabled && self.persistence_file.as_os_str().is_empty() {
            return Err("persistence_enabled requires a persistence_file".into());
        }
        Ok(())
    }
}
