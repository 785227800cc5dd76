//! Error types shared across the runtime.
//!
//! Errors are serializable because they travel inside reply and publication
//! payloads back to the requesting side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::Version;

/// Runtime error with one variant per failure class.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RpcError {
    /// No method overload matched the decoded request, or the provider
    /// object rejected the invocation. Carries the provider version so the
    /// caller can detect version skew.
    #[error("method invocation failed: {message} (provider version {})", .provider_version)]
    MethodInvocation {
        message: String,
        provider_version: Version,
    },

    /// Provider code failed while handling an operation.
    #[error("provider runtime error: {message}")]
    ProviderRuntime { message: String },

    /// Generic transport or internal runtime error.
    #[error("runtime error: {message}")]
    Runtime { message: String },

    /// A scheduled missed-publication alert fired for a periodic
    /// subscription that received no publication in time.
    #[error("missed publication for subscription {subscription_id}")]
    PublicationMissed { subscription_id: String },

    /// A capabilities lookup produced no result.
    #[error("discovery failed: {message}")]
    DiscoveryNotFound { message: String },

    /// The access controller denied a provider registration.
    #[error("permission denied: {message}")]
    Permission { message: String },

    /// A pending reply outlived its time-to-live before the reply arrived.
    #[error("reply ttl expired for request {request_reply_id}")]
    ReplyTtlExpired { request_reply_id: String },
}

impl RpcError {
    pub fn method_invocation(message: impl Into<String>, provider_version: Version) -> Self {
        Self::MethodInvocation {
            message: message.into(),
            provider_version,
        }
    }

    pub fn provider_runtime(message: impl Into<String>) -> Self {
        Self::ProviderRuntime {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    pub fn discovery_not_found(message: impl Into<String>) -> Self {
        Self::DiscoveryNotFound {
            message: message.into(),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::runtime(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        Self::runtime(format!("IO error: {}", err))
    }
}

/// Result type alias for runtime operations.
pub type RpcResult<T> = Result<T, RpcError>;
