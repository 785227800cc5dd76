//! # mesh-rpc
//!
//! Client-side runtime of a location-transparent RPC and
//! publish/subscribe middleware.
//!
//! Participants address providers and consumers by opaque participant
//! ids; the runtime turns typed remote operations into wire messages,
//! routes them across pluggable transports and matches replies back to
//! their originators within time-to-live bounds.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Transports (external)                   │
//! └──────────────┬───────────────────────────────▲───────────────┘
//!                │ inbound                       │ outbound
//!                ▼                               │
//! ┌──────────────────────────────┐   ┌───────────┴──────────────┐
//! │ Dispatcher                   │   │ MessageSender            │
//! │  worker pool, classification │   └──────────────────────────┘
//! └───┬──────┬──────┬──────┬─────┘
//!     │      │      │      │
//!     ▼      ▼      ▼      ▼
//! ┌───────┐┌──────┐┌──────────────┐┌─────────────────────┐
//! │Reply  ││Caller││Subscription  ││Publication          │
//! │callers││s     ││manager       ││manager              │
//! └───────┘└──────┘└──────────────┘└─────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────┐
//! │ LocalCapabilitiesDirectory                                   │
//! │  local registry + global cache, pending lookups,             │
//! │  expiry sweep, freshness heartbeat, persistence              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use mesh_rpc::prelude::*;
//!
//! let timer = TimerService::spawn();
//! let registrar = Arc::new(InterfaceRegistrar::new());
//! let dispatcher = Dispatcher::new(sender, Arc::clone(&registrar), timer.clone(),
//!     DispatcherConfig::default());
//!
//! let publications = Arc::new(PublicationManager::new(timer.clone(), registrar.clone()));
//! dispatcher.register_publication_manager(publications);
//!
//! let subscriptions = Arc::new(SubscriptionManager::new(timer.clone()));
//! dispatcher.register_subscription_manager(subscriptions);
//!
//! let directory = LocalCapabilitiesDirectory::new(
//!     DirectoryConfig::default(), capabilities_client, local_address,
//!     Arc::downgrade(&router), timer);
//! directory.start();
//! ```

pub mod access;
mod caller_directory;
pub mod capabilities_client;
mod config;
pub mod directory;
pub mod discovery;
mod dispatcher;
mod error;
pub mod logging;
pub mod message;
mod provider;
pub mod publication;
pub mod registrar;
mod reply_directory;
pub mod routing;
mod store;
pub mod subscription;
mod timer;
mod util;
mod worker;

#[cfg(test)]
mod tests;

// Public API
pub use access::{AccessController, TrustLevel};
pub use caller_directory::RequestCallerDirectory;
pub use capabilities_client::{
    ClientError, ClientSuccess, DiscoverySuccess, GlobalCapabilitiesClient,
};
pub use config::{DirectoryConfig, DispatcherConfig};
pub use directory::{
    LocalCapabilitiesDirectory, LookupCallback, OnRegistered, OnRegistrationError,
    ProviderRegistrationObserver,
};
pub use discovery::{
    DiscoveryEntry, DiscoveryEntryWithMetaInfo, DiscoveryQos, DiscoveryScope,
    GlobalDiscoveryEntry, InterfaceAddress, ProviderQos, ProviderScope,
};
pub use dispatcher::Dispatcher;
pub use error::{RpcError, RpcResult};
pub use message::{
    BroadcastSubscriptionRequest, Message, MessageHeader, MessageKind, OneWayRequest, Reply,
    Request, SubscriptionPublication, SubscriptionReply, SubscriptionRequest, SubscriptionStop,
    new_participant_id, new_request_reply_id, new_subscription_id,
};
pub use provider::{RequestCaller, Version};
pub use publication::PublicationManager;
pub use registrar::{
    DiscardingContinuation, InterfaceRegistrar, RequestContinuation, RequestInterpreter,
    RequestInterpreterBuilder, interface_key,
};
pub use reply_directory::{ReplyCaller, ReplyCallerDirectory};
pub use routing::{MessageRouter, MessageSender};
pub use subscription::{
    NO_EXPIRY, SubscriptionCallback, SubscriptionManager, SubscriptionQos, typed_callback,
};
pub use timer::{TimerHandle, TimerService};
pub use worker::{WorkerPool, WorkerTask};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        AccessController,
        BroadcastSubscriptionRequest,
        DirectoryConfig,
        DiscoveryEntry,
        DiscoveryEntryWithMetaInfo,
        DiscoveryQos,
        DiscoveryScope,
        Dispatcher,
        DispatcherConfig,
        GlobalCapabilitiesClient,
        GlobalDiscoveryEntry,
        InterfaceAddress,
        InterfaceRegistrar,
        LocalCapabilitiesDirectory,
        LookupCallback,
        Message,
        MessageKind,
        MessageRouter,
        MessageSender,
        ProviderQos,
        ProviderRegistrationObserver,
        ProviderScope,
        PublicationManager,
        Reply,
        ReplyCaller,
        Request,
        RequestCaller,
        RequestContinuation,
        RequestInterpreter,
        RpcError,
        RpcResult,
        SubscriptionCallback,
        SubscriptionManager,
        SubscriptionPublication,
        SubscriptionQos,
        SubscriptionRequest,
        SubscriptionStop,
        TimerService,
        TrustLevel,
        Version,
        interface_key,
        new_participant_id,
        new_request_reply_id,
        new_subscription_id,
        typed_callback,
    };
}
