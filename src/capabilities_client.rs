//! Client seam towards the global capabilities directory.

use crate::discovery::GlobalDiscoveryEntry;
use crate::error::RpcError;

pub type ClientSuccess = Box<dyn FnOnce() + Send>;
pub type ClientError = Box<dyn FnOnce(RpcError) + Send>;
pub type DiscoverySuccess = Box<dyn FnOnce(Vec<GlobalDiscoveryEntry>) + Send>;

/// Asynchronous operations against the global directory. Implementations
/// invoke exactly one of the two continuations per call and may do so from
/// any thread.
pub trait GlobalCapabilitiesClient: Send + Sync {
    /// Announce a provider globally.
    fn add(&self, entry: GlobalDiscoveryEntry, on_success: ClientSuccess, on_error: ClientError);

    /// Withdraw a globally announced provider.
    fn remove(&self, participant_id: &str);

    /// Look up one participant.
    fn lookup_participant(
        &self,
        participant_id: &str,
        on_success: DiscoverySuccess,
        on_error: ClientError,
    );

    /// Look up providers for an interface across domains.
    fn lookup(
        &self,
        domains: &[String],
        interface_name: &str,
        timeout_ms: i64,
        on_success: DiscoverySuccess,
        on_error: ClientError,
    );

    /// Liveness heartbeat keeping this process's global entries fresh.
    fn touch(&self, cluster_controller_id: &str, on_success: ClientSuccess, on_error: ClientError);
}
