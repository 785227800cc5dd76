//! Access-control seam for provider registration.

/// Trust placed in the registering identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    High,
    Mid,
    Low,
    None,
}

/// Policy decision point consulted before a provider registers. Policy
/// evaluation itself is external; the directory only asks the question.
pub trait AccessController: Send + Sync {
    fn has_provider_permission(
        &self,
        owner_id: &str,
        trust_level: TrustLevel,
        domain: &str,
        interface_name: &str,
    ) -> bool;
}
