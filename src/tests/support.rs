//! Shared test doubles and helpers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use crate::capabilities_client::{ClientError, ClientSuccess, DiscoverySuccess};
use crate::discovery::{DiscoveryEntry, GlobalDiscoveryEntry, ProviderQos, ProviderScope};
use crate::error::RpcError;
use crate::message::Message;
use crate::provider::{RequestCaller, Version};
use crate::registrar::{RequestContinuation, RequestInterpreter};
use crate::routing::{MessageRouter, MessageSender};
use crate::{AccessController, GlobalCapabilitiesClient, TrustLevel};

/// Poll `condition` until it holds or `timeout_ms` elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn test_entry(
    domain: &str,
    interface_name: &str,
    participant_id: &str,
    scope: ProviderScope,
    validity_ms: i64,
) -> DiscoveryEntry {
    let qos = ProviderQos {
        scope,
        ..ProviderQos::default()
    };
    DiscoveryEntry::new(
        Version::new(1, 0),
        domain,
        interface_name,
        participant_id,
        qos,
        validity_ms,
    )
}

pub fn test_global_entry(
    domain: &str,
    interface_name: &str,
    participant_id: &str,
    validity_ms: i64,
) -> GlobalDiscoveryEntry {
    GlobalDiscoveryEntry::new(
        test_entry(
            domain,
            interface_name,
            participant_id,
            ProviderScope::Global,
            validity_ms,
        ),
        json!({"transport": "mock", "endpoint": participant_id}).to_string(),
    )
}

// =============================================================================
// Message sender
// =============================================================================

#[derive(Default)]
pub struct MockMessageSender {
    pub sent: Mutex<Vec<Message>>,
}

impl MockMessageSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

impl MessageSender for MockMessageSender {
    fn send(&self, message: Message) {
        self.sent.lock().unwrap().push(message);
    }
}

// =============================================================================
// Message router
// =============================================================================

#[derive(Default)]
pub struct MockMessageRouter {
    pub added: Mutex<Vec<(String, bool)>>,
    pub removed: Mutex<Vec<String>>,
}

impl MockMessageRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn removed_participants(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

impl MessageRouter for MockMessageRouter {
    fn add_next_hop(
        &self,
        participant_id: &str,
        _address: Value,
        is_globally_visible: bool,
        _expiry_date_ms: i64,
        _is_sticky: bool,
    ) {
        self.added
            .lock()
            .unwrap()
            .push((participant_id.to_string(), is_globally_visible));
    }

    fn remove_next_hop(&self, participant_id: &str) {
        self.removed.lock().unwrap().push(participant_id.to_string());
    }
}

// =============================================================================
// Global capabilities client
// =============================================================================

pub struct PendingGlobalLookup {
    pub domains: Vec<String>,
    pub interface_name: String,
    pub on_success: DiscoverySuccess,
    pub on_error: ClientError,
}

/// Client double: `add`/`touch` complete synchronously, lookups are
/// captured so a test can complete them at a chosen moment.
#[derive(Default)]
pub struct MockCapabilitiesClient {
    pub added: Mutex<Vec<GlobalDiscoveryEntry>>,
    pub removed: Mutex<Vec<String>>,
    pub touched: Mutex<Vec<String>>,
    pub fail_adds: AtomicBool,
    pub lookups: Mutex<Vec<PendingGlobalLookup>>,
    pub participant_lookups: Mutex<Vec<(String, DiscoverySuccess, ClientError)>>,
}

impl MockCapabilitiesClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn added_count(&self) -> usize {
        self.added.lock().unwrap().len()
    }

    pub fn pending_lookup_count(&self) -> usize {
        self.lookups.lock().unwrap().len()
    }

    /// Complete the oldest captured interface lookup successfully.
    pub fn complete_lookup(&self, results: Vec<GlobalDiscoveryEntry>) {
        let pending = self.lookups.lock().unwrap().remove(0);
        (pending.on_success)(results);
    }

    /// Fail the oldest captured interface lookup.
    pub fn fail_lookup(&self, error: RpcError) {
        let pending = self.lookups.lock().unwrap().remove(0);
        (pending.on_error)(error);
    }

    pub fn complete_participant_lookup(&self, results: Vec<GlobalDiscoveryEntry>) {
        let (_, on_success, _) = self.participant_lookups.lock().unwrap().remove(0);
        on_success(results);
    }
}

impl GlobalCapabilitiesClient for MockCapabilitiesClient {
    fn add(&self, entry: GlobalDiscoveryEntry, on_success: ClientSuccess, on_error: ClientError) {
        self.added.lock().unwrap().push(entry);
        if self.fail_adds.load(Ordering::SeqCst) {
            on_error(RpcError::runtime("global directory unavailable"));
        } else {
            on_success();
        }
    }

    fn remove(&self, participant_id: &str) {
        self.removed.lock().unwrap().push(participant_id.to_string());
    }

    fn lookup_participant(
        &self,
        participant_id: &str,
        on_success: DiscoverySuccess,
        on_error: ClientError,
    ) {
        self.participant_lookups.lock().unwrap().push((
            participant_id.to_string(),
            on_success,
            on_error,
        ));
    }

    fn lookup(
        &self,
        domains: &[String],
        interface_name: &str,
        _timeout_ms: i64,
        on_success: DiscoverySuccess,
        on_error: ClientError,
    ) {
        self.lookups.lock().unwrap().push(PendingGlobalLookup {
            domains: domains.to_vec(),
            interface_name: interface_name.to_string(),
            on_success,
            on_error,
        });
    }

    fn touch(&self, cluster_controller_id: &str, on_success: ClientSuccess, _on_error: ClientError) {
        self.touched
            .lock()
            .unwrap()
            .push(cluster_controller_id.to_string());
        on_success();
    }
}

// =============================================================================
// Access controller
// =============================================================================

pub struct MockAccessController {
    pub permit: AtomicBool,
    pub checks: Mutex<Vec<(String, String, String)>>,
}

impl MockAccessController {
    pub fn new(permit: bool) -> Arc<Self> {
        Arc::new(Self {
            permit: AtomicBool::new(permit),
            checks: Mutex::new(Vec::new()),
        })
    }
}

impl AccessController for MockAccessController {
    fn has_provider_permission(
        &self,
        owner_id: &str,
        _trust_level: TrustLevel,
        domain: &str,
        interface_name: &str,
    ) -> bool {
        self.checks.lock().unwrap().push((
            owner_id.to_string(),
            domain.to_string(),
            interface_name.to_string(),
        ));
        self.permit.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Demo provider and interpreter
// =============================================================================

pub const DEMO_INTERFACE: &str = "demo/Counter";

pub struct DemoProvider {
    pub count: Mutex<i64>,
}

impl DemoProvider {
    pub fn new(count: i64) -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(count),
        })
    }
}

impl RequestCaller for DemoProvider {
    fn interface_name(&self) -> &str {
        DEMO_INTERFACE
    }

    fn provider_version(&self) -> Version {
        Version::new(1, 0)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub fn demo_interpreter() -> Arc<RequestInterpreter> {
    RequestInterpreter::builder(DEMO_INTERFACE)
        .method::<DemoProvider>("getTrue", &[], |_provider, _params, continuation| {
            continuation.succeed(vec![json!(true)])
        })
        .method::<DemoProvider>(
            "concat",
            &["String", "String"],
            |_provider, params, continuation| {
                let left = params[0].as_str().unwrap_or_default().to_string();
                let right = params[1].as_str().unwrap_or_default();
                continuation.succeed(vec![json!(format!("{}{}", left, right))])
            },
        )
        .method::<DemoProvider>("explode", &[], |_provider, _params, _continuation| {
            panic!("provider failure")
        })
        .attribute_get::<DemoProvider>("count", |provider, continuation| {
            continuation.succeed(vec![json!(*provider.count.lock().unwrap())])
        })
        .attribute_set::<DemoProvider>("count", "Integer", |provider, value, continuation| {
            *provider.count.lock().unwrap() = value.as_i64().unwrap_or(0);
            continuation.succeed(Vec::new())
        })
        .build()
}

/// Continuation recording its single outcome.
#[derive(Default)]
pub struct CapturingContinuation {
    pub response: Mutex<Option<Vec<Value>>>,
    pub error: Mutex<Option<RpcError>>,
}

impl CapturingContinuation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn response(&self) -> Option<Vec<Value>> {
        self.response.lock().unwrap().clone()
    }

    pub fn error(&self) -> Option<RpcError> {
        self.error.lock().unwrap().clone()
    }
}

impl RequestContinuation for CapturingContinuation {
    fn succeed(&self, response: Vec<Value>) {
        *self.response.lock().unwrap() = Some(response);
    }

    fn fail(&self, error: RpcError) {
        *self.error.lock().unwrap() = Some(error);
    }
}
