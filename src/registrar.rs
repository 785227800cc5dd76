//! Interface registrar and request interpreter.
//!
//! Each interface version registers one interpreter that decodes method
//! name and parameter datatypes into a typed provider invocation. The
//! decode table is keyed by (name, datatype signature); resolution requires
//! full signature equality, no implicit conversions.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RpcError;
use crate::message::Request;
use crate::provider::RequestCaller;

/// Key under which interpreters register: `<interface>.<majorVersion>`.
pub fn interface_key(interface_name: &str, major_version: i32) -> String {
    format!("{}.{}", interface_name, major_version)
}

// =============================================================================
// Continuations
// =============================================================================

/// Outcome of one request execution. Implementations must tolerate being
/// invoked from provider code and deliver at most one outcome.
pub trait RequestContinuation: Send + Sync {
    fn succeed(&self, response: Vec<Value>);
    fn fail(&self, error: RpcError);
}

/// Continuation that discards the outcome, used for one-way requests.
pub struct DiscardingContinuation;

impl RequestContinuation for DiscardingContinuation {
    fn succeed(&self, _response: Vec<Value>) {}

    fn fail(&self, error: RpcError) {
        warn!(%error, "one-way request failed");
    }
}

// =============================================================================
// Request interpreter
// =============================================================================

#[derive(PartialEq, Eq, Hash)]
struct MethodKey {
    name: String,
    param_datatypes: Vec<String>,
}

type MethodAdapter =
    Arc<dyn Fn(&dyn RequestCaller, Vec<Value>, Arc<dyn RequestContinuation>) + Send + Sync>;

/// Decode table from (method name, datatype signature) to a typed adapter
/// invoking the concrete provider.
pub struct RequestInterpreter {
    interface_name: String,
    methods: HashMap<MethodKey, MethodAdapter>,
}

impl RequestInterpreter {
    pub fn builder(interface_name: impl Into<String>) -> RequestInterpreterBuilder {
        RequestInterpreterBuilder {
            interface_name: interface_name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Resolve and run the request against `caller`.
    ///
    /// Unknown method, wrong arity or datatype mismatch fail the
    /// continuation with a method-invocation error carrying the provider
    /// version. A panic inside provider code is caught and surfaced as a
    /// provider-runtime error; it never unwinds into the worker.
    pub fn execute(
        &self,
        caller: &Arc<dyn RequestCaller>,
        request: &Request,
        continuation: Arc<dyn RequestContinuation>,
    ) {
        let key = MethodKey {
            name: request.method_name.clone(),
            param_datatypes: request.param_datatypes.clone(),
        };
        let Some(adapter) = self.methods.get(&key) else {
            warn!(
                interface = %self.interface_name,
                method = %request.method_name,
                "no matching method overload"
            );
            continuation.fail(RpcError::method_invocation(
                format!(
                    "unknown method {} with signature [{}] on interface {}",
                    request.method_name,
                    request.param_datatypes.join(", "),
                    self.interface_name
                ),
                caller.provider_version(),
            ));
            return;
        };

        let outcome = Arc::clone(&continuation);
        let params = request.params.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            adapter(caller.as_ref(), params, continuation);
        }));
        if result.is_err() {
            outcome.fail(RpcError::provider_runtime(format!(
                "provider panicked while executing {} on interface {}",
                request.method_name, self.interface_name
            )));
        }
    }
}

pub struct RequestInterpreterBuilder {
    interface_name: String,
    methods: HashMap<MethodKey, MethodAdapter>,
}

impl RequestInterpreterBuilder {
    /// Register an overload for `name` with the given datatype signature.
    /// The adapter receives the concrete provider; a caller of another
    /// type fails the continuation instead of panicking.
    pub fn method<C: RequestCaller>(
        mut self,
        name: impl Into<String>,
        param_datatypes: &[&str],
        adapter: impl Fn(&C, Vec<Value>, Arc<dyn RequestContinuation>) + Send + Sync + 'static,
    ) -> Self {
        let key = MethodKey {
            name: name.into(),
            param_datatypes: param_datatypes.iter().map(|s| s.to_string()).collect(),
        };
        self.methods.insert(
            key,
            Arc::new(move |caller, params, continuation| {
                match caller.as_any().downcast_ref::<C>() {
                    Some(typed) => adapter(typed, params, continuation),
                    None => continuation.fail(RpcError::runtime(format!(
                        "installed provider is not of the registered type for interface {}",
                        caller.interface_name()
                    ))),
                }
            }),
        );
        self
    }

    /// Register the getter for attribute `name` as `get<Name>`.
    pub fn attribute_get<C: RequestCaller>(
        self,
        name: &str,
        adapter: impl Fn(&C, Arc<dyn RequestContinuation>) + Send + Sync + 'static,
    ) -> Self {
        self.method(
            accessor_name("get", name),
            &[],
            move |caller: &C, _params, continuation| adapter(caller, continuation),
        )
    }

    /// Register the setter for attribute `name` as `set<Name>`.
    pub fn attribute_set<C: RequestCaller>(
        self,
        name: &str,
        datatype: &str,
        adapter: impl Fn(&C, Value, Arc<dyn RequestContinuation>) + Send + Sync + 'static,
    ) -> Self {
        self.method(
            accessor_name("set", name),
            &[datatype],
            move |caller: &C, mut params, continuation| {
                if params.len() != 1 {
                    continuation.fail(RpcError::runtime("attribute setter expects one value"));
                    return;
                }
                adapter(caller, params.remove(0), continuation)
            },
        )
    }

    pub fn build(self) -> Arc<RequestInterpreter> {
        Arc::new(RequestInterpreter {
            interface_name: self.interface_name,
            methods: self.methods,
        })
    }
}

/// `get` + `value` -> `getValue`.
pub(crate) fn accessor_name(prefix: &str, attribute: &str) -> String {
    let mut chars = attribute.chars();
    match chars.next() {
        Some(first) => format!("{}{}{}", prefix, first.to_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    }
}

// =============================================================================
// Registrar
// =============================================================================

struct RegisteredInterpreter {
    interpreter: Arc<RequestInterpreter>,
    ref_count: usize,
}

/// Maps a versioned interface key to exactly one interpreter instance.
/// Registration is reference-counted; the last unregister evicts.
#[derive(Default)]
pub struct InterfaceRegistrar {
    interpreters: Mutex<HashMap<String, RegisteredInterpreter>>,
}

impl InterfaceRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `interpreter` under `key`. If the key is already taken the
    /// existing interpreter is kept and its reference count grows.
    pub fn register(&self, key: impl Into<String>, interpreter: Arc<RequestInterpreter>) {
        let key = key.into();
        let mut interpreters = self.interpreters.lock().expect("registrar poisoned");
        match interpreters.entry(key) {
            Entry::Occupied(mut existing) => existing.get_mut().ref_count += 1,
            Entry::Vacant(slot) => {
                debug!(key = %slot.key(), "request interpreter registered");
                slot.insert(RegisteredInterpreter {
                    interpreter,
                    ref_count: 1,
                });
            }
        }
    }

    /// Drop one reference; the interpreter is evicted when the count
    /// reaches zero. Unregistering an unknown key is a no-op.
    pub fn unregister(&self, key: &str) {
        let mut interpreters = self.interpreters.lock().expect("registrar poisoned");
        let evict = match interpreters.get_mut(key) {
            Some(existing) => {
                existing.ref_count -= 1;
                existing.ref_count == 0
            }
            None => false,
        };
        if evict {
            debug!(key, "request interpreter evicted");
            let _ = interpreters.remove(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<RequestInterpreter>> {
        self.interpreters
            .lock()
            .expect("registrar poisoned")
            .get(key)
            .map(|registered| Arc::clone(&registered.interpreter))
    }
}
