//! Interpreter method resolution and registrar reference counting.

use std::sync::Arc;

use serde_json::json;

use crate::error::RpcError;
use crate::message::Request;
use crate::provider::RequestCaller;
use crate::registrar::{InterfaceRegistrar, interface_key};
use crate::tests::support::{
    CapturingContinuation, DEMO_INTERFACE, DemoProvider, demo_interpreter,
};

fn demo_caller() -> Arc<dyn RequestCaller> {
    DemoProvider::new(0)
}

#[test]
fn resolves_method_without_parameters() {
    let interpreter = demo_interpreter();
    let caller = demo_caller();
    let continuation = CapturingContinuation::new();

    interpreter.execute(&caller, &Request::new("getTrue"), continuation.clone());

    assert_eq!(continuation.response(), Some(vec![json!(true)]));
    assert!(continuation.error().is_none());
}

#[test]
fn resolves_overload_by_full_signature() {
    let interpreter = demo_interpreter();
    let caller = demo_caller();
    let continuation = CapturingContinuation::new();

    let request = Request::new("concat")
        .with_param("String", json!("foo"))
        .with_param("String", json!("bar"));
    interpreter.execute(&caller, &request, continuation.clone());

    assert_eq!(continuation.response(), Some(vec![json!("foobar")]));
}

#[test]
fn unknown_method_fails_with_method_invocation() {
    let interpreter = demo_interpreter();
    let caller = demo_caller();
    let continuation = CapturingContinuation::new();

    interpreter.execute(&caller, &Request::new("noSuchMethod"), continuation.clone());

    match continuation.error() {
        Some(RpcError::MethodInvocation {
            provider_version, ..
        }) => {
            assert_eq!(provider_version.major_version, 1);
        }
        other => panic!("expected MethodInvocation, got {:?}", other),
    }
}

#[test]
fn datatype_mismatch_fails_with_method_invocation() {
    let interpreter = demo_interpreter();
    let caller = demo_caller();
    let continuation = CapturingContinuation::new();

    // Same name and arity, wrong datatype signature.
    let request = Request::new("concat")
        .with_param("String", json!("foo"))
        .with_param("Integer", json!(7));
    interpreter.execute(&caller, &request, continuation.clone());

    assert!(matches!(
        continuation.error(),
        Some(RpcError::MethodInvocation { .. })
    ));
    assert!(continuation.response().is_none());
}

#[test]
fn wrong_arity_fails_with_method_invocation() {
    let interpreter = demo_interpreter();
    let caller = demo_caller();
    let continuation = CapturingContinuation::new();

    let request = Request::new("concat").with_param("String", json!("only one"));
    interpreter.execute(&caller, &request, continuation.clone());

    assert!(matches!(
        continuation.error(),
        Some(RpcError::MethodInvocation { .. })
    ));
}

#[test]
fn provider_panic_surfaces_as_provider_runtime() {
    let interpreter = demo_interpreter();
    let caller = demo_caller();
    let continuation = CapturingContinuation::new();

    interpreter.execute(&caller, &Request::new("explode"), continuation.clone());

    assert!(matches!(
        continuation.error(),
        Some(RpcError::ProviderRuntime { .. })
    ));
}

#[test]
fn attribute_accessors_resolve() {
    let interpreter = demo_interpreter();
    let provider = DemoProvider::new(7);
    let caller: Arc<dyn RequestCaller> = provider.clone();

    let get = CapturingContinuation::new();
    interpreter.execute(&caller, &Request::new("getCount"), get.clone());
    assert_eq!(get.response(), Some(vec![json!(7)]));

    let set = CapturingContinuation::new();
    let request = Request::new("setCount").with_param("Integer", json!(12));
    interpreter.execute(&caller, &request, set.clone());
    assert_eq!(set.response(), Some(Vec::new()));
    assert_eq!(*provider.count.lock().unwrap(), 12);
}

#[test]
fn registration_is_reference_counted() {
    let registrar = InterfaceRegistrar::new();
    let key = interface_key(DEMO_INTERFACE, 1);

    registrar.register(&key, demo_interpreter());
    registrar.register(&key, demo_interpreter());
    assert!(registrar.get(&key).is_some());

    registrar.unregister(&key);
    assert!(registrar.get(&key).is_some());

    registrar.unregister(&key);
    assert!(registrar.get(&key).is_none());
}

#[test]
fn unregister_unknown_key_is_noop() {
    let registrar = InterfaceRegistrar::new();
    registrar.unregister("never/registered.1");
    assert!(registrar.get("never/registered.1").is_none());
}
