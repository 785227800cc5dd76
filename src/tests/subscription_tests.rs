//! Subscription manager: registration, alerts, expiry, updates.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;

use crate::error::RpcError;
use crate::message::SubscriptionRequest;
use crate::subscription::{
    SubscriptionCallback, SubscriptionManager, SubscriptionQos, typed_callback,
};
use crate::tests::support::wait_until;
use crate::timer::TimerService;
use crate::util::now_ms;

struct CountingCallback {
    publications: AtomicUsize,
    missed: AtomicUsize,
}

impl CountingCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            publications: AtomicUsize::new(0),
            missed: AtomicUsize::new(0),
        })
    }
}

impl SubscriptionCallback for CountingCallback {
    fn on_publication(&self, _value: serde_json::Value) {
        self.publications.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: RpcError) {
        if matches!(error, RpcError::PublicationMissed { .. }) {
            self.missed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn register_fills_outbound_request() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    let callback = CountingCallback::new();
    let qos = SubscriptionQos::periodic(1_000, 0);
    let mut request = SubscriptionRequest::new();

    manager.register("position", callback, qos.clone(), &mut request);

    assert_eq!(request.subscribe_to_name, "position");
    assert_eq!(request.qos, qos);
    assert!(manager.has_subscription(&request.subscription_id));
    timer.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn missed_publication_alert_fires_repeatedly() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    let callback = CountingCallback::new();
    let mut request = SubscriptionRequest::new();

    manager.register(
        "position",
        callback.clone(),
        SubscriptionQos::periodic(40, 40),
        &mut request,
    );

    // No publications arrive, so alerts accumulate once per period.
    assert!(wait_until(|| callback.missed.load(Ordering::SeqCst) >= 3, 2_000).await);
    timer.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn publications_suppress_missed_alerts() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    let callback = CountingCallback::new();
    let mut request = SubscriptionRequest::new();

    manager.register(
        "position",
        callback.clone(),
        SubscriptionQos::periodic(80, 80),
        &mut request,
    );

    for _ in 0..10 {
        manager.touch(&request.subscription_id);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(callback.missed.load(Ordering::SeqCst), 0);
    timer.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn update_with_same_id_cancels_previous_alert() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    let first = CountingCallback::new();
    let mut request = SubscriptionRequest::new();

    manager.register(
        "position",
        first.clone(),
        SubscriptionQos::periodic(30, 30),
        &mut request,
    );
    assert!(wait_until(|| first.missed.load(Ordering::SeqCst) >= 1, 1_000).await);

    // Update to an on-change qos without alerting.
    let second = CountingCallback::new();
    manager.register(
        "position",
        second.clone(),
        SubscriptionQos::default(),
        &mut request,
    );
    let first_count = first.missed.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(200)).await;
    // One alert can race the update, none after that.
    assert!(first.missed.load(Ordering::SeqCst) <= first_count + 1);
    assert_eq!(second.missed.load(Ordering::SeqCst), 0);
    timer.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn finite_expiry_removes_subscription() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    let callback = CountingCallback::new();
    let mut request = SubscriptionRequest::new();

    let qos = SubscriptionQos::default().with_expiry_date_ms(now_ms() + 60);
    manager.register("position", callback, qos, &mut request);
    assert!(manager.has_subscription(&request.subscription_id));

    let id = request.subscription_id.clone();
    assert!(wait_until(|| !manager.has_subscription(&id), 1_000).await);
    timer.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn enlarged_expiry_extends_schedule() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    let callback = CountingCallback::new();
    let mut request = SubscriptionRequest::new();

    let short = SubscriptionQos::default().with_expiry_date_ms(now_ms() + 60);
    manager.register("position", callback.clone(), short, &mut request);

    let long = SubscriptionQos::default().with_expiry_date_ms(now_ms() + 60_000);
    manager.register("position", callback, long, &mut request);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(manager.has_subscription(&request.subscription_id));
    timer.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn infinite_expiry_survives_finite_update() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    let callback = CountingCallback::new();
    let mut request = SubscriptionRequest::new();

    // Never expires, then updated with a finite expiry: the never-expires
    // schedule is the later of the two and wins.
    manager.register(
        "position",
        callback.clone(),
        SubscriptionQos::default(),
        &mut request,
    );

    let short = SubscriptionQos::default().with_expiry_date_ms(now_ms() + 60);
    manager.register("position", callback, short, &mut request);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(manager.has_subscription(&request.subscription_id));
    timer.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn finite_expiry_update_to_infinite_extends_forever() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    let callback = CountingCallback::new();
    let mut request = SubscriptionRequest::new();

    let short = SubscriptionQos::default().with_expiry_date_ms(now_ms() + 60);
    manager.register("position", callback.clone(), short, &mut request);

    manager.register(
        "position",
        callback,
        SubscriptionQos::default(),
        &mut request,
    );

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(manager.has_subscription(&request.subscription_id));
    timer.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn reduced_expiry_keeps_later_fire_time() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    let callback = CountingCallback::new();
    let mut request = SubscriptionRequest::new();

    let long = SubscriptionQos::default().with_expiry_date_ms(now_ms() + 60_000);
    manager.register("position", callback.clone(), long, &mut request);

    let short = SubscriptionQos::default().with_expiry_date_ms(now_ms() + 60);
    manager.register("position", callback, short, &mut request);

    // The schedule keeps the later of the two fire times.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(manager.has_subscription(&request.subscription_id));
    timer.shutdown();
}

#[tokio::test]
async fn unregister_unknown_id_is_silent_noop() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    manager.unregister("no-such-subscription");
    assert!(manager.is_empty());
    timer.shutdown();
}

#[tokio::test]
async fn unregister_cancels_alerts() {
    let timer = TimerService::spawn();
    let manager = SubscriptionManager::new(Arc::clone(&timer));
    let callback = CountingCallback::new();
    let mut request = SubscriptionRequest::new();

    manager.register(
        "position",
        callback.clone(),
        SubscriptionQos::periodic(30, 30),
        &mut request,
    );
    manager.unregister(&request.subscription_id);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(callback.missed.load(Ordering::SeqCst), 0);
    assert!(!manager.has_subscription(&request.subscription_id));
    timer.shutdown();
}

#[tokio::test]
async fn typed_callback_decodes_publication_values() {
    let decoded = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicUsize::new(0));

    let sink = Arc::clone(&decoded);
    let error_count = Arc::clone(&errors);
    let callback = typed_callback::<i64, _, _>(
        move |value| sink.lock().unwrap().push(value),
        move |_err| {
            error_count.fetch_add(1, Ordering::SeqCst);
        },
    );

    callback.on_publication(json!(41));
    callback.on_publication(json!(42));
    // A value of the wrong shape goes down the error path.
    callback.on_publication(json!("not a number"));

    assert_eq!(*decoded.lock().unwrap(), vec![41, 42]);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}
