//! Timer service behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::tests::support::wait_until;
use crate::timer::TimerService;

#[tokio::test]
async fn one_shot_fires_exactly_once() {
    let timer = TimerService::spawn();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);

    timer.schedule_once(Duration::from_millis(20), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(wait_until(|| fired.load(Ordering::SeqCst) == 1, 500).await);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    timer.shutdown();
}

#[tokio::test]
async fn cancelled_one_shot_never_fires() {
    let timer = TimerService::spawn();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);

    let handle = timer.schedule_once(Duration::from_millis(40), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    timer.cancel(handle);
    // Cancelling again is a no-op.
    timer.cancel(handle);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    timer.shutdown();
}

#[tokio::test]
async fn recurring_fires_until_cancelled() {
    let timer = TimerService::spawn();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);

    let handle = timer.schedule_recurring(
        Duration::from_millis(20),
        Duration::from_millis(20),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );

    assert!(wait_until(|| fired.load(Ordering::SeqCst) >= 3, 1_000).await);
    timer.cancel(handle);
    let count_after_cancel = fired.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(120)).await;
    // At most one firing can race the cancellation.
    assert!(fired.load(Ordering::SeqCst) <= count_after_cancel + 1);
    timer.shutdown();
}

#[tokio::test]
async fn shutdown_stops_firing() {
    let timer = TimerService::spawn();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);

    timer.schedule_recurring(
        Duration::from_millis(10),
        Duration::from_millis(10),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );
    assert!(wait_until(|| fired.load(Ordering::SeqCst) >= 1, 500).await);
    timer.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let count_after_shutdown = fired.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fired.load(Ordering::SeqCst), count_after_shutdown);
}
