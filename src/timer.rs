//! Monotonic timer service.
//!
//! One driver task owns a min-heap of deadlines and fires one-shot and
//! recurring callbacks. Cancellation removes the callback and leaves a
//! tombstone in the heap that is skipped when its deadline pops; cancelling
//! twice is a no-op. Callbacks run on the driver task and are expected to
//! finish quickly, handing longer work to the worker pool.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Identifies a scheduled callback for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct TimerEntry {
    callback: TimerCallback,
    period: Option<Duration>,
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: HashMap<u64, TimerEntry>,
}

pub struct TimerService {
    state: Mutex<TimerState>,
    wake: Notify,
    next_id: AtomicU64,
    stopped: AtomicBool,
}

impl TimerService {
    /// Create the service and spawn its driver task on the current runtime.
    pub fn spawn() -> Arc<Self> {
        let service = Arc::new(Self {
            state: Mutex::new(TimerState::default()),
            wake: Notify::new(),
            next_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        });
        tokio::spawn(Self::run(Arc::clone(&service)));
        service
    }

    /// Schedule `callback` to fire once after `delay`.
    pub fn schedule_once(
        &self,
        delay: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> TimerHandle {
        self.schedule(delay, None, Arc::new(callback))
    }

    /// Schedule `callback` to fire after `initial_delay` and then every
    /// `period`, regardless of what earlier firings did.
    pub fn schedule_recurring(
        &self,
        initial_delay: Duration,
        period: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> TimerHandle {
        self.schedule(initial_delay, Some(period), Arc::new(callback))
    }

    fn schedule(
        &self,
        delay: Duration,
        period: Option<Duration>,
        callback: TimerCallback,
    ) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock().expect("timer state poisoned");
            state.entries.insert(id, TimerEntry { callback, period });
            state.heap.push(Reverse((Instant::now() + delay, id)));
        }
        self.wake.notify_one();
        TimerHandle(id)
    }

    /// Cancel a scheduled callback. Idempotent; cancelling a handle that
    /// already fired (one-shot) or was cancelled before does nothing.
    pub fn cancel(&self, handle: TimerHandle) {
        let mut state = self.state.lock().expect("timer state poisoned");
        let _ = state.entries.remove(&handle.0);
    }

    /// Stop the driver task. Pending callbacks never fire afterwards.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let next_deadline = {
                let state = self.state.lock().expect("timer state poisoned");
                state.heap.peek().map(|Reverse((at, _))| *at)
            };
            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = self.wake.notified() => continue,
                    }
                }
                None => {
                    self.wake.notified().await;
                    continue;
                }
            }

            let due = self.collect_due();
            for callback in due {
                callback();
            }
        }
    }

    fn collect_due(&self) -> Vec<TimerCallback> {
        let mut due = Vec::new();
        let mut state = self.state.lock().expect("timer state poisoned");
        let now = Instant::now();
        while let Some(Reverse((at, id))) = state.heap.peek().copied() {
            if at > now {
                break;
            }
            state.heap.pop();
            let Some(entry) = state.entries.get(&id) else {
                // cancelled, tombstone only
                continue;
            };
            due.push(Arc::clone(&entry.callback));
            match entry.period {
                Some(period) => state.heap.push(Reverse((at + period, id))),
                None => {
                    let _ = state.entries.remove(&id);
                }
            }
        }
        due
    }
}
