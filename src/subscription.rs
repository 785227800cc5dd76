//! Consumer-side subscription tracking.
//!
//! Tracks outstanding subscriptions, their callbacks and quality of
//! service, schedules missed-publication alerts for periodic
//! subscriptions and expiry removal for finite ones.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::RpcError;
use crate::message::SubscriptionRequest;
use crate::timer::{TimerHandle, TimerService};
use crate::util::now_ms;

// =============================================================================
// Quality of service
// =============================================================================

/// Expiry value meaning "never expires".
pub const NO_EXPIRY: i64 = 0;

/// Quality of service carried by a subscription request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionQos {
    /// Absolute expiry in epoch milliseconds; [`NO_EXPIRY`] keeps the
    /// subscription alive until stopped.
    pub expiry_date_ms: i64,
    /// Time-to-live of each publication message.
    pub publication_ttl_ms: i64,
    /// Interval of periodic publications; zero means on-change only.
    pub period_ms: i64,
    /// Minimum gap between on-change publications.
    pub min_interval_ms: i64,
    /// Raise a missed-publication alert when no publication arrived for
    /// this long; zero disables alerts.
    pub alert_after_interval_ms: i64,
}

impl Default for SubscriptionQos {
    fn default() -> Self {
        Self {
            expiry_date_ms: NO_EXPIRY,
            publication_ttl_ms: 10_000,
            period_ms: 0,
            min_interval_ms: 0,
            alert_after_interval_ms: 0,
        }
    }
}

impl SubscriptionQos {
    /// Qos for periodic publications with a missed-publication alert.
    pub fn periodic(period_ms: i64, alert_after_interval_ms: i64) -> Self {
        Self {
            period_ms,
            alert_after_interval_ms,
            ..Self::default()
        }
    }

    pub fn with_expiry_date_ms(mut self, expiry_date_ms: i64) -> Self {
        self.expiry_date_ms = expiry_date_ms;
        self
    }

    pub fn with_publication_ttl_ms(mut self, publication_ttl_ms: i64) -> Self {
        self.publication_ttl_ms = publication_ttl_ms;
        self
    }

    pub fn with_min_interval_ms(mut self, min_interval_ms: i64) -> Self {
        self.min_interval_ms = min_interval_ms;
        self
    }
}

// =============================================================================
// Callbacks
// =============================================================================

/// Consumer callback for one subscription.
pub trait SubscriptionCallback: Send + Sync {
    fn on_publication(&self, value: Value);
    fn on_error(&self, error: RpcError);
}

struct TypedSubscriptionCallback<T, FV, FE> {
    on_value: FV,
    on_error: FE,
    _marker: PhantomData<fn(T)>,
}

impl<T, FV, FE> SubscriptionCallback for TypedSubscriptionCallback<T, FV, FE>
where
    T: DeserializeOwned + Send + 'static,
    FV: Fn(T) + Send + Sync + 'static,
    FE: Fn(RpcError) + Send + Sync + 'static,
{
    fn on_publication(&self, value: Value) {
        match serde_json::from_value::<T>(value) {
            Ok(typed) => (self.on_value)(typed),
            Err(err) => (self.on_error)(RpcError::runtime(format!(
                "failed to decode publication value: {}",
                err
            ))),
        }
    }

    fn on_error(&self, error: RpcError) {
        (self.on_error)(error);
    }
}

/// Build a callback that decodes publication values into `T` before
/// handing them to `on_value`. The type parameter is what selects the
/// deserializer for this subscription.
pub fn typed_callback<T, FV, FE>(on_value: FV, on_error: FE) -> Arc<dyn SubscriptionCallback>
where
    T: DeserializeOwned + Send + 'static,
    FV: Fn(T) + Send + Sync + 'static,
    FE: Fn(RpcError) + Send + Sync + 'static,
{
    Arc::new(TypedSubscriptionCallback {
        on_value,
        on_error,
        _marker: PhantomData,
    })
}

// =============================================================================
// Subscription manager
// =============================================================================

struct SubscriptionState {
    callback: Arc<dyn SubscriptionCallback>,
    qos: SubscriptionQos,
    alert_timer: Option<TimerHandle>,
    expiry_timer: Option<TimerHandle>,
    /// Scheduled expiry fire time, kept for the update rule. `None` means
    /// the subscription never expires.
    expiry_fire_at_ms: Option<i64>,
    last_publication_ms: i64,
}

type SubscriptionMap = Mutex<HashMap<String, SubscriptionState>>;

/// Outstanding subscriptions on the consumer side.
pub struct SubscriptionManager {
    subscriptions: Arc<SubscriptionMap>,
    timer: Arc<TimerService>,
}

impl SubscriptionManager {
    pub fn new(timer: Arc<TimerService>) -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            timer,
        }
    }

    /// Track a subscription and fill `request` with the name and qos that
    /// go out on the wire.
    ///
    /// Registering an id that is already known is an update: the existing
    /// missed-publication alert is cancelled and the qos refreshed. The
    /// expiry reschedules to the later of the existing fire time and the
    /// new expiry, so an enlarged expiry extends the schedule and an
    /// existing never-expires schedule stays infinite.
    pub fn register(
        &self,
        subscribe_to_name: impl Into<String>,
        callback: Arc<dyn SubscriptionCallback>,
        qos: SubscriptionQos,
        request: &mut SubscriptionRequest,
    ) {
        request.subscribe_to_name = subscribe_to_name.into();
        request.qos = qos.clone();
        let subscription_id = request.subscription_id.clone();

        let mut subscriptions = self.subscriptions.lock().expect("subscriptions poisoned");

        // None = fresh registration; Some(fire_at) = update of an existing
        // subscription, with its own None meaning it never expires.
        let previous_fire_at_ms: Option<Option<i64>> =
            match subscriptions.remove(&subscription_id) {
                Some(existing) => {
                    debug!(%subscription_id, "updating existing subscription");
                    if let Some(handle) = existing.alert_timer {
                        self.timer.cancel(handle);
                    }
                    if let Some(handle) = existing.expiry_timer {
                        self.timer.cancel(handle);
                    }
                    Some(existing.expiry_fire_at_ms)
                }
                None => None,
            };

        let requested_expiry_ms =
            (qos.expiry_date_ms != NO_EXPIRY).then_some(qos.expiry_date_ms);
        let expiry_fire_at_ms = match previous_fire_at_ms {
            // Later of existing fire time and new expiry; a never-expires
            // side always wins.
            Some(None) => None,
            Some(Some(previous)) => requested_expiry_ms.map(|requested| previous.max(requested)),
            None => requested_expiry_ms,
        };

        let mut state = SubscriptionState {
            callback: Arc::clone(&callback),
            qos: qos.clone(),
            alert_timer: None,
            expiry_timer: None,
            expiry_fire_at_ms,
            last_publication_ms: now_ms(),
        };

        if let Some(fire_at_ms) = expiry_fire_at_ms {
            let delay_ms = fire_at_ms.saturating_sub(now_ms()).max(0) as u64;
            let subscriptions = Arc::clone(&self.subscriptions);
            let timer = Arc::clone(&self.timer);
            let expiring_id = subscription_id.clone();
            state.expiry_timer = Some(self.timer.schedule_once(
                Duration::from_millis(delay_ms),
                move || {
                    debug!(subscription_id = %expiring_id, "subscription expired");
                    remove_state(&subscriptions, &timer, &expiring_id);
                },
            ));
        }

        if qos.period_ms > 0 && qos.alert_after_interval_ms > 0 {
            let alert_interval = Duration::from_millis(qos.alert_after_interval_ms as u64);
            let subscriptions = Arc::clone(&self.subscriptions);
            let alerting_id = subscription_id.clone();
            state.alert_timer = Some(self.timer.schedule_recurring(
                alert_interval,
                alert_interval,
                move || {
                    let missed = {
                        let subscriptions =
                            subscriptions.lock().expect("subscriptions poisoned");
                        subscriptions.get(&alerting_id).is_some_and(|state| {
                            now_ms() - state.last_publication_ms
                                >= state.qos.alert_after_interval_ms
                        })
                    };
                    if missed {
                        callback.on_error(RpcError::PublicationMissed {
                            subscription_id: alerting_id.clone(),
                        });
                    }
                },
            ));
        }

        subscriptions.insert(subscription_id, state);
    }

    /// Callback registered for `subscription_id`, if any.
    pub fn callback_for(&self, subscription_id: &str) -> Option<Arc<dyn SubscriptionCallback>> {
        self.subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .get(subscription_id)
            .map(|state| Arc::clone(&state.callback))
    }

    /// Record that a publication arrived, resetting the missed-publication
    /// alert window.
    pub fn touch(&self, subscription_id: &str) {
        if let Some(state) = self
            .subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .get_mut(subscription_id)
        {
            state.last_publication_ms = now_ms();
        }
    }

    /// Stop tracking a subscription, cancelling its timers. Unknown ids
    /// are a silent no-op.
    pub fn unregister(&self, subscription_id: &str) {
        if !remove_state(&self.subscriptions, &self.timer, subscription_id) {
            debug!(subscription_id, "unregister of unknown subscription ignored");
        }
    }

    pub fn has_subscription(&self, subscription_id: &str) -> bool {
        self.subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .contains_key(subscription_id)
    }

    pub fn len(&self) -> usize {
        self.subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remove_state(subscriptions: &SubscriptionMap, timer: &TimerService, id: &str) -> bool {
    let removed = subscriptions
        .lock()
        .expect("subscriptions poisoned")
        .remove(id);
    match removed {
        Some(state) => {
            if let Some(handle) = state.alert_timer {
                timer.cancel(handle);
            }
            if let Some(handle) = state.expiry_timer {
                timer.cancel(handle);
            }
            true
        }
        None => false,
    }
}
