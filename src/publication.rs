//! Provider-side publication handling.
//!
//! Holds the subscriptions local providers publish into. Requests that
//! arrive before their provider registers are queued per target
//! participant and installed when the dispatcher restores them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::RpcError;
use crate::message::{Message, Request, SubscriptionPublication, SubscriptionRequest};
use crate::provider::RequestCaller;
use crate::registrar::{
    InterfaceRegistrar, RequestContinuation, accessor_name, interface_key,
};
use crate::routing::MessageSender;
use crate::subscription::{NO_EXPIRY, SubscriptionQos};
use crate::timer::{TimerHandle, TimerService};
use crate::util::{now_ms, value_hash};

struct QueuedSubscription {
    proxy_participant_id: String,
    request: SubscriptionRequest,
}

struct ActivePublication {
    proxy_participant_id: String,
    provider_participant_id: String,
    subscribe_to_name: String,
    qos: SubscriptionQos,
    caller: Arc<dyn RequestCaller>,
    sender: Arc<dyn MessageSender>,
    periodic_timer: Option<TimerHandle>,
    expiry_timer: Option<TimerHandle>,
    last_value_hash: Option<u64>,
    last_publication_ms: i64,
}

#[derive(Default)]
struct PublicationState {
    /// Active subscriptions by subscription id.
    active: HashMap<String, ActivePublication>,
    /// Requests waiting for their provider, keyed by target participant.
    queued: HashMap<String, Vec<QueuedSubscription>>,
}

/// Provider-side subscription registry and publication emitter.
pub struct PublicationManager {
    state: Arc<Mutex<PublicationState>>,
    timer: Arc<TimerService>,
    registrar: Arc<InterfaceRegistrar>,
}

impl PublicationManager {
    pub fn new(timer: Arc<TimerService>, registrar: Arc<InterfaceRegistrar>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PublicationState::default())),
            timer,
            registrar,
        }
    }

    /// Queue a subscription request whose provider is not registered yet.
    pub fn add_queued(
        &self,
        proxy_participant_id: &str,
        provider_participant_id: &str,
        request: SubscriptionRequest,
    ) {
        debug!(
            subscription_id = %request.subscription_id,
            provider_participant_id,
            "queueing subscription request, provider not registered yet"
        );
        self.state
            .lock()
            .expect("publication state poisoned")
            .queued
            .entry(provider_participant_id.to_string())
            .or_default()
            .push(QueuedSubscription {
                proxy_participant_id: proxy_participant_id.to_string(),
                request,
            });
    }

    /// Install a subscription against a registered provider. Re-adding a
    /// known subscription id replaces the prior state.
    pub fn add(
        &self,
        proxy_participant_id: &str,
        provider_participant_id: &str,
        caller: Arc<dyn RequestCaller>,
        request: SubscriptionRequest,
        sender: Arc<dyn MessageSender>,
    ) {
        let subscription_id = request.subscription_id.clone();
        let qos = request.qos.clone();

        if qos.expiry_date_ms != NO_EXPIRY && qos.expiry_date_ms <= now_ms() {
            warn!(%subscription_id, "rejecting already expired subscription request");
            return;
        }

        let mut state = self.state.lock().expect("publication state poisoned");
        if let Some(previous) = state.active.remove(&subscription_id) {
            debug!(%subscription_id, "replacing existing publication state");
            self.cancel_timers(&previous);
        }

        let mut publication = ActivePublication {
            proxy_participant_id: proxy_participant_id.to_string(),
            provider_participant_id: provider_participant_id.to_string(),
            subscribe_to_name: request.subscribe_to_name.clone(),
            qos: qos.clone(),
            caller,
            sender,
            periodic_timer: None,
            expiry_timer: None,
            last_value_hash: None,
            last_publication_ms: 0,
        };

        if qos.expiry_date_ms != NO_EXPIRY {
            let delay_ms = qos.expiry_date_ms.saturating_sub(now_ms()).max(0) as u64;
            let expiring_state = Arc::clone(&self.state);
            let timer = Arc::clone(&self.timer);
            let expiring_id = subscription_id.clone();
            publication.expiry_timer = Some(self.timer.schedule_once(
                Duration::from_millis(delay_ms),
                move || {
                    debug!(subscription_id = %expiring_id, "publication expired");
                    let removed = expiring_state
                        .lock()
                        .expect("publication state poisoned")
                        .active
                        .remove(&expiring_id);
                    if let Some(publication) = removed {
                        if let Some(handle) = publication.periodic_timer {
                            timer.cancel(handle);
                        }
                    }
                },
            ));
        }

        if qos.period_ms > 0 {
            let period = Duration::from_millis(qos.period_ms as u64);
            let polling_state = Arc::clone(&self.state);
            let registrar = Arc::clone(&self.registrar);
            let polling_id = subscription_id.clone();
            publication.periodic_timer = Some(self.timer.schedule_recurring(
                period,
                period,
                move || poll_and_publish(&polling_state, &registrar, &polling_id),
            ));
        }

        debug!(%subscription_id, provider_participant_id, "publication installed");
        state.active.insert(subscription_id, publication);
    }

    /// Install every queued subscription targeting `provider_participant_id`.
    /// Called by the dispatcher when the provider's request caller appears.
    pub fn restore(
        &self,
        provider_participant_id: &str,
        caller: Arc<dyn RequestCaller>,
        sender: Arc<dyn MessageSender>,
    ) {
        let drained = self
            .state
            .lock()
            .expect("publication state poisoned")
            .queued
            .remove(provider_participant_id)
            .unwrap_or_default();
        for queued in drained {
            debug!(
                subscription_id = %queued.request.subscription_id,
                provider_participant_id,
                "restoring queued subscription"
            );
            self.add(
                &queued.proxy_participant_id,
                provider_participant_id,
                Arc::clone(&caller),
                queued.request,
                Arc::clone(&sender),
            );
        }
    }

    /// Cancel timers and drop all state for one subscription, queued or
    /// active.
    pub fn stop_publication(&self, subscription_id: &str) {
        let mut state = self.state.lock().expect("publication state poisoned");
        for queue in state.queued.values_mut() {
            queue.retain(|queued| queued.request.subscription_id != subscription_id);
        }
        state.queued.retain(|_, queue| !queue.is_empty());
        match state.active.remove(subscription_id) {
            Some(publication) => {
                debug!(subscription_id, "publication stopped");
                self.cancel_timers(&publication);
            }
            None => debug!(subscription_id, "stop for unknown subscription ignored"),
        }
    }

    /// Purge every subscription targeting `provider_participant_id`.
    /// Invoked when the provider is removed.
    pub fn remove_all_subscriptions(&self, provider_participant_id: &str) {
        let mut state = self.state.lock().expect("publication state poisoned");
        let _ = state.queued.remove(provider_participant_id);
        let matching: Vec<String> = state
            .active
            .iter()
            .filter(|(_, publication)| {
                publication.provider_participant_id == provider_participant_id
            })
            .map(|(id, _)| id.clone())
            .collect();
        for subscription_id in matching {
            if let Some(publication) = state.active.remove(&subscription_id) {
                debug!(%subscription_id, "publication removed with provider");
                self.cancel_timers(&publication);
            }
        }
    }

    /// Emit a publication for an attribute change. Consecutive duplicate
    /// values and changes inside the minimum interval are suppressed.
    pub fn attribute_value_changed(&self, subscription_id: &str, value: Value) {
        let emission = {
            let mut state = self.state.lock().expect("publication state poisoned");
            let Some(publication) = state.active.get_mut(subscription_id) else {
                debug!(subscription_id, "value change for unknown subscription ignored");
                return;
            };
            let hash = value_hash(&value);
            if publication.last_value_hash == Some(hash) {
                return;
            }
            let now = now_ms();
            if publication.qos.min_interval_ms > 0
                && now - publication.last_publication_ms < publication.qos.min_interval_ms
            {
                return;
            }
            publication.last_value_hash = Some(hash);
            publication.last_publication_ms = now;
            (
                Arc::clone(&publication.sender),
                publication.provider_participant_id.clone(),
                publication.proxy_participant_id.clone(),
                publication.qos.publication_ttl_ms,
            )
        };
        let (sender, provider, proxy, ttl_ms) = emission;
        send_publication(
            sender.as_ref(),
            &provider,
            &proxy,
            ttl_ms,
            SubscriptionPublication {
                subscription_id: subscription_id.to_string(),
                response: Some(value),
                error: None,
            },
        );
    }

    pub fn has_active(&self, subscription_id: &str) -> bool {
        self.state
            .lock()
            .expect("publication state poisoned")
            .active
            .contains_key(subscription_id)
    }

    pub fn queued_count(&self, provider_participant_id: &str) -> usize {
        self.state
            .lock()
            .expect("publication state poisoned")
            .queued
            .get(provider_participant_id)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    fn cancel_timers(&self, publication: &ActivePublication) {
        if let Some(handle) = publication.periodic_timer {
            self.timer.cancel(handle);
        }
        if let Some(handle) = publication.expiry_timer {
            self.timer.cancel(handle);
        }
    }
}

/// Periodic tick: read the attribute through the registered interpreter
/// and publish the result.
fn poll_and_publish(
    state: &Arc<Mutex<PublicationState>>,
    registrar: &InterfaceRegistrar,
    subscription_id: &str,
) {
    let snapshot = {
        let state = state.lock().expect("publication state poisoned");
        let Some(publication) = state.active.get(subscription_id) else {
            return;
        };
        (
            Arc::clone(&publication.caller),
            Arc::clone(&publication.sender),
            publication.provider_participant_id.clone(),
            publication.proxy_participant_id.clone(),
            publication.subscribe_to_name.clone(),
            publication.qos.publication_ttl_ms,
        )
    };
    let (caller, sender, provider, proxy, attribute, ttl_ms) = snapshot;

    let key = interface_key(
        caller.interface_name(),
        caller.provider_version().major_version,
    );
    let Some(interpreter) = registrar.get(&key) else {
        warn!(
            interface_key = %key,
            subscription_id,
            "no interpreter registered, skipping periodic publication"
        );
        return;
    };

    let getter = Request {
        method_name: accessor_name("get", &attribute),
        params: Vec::new(),
        param_datatypes: Vec::new(),
        request_reply_id: String::new(),
    };
    let continuation = Arc::new(PublicationContinuation {
        state: Arc::clone(state),
        sender,
        subscription_id: subscription_id.to_string(),
        provider_participant_id: provider,
        proxy_participant_id: proxy,
        publication_ttl_ms: ttl_ms,
    });
    interpreter.execute(&caller, &getter, continuation);
}

/// Continuation for periodic polls: either outcome becomes a publication.
struct PublicationContinuation {
    state: Arc<Mutex<PublicationState>>,
    sender: Arc<dyn MessageSender>,
    subscription_id: String,
    provider_participant_id: String,
    proxy_participant_id: String,
    publication_ttl_ms: i64,
}

impl RequestContinuation for PublicationContinuation {
    fn succeed(&self, response: Vec<Value>) {
        let value = response.into_iter().next().unwrap_or(Value::Null);
        {
            let mut state = self.state.lock().expect("publication state poisoned");
            if let Some(publication) = state.active.get_mut(&self.subscription_id) {
                publication.last_value_hash = Some(value_hash(&value));
                publication.last_publication_ms = now_ms();
            }
        }
        send_publication(
            self.sender.as_ref(),
            &self.provider_participant_id,
            &self.proxy_participant_id,
            self.publication_ttl_ms,
            SubscriptionPublication {
                subscription_id: self.subscription_id.clone(),
                response: Some(value),
                error: None,
            },
        );
    }

    fn fail(&self, error: RpcError) {
        send_publication(
            self.sender.as_ref(),
            &self.provider_participant_id,
            &self.proxy_participant_id,
            self.publication_ttl_ms,
            SubscriptionPublication {
                subscription_id: self.subscription_id.clone(),
                response: None,
                error: Some(error),
            },
        );
    }
}

fn send_publication(
    sender: &dyn MessageSender,
    from: &str,
    to: &str,
    ttl_ms: i64,
    publication: SubscriptionPublication,
) {
    match Message::publication(from, to, ttl_ms, &publication) {
        Ok(message) => sender.send(message),
        Err(err) => error!(%err, "failed to serialize publication"),
    }
}
