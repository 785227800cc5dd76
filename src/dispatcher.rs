//! Message dispatcher.
//!
//! Receives inbound messages, classifies them by kind on a bounded worker
//! pool and routes them to the provider, reply, subscription and
//! publication machinery. Reply construction reverses the from/to pair of
//! the request and carries whatever ttl the request has left.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::caller_directory::RequestCallerDirectory;
use crate::config::DispatcherConfig;
use crate::error::RpcError;
use crate::message::{
    BroadcastSubscriptionRequest, Message, MessageKind, OneWayRequest, Reply, Request,
    SubscriptionPublication, SubscriptionRequest, SubscriptionStop,
};
use crate::provider::RequestCaller;
use crate::publication::PublicationManager;
use crate::registrar::{
    DiscardingContinuation, InterfaceRegistrar, RequestContinuation, interface_key,
};
use crate::reply_directory::{ReplyCaller, ReplyCallerDirectory};
use crate::routing::MessageSender;
use crate::subscription::SubscriptionManager;
use crate::timer::TimerService;
use crate::util::now_ms;
use crate::worker::WorkerPool;

/// Central inbound message hub coordinating the runtime components.
pub struct Dispatcher {
    sender: Arc<dyn MessageSender>,
    registrar: Arc<InterfaceRegistrar>,
    request_callers: RequestCallerDirectory,
    reply_callers: ReplyCallerDirectory,
    publication_manager: Mutex<Option<Arc<PublicationManager>>>,
    subscription_manager: Mutex<Option<Arc<SubscriptionManager>>>,
    pool: WorkerPool,
    /// Serializes caller installation against subscription-request
    /// handling. A subscription request racing an addRequestCaller either
    /// takes the queued path and is drained by restore, or sees the
    /// installed caller; it is never lost between the two.
    subscription_handling: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        registrar: Arc<InterfaceRegistrar>,
        timer: Arc<TimerService>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sender,
            registrar,
            request_callers: RequestCallerDirectory::new(),
            reply_callers: ReplyCallerDirectory::new(timer),
            publication_manager: Mutex::new(None),
            subscription_manager: Mutex::new(None),
            pool: WorkerPool::new(config.max_workers, config.queue_capacity),
            subscription_handling: Mutex::new(()),
        })
    }

    pub fn register_publication_manager(&self, publication_manager: Arc<PublicationManager>) {
        *self
            .publication_manager
            .lock()
            .expect("dispatcher state poisoned") = Some(publication_manager);
    }

    pub fn register_subscription_manager(&self, subscription_manager: Arc<SubscriptionManager>) {
        *self
            .subscription_manager
            .lock()
            .expect("dispatcher state poisoned") = Some(subscription_manager);
    }

    /// Install a provider callable and activate any subscription requests
    /// queued for it.
    pub fn add_request_caller(&self, participant_id: &str, caller: Arc<dyn RequestCaller>) {
        let _guard = self
            .subscription_handling
            .lock()
            .expect("subscription handling poisoned");
        self.request_callers
            .add(participant_id, Arc::clone(&caller));
        match self.publication_manager() {
            Some(publication_manager) => {
                publication_manager.restore(participant_id, caller, Arc::clone(&self.sender));
            }
            None => debug!("no publication manager available"),
        }
    }

    /// Remove a provider callable and purge every subscription that
    /// targets it.
    pub fn remove_request_caller(&self, participant_id: &str) {
        let _guard = self
            .subscription_handling
            .lock()
            .expect("subscription handling poisoned");
        if let Some(publication_manager) = self.publication_manager() {
            publication_manager.remove_all_subscriptions(participant_id);
        }
        let _ = self.request_callers.remove(participant_id);
    }

    /// Register a continuation for an outbound request.
    pub fn add_reply_caller(&self, request_reply_id: &str, caller: ReplyCaller, ttl_ms: i64) {
        debug!(request_reply_id, ttl_ms, "adding reply caller");
        self.reply_callers.add(request_reply_id, caller, ttl_ms);
    }

    pub fn remove_reply_caller(&self, request_reply_id: &str) {
        let _ = self.reply_callers.remove(request_reply_id);
    }

    /// Enqueue an inbound message for processing on the worker pool.
    pub fn receive(self: &Arc<Self>, message: Message) {
        debug!(
            kind = ?message.kind,
            message_id = %message.header.message_id,
            "message received"
        );
        let dispatcher = Arc::clone(self);
        let submitted = self
            .pool
            .execute(Box::new(move || dispatcher.handle(message)));
        if let Err(err) = submitted {
            error!(%err, "failed to enqueue received message");
        }
    }

    /// Drain and stop the worker pool. Messages received afterwards are
    /// rejected.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    fn publication_manager(&self) -> Option<Arc<PublicationManager>> {
        self.publication_manager
            .lock()
            .expect("dispatcher state poisoned")
            .clone()
    }

    fn subscription_manager(&self) -> Option<Arc<SubscriptionManager>> {
        self.subscription_manager
            .lock()
            .expect("dispatcher state poisoned")
            .clone()
    }

    fn handle(&self, message: Message) {
        match message.kind {
            MessageKind::Request => self.handle_request(&message),
            MessageKind::OneWayRequest => self.handle_one_way_request(&message),
            MessageKind::Reply => self.handle_reply(&message),
            MessageKind::SubscriptionRequest
            | MessageKind::BroadcastSubscriptionRequest
            | MessageKind::MulticastSubscriptionRequest => {
                self.handle_subscription_request(&message)
            }
            MessageKind::SubscriptionStop => self.handle_subscription_stop(&message),
            MessageKind::Publication => self.handle_publication(&message),
            MessageKind::SubscriptionReply => {
                debug!(message_id = %message.header.message_id, "subscription reply received");
            }
        }
    }

    fn handle_request(&self, message: &Message) {
        let sender_id = message.header.from.clone();
        let receiver_id = message.header.to.clone();

        let Some(caller) = self.request_callers.lookup(&receiver_id) else {
            error!(
                %receiver_id,
                "caller not found in the request caller directory, ignoring request"
            );
            return;
        };
        let request: Request = match message.decode_payload() {
            Ok(request) => request,
            Err(err) => {
                error!(%err, "unable to deserialize request, dropping");
                return;
            }
        };

        let continuation = Arc::new(ReplyContinuation {
            sender: Arc::clone(&self.sender),
            request_reply_id: request.request_reply_id.clone(),
            request_expiry_ms: message.header.expiry_date_ms,
            sender_id,
            receiver_id,
            done: AtomicBool::new(false),
        });

        let key = interface_key(
            caller.interface_name(),
            caller.provider_version().major_version,
        );
        let Some(interpreter) = self.registrar.get(&key) else {
            error!(interface_key = %key, "no request interpreter registered");
            continuation.fail(RpcError::runtime(format!(
                "no request interpreter registered for {}",
                key
            )));
            return;
        };
        interpreter.execute(&caller, &request, continuation);
    }

    fn handle_one_way_request(&self, message: &Message) {
        let Some(caller) = self.request_callers.lookup(&message.header.to) else {
            error!(
                receiver_id = %message.header.to,
                "caller not found for one-way request, ignoring"
            );
            return;
        };
        let one_way: OneWayRequest = match message.decode_payload() {
            Ok(one_way) => one_way,
            Err(err) => {
                error!(%err, "unable to deserialize one-way request, dropping");
                return;
            }
        };
        let key = interface_key(
            caller.interface_name(),
            caller.provider_version().major_version,
        );
        let Some(interpreter) = self.registrar.get(&key) else {
            error!(interface_key = %key, "no request interpreter registered");
            return;
        };
        let request = Request {
            method_name: one_way.method_name,
            params: one_way.params,
            param_datatypes: one_way.param_datatypes,
            request_reply_id: String::new(),
        };
        interpreter.execute(&caller, &request, Arc::new(DiscardingContinuation));
    }

    fn handle_reply(&self, message: &Message) {
        let reply: Reply = match message.decode_payload() {
            Ok(reply) => reply,
            Err(err) => {
                error!(%err, "unable to deserialize reply, dropping");
                return;
            }
        };
        match self.reply_callers.remove(&reply.request_reply_id) {
            Some(caller) => match reply.error {
                Some(err) => caller.reject(err),
                None => caller.resolve(reply.response),
            },
            None => {
                // Not an error: the continuation may have outlived its ttl.
                info!(
                    request_reply_id = %reply.request_reply_id,
                    "no pending caller for reply, ignoring"
                );
            }
        }
    }

    fn handle_subscription_request(&self, message: &Message) {
        let request: SubscriptionRequest = if message.kind == MessageKind::SubscriptionRequest {
            match message.decode_payload() {
                Ok(request) => request,
                Err(err) => {
                    error!(%err, "unable to deserialize subscription request, dropping");
                    return;
                }
            }
        } else {
            match message.decode_payload::<BroadcastSubscriptionRequest>() {
                Ok(request) => request.into(),
                Err(err) => {
                    error!(%err, "unable to deserialize broadcast subscription request, dropping");
                    return;
                }
            }
        };

        let _guard = self
            .subscription_handling
            .lock()
            .expect("subscription handling poisoned");
        let Some(publication_manager) = self.publication_manager() else {
            error!("no publication manager registered, dropping subscription request");
            return;
        };
        match self.request_callers.lookup(&message.header.to) {
            Some(caller) => publication_manager.add(
                &message.header.from,
                &message.header.to,
                caller,
                request,
                Arc::clone(&self.sender),
            ),
            None => {
                // Provider not registered yet; restore installs the
                // subscription once the caller is added.
                publication_manager.add_queued(
                    &message.header.from,
                    &message.header.to,
                    request,
                )
            }
        }
    }

    fn handle_subscription_stop(&self, message: &Message) {
        let stop: SubscriptionStop = match message.decode_payload() {
            Ok(stop) => stop,
            Err(err) => {
                error!(%err, "unable to deserialize subscription stop, dropping");
                return;
            }
        };
        if let Some(publication_manager) = self.publication_manager() {
            publication_manager.stop_publication(&stop.subscription_id);
        }
    }

    fn handle_publication(&self, message: &Message) {
        let publication: SubscriptionPublication = match message.decode_payload() {
            Ok(publication) => publication,
            Err(err) => {
                error!(%err, "unable to deserialize publication, dropping");
                return;
            }
        };
        let Some(subscription_manager) = self.subscription_manager() else {
            warn!("no subscription manager registered, dropping publication");
            return;
        };
        let Some(callback) = subscription_manager.callback_for(&publication.subscription_id)
        else {
            warn!(
                subscription_id = %publication.subscription_id,
                "dropping publication for unknown subscription"
            );
            return;
        };
        subscription_manager.touch(&publication.subscription_id);
        match publication.error {
            Some(err) => callback.on_error(err),
            None => callback.on_publication(publication.response.unwrap_or(Value::Null)),
        }
    }
}

/// Continuation for one inbound request: captures the correlation id, the
/// request expiry and both participant ids, and sends exactly one reply.
struct ReplyContinuation {
    sender: Arc<dyn MessageSender>,
    request_reply_id: String,
    request_expiry_ms: i64,
    sender_id: String,
    receiver_id: String,
    done: AtomicBool,
}

impl ReplyContinuation {
    fn send_reply(&self, reply: Reply) {
        if self.done.swap(true, Ordering::SeqCst) {
            warn!(
                request_reply_id = %self.request_reply_id,
                "reply already sent, ignoring second outcome"
            );
            return;
        }
        let ttl_ms = self.request_expiry_ms.saturating_sub(now_ms());
        // Sender and receiver of the request swap roles on the reply.
        match Message::reply(&self.receiver_id, &self.sender_id, ttl_ms, &reply) {
            Ok(message) => self.sender.send(message),
            Err(err) => error!(%err, "failed to serialize reply"),
        }
    }
}

impl RequestContinuation for ReplyContinuation {
    fn succeed(&self, response: Vec<Value>) {
        debug!(
            request_reply_id = %self.request_reply_id,
            "got reply from request interpreter"
        );
        self.send_reply(Reply::response(self.request_reply_id.clone(), response));
    }

    fn fail(&self, error: RpcError) {
        debug!(
            request_reply_id = %self.request_reply_id,
            %error,
            "got error reply from request interpreter"
        );
        self.send_reply(Reply::error(self.request_reply_id.clone(), error));
    }
}
