//! Routing of inbound requests and notifications to handlers.
//!
//! A [`Dispatcher`] is built up front with the handlers of one side of a
//! session and then handed to a [`Connection`](crate::Connection), which feeds
//! it every inbound message. Requests run as independent tasks and are
//! answered in completion order; notifications are delivered one at a time, in
//! arrival order, by the connection's notification worker.

use crate::connection::Peer;
use crate::error::ResponseError;
use crate::types::{
    methods, ApplyWorkspaceEditParams, CancelParams, Id, NotificationMessage, RegistrationParams,
    RequestMessage, ResponseMessage, RpcMessage, UnregistrationParams,
};
use crate::workspace::{DocumentStore, WorkspaceEditApplier};
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// What a request handler produces.
pub type HandlerResult = std::result::Result<Value, ResponseError>;

type RequestHandler =
    Arc<dyn Fn(Option<Value>, RequestContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

type NotificationHandler = Arc<
    dyn Fn(Option<Value>, Peer) -> BoxFuture<'static, std::result::Result<(), ResponseError>>
        + Send
        + Sync,
>;

/// Everything a request handler gets besides its params.
#[derive(Clone)]
pub struct RequestContext {
    id: Id,
    method: String,
    peer: Peer,
    cancel: CancellationToken,
}

impl RequestContext {
    /// The inbound request id.
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Handle for talking back to the peer, e.g. to issue reverse calls.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Whether the peer asked to cancel this request.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the peer cancels this request.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// The token tripped by `$/cancelRequest`.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Where a session stands in the initialize/shutdown handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    /// `initialize` received, its response not sent yet.
    Initializing,
    /// `initialize` answered, waiting for `initialized`.
    Initialized,
    Running,
    ShuttingDown,
}

struct RequestEntry {
    handler: RequestHandler,
    gated: bool,
}

struct NotificationEntry {
    handler: NotificationHandler,
    gated: bool,
}

fn decode_params<P: DeserializeOwned>(
    method: &str,
    params: Option<Value>,
) -> std::result::Result<P, ResponseError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
        ResponseError::invalid_params(format!("Invalid params for '{}': {}", method, e))
    })
}

fn encode_result<R: Serialize>(method: &str, result: R) -> HandlerResult {
    serde_json::to_value(result).map_err(|e| {
        ResponseError::internal_error(format!("Failed to encode result of '{}': {}", method, e))
    })
}

/// Handler registry plus per-connection routing state.
pub struct Dispatcher {
    requests: HashMap<String, RequestEntry>,
    notifications: HashMap<String, NotificationEntry>,
    builtins: HashMap<&'static str, RequestHandler>,
    in_flight: Mutex<HashMap<Id, CancellationToken>>,
    lifecycle: RwLock<LifecycleState>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// A dispatcher with only the built-in registration handlers.
    pub fn new() -> Self {
        let mut builtins: HashMap<&'static str, RequestHandler> = HashMap::new();
        builtins.insert(
            methods::REGISTER_CAPABILITY,
            Arc::new(|params: Option<Value>, ctx: RequestContext| {
                async move {
                    let params: RegistrationParams =
                        decode_params(methods::REGISTER_CAPABILITY, params)?;
                    ctx.peer()
                        .ledger()
                        .register_all(params)
                        .await
                        .map_err(|e| e.to_response_error())?;
                    HandlerResult::Ok(Value::Null)
                }
                .boxed()
            }),
        );
        builtins.insert(
            methods::UNREGISTER_CAPABILITY,
            Arc::new(|params: Option<Value>, ctx: RequestContext| {
                async move {
                    let params: UnregistrationParams =
                        decode_params(methods::UNREGISTER_CAPABILITY, params)?;
                    ctx.peer()
                        .ledger()
                        .unregister_all(params)
                        .await
                        .map_err(|e| e.to_response_error())?;
                    HandlerResult::Ok(Value::Null)
                }
                .boxed()
            }),
        );
        builtins.insert(
            methods::SHUTDOWN,
            Arc::new(|_: Option<Value>, _: RequestContext| {
                async { HandlerResult::Ok(Value::Null) }.boxed()
            }),
        );

        Self {
            requests: HashMap::new(),
            notifications: HashMap::new(),
            builtins,
            in_flight: Mutex::new(HashMap::new()),
            lifecycle: RwLock::new(LifecycleState::Uninitialized),
        }
    }

    /// Serve `workspace/applyEdit` with `applier`, using the connection's
    /// configured failure handling strategy.
    pub fn with_applier<S: DocumentStore + 'static>(
        mut self,
        applier: Arc<WorkspaceEditApplier<S>>,
    ) -> Self {
        self.builtins.insert(
            methods::APPLY_EDIT,
            Arc::new(move |params: Option<Value>, ctx: RequestContext| {
                let applier = Arc::clone(&applier);
                async move {
                    let params: ApplyWorkspaceEditParams =
                        decode_params(methods::APPLY_EDIT, params)?;
                    let kind = ctx.peer().config().failure_handling;
                    let result = applier.apply_params(&params, kind).await;
                    encode_result(methods::APPLY_EDIT, result)
                }
                .boxed()
            }),
        );
        self
    }

    /// Register a request handler working on raw JSON params.
    pub fn on_raw_request<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.requests.insert(
            method.into(),
            RequestEntry {
                handler: Arc::new(move |params: Option<Value>, ctx: RequestContext| {
                    handler(params, ctx).boxed()
                }),
                gated: false,
            },
        );
        self
    }

    /// Register a typed request handler. Params that fail to decode are
    /// answered with `InvalidParams`.
    pub fn on_request<P, R, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, ResponseError>> + Send + 'static,
    {
        self.insert_typed_request(method.into(), handler, false)
    }

    /// Like [`Dispatcher::on_request`], but the handler only answers while the
    /// registration ledger holds a registration for `method`.
    pub fn on_request_gated<P, R, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, ResponseError>> + Send + 'static,
    {
        self.insert_typed_request(method.into(), handler, true)
    }

    fn insert_typed_request<P, R, F, Fut>(mut self, method: String, handler: F, gated: bool) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, ResponseError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let name = method.clone();
        let erased: RequestHandler = Arc::new(move |params: Option<Value>, ctx: RequestContext| {
            let handler = Arc::clone(&handler);
            let method = name.clone();
            async move {
                let params: P = decode_params(&method, params)?;
                let result = handler(params, ctx).await?;
                encode_result(&method, result)
            }
            .boxed()
        });
        self.requests.insert(
            method,
            RequestEntry {
                handler: erased,
                gated,
            },
        );
        self
    }

    /// Register a typed notification handler.
    pub fn on_notification<P, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), ResponseError>> + Send + 'static,
    {
        self.insert_notification(method.into(), handler, false)
    }

    /// Like [`Dispatcher::on_notification`], but notifications are dropped
    /// while the registration ledger has no registration for `method`.
    pub fn on_notification_gated<P, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), ResponseError>> + Send + 'static,
    {
        self.insert_notification(method.into(), handler, true)
    }

    fn insert_notification<P, F, Fut>(mut self, method: String, handler: F, gated: bool) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), ResponseError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let name = method.clone();
        let erased: NotificationHandler = Arc::new(move |params: Option<Value>, peer: Peer| {
            let handler = Arc::clone(&handler);
            let method = name.clone();
            async move {
                let params: P = decode_params(&method, params)?;
                handler(params, peer).await
            }
            .boxed()
        });
        self.notifications.insert(
            method,
            NotificationEntry {
                handler: erased,
                gated,
            },
        );
        self
    }

    /// Current lifecycle state. Only tracked with `enforce_lifecycle`.
    pub async fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.read().await
    }

    /// Number of inbound requests whose handlers are still running.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn admit_request(&self, method: &str) -> std::result::Result<(), ResponseError> {
        let mut state = self.lifecycle.write().await;
        match (*state, method) {
            (LifecycleState::Uninitialized, methods::INITIALIZE) => {
                *state = LifecycleState::Initializing;
                Ok(())
            }
            (LifecycleState::Initializing, methods::INITIALIZE) => Err(
                ResponseError::invalid_request("initialize is already in progress"),
            ),
            (LifecycleState::Uninitialized | LifecycleState::Initializing, _) => Err(
                ResponseError::server_not_initialized(format!(
                    "Received '{}' before initialize",
                    method
                )),
            ),
            (LifecycleState::Initialized | LifecycleState::Running, methods::INITIALIZE) => Err(
                ResponseError::invalid_request("Session is already initialized"),
            ),
            (LifecycleState::Initialized | LifecycleState::Running, methods::SHUTDOWN) => {
                *state = LifecycleState::ShuttingDown;
                Ok(())
            }
            (LifecycleState::Initialized | LifecycleState::Running, _) => Ok(()),
            (LifecycleState::ShuttingDown, _) => Err(ResponseError::invalid_request(format!(
                "Received '{}' after shutdown",
                method
            ))),
        }
    }

    async fn finish_lifecycle_request(&self, method: &str, succeeded: bool, peer: &Peer) {
        let mut state = self.lifecycle.write().await;
        match (method, succeeded) {
            (methods::INITIALIZE, true) => *state = LifecycleState::Initialized,
            (methods::INITIALIZE, false) => *state = LifecycleState::Uninitialized,
            (methods::SHUTDOWN, true) => {
                drop(state);
                let dropped = peer.ledger().teardown().await;
                log::debug!(
                    "Shutdown complete, dropped {} registrations",
                    dropped.len()
                );
            }
            (methods::SHUTDOWN, false) => *state = LifecycleState::Running,
            _ => {}
        }
    }

    /// Whether a notification may be delivered at this point of the lifecycle.
    pub(crate) async fn admit_notification(&self, method: &str, peer: &Peer) -> bool {
        if !peer.config().enforce_lifecycle || method == methods::EXIT {
            return true;
        }
        let mut state = self.lifecycle.write().await;
        match (*state, method) {
            (LifecycleState::Initialized, methods::INITIALIZED) => {
                *state = LifecycleState::Running;
                true
            }
            (LifecycleState::Running, _) => true,
            (current, _) => {
                log::warn!("Dropping notification '{}' in state {:?}", method, current);
                false
            }
        }
    }

    async fn route_request(&self, method: &str, peer: &Peer) -> Option<RequestHandler> {
        if let Some(entry) = self.requests.get(method) {
            if !entry.gated || peer.ledger().is_registered(method).await {
                return Some(Arc::clone(&entry.handler));
            }
            log::debug!("'{}' has no active registration", method);
            return None;
        }
        self.builtins.get(method).cloned()
    }

    /// Route an inbound request. The handler runs on its own task; its
    /// response is written when it finishes.
    pub(crate) async fn handle_request(self: &Arc<Self>, request: RequestMessage, peer: &Peer) {
        let RequestMessage {
            id, method, params, ..
        } = request;
        log::trace!("Received request {} ({})", id, method);

        let enforce = peer.config().enforce_lifecycle;
        if enforce {
            if let Err(error) = self.admit_request(&method).await {
                log::warn!("Rejecting request {} ({}): {}", id, method, error.message);
                peer.respond(ResponseMessage::error(Some(id), error)).await;
                return;
            }
        }

        let handler = match self.route_request(&method, peer).await {
            Some(handler) => handler,
            None => {
                log::warn!("No handler for request '{}'", method);
                if enforce {
                    self.finish_lifecycle_request(&method, false, peer).await;
                }
                let error = ResponseError::method_not_found(format!("Unhandled method {}", method));
                peer.respond(ResponseMessage::error(Some(id), error)).await;
                return;
            }
        };

        let cancel = CancellationToken::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains_key(&id) {
                drop(in_flight);
                log::error!("Request id {} is already in flight", id);
                let error =
                    ResponseError::invalid_request(format!("Request id {} is already in use", id));
                peer.respond(ResponseMessage::error(Some(id), error)).await;
                return;
            }
            in_flight.insert(id.clone(), cancel.clone());
        }

        let ctx = RequestContext {
            id: id.clone(),
            method: method.clone(),
            peer: peer.clone(),
            cancel: cancel.clone(),
        };
        let dispatcher = Arc::clone(self);
        let peer = peer.clone();
        tokio::spawn(async move {
            let result = match AssertUnwindSafe(handler(params, ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    log::error!("Handler for {} ({}) panicked", id, method);
                    Err(ResponseError::internal_error(format!(
                        "Handler for '{}' panicked",
                        method
                    )))
                }
            };
            dispatcher.in_flight.lock().await.remove(&id);

            let result = if cancel.is_cancelled() {
                Err(ResponseError::request_cancelled(format!(
                    "Request {} ({}) was cancelled",
                    id, method
                )))
            } else {
                result
            };
            if enforce {
                dispatcher
                    .finish_lifecycle_request(&method, result.is_ok(), &peer)
                    .await;
            }
            if let Err(error) = &result {
                log::debug!("Request {} ({}) failed: {}", id, method, error);
            }
            peer.respond(ResponseMessage::from_result(id, result)).await;
        });
    }

    /// Trip the cancellation token of an in-flight inbound request.
    pub(crate) async fn cancel_inbound(&self, params: Option<Value>) {
        let params: CancelParams = match decode_params(methods::CANCEL_REQUEST, params) {
            Ok(params) => params,
            Err(e) => {
                log::warn!("Ignoring malformed cancellation: {}", e.message);
                return;
            }
        };
        match self.in_flight.lock().await.get(&params.id) {
            Some(token) => {
                log::debug!("Cancelling inbound request {}", params.id);
                token.cancel();
            }
            None => log::debug!("Cancellation for {} arrived after it finished", params.id),
        }
    }

    /// Trip every in-flight token, e.g. when the connection goes away.
    pub(crate) async fn cancel_all_inbound(&self) {
        for token in self.in_flight.lock().await.values() {
            token.cancel();
        }
    }

    /// Deliver one notification. Called by the notification worker only.
    pub(crate) async fn handle_notification(&self, notification: NotificationMessage, peer: &Peer) {
        let NotificationMessage { method, params, .. } = notification;
        let entry = match self.notifications.get(&method) {
            Some(entry) => entry,
            None => {
                log::debug!("No handler for notification '{}', dropping it", method);
                return;
            }
        };
        if entry.gated && !peer.ledger().is_registered(&method).await {
            log::warn!(
                "Dropping notification '{}': it has no active registration",
                method
            );
            return;
        }

        let outcome = AssertUnwindSafe((entry.handler)(params, peer.clone()))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => log::trace!("Handled notification '{}'", method),
            Ok(Err(e)) => log::warn!("Notification handler for '{}' failed: {}", method, e),
            Err(_) => log::error!("Notification handler for '{}' panicked", method),
        }
    }

    /// Whether `message` is routed by the dispatcher itself.
    pub(crate) fn is_cancellation(message: &RpcMessage) -> bool {
        matches!(message, RpcMessage::Notification(n) if n.method == methods::CANCEL_REQUEST)
    }
}
