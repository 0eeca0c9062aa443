//! A live JSON-RPC session over a reader/writer pair.
//!
//! [`Connection`] owns the read loop. Every inbound message is decoded once
//! and routed: responses complete calls in the [`CorrelationTable`], requests
//! and notifications go to the [`Dispatcher`]. The [`Peer`] handle is the
//! outbound side; it is cheap to clone and is what handlers use for reverse
//! calls.

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ErrorCode, LspError, ResponseError, Result};
use crate::pending::{CorrelationTable, PendingResponse};
use crate::registration::RegistrationLedger;
use crate::transport::{Transport, TransportReader, TransportWriter};
use crate::types::{
    methods, ApplyWorkspaceEditParams, ApplyWorkspaceEditResult, CancelParams, Id,
    NotificationMessage, Registration, RegistrationParams, RequestMessage, ResponseMessage,
    RpcMessage, Unregistration, UnregistrationParams,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct PeerInner {
    writer: Mutex<TransportWriter<BoxedWriter>>,
    table: CorrelationTable,
    ledger: RegistrationLedger,
    config: EngineConfig,
    closed: CancellationToken,
}

/// The outbound side of a connection.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

/// Map a failed call onto the crate error type.
fn call_error(id: Id, error: ResponseError) -> LspError {
    match error.kind() {
        ErrorCode::RequestTimeout => LspError::Timeout,
        ErrorCode::ConnectionClosed => LspError::ConnectionClosed,
        ErrorCode::RequestCancelled => LspError::Cancelled(id),
        _ => LspError::Protocol(error),
    }
}

impl Peer {
    fn new(writer: BoxedWriter, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                writer: Mutex::new(TransportWriter::new(writer)),
                table: CorrelationTable::from_config(&config),
                ledger: RegistrationLedger::new(),
                config,
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Dynamic registrations of this session.
    pub fn ledger(&self) -> &RegistrationLedger {
        &self.inner.ledger
    }

    /// Outstanding outbound requests.
    pub fn correlation_table(&self) -> &CorrelationTable {
        &self.inner.table
    }

    pub async fn pending_request_count(&self) -> usize {
        self.inner.table.len().await
    }

    /// Whether the read loop has ended.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the read loop has ended and the session is torn down.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    async fn send_message(&self, message: &RpcMessage) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        writer.write_rpc_message(message).await
    }

    pub(crate) async fn respond(&self, response: ResponseMessage) {
        let id = response.id.clone();
        if let Err(e) = self.send_message(&RpcMessage::Response(response)).await {
            match id {
                Some(id) => log::error!("Failed to write response to {}: {}", id, e),
                None => log::error!("Failed to write error response: {}", e),
            }
        }
    }

    /// Send a request and return the awaitable response without waiting.
    ///
    /// The returned [`PendingResponse`] carries the allocated id, which can be
    /// passed to [`Peer::cancel_request`].
    pub async fn start_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<PendingResponse> {
        if self.is_closed() {
            return Err(LspError::ConnectionClosed);
        }
        let method = method.into();
        let (id, response) = self.inner.table.allocate(method.clone()).await;
        let request = match params {
            Some(params) => RequestMessage::with_params(id.clone(), method, params),
            None => RequestMessage::new(id.clone(), method),
        };

        if let Err(e) = self.send_message(&RpcMessage::Request(request)).await {
            log::error!("Failed to send request {}: {}", id, e);
            self.inner
                .table
                .fail(
                    &id,
                    ResponseError::new(ErrorCode::MessageWriteError, e.to_string()),
                )
                .await;
            return Err(e);
        }
        if self.is_closed() {
            self.inner
                .table
                .fail(&id, ResponseError::connection_closed("Connection closed"))
                .await;
        }
        Ok(response)
    }

    /// Send a request and wait for its result.
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value> {
        let response = self.start_request(method, params).await?;
        let id = response.id().clone();
        response.await.map_err(|error| call_error(id, error))
    }

    /// Send a typed request and decode its result.
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = match serde_json::to_value(params)? {
            Value::Null => None,
            params => Some(params),
        };
        let result = self.send_request(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a notification.
    pub async fn send_notification(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<()> {
        let notification = match params {
            Some(params) => NotificationMessage::with_params(method, params),
            None => NotificationMessage::new(method),
        };
        self.send_message(&RpcMessage::Notification(notification))
            .await
    }

    /// Send a typed notification.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let params = serde_json::to_value(params)?;
        self.send_notification(method, Some(params)).await
    }

    /// Cancel an outbound request: its caller gets `RequestCancelled` at once
    /// and the peer is sent `$/cancelRequest`. Returns `false` if the request
    /// already completed.
    pub async fn cancel_request(&self, id: &Id) -> Result<bool> {
        if !self.inner.table.cancel(id).await {
            return Ok(false);
        }
        log::debug!("Cancelled outbound request {}", id);
        self.notify(methods::CANCEL_REQUEST, CancelParams { id: id.clone() })
            .await?;
        Ok(true)
    }

    /// Ask the peer to register capabilities. The registrations are recorded
    /// in the local ledger first and dropped again if the peer refuses them.
    pub async fn register_capability(&self, registrations: Vec<Registration>) -> Result<()> {
        let params = RegistrationParams { registrations };
        self.inner.ledger.register_all(params.clone()).await?;

        if let Err(e) = self
            .request::<_, Value>(methods::REGISTER_CAPABILITY, &params)
            .await
        {
            for registration in &params.registrations {
                if let Err(rollback) = self.inner.ledger.unregister(&registration.id).await {
                    log::error!("Failed to roll back registration: {}", rollback);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Ask the peer to drop registrations. The local ledger is validated and
    /// updated first and restored if the peer refuses.
    pub async fn unregister_capability(&self, unregistrations: Vec<Unregistration>) -> Result<()> {
        let params = UnregistrationParams { unregistrations };
        let removed = self.inner.ledger.unregister_all(params.clone()).await?;

        if let Err(e) = self
            .request::<_, Value>(methods::UNREGISTER_CAPABILITY, &params)
            .await
        {
            for registration in removed {
                if let Err(restore) = self.inner.ledger.register(registration).await {
                    log::error!("Failed to restore registration: {}", restore);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Ask the peer to apply a workspace edit.
    pub async fn apply_edit(
        &self,
        params: ApplyWorkspaceEditParams,
    ) -> Result<ApplyWorkspaceEditResult> {
        self.request(methods::APPLY_EDIT, params).await
    }

    /// Fail every pending call, drop every registration, mark closed.
    async fn teardown(&self) {
        self.inner.closed.cancel();
        let failed = self
            .inner
            .table
            .fail_all(ResponseError::connection_closed("Connection closed"))
            .await;
        let dropped = self.inner.ledger.teardown().await;
        log::debug!(
            "Connection closed: failed {} pending requests, dropped {} registrations",
            failed,
            dropped.len()
        );
    }
}

/// A running session.
pub struct Connection {
    peer: Peer,
    dispatcher: Arc<Dispatcher>,
    stop: CancellationToken,
    read_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Start a session over `reader` and `writer`. Must be called from within
    /// a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W, dispatcher: Dispatcher, config: EngineConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::from_transport(Transport::new(reader, writer), dispatcher, config)
    }

    /// Start a session over an existing transport.
    pub fn from_transport<R, W>(
        transport: Transport<R, W>,
        dispatcher: Dispatcher,
        config: EngineConfig,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = transport.into_split();
        let reader = reader.with_max_message_size(config.max_message_size);
        let peer = Peer::new(Box::new(writer.into_inner()), config);
        let dispatcher = Arc::new(dispatcher);
        let stop = CancellationToken::new();

        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        tokio::spawn(notification_worker(
            notification_rx,
            Arc::clone(&dispatcher),
            peer.clone(),
        ));

        if peer.config().request_timeout().is_some() {
            tokio::spawn(reaper(peer.clone()));
        }

        let reading = tokio::spawn(read_loop(
            reader,
            Arc::clone(&dispatcher),
            peer.clone(),
            notification_tx,
            stop.clone(),
        ));
        let read_task = tokio::spawn(supervise(reading, Arc::clone(&dispatcher), peer.clone()));

        Self {
            peer,
            dispatcher,
            stop,
            read_task: Some(read_task),
        }
    }

    /// Handle for outbound traffic.
    pub fn peer(&self) -> Peer {
        self.peer.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Wait until the read loop has ended.
    pub async fn closed(&self) {
        self.peer.closed().await
    }

    /// Stop reading and tear the session down.
    pub async fn shutdown(&mut self) {
        self.stop.cancel();
        if let Some(read_task) = self.read_task.take() {
            if let Err(e) = read_task.await {
                log::error!("Connection teardown ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn read_loop<R>(
    mut reader: TransportReader<R>,
    dispatcher: Arc<Dispatcher>,
    peer: Peer,
    notifications: mpsc::UnboundedSender<NotificationMessage>,
    stop: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = stop.cancelled() => {
                log::debug!("Read loop stopped");
                break;
            }
            message = reader.read_message() => message,
        };

        let message = match message {
            Ok(message) => message,
            Err(LspError::ConnectionClosed) => {
                log::debug!("Peer closed the stream");
                break;
            }
            Err(LspError::Transport(reason)) => {
                log::error!("Failed to read message: {}", reason);
                peer.respond(ResponseMessage::error(None, ResponseError::parse_error(reason)))
                    .await;
                continue;
            }
            Err(e) => {
                log::error!("Failed to read message: {}", e);
                break;
            }
        };

        let rpc_message = match message.parse_rpc_message() {
            Ok(rpc_message) => rpc_message,
            Err(malformed) => {
                log::warn!("Malformed message: {}", malformed.error.message);
                peer.respond(malformed.into_response()).await;
                continue;
            }
        };

        if Dispatcher::is_cancellation(&rpc_message) {
            if let RpcMessage::Notification(notification) = rpc_message {
                dispatcher.cancel_inbound(notification.params).await;
            }
            continue;
        }

        match rpc_message {
            RpcMessage::Response(response) => match response.id.clone() {
                Some(id) => {
                    // Unknown, late and duplicate responses are logged by the table.
                    let _ = peer.inner.table.respond(&id, response.into_result()).await;
                }
                None => log::warn!(
                    "Received response without id: {:?}",
                    response.error.map(|e| e.message)
                ),
            },
            RpcMessage::Request(request) => dispatcher.handle_request(request, &peer).await,
            RpcMessage::Notification(notification) => {
                if !dispatcher
                    .admit_notification(&notification.method, &peer)
                    .await
                {
                    continue;
                }
                if notifications.send(notification).is_err() {
                    log::error!("Notification worker is gone, stopping read loop");
                    break;
                }
            }
        }
    }
}

/// Tear the session down once the read loop ends, however it ends.
async fn supervise(read_loop: JoinHandle<()>, dispatcher: Arc<Dispatcher>, peer: Peer) {
    if let Err(e) = read_loop.await {
        log::error!("Read loop ended abnormally: {}", e);
    }
    dispatcher.cancel_all_inbound().await;
    peer.teardown().await;
}

async fn notification_worker(
    mut notifications: mpsc::UnboundedReceiver<NotificationMessage>,
    dispatcher: Arc<Dispatcher>,
    peer: Peer,
) {
    while let Some(notification) = notifications.recv().await {
        dispatcher.handle_notification(notification, &peer).await;
    }
}

async fn reaper(peer: Peer) {
    let mut ticker = tokio::time::interval(peer.config().reap_interval());
    loop {
        tokio::select! {
            _ = peer.closed() => break,
            _ = ticker.tick() => {
                for id in peer.inner.table.reap_expired(Instant::now()).await {
                    let params = CancelParams { id };
                    if let Err(e) = peer.notify(methods::CANCEL_REQUEST, params).await {
                        log::warn!("Failed to send cancellation for timed out request: {}", e);
                    }
                }
            }
        }
    }
}
