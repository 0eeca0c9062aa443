//! Correlation of outbound requests with their responses.
//!
//! Every outbound request gets a [`PendingCall`] in the [`CorrelationTable`]
//! until it completes. A call completes exactly once: by a response from the
//! peer, by cancellation, by timeout, or by connection teardown. The table
//! remembers a bounded history of completed ids so that a replayed response
//! can be told apart from a late one or from one that was never asked for.

use crate::config::EngineConfig;
use crate::error::{LspError, ResponseError, Result};
use crate::types::Id;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};

/// What the caller of an outbound request eventually receives.
pub type CallResult = std::result::Result<Value, ResponseError>;

/// An outbound request that has not completed yet.
#[derive(Debug)]
pub struct PendingCall {
    pub id: Id,
    pub method: String,
    pub sent_at: Instant,
    sink: oneshot::Sender<CallResult>,
}

impl PendingCall {
    fn complete(self, result: CallResult) {
        if self.sink.send(result).is_err() {
            log::debug!(
                "Caller of request {} ({}) is gone, dropping its result",
                self.id,
                self.method
            );
        }
    }
}

/// How a call left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The peer answered with a result or an error.
    Responded,
    /// Cancelled locally.
    Cancelled,
    /// Rejected by the timeout policy.
    TimedOut,
    /// Failed locally, e.g. the request could not be written.
    Failed,
}

/// The receiving end of a pending call.
///
/// Resolves to the peer's result or error. If the table is dropped without
/// completing the call, it resolves to a `ConnectionClosed` error.
#[derive(Debug)]
pub struct PendingResponse {
    id: Id,
    rx: oneshot::Receiver<CallResult>,
}

impl PendingResponse {
    /// The id the request was sent with.
    pub fn id(&self) -> &Id {
        &self.id
    }
}

impl Future for PendingResponse {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(ResponseError::connection_closed(
                    "Request was dropped before completing",
                ))
            })
        })
    }
}

#[derive(Debug, Default)]
struct TableState {
    calls: HashMap<Id, PendingCall>,
    completed: HashMap<Id, Completion>,
    completed_order: VecDeque<Id>,
}

impl TableState {
    fn remember(&mut self, id: Id, completion: Completion, history: usize) {
        if history == 0 {
            return;
        }
        if self.completed.insert(id.clone(), completion).is_none() {
            self.completed_order.push_back(id);
        }
        while self.completed_order.len() > history {
            if let Some(evicted) = self.completed_order.pop_front() {
                self.completed.remove(&evicted);
            }
        }
    }

    fn take(&mut self, id: &Id, completion: Completion, history: usize) -> Option<PendingCall> {
        let call = self.calls.remove(id)?;
        self.remember(id.clone(), completion, history);
        Some(call)
    }
}

/// Table of outstanding outbound requests.
#[derive(Debug)]
pub struct CorrelationTable {
    next_id: AtomicI64,
    state: Mutex<TableState>,
    timeout: Option<Duration>,
    history: usize,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new(None, crate::config::DEFAULT_COMPLETED_HISTORY)
    }
}

impl CorrelationTable {
    /// Create a table with an optional timeout and the number of completed ids
    /// to remember.
    pub fn new(timeout: Option<Duration>, history: usize) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            state: Mutex::new(TableState::default()),
            timeout,
            history,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.request_timeout(), config.completed_history)
    }

    /// The configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Allocate a fresh id for `method` and start tracking the call.
    ///
    /// Ids come from a monotonic counter; an id that is still pending, or was
    /// completed recently, is skipped.
    pub async fn allocate(&self, method: impl Into<String>) -> (Id, PendingResponse) {
        let mut state = self.state.lock().await;
        let id = loop {
            let candidate = Id::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
            if !state.calls.contains_key(&candidate) && !state.completed.contains_key(&candidate) {
                break candidate;
            }
        };
        let response = Self::insert(&mut state, id.clone(), method.into());
        (id, response)
    }

    /// Track a call under a caller-chosen id.
    pub async fn register(&self, id: Id, method: impl Into<String>) -> Result<PendingResponse> {
        let mut state = self.state.lock().await;
        if state.calls.contains_key(&id) {
            log::error!("Refusing to reuse pending request id {}", id);
            return Err(LspError::DuplicateRequestId(id));
        }
        state.completed.remove(&id);
        Ok(Self::insert(&mut state, id, method.into()))
    }

    fn insert(state: &mut TableState, id: Id, method: String) -> PendingResponse {
        let (sink, rx) = oneshot::channel();
        state.calls.insert(
            id.clone(),
            PendingCall {
                id: id.clone(),
                method,
                sent_at: Instant::now(),
                sink,
            },
        );
        PendingResponse { id, rx }
    }

    /// Deliver a successful result from the peer.
    pub async fn resolve(&self, id: &Id, result: Value) -> Result<()> {
        self.respond(id, Ok(result)).await
    }

    /// Deliver an error from the peer.
    pub async fn reject(&self, id: &Id, error: ResponseError) -> Result<()> {
        self.respond(id, Err(error)).await
    }

    /// Deliver a response from the peer.
    ///
    /// Unknown and late ids are warnings; a second response to an id that
    /// already got one is an error. In every case the table is left as is.
    pub async fn respond(&self, id: &Id, result: CallResult) -> Result<()> {
        let call = {
            let mut state = self.state.lock().await;
            match state.take(id, Completion::Responded, self.history) {
                Some(call) => call,
                None => {
                    return Err(match state.completed.get(id) {
                        Some(Completion::Responded) => {
                            log::error!("Dropping duplicate response for request {}", id);
                            LspError::DuplicateResponse(id.clone())
                        }
                        Some(completion) => {
                            log::warn!(
                                "Dropping late response for request {} ({:?})",
                                id,
                                completion
                            );
                            LspError::LateResponse(id.clone())
                        }
                        None => {
                            log::warn!("Received response for unknown request ID: {}", id);
                            LspError::UnknownResponse(id.clone())
                        }
                    });
                }
            }
        };
        log::trace!("Request {} ({}) completed", id, call.method);
        call.complete(result);
        Ok(())
    }

    /// Cancel a pending call. The caller receives `RequestCancelled`.
    /// Returns `false` if the id is not pending.
    pub async fn cancel(&self, id: &Id) -> bool {
        let call = {
            let mut state = self.state.lock().await;
            state.take(id, Completion::Cancelled, self.history)
        };
        match call {
            Some(call) => {
                let message = format!("Request {} ({}) was cancelled", id, call.method);
                call.complete(Err(ResponseError::request_cancelled(message)));
                true
            }
            None => false,
        }
    }

    /// Fail a pending call locally, e.g. because it could not be sent.
    pub async fn fail(&self, id: &Id, error: ResponseError) -> bool {
        let call = {
            let mut state = self.state.lock().await;
            state.take(id, Completion::Failed, self.history)
        };
        match call {
            Some(call) => {
                call.complete(Err(error));
                true
            }
            None => false,
        }
    }

    /// Reject every call that has been pending longer than the timeout.
    /// Returns the ids that expired.
    pub async fn reap_expired(&self, now: Instant) -> Vec<Id> {
        let timeout = match self.timeout {
            Some(timeout) => timeout,
            None => return Vec::new(),
        };

        let expired: Vec<PendingCall> = {
            let mut state = self.state.lock().await;
            let ids: Vec<Id> = state
                .calls
                .values()
                .filter(|call| now.saturating_duration_since(call.sent_at) >= timeout)
                .map(|call| call.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| state.take(id, Completion::TimedOut, self.history))
                .collect()
        };

        expired
            .into_iter()
            .map(|call| {
                log::warn!(
                    "Request {} ({}) timed out after {:?}",
                    call.id,
                    call.method,
                    timeout
                );
                let id = call.id.clone();
                let message = format!("Request {} ({}) timed out", call.id, call.method);
                call.complete(Err(ResponseError::request_timeout(message)));
                id
            })
            .collect()
    }

    /// Reject every pending call with `error`. Returns how many were pending.
    pub async fn fail_all(&self, error: ResponseError) -> usize {
        let calls: Vec<PendingCall> = {
            let mut state = self.state.lock().await;
            let ids: Vec<Id> = state.calls.keys().cloned().collect();
            ids.iter()
                .filter_map(|id| state.take(id, Completion::Failed, self.history))
                .collect()
        };
        let count = calls.len();
        for call in calls {
            call.complete(Err(error.clone()));
        }
        count
    }

    /// Whether `id` is pending.
    pub async fn contains(&self, id: &Id) -> bool {
        self.state.lock().await.calls.contains_key(id)
    }

    /// How `id` completed, if it did so recently.
    pub async fn completion(&self, id: &Id) -> Option<Completion> {
        self.state.lock().await.completed.get(id).copied()
    }

    /// Get the number of pending calls.
    pub async fn len(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
