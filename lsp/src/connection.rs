//! Peer connection: the dispatch loop and the call/notify API.
//!
//! A [`Connection`] owns the outbound half of the stream (behind a write
//! lock so frames never interleave), the correlation table, and the
//! handler registries. [`Connection::start`] spawns the single dispatch
//! loop that reads the inbound half and routes every frame.
//!
//! Peer requests are answered inline by the loop: a slow request handler
//! delays responses and notifications queued behind it. Notifications go
//! to a queue per method, drained by its own task, so one method's
//! notifications are handled one at a time in arrival order while a slow
//! handler never blocks the loop.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::codec::{CodecError, FrameReader, FrameWriter};
use crate::handlers::{Handlers, NotificationHandler};
use crate::message::{Incoming, Message, RequestId, ResponseError, error_codes};
use crate::pending::{PendingCalls, PendingGuard, RegisterError};
use crate::types::StopReason;

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;
type Delivery = (NotificationHandler, Option<Value>);

/// Failure of a single [`Connection::call`].
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("request {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("content modified")]
    ContentModified,
    #[error("server cancelled")]
    ServerCancelled,
    #[error("request failed: {message} (code: {code})")]
    Request { code: i64, message: String },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request id {0} is already in flight")]
    DuplicateId(RequestId),
    #[error("failed to send request: {0}")]
    Transport(#[from] CodecError),
    #[error("failed to serialize params: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to decode result: {0}")]
    InvalidResult(#[source] serde_json::Error),
}

impl CallError {
    /// Content-modified and server-cancelled replies may be retried or ignored.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ContentModified | Self::ServerCancelled)
    }
}

impl From<ResponseError> for CallError {
    fn from(err: ResponseError) -> Self {
        match err.code {
            error_codes::CONTENT_MODIFIED => Self::ContentModified,
            error_codes::SERVER_CANCELLED => Self::ServerCancelled,
            code => Self::Request {
                code,
                message: err.message,
            },
        }
    }
}

impl From<RegisterError> for CallError {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::Duplicate(id) => Self::DuplicateId(id),
            RegisterError::Closed => Self::ConnectionClosed,
        }
    }
}

struct Shared {
    writer: Mutex<FrameWriter<BoxedWriter>>,
    pending: PendingCalls,
    handlers: Handlers,
    queues: StdMutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>,
    next_id: AtomicI64,
}

/// Closes the connection when the dispatch task finishes or is aborted.
struct CloseOnDrop(Arc<Shared>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Handle to a live peer connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Bind the two stream halves and spawn the dispatch loop.
    ///
    /// The returned handle resolves when the loop ends; by then every
    /// pending call has been failed with [`CallError::ConnectionClosed`].
    pub fn start<R, W>(reader: R, writer: W) -> (Self, JoinHandle<StopReason>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let writer: BoxedWriter = Box::pin(writer);
        let shared = Arc::new(Shared {
            writer: Mutex::new(FrameWriter::new(writer)),
            pending: PendingCalls::new(),
            handlers: Handlers::new(),
            queues: StdMutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            let _close = CloseOnDrop(Arc::clone(&loop_shared));
            loop_shared.run(FrameReader::new(reader)).await
        });

        (Self { shared }, handle)
    }

    /// Handler registries for peer-initiated traffic.
    #[must_use]
    pub fn handlers(&self) -> &Handlers {
        &self.shared.handlers
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Whether the dispatch loop has ended or [`Connection::terminate`] ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.pending.is_closed()
    }

    /// Send a request and wait for its response or `timeout`.
    ///
    /// Dropping the returned future cancels the call; a late response is
    /// then discarded by the correlation table.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let id = RequestId::Int(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let rx = self.shared.pending.register(&id)?;
        let _guard = PendingGuard::new(&self.shared.pending, id.clone());

        tracing::debug!(%method, %id, "sending request");
        self.send(&Message::request(id.clone(), method, params))
            .await?;

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(CallError::ConnectionClosed),
            Err(_) => {
                tracing::warn!(%method, %id, ?timeout, "request timed out");
                return Err(CallError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        outcome.map_err(|err| {
            tracing::debug!(%method, %id, code = err.code, message = %err.message, "request failed");
            CallError::from(err)
        })
    }

    /// Typed wrapper over [`Connection::call`].
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<R, CallError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(CallError::Serialize)?;
        let result = self.call(method, Some(params), timeout).await?;
        serde_json::from_value(result).map_err(CallError::InvalidResult)
    }

    /// Send a notification. Only write failures are reported.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), CodecError> {
        tracing::debug!(%method, "sending notification");
        self.send(&Message::notification(method, params)).await
    }

    /// Fail every in-flight call with [`CallError::ConnectionClosed`] and
    /// refuse new ones. Queued notifications still drain.
    pub fn terminate(&self) {
        self.shared.close();
    }

    /// Close the outbound stream. Further writes fail.
    pub async fn close(&self) -> Result<(), CodecError> {
        self.shared.writer.lock().await.close().await
    }

    async fn send(&self, msg: &Message) -> Result<(), CodecError> {
        self.shared.write(msg).await
    }
}

impl Shared {
    fn close(&self) {
        self.pending.close();
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Hand a notification to its method's queue, starting the queue on first use.
    fn enqueue(&self, method: &str, handler: NotificationHandler, params: Option<Value>) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = queues
            .entry(method.to_string())
            .or_insert_with(|| spawn_queue(method));
        if let Err(mpsc::error::SendError((handler, params))) = tx.send((handler, params)) {
            // The queue's task is gone; start a fresh one.
            let fresh = spawn_queue(method);
            let _ = fresh.send((handler, params));
            *tx = fresh;
        }
    }

    async fn write(&self, msg: &Message) -> Result<(), CodecError> {
        self.writer.lock().await.write_message(msg).await
    }

    async fn run<R: AsyncRead + Unpin>(&self, mut reader: FrameReader<R>) -> StopReason {
        loop {
            match reader.read_message().await {
                Ok(msg) => self.dispatch(msg).await,
                Err(CodecError::ConnectionClosed) => {
                    tracing::info!("LSP connection closed");
                    return StopReason::Exited;
                }
                Err(e) => {
                    tracing::error!("LSP stream failed, stopping dispatch: {e}");
                    return StopReason::Failed(e.to_string());
                }
            }
        }
    }

    async fn dispatch(&self, msg: Message) {
        let incoming = match msg.classify() {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!("dropping malformed message: {e}");
                return;
            }
        };

        match incoming {
            Incoming::Response { id, outcome } => {
                self.pending.deliver(&id, outcome);
            }
            Incoming::Request { id, method, params } => {
                let outcome = self.answer(&method, params).await;
                if let Err(e) = self.write(&Message::response(id, outcome)).await {
                    tracing::error!(%method, "failed to send response to server: {e}");
                }
            }
            Incoming::Notification { method, params } => {
                match self.handlers.notification_handler(&method) {
                    Some(handler) => {
                        tracing::debug!(%method, "handling notification");
                        self.enqueue(&method, handler, params);
                    }
                    None => tracing::debug!(%method, "no handler for notification"),
                }
            }
        }
    }

    async fn answer(&self, method: &str, params: Option<Value>) -> Result<Value, ResponseError> {
        let Some(handler) = self.handlers.request_handler(method) else {
            tracing::warn!(%method, "method not found");
            return Err(ResponseError::method_not_found(method));
        };

        tracing::debug!(%method, "processing server request");
        match AssertUnwindSafe(handler(params)).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(%method, "error handling server request: {e:#}");
                Err(ResponseError::internal(format!("{e:#}")))
            }
            Err(_) => {
                tracing::error!(%method, "server request handler panicked");
                Err(ResponseError::internal(format!(
                    "handler for {method} panicked"
                )))
            }
        }
    }
}

/// Run one method's notifications in order until every sender is gone.
fn spawn_queue(method: &str) -> mpsc::UnboundedSender<Delivery> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    let method = method.to_string();
    tokio::spawn(async move {
        while let Some((handler, params)) = rx.recv().await {
            if AssertUnwindSafe(handler(params)).catch_unwind().await.is_err() {
                tracing::error!(%method, "notification handler panicked");
            }
        }
    });
    tx
}
