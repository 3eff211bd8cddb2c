//! Session lifecycle: spawn, handshake, readiness, and staged shutdown.
//!
//! A [`Session`] owns one language server process and the [`Connection`]
//! bound to its stdio. State moves `Unstarted → Starting → Ready →
//! ShuttingDown → Closed` and never back. Shutdown always reaches
//! `Closed` within [`ShutdownTimeouts::total`], however the server behaves.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::AbortHandle;

use crate::builtin::{self, normalize_path};
use crate::codec::CodecError;
use crate::connection::{CallError, Connection};
use crate::diagnostics::DiagnosticsStore;
use crate::documents::{OpenDocuments, language_id_for};
use crate::handlers::Handlers;
use crate::process::{self, SpawnError};
use crate::protocol::{self, PathToUriError};
use crate::triggers;
use crate::types::{
    Diagnostic, DiagnosticsSnapshot, ReadinessProbe, ServerConfig, SessionState, ShutdownReason,
    ShutdownTimeouts, StopReason,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start language server: {0}")]
    Spawn(#[from] SpawnError),
    #[error("initialize failed: {0}")]
    Initialize(String),
    #[error("language server not ready after {0:?}")]
    ReadyTimeout(Duration),
    #[error("session is {0}")]
    NotRunning(SessionState),
    #[error(transparent)]
    Uri(#[from] PathToUriError),
    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("failed to send notification: {0}")]
    Transport(#[from] CodecError),
}

pub struct Session {
    config: ServerConfig,
    workspace_root: PathBuf,
    connection: Connection,
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    dispatch: AbortHandle,
    stopped: watch::Receiver<Option<StopReason>>,
    state: watch::Sender<SessionState>,
    startup_error: OnceLock<String>,
    capabilities: OnceLock<Value>,
    documents: Mutex<OpenDocuments>,
    diagnostics: Arc<StdMutex<DiagnosticsStore>>,
    stop: Notify,
    parent_at_start: Option<u32>,
}

impl Session {
    /// Spawn the configured server and begin the handshake in the background.
    ///
    /// Returns once the process is running; use [`Session::wait_until_ready`]
    /// to block on the handshake and readiness probe. Must be called from
    /// within a Tokio runtime.
    pub fn start(config: ServerConfig) -> Result<Arc<Self>, SessionError> {
        let spawned = process::spawn(&config)?;
        Ok(Self::attach(
            config,
            spawned.stdout,
            spawned.stdin,
            Some(spawned.child),
        ))
    }

    /// Run a session over already-connected streams.
    pub(crate) fn attach<R, W>(
        config: ServerConfig,
        reader: R,
        writer: W,
        child: Option<Child>,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let workspace_root = resolve_root(&config.workspace_root);
        let pid = child.as_ref().and_then(Child::id);
        let (state, _) = watch::channel(SessionState::Unstarted);

        let (connection, dispatch) = Connection::start(reader, writer);
        let diagnostics = Arc::new(StdMutex::new(DiagnosticsStore::new()));
        builtin::install(
            connection.handlers(),
            Arc::clone(&diagnostics),
            &workspace_root,
        );

        let abort = dispatch.abort_handle();
        let (stopped_tx, stopped) = watch::channel(None);
        tokio::spawn(async move {
            let reason = dispatch
                .await
                .unwrap_or_else(|e| StopReason::Failed(format!("dispatch task ended: {e}")));
            stopped_tx.send_replace(Some(reason));
        });

        let session = Arc::new(Self {
            config,
            workspace_root,
            connection,
            child: Mutex::new(child),
            pid,
            dispatch: abort,
            stopped,
            state,
            startup_error: OnceLock::new(),
            capabilities: OnceLock::new(),
            documents: Mutex::new(OpenDocuments::default()),
            diagnostics,
            stop: Notify::new(),
            parent_at_start: triggers::parent_pid(),
        });

        session.advance(&[SessionState::Unstarted], SessionState::Starting);
        tracing::info!(
            command = %session.config.command(),
            pid = ?session.pid,
            root = %session.workspace_root.display(),
            "language server starting"
        );

        let handshake = Arc::clone(&session);
        tokio::spawn(async move { handshake.run_handshake().await });
        session
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// `capabilities` from the `initialize` result, once the handshake has run.
    #[must_use]
    pub fn capabilities(&self) -> Option<&Value> {
        self.capabilities.get()
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn handlers(&self) -> &Handlers {
        self.connection.handlers()
    }

    /// Block until the session is `Ready`, the handshake fails, or `deadline` passes.
    pub async fn wait_until_ready(&self, deadline: Duration) -> Result<(), SessionError> {
        let mut state = self.state.subscribe();
        let settled = tokio::time::timeout(
            deadline,
            state.wait_for(|s| *s > SessionState::Starting || self.startup_error.get().is_some()),
        )
        .await;

        match settled {
            Err(_) => Err(SessionError::ReadyTimeout(deadline)),
            Ok(Err(_)) => Err(SessionError::NotRunning(SessionState::Closed)),
            Ok(Ok(current)) => {
                let current = *current;
                if current == SessionState::Ready {
                    Ok(())
                } else if let Some(e) = self.startup_error.get() {
                    Err(SessionError::Initialize(e.clone()))
                } else {
                    Err(SessionError::NotRunning(current))
                }
            }
        }
    }

    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        self.ensure_live()?;
        Ok(self.connection.call(method, params, timeout).await?)
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        self.ensure_live()?;
        Ok(self.connection.notify(method, params).await?)
    }

    /// Send `didOpen` for `path` unless it is already open.
    pub async fn open_file(&self, path: &Path) -> Result<(), SessionError> {
        self.ensure_live()?;
        let uri = protocol::path_to_file_uri(path)?.to_string();
        let mut docs = self.documents.lock().await;
        if docs.is_open(&uri) {
            return Ok(());
        }

        let text = read_file(path).await?;
        let params = protocol::did_open_params(&uri, language_id_for(path), 1, &text);
        self.connection
            .notify("textDocument/didOpen", Some(params))
            .await?;
        docs.insert(uri);
        self.reset_diagnostics_version(path);
        tracing::debug!(path = %path.display(), "opened document");
        Ok(())
    }

    /// Send the new contents of `path` as a full-text `didChange`,
    /// opening it first if needed.
    pub async fn notify_change(&self, path: &Path) -> Result<(), SessionError> {
        self.ensure_live()?;
        let uri = protocol::path_to_file_uri(path)?.to_string();
        let mut docs = self.documents.lock().await;
        let text = read_file(path).await?;

        match docs.bump(&uri) {
            Some(version) => {
                let params = protocol::did_change_params(&uri, version, &text);
                self.connection
                    .notify("textDocument/didChange", Some(params))
                    .await?;
            }
            None => {
                let params = protocol::did_open_params(&uri, language_id_for(path), 1, &text);
                self.connection
                    .notify("textDocument/didOpen", Some(params))
                    .await?;
                docs.insert(uri);
                self.reset_diagnostics_version(path);
            }
        }
        Ok(())
    }

    /// Send `didClose` for `path` if it is open.
    pub async fn close_file(&self, path: &Path) -> Result<(), SessionError> {
        self.ensure_live()?;
        let uri = protocol::path_to_file_uri(path)?.to_string();
        if !self.documents.lock().await.remove(&uri) {
            return Ok(());
        }
        self.connection
            .notify("textDocument/didClose", Some(protocol::did_close_params(&uri)))
            .await?;
        Ok(())
    }

    /// Send `didClose` for every open document. Returns how many were sent.
    pub async fn close_all_files(&self) -> usize {
        let uris = self.documents.lock().await.drain();
        let mut closed = 0;
        for uri in uris {
            match self
                .connection
                .notify("textDocument/didClose", Some(protocol::did_close_params(&uri)))
                .await
            {
                Ok(()) => closed += 1,
                Err(e) => tracing::warn!(%uri, "failed to close document: {e}"),
            }
        }
        closed
    }

    /// Number of documents currently open on the server.
    pub async fn open_document_count(&self) -> usize {
        self.documents.lock().await.len()
    }

    #[must_use]
    pub fn diagnostics_for(&self, path: &Path) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .for_file(&normalize_path(path))
    }

    #[must_use]
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    fn reset_diagnostics_version(&self, path: &Path) {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset_version(&normalize_path(path));
    }

    /// Ask [`Session::wait_for_shutdown_trigger`] to return.
    pub fn request_stop(&self) {
        self.stop.notify_one();
    }

    /// Resolve with the first of: a stop request, SIGINT/SIGTERM, the parent
    /// process exiting, or the server closing its end of the connection.
    ///
    /// Parent death is polled every [`triggers::PARENT_POLL_INTERVAL`], so
    /// it is noticed up to one interval late.
    pub async fn wait_for_shutdown_trigger(&self) -> ShutdownReason {
        let mut stopped = self.stopped.clone();
        let server_stopped = async move {
            match stopped.wait_for(Option::is_some).await {
                Ok(reason) => (*reason).clone().unwrap_or(StopReason::Exited),
                Err(_) => StopReason::Exited,
            }
        };

        tokio::select! {
            () = self.stop.notified() => ShutdownReason::Requested,
            name = triggers::termination_signal() => ShutdownReason::Signal(name),
            (was, now) = triggers::parent_exited(self.parent_at_start, triggers::PARENT_POLL_INTERVAL) => {
                ShutdownReason::ParentExited { was, now }
            }
            reason = server_stopped => ShutdownReason::ServerStopped(reason),
        }
    }

    /// Run the staged shutdown sequence.
    ///
    /// Each stage is bounded by its [`ShutdownTimeouts`] entry; failures
    /// are logged and the next stage runs regardless. A second caller
    /// waits for the first to finish. Calling this on a closed session
    /// does nothing.
    pub async fn shutdown(&self, reason: &ShutdownReason) {
        let timeouts = self.config.shutdown;
        let began = self.advance(
            &[
                SessionState::Unstarted,
                SessionState::Starting,
                SessionState::Ready,
            ],
            SessionState::ShuttingDown,
        );
        if !began {
            let mut state = self.state.subscribe();
            let _ = tokio::time::timeout(
                timeouts.total(),
                state.wait_for(|s| *s == SessionState::Closed),
            )
            .await;
            return;
        }

        tracing::info!(%reason, "shutting down language server");
        self.close_documents_stage(&timeouts).await;
        self.shutdown_request_stage(&timeouts).await;
        self.exit_stage(&timeouts).await;
        self.terminate_stage(&timeouts).await;

        self.state.send_replace(SessionState::Closed);
        tracing::info!("language server session closed");
    }

    async fn close_documents_stage(&self, timeouts: &ShutdownTimeouts) {
        match tokio::time::timeout(timeouts.close_documents(), self.close_all_files()).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(count = n, "closed open documents"),
            Err(_) => tracing::warn!("timed out closing open documents"),
        }
    }

    async fn shutdown_request_stage(&self, timeouts: &ShutdownTimeouts) {
        let request = self
            .connection
            .call("shutdown", None, timeouts.shutdown_request());
        match tokio::time::timeout(timeouts.shutdown_wait(), request).await {
            Ok(Ok(_)) => tracing::debug!("server acknowledged shutdown"),
            Ok(Err(e)) => tracing::warn!("shutdown request failed: {e}"),
            Err(_) => tracing::warn!("shutdown request timed out"),
        }
    }

    async fn exit_stage(&self, timeouts: &ShutdownTimeouts) {
        match tokio::time::timeout(timeouts.exit(), self.connection.notify("exit", None)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("failed to send exit notification: {e}"),
            Err(_) => tracing::warn!("timed out sending exit notification"),
        }
    }

    async fn terminate_stage(&self, timeouts: &ShutdownTimeouts) {
        let terminate = async {
            if let Some(mut child) = self.child.lock().await.take() {
                reap(&mut child).await;
            }
            if let Err(e) = self.connection.close().await {
                tracing::debug!("closing server stdin: {e}");
            }
        };
        if tokio::time::timeout(timeouts.kill(), terminate).await.is_err() {
            tracing::warn!("timed out terminating language server");
        }
        self.dispatch.abort();
        self.connection.terminate();
    }

    async fn run_handshake(&self) {
        let mut state = self.state.subscribe();
        let outcome = tokio::select! {
            result = self.handshake() => result,
            _ = state.wait_for(|s| *s >= SessionState::ShuttingDown) => return,
        };

        match outcome {
            Ok(()) => {
                if self.advance(&[SessionState::Starting], SessionState::Ready) {
                    tracing::info!("language server ready");
                }
            }
            Err(e) => {
                tracing::error!("language server handshake failed: {e}");
                let _ = self.startup_error.set(e.to_string());
                self.state.send_modify(|_| {});
            }
        }
    }

    async fn handshake(&self) -> Result<(), SessionError> {
        let root_uri = protocol::path_to_file_uri(&self.workspace_root)?;
        let name = self
            .workspace_root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("workspace");

        // Installed before `initialize` so an early notification still counts.
        let ready_signal = match &self.config.readiness {
            ReadinessProbe::Notification { method } => Some(self.watch_notification(method)),
            ReadinessProbe::Handshake | ReadinessProbe::Settle { .. } => None,
        };

        let result = self
            .connection
            .call(
                "initialize",
                Some(protocol::initialize_params(root_uri.as_str(), name)),
                self.config.initialize_timeout(),
            )
            .await
            .map_err(|e| SessionError::Initialize(e.to_string()))?;
        let _ = self
            .capabilities
            .set(result.get("capabilities").cloned().unwrap_or(Value::Null));

        self.connection
            .notify("initialized", Some(json!({})))
            .await?;
        tracing::debug!("initialize handshake complete");

        if let ReadinessProbe::Settle { ms } = self.config.readiness {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(signal) = ready_signal {
            tracing::debug!("waiting for readiness notification");
            signal.notified().await;
        }
        Ok(())
    }

    /// Fire a signal on the first `method` notification, keeping any existing handler.
    fn watch_notification(&self, method: &str) -> Arc<Notify> {
        let signal = Arc::new(Notify::new());
        let previous = self.handlers().notification_handler(method);
        let fired = Arc::clone(&signal);
        self.handlers()
            .on_notification(method.to_string(), move |params| {
                fired.notify_one();
                let previous = previous.clone();
                async move {
                    if let Some(previous) = previous {
                        previous(params).await;
                    }
                }
            });
        signal
    }

    fn advance(&self, from: &[SessionState], to: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                tracing::debug!(from = %state, %to, "session state change");
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        match self.state() {
            state @ (SessionState::ShuttingDown | SessionState::Closed) => {
                Err(SessionError::NotRunning(state))
            }
            _ => Ok(()),
        }
    }
}

async fn read_file(path: &Path) -> Result<String, SessionError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SessionError::ReadFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Kill the process unless it already exited, then wait for it.
async fn reap(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!(%status, "language server already exited");
            return;
        }
        Ok(None) => {}
        Err(e) => tracing::debug!("failed to poll language server: {e}"),
    }
    if let Err(e) = child.start_kill() {
        tracing::warn!("failed to kill language server: {e}");
    }
    match child.wait().await {
        Ok(status) => tracing::debug!(%status, "language server terminated"),
        Err(e) => tracing::warn!("failed to reap language server: {e}"),
    }
}

fn resolve_root(root: &Path) -> PathBuf {
    std::fs::canonicalize(root)
        .or_else(|_| std::path::absolute(root))
        .unwrap_or_else(|_| root.to_path_buf())
}
