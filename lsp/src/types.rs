//! Public types consumed by the binary and by tool layers.
//!
//! These types define the interface between `lspbridge-lsp` and its
//! callers: the caller constructs a [`ServerConfig`], observes
//! [`SessionState`], and reads [`DiagnosticsSnapshot`]s.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Configuration for one language server session.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable command (e.g. "rust-analyzer").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Workspace root sent as `rootUri` and used to scope diagnostics.
    pub workspace_root: PathBuf,
    /// When the session counts as ready after the handshake.
    #[serde(default)]
    pub readiness: ReadinessProbe,
    /// Deadline for the `initialize` request.
    #[serde(default = "default_initialize_timeout_ms")]
    pub initialize_timeout_ms: u64,
    #[serde(default)]
    pub shutdown: ShutdownTimeouts,
}

fn default_initialize_timeout_ms() -> u64 {
    30_000
}

impl ServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>, workspace_root: PathBuf) -> Self {
        Self {
            command: command.into(),
            args,
            workspace_root,
            readiness: ReadinessProbe::default(),
            initialize_timeout_ms: default_initialize_timeout_ms(),
            shutdown: ShutdownTimeouts::default(),
        }
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }
}

/// Condition that moves a session from `Starting` to `Ready`.
///
/// Every probe first waits for the `initialize`/`initialized` handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessProbe {
    /// Ready as soon as the handshake completes.
    #[default]
    Handshake,
    /// Ready a fixed delay after the handshake, for servers that index lazily.
    Settle { ms: u64 },
    /// Ready on the first notification with this method.
    Notification { method: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid readiness probe {0:?} (expected handshake, settle:<ms>, or notification:<method>)")]
pub struct ParseProbeError(String);

impl FromStr for ReadinessProbe {
    type Err = ParseProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            None if s.eq_ignore_ascii_case("handshake") => Ok(Self::Handshake),
            Some((kind, ms)) if kind.eq_ignore_ascii_case("settle") => ms
                .trim()
                .parse()
                .map(|ms| Self::Settle { ms })
                .map_err(|_| ParseProbeError(s.to_string())),
            Some((kind, method))
                if kind.eq_ignore_ascii_case("notification") && !method.trim().is_empty() =>
            {
                Ok(Self::Notification {
                    method: method.trim().to_string(),
                })
            }
            _ => Err(ParseProbeError(s.to_string())),
        }
    }
}

/// Per-stage deadlines for the shutdown sequence.
///
/// The whole sequence finishes within [`ShutdownTimeouts::total`] no
/// matter how the peer behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShutdownTimeouts {
    /// Stage 1: `didClose` for every open document.
    pub close_documents_ms: u64,
    /// Stage 2: deadline passed to the `shutdown` request itself.
    pub shutdown_request_ms: u64,
    /// Stage 2: outer bound on waiting for the `shutdown` request.
    pub shutdown_wait_ms: u64,
    /// Stage 3: writing the `exit` notification.
    pub exit_ms: u64,
    /// Stage 4: kill and reap the process.
    pub kill_ms: u64,
}

impl Default for ShutdownTimeouts {
    fn default() -> Self {
        Self {
            close_documents_ms: 1_000,
            shutdown_request_ms: 500,
            shutdown_wait_ms: 1_000,
            exit_ms: 500,
            kill_ms: 2_000,
        }
    }
}

impl ShutdownTimeouts {
    #[must_use]
    pub fn close_documents(&self) -> Duration {
        Duration::from_millis(self.close_documents_ms)
    }

    #[must_use]
    pub fn shutdown_request(&self) -> Duration {
        Duration::from_millis(self.shutdown_request_ms)
    }

    /// Stage-2 bound, covering the write lock as well as the reply.
    #[must_use]
    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }

    #[must_use]
    pub fn exit(&self) -> Duration {
        Duration::from_millis(self.exit_ms)
    }

    #[must_use]
    pub fn kill(&self) -> Duration {
        Duration::from_millis(self.kill_ms)
    }

    /// Upper bound on the whole shutdown sequence.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.close_documents() + self.shutdown_wait() + self.exit() + self.kill()
    }
}

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Unstarted,
    Starting,
    Ready,
    ShuttingDown,
    Closed,
}

impl SessionState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Unstarted => "unstarted",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting down",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The peer closed its stdout.
    Exited,
    /// The stream was corrupt or unreadable.
    Failed(String),
}

/// What set off a shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Requested,
    Signal(&'static str),
    ParentExited { was: u32, now: u32 },
    ServerStopped(StopReason),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("stop requested"),
            Self::Signal(name) => write!(f, "received {name}"),
            Self::ParentExited { was, now } => {
                write!(f, "parent process {was} exited (now {now})")
            }
            Self::ServerStopped(StopReason::Exited) => f.write_str("language server exited"),
            Self::ServerStopped(StopReason::Failed(msg)) => {
                write!(f, "language server stream failed: {msg}")
            }
        }
    }
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

/// A single diagnostic published by the language server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    /// 0-indexed line number.
    line: u32,
    /// 0-indexed column.
    col: u32,
    /// Source of the diagnostic (e.g. "rustc", "clippy").
    source: String,
    code: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        message: String,
        line: u32,
        col: u32,
        source: String,
    ) -> Self {
        Self {
            severity,
            message,
            line,
            col,
            source,
            code: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 0-indexed line number.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// 0-indexed column.
    #[must_use]
    pub fn col(&self) -> u32 {
        self.col
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

}

/// Immutable snapshot of all diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-file diagnostics, sorted with error-containing files first.
    files: Vec<(PathBuf, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(PathBuf, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(PathBuf, Vec<Diagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn count_by_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == severity)
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Warning)
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.iter().map(|(_, items)| items.len()).sum()
    }
}
