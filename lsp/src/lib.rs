//! LSP transport and session engine.
//!
//! Layers, bottom up: [`codec`] frames JSON-RPC messages, [`Connection`]
//! correlates calls and dispatches peer traffic to [`Handlers`], and
//! [`Session`] owns the server process and its lifecycle.
//!
//! Peer requests are answered inline by the dispatch loop, so a request
//! handler that blocks also holds back every response queued behind it.
//! Keep request handlers short; spawn long work and answer from state.

pub mod codec;
pub mod message;
pub mod triggers;
pub mod types;

mod builtin;
mod connection;
mod diagnostics;
mod documents;
mod handlers;
mod pending;
mod process;
mod protocol;
mod session;

pub use codec::{CodecError, FrameReader, FrameWriter, MAX_FRAME_BYTES, MAX_HEADER_LINE_BYTES};
pub use connection::{CallError, Connection};
pub use handlers::{Handlers, NotificationHandler, RequestHandler};
pub use message::{Incoming, Message, Outcome, ProtocolError, RequestId, ResponseError};
pub use pending::{PendingCalls, RegisterError};
pub use process::SpawnError;
pub use protocol::PathToUriError;
pub use session::{Session, SessionError};
pub use types::{
    Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot, ParseProbeError, ReadinessProbe,
    ServerConfig, SessionState, ShutdownReason, ShutdownTimeouts, StopReason,
};
