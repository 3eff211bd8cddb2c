//! lspbridge - runs one language server as a managed subprocess.
//!
//! ```text
//! main() -> Session::start -> wait_until_ready -> open files
//!                                   |
//!                                   v
//!          wait_for_shutdown_trigger (stop | SIGINT/SIGTERM | parent exit | server exit)
//!                                   |
//!                                   v
//!                      staged shutdown -> exit 0
//! ```

mod config;
mod logging;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lspbridge_lsp::{Session, ShutdownReason};

use crate::config::{Args, Settings};

/// Slack on top of the staged shutdown budget before we stop waiting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_tracing(args.log_file.as_deref());

    let settings = args.into_settings()?;
    run(settings).await
}

async fn run(settings: Settings) -> Result<()> {
    let budget = settings.server.shutdown.total() + SHUTDOWN_GRACE;
    let session =
        Session::start(settings.server.clone()).context("failed to start language server")?;

    let reason = tokio::select! {
        ready = session.wait_until_ready(settings.ready_timeout) => {
            if let Err(e) = ready {
                shutdown(&session, &ShutdownReason::Requested, budget).await;
                return Err(e).context("language server did not become ready");
            }
            tracing::info!(
                pid = ?session.pid(),
                root = %session.workspace_root().display(),
                "language server ready"
            );
            for path in &settings.open {
                if let Err(e) = session.open_file(path).await {
                    tracing::warn!("Failed to open {}: {e}", path.display());
                }
            }
            session.wait_for_shutdown_trigger().await
        }
        reason = session.wait_for_shutdown_trigger() => reason,
    };

    shutdown(&session, &reason, budget).await;
    Ok(())
}

/// Staged shutdown with an outer fallback timer.
async fn shutdown(session: &Session, reason: &ShutdownReason, budget: Duration) {
    if tokio::time::timeout(budget, session.shutdown(reason))
        .await
        .is_err()
    {
        tracing::warn!(?budget, "shutdown did not finish in time, exiting anyway");
    }
}
