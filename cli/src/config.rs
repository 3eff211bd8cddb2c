//! Command-line configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use lspbridge_lsp::{ReadinessProbe, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "lspbridge", version)]
#[command(about = "Run a language server over stdio and keep it alive until told to stop")]
pub struct Args {
    /// Workspace root sent to the language server.
    #[arg(long, value_name = "DIR")]
    pub workspace: PathBuf,

    /// Language server command, resolved on PATH.
    #[arg(long, value_name = "COMMAND")]
    pub lsp: String,

    /// Seconds to wait for the server to become ready.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub ready_timeout: u64,

    /// When the server counts as ready: handshake, settle:<ms>, or notification:<method>.
    #[arg(long, value_name = "PROBE", default_value = "handshake")]
    pub ready_probe: ReadinessProbe,

    /// Files to open on the server once it is ready.
    #[arg(long = "open", value_name = "FILE")]
    pub open: Vec<PathBuf>,

    /// Write logs here instead of the default data directory.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Arguments passed through to the language server.
    #[arg(last = true, value_name = "ARGS")]
    pub lsp_args: Vec<String>,
}

/// Validated settings the binary runs with.
#[derive(Debug)]
pub struct Settings {
    pub server: ServerConfig,
    pub ready_timeout: Duration,
    pub open: Vec<PathBuf>,
}

impl Args {
    pub fn into_settings(self) -> Result<Settings> {
        if !self.workspace.is_dir() {
            bail!("workspace {} is not a directory", self.workspace.display());
        }
        let workspace = self.workspace.canonicalize().with_context(|| {
            format!("failed to resolve workspace {}", self.workspace.display())
        })?;
        let command = which::which(&self.lsp)
            .with_context(|| format!("language server {:?} not found in PATH", self.lsp))?;

        let open = self
            .open
            .into_iter()
            .map(|path| {
                if path.is_absolute() {
                    path
                } else {
                    workspace.join(path)
                }
            })
            .collect();

        let mut server = ServerConfig::new(
            command.to_string_lossy().into_owned(),
            self.lsp_args,
            workspace,
        );
        server.readiness = self.ready_probe;

        Ok(Settings {
            server,
            ready_timeout: Duration::from_secs(self.ready_timeout),
            open,
        })
    }
}
