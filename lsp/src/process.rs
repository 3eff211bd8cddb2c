//! Spawning the language server subprocess.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::types::ServerConfig;

/// Environment variable patterns never passed to the language server.
const ENV_SECRET_DENYLIST: &[&str] = &[
    "*_API_KEY",
    "*_APIKEY",
    "*_TOKEN",
    "*_SECRET",
    "*_SECRET_KEY",
    "*_PASSWORD",
    "*_CREDENTIAL*",
    "AWS_*",
    "GITHUB_TOKEN",
    "ANTHROPIC_*",
    "OPENAI_*",
];

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("{command} not found in PATH")]
    NotFound {
        command: String,
        #[source]
        source: which::Error,
    },
    #[error("spawning {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no {0} from child")]
    MissingPipe(&'static str),
}

pub(crate) struct SpawnedServer {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Minimal glob matcher for env var denylist patterns.
/// Handles `*_SUFFIX`, `PREFIX_*`, `*_INFIX*`, and exact match.
/// Both pattern and key are compared in uppercase.
fn env_glob_matches(pattern: &str, key_upper: &str) -> bool {
    let pat = pattern.to_uppercase();
    match (pat.starts_with('*'), pat.ends_with('*')) {
        (true, true) => {
            let inner = &pat[1..pat.len() - 1];
            key_upper.contains(inner)
        }
        (true, false) => {
            let suffix = &pat[1..];
            key_upper.ends_with(suffix)
        }
        (false, true) => {
            let prefix = &pat[..pat.len() - 1];
            key_upper.starts_with(prefix)
        }
        (false, false) => key_upper == pat,
    }
}

fn is_secret(key: &str) -> bool {
    let upper = key.to_uppercase();
    ENV_SECRET_DENYLIST
        .iter()
        .any(|pat| env_glob_matches(pat, &upper))
}

/// Resolve the command on PATH.
pub(crate) fn resolve_command(command: &str) -> Result<PathBuf, SpawnError> {
    which::which(command).map_err(|source| SpawnError::NotFound {
        command: command.to_string(),
        source,
    })
}

/// Spawn the server with piped stdio, discarded stderr, and a scrubbed environment.
pub(crate) fn spawn(config: &ServerConfig) -> Result<SpawnedServer, SpawnError> {
    let resolved_cmd = resolve_command(config.command())?;
    let mut cmd = Command::new(&resolved_cmd);
    cmd.args(config.args())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if config.workspace_root.is_dir() {
        cmd.current_dir(&config.workspace_root);
    }

    for (key, _) in std::env::vars_os() {
        if let Some(key) = key.to_str()
            && is_secret(key)
        {
            cmd.env_remove(key);
        }
    }

    let mut child = cmd.spawn().map_err(|source| SpawnError::Spawn {
        command: config.command().to_string(),
        source,
    })?;

    let stdout = child.stdout.take().ok_or(SpawnError::MissingPipe("stdout"))?;
    let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;

    tracing::info!(
        command = %resolved_cmd.display(),
        pid = child.id(),
        "spawned language server"
    );

    Ok(SpawnedServer {
        child,
        stdin,
        stdout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_glob_suffix_matches() {
        assert!(env_glob_matches("*_KEY", "API_KEY"));
        assert!(env_glob_matches("*_KEY", "MY_SECRET_KEY"));
        assert!(!env_glob_matches("*_KEY", "KEYRING"));
    }

    #[test]
    fn env_glob_prefix_matches() {
        assert!(env_glob_matches("AWS_*", "AWS_ACCESS_KEY_ID"));
        assert!(!env_glob_matches("AWS_*", "MY_AWS"));
    }

    #[test]
    fn env_glob_infix_matches() {
        assert!(env_glob_matches("*_CREDENTIAL*", "DB_CREDENTIAL_FILE"));
        assert!(env_glob_matches("*_CREDENTIAL*", "MY_CREDENTIALS"));
        assert!(!env_glob_matches("*_CREDENTIAL*", "CREDENTIAL"));
    }

    #[test]
    fn secrets_are_detected_case_insensitively() {
        assert!(is_secret("openai_api_key"));
        assert!(is_secret("GITHUB_TOKEN"));
        assert!(!is_secret("PATH"));
        assert!(!is_secret("HOME"));
        assert!(!is_secret("GOPATH"));
    }

    #[test]
    fn missing_command_is_not_found() {
        let err = resolve_command("definitely-not-a-real-language-server-binary").unwrap_err();
        assert!(matches!(err, SpawnError::NotFound { .. }));
        assert!(err.to_string().contains("not found in PATH"));
    }
}
