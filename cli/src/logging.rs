//! Tracing setup. stdout is reserved for the tool protocol, so logs go to
//! a file when one can be opened and to stderr otherwise.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn init_tracing(explicit: Option<&Path>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file(explicit);

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file(explicit: Option<&Path>) -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let candidates = log_file_candidates(explicit);
    let mut warnings = Vec::new();

    for candidate in candidates {
        if let Some(parent) = candidate.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }

    // ~/.local/share/lspbridge/logs/lspbridge.log or the platform equivalent
    dirs::data_local_dir()
        .map(|dir| dir.join("lspbridge").join("logs").join("lspbridge.log"))
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_log_file_is_the_only_candidate() {
        let path = PathBuf::from("/tmp/custom.log");
        assert_eq!(log_file_candidates(Some(&path)), vec![path]);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.log");

        let (opened, warnings) = open_log_file(Some(&path));
        assert!(warnings.is_empty());
        assert_eq!(opened.unwrap().0, path);
        assert!(path.exists());
    }

    #[test]
    fn test_unopenable_log_file_reports_warning() {
        let dir = tempfile::tempdir().unwrap();
        // A directory can't be opened for append.
        let (opened, warnings) = open_log_file(Some(dir.path()));
        assert!(opened.is_none());
        assert_eq!(warnings.len(), 1);
    }
}
