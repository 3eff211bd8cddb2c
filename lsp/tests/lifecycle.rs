//! Session lifecycle against real subprocesses.
#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use lspbridge_lsp::{
    ServerConfig, Session, SessionError, SessionState, ShutdownReason, ShutdownTimeouts,
    StopReason,
};

fn config(command: &str, args: &[&str], root: &Path) -> ServerConfig {
    let mut config = ServerConfig::new(
        command,
        args.iter().map(ToString::to_string).collect(),
        root.to_path_buf(),
    );
    config.initialize_timeout_ms = 300;
    config.shutdown = ShutdownTimeouts {
        close_documents_ms: 200,
        shutdown_request_ms: 150,
        shutdown_wait_ms: 300,
        exit_ms: 150,
        kill_ms: 1_000,
    };
    config
}

#[cfg(target_os = "linux")]
fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_exists(_pid: u32) -> bool {
    false
}

#[tokio::test]
async fn shutdown_of_unresponsive_server_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let config = config("sleep", &["30"], dir.path());
    let bound = config.shutdown.total();

    let session = Session::start(config).unwrap();
    let pid = session.pid().unwrap();
    assert!(process_exists(pid));

    let started = Instant::now();
    session.shutdown(&ShutdownReason::Requested).await;
    let elapsed = started.elapsed();

    assert!(elapsed <= bound, "shutdown took {elapsed:?}, bound {bound:?}");
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!process_exists(pid));
}

#[tokio::test]
async fn repeated_shutdown_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::start(config("sleep", &["30"], dir.path())).unwrap();

    tokio::join!(
        session.shutdown(&ShutdownReason::Requested),
        session.shutdown(&ShutdownReason::Signal("SIGTERM")),
    );
    assert_eq!(session.state(), SessionState::Closed);

    let started = Instant::now();
    session.shutdown(&ShutdownReason::Requested).await;
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn unresponsive_server_fails_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::start(config("sleep", &["30"], dir.path())).unwrap();

    let err = session
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Initialize(_)), "{err}");
    assert!(err.to_string().contains("timed out"));
    assert_eq!(session.state(), SessionState::Starting);

    session.shutdown(&ShutdownReason::Requested).await;
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn echoing_peer_gets_method_not_found_for_its_own_request() {
    // `cat` hands our `initialize` back as a peer request; we answer it with
    // -32601 and that answer comes back as the response to our own call.
    let dir = tempfile::tempdir().unwrap();
    let session = Session::start(config("cat", &[], dir.path())).unwrap();

    let err = session
        .wait_until_ready(Duration::from_secs(5))
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("method not found: initialize"), "{message}");
    assert!(message.contains("-32601"), "{message}");

    session.shutdown(&ShutdownReason::Requested).await;
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn server_exit_is_a_shutdown_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let session = Session::start(config("true", &[], dir.path())).unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(5), session.wait_for_shutdown_trigger())
        .await
        .unwrap();
    assert_eq!(reason, ShutdownReason::ServerStopped(StopReason::Exited));

    session.shutdown(&reason).await;
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn missing_command_fails_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let result = Session::start(config("no-such-language-server-xyz", &[], dir.path()));
    let Err(err) = result else {
        panic!("start should fail");
    };
    assert!(matches!(err, SessionError::Spawn(_)));
    assert!(err.to_string().contains("not found in PATH"));
}
