//! External shutdown triggers: termination signals and parent death.

use std::time::Duration;

/// How often the parent process identity is checked.
pub const PARENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Current parent process id, where the platform exposes one.
#[must_use]
pub fn parent_pid() -> Option<u32> {
    #[cfg(unix)]
    {
        Some(std::os::unix::process::parent_id())
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Resolves once the parent process id differs from `original`.
///
/// An orphaned process is re-parented (to init or a subreaper), so a
/// changed id means the process that launched us is gone. Never resolves
/// when `original` is `None`.
pub async fn parent_exited(original: Option<u32>, interval: Duration) -> (u32, u32) {
    let Some(was) = original else {
        return std::future::pending().await;
    };
    tracing::debug!(parent = was, "monitoring parent process");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Some(now) = parent_pid()
            && now != was
        {
            tracing::info!(was, now, "parent process exited");
            return (was, now);
        }
    }
}

/// Resolves with the signal name on the first interrupt or terminate signal.
///
/// If the handlers cannot be installed the future never resolves.
pub async fn termination_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut interrupt, mut terminate) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(i), Ok(t)) => (i, t),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!("failed to install signal handlers: {e}");
                    return std::future::pending().await;
                }
            };
        tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        }
    }
    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "ctrl-c",
            Err(e) => {
                tracing::warn!("failed to install ctrl-c handler: {e}");
                std::future::pending().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_parent_pid_is_stable() {
        assert_eq!(parent_pid(), parent_pid());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_parent_exited_does_not_fire_while_parent_lives() {
        let fired = tokio::time::timeout(
            Duration::from_millis(350),
            parent_exited(parent_pid(), Duration::from_millis(20)),
        )
        .await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_parent_exited_fires_when_identity_changes() {
        // A recorded id that can't be our parent stands in for a re-parent.
        let bogus = parent_pid().map(|p| p.wrapping_add(1));
        if bogus.is_none() {
            return;
        }
        let (was, now) = tokio::time::timeout(
            Duration::from_secs(2),
            parent_exited(bogus, Duration::from_millis(10)),
        )
        .await
        .expect("parent change should be observed");
        assert_eq!(Some(was), bogus);
        assert_eq!(Some(now), parent_pid());
    }

    #[tokio::test]
    async fn test_parent_exited_without_pid_never_fires() {
        let fired = tokio::time::timeout(
            Duration::from_millis(50),
            parent_exited(None, Duration::from_millis(10)),
        )
        .await;
        assert!(fired.is_err());
    }
}
