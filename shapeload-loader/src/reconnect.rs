//! Reconnect supervisor.
//!
//! Watches the sync client's connectivity and, optionally, the host's
//! visibility. It fetches a fresh token and reconnects when:
//!
//! - connectivity reports a disconnect because the auth token expired
//! - the app becomes visible while the client is disconnected
//!
//! A failed attempt is logged and counted. It is not retried; the next
//! connectivity or visibility event triggers a new attempt.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shapeload_core::{LoaderResult, SessionError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::{ReconnectHook, SyncClient, TokenProvider, Visibility};

/// Counters for reconnect attempts.
#[derive(Debug, Default)]
pub struct ReconnectStats {
    pub attempts: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
}

impl ReconnectStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ReconnectSnapshot {
        ReconnectSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReconnectStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    AuthExpired,
    BecameVisible,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::AuthExpired => f.write_str("auth_expired"),
            Trigger::BecameVisible => f.write_str("became_visible"),
        }
    }
}

/// Handle to a running supervisor.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    handle: JoinHandle<()>,
    stats: Arc<ReconnectStats>,
}

impl ReconnectSupervisor {
    pub fn stats(&self) -> Arc<ReconnectStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the supervisor task to exit.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Reconnect supervisor task failed");
        }
    }
}

/// Spawn the supervisor for `client`. It runs until `shutdown` is cancelled
/// or the client's connectivity channel closes.
pub fn spawn_reconnect_supervisor<C: SyncClient>(
    client: Arc<C>,
    hook: ReconnectHook,
    shutdown: CancellationToken,
) -> ReconnectSupervisor {
    let stats = Arc::new(ReconnectStats::new());
    let task_stats = Arc::clone(&stats);

    let handle = tokio::spawn(async move {
        let mut connectivity = client.connectivity();
        let mut visibility = hook.visibility.clone();
        tracing::debug!(
            watches_visibility = visibility.is_some(),
            "Reconnect supervisor started"
        );

        loop {
            let trigger = tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !connectivity.borrow_and_update().is_auth_expired() {
                        continue;
                    }
                    Trigger::AuthExpired
                }
                visible = next_visibility(&mut visibility) => match visible {
                    Some(Visibility::Visible) if !client.is_connected() => Trigger::BecameVisible,
                    Some(_) => continue,
                    None => {
                        visibility = None;
                        continue;
                    }
                },
            };

            task_stats.attempts.fetch_add(1, Ordering::Relaxed);
            let attempt = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(trigger = %trigger, "Reconnect attempt abandoned on shutdown");
                    break;
                }
                result = reconnect(client.as_ref(), hook.tokens.as_ref()) => result,
            };
            match attempt {
                Ok(()) => {
                    task_stats.successes.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(trigger = %trigger, "Reconnected to sync service");
                }
                Err(e) => {
                    task_stats.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(trigger = %trigger, error = %e, "Reconnect attempt failed");
                }
            }
        }

        let snapshot = task_stats.snapshot();
        tracing::debug!(
            attempts = snapshot.attempts,
            successes = snapshot.successes,
            failures = snapshot.failures,
            "Reconnect supervisor stopped"
        );
    });

    ReconnectSupervisor { handle, stats }
}

/// Next visibility value. Never resolves when there is no visibility source;
/// yields `None` once the source closes.
async fn next_visibility(rx: &mut Option<watch::Receiver<Visibility>>) -> Option<Visibility> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

async fn reconnect<C: SyncClient>(client: &C, tokens: &dyn TokenProvider) -> LoaderResult<()> {
    let token = tokens.token().await.map_err(|e| SessionError::TokenRefresh {
        reason: e.to_string(),
    })?;
    client.connect(&token).await.map_err(|e| SessionError::Connect {
        reason: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = ReconnectStats::new();
        stats.attempts.fetch_add(3, Ordering::Relaxed);
        stats.successes.fetch_add(2, Ordering::Relaxed);
        stats.failures.fetch_add(1, Ordering::Relaxed);
        assert_eq!(
            stats.snapshot(),
            ReconnectSnapshot {
                attempts: 3,
                successes: 2,
                failures: 1
            }
        );
    }

    #[tokio::test]
    async fn test_missing_visibility_source_never_fires() {
        let mut none = None;
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(5),
            next_visibility(&mut none),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_closed_visibility_source_yields_none() {
        let (tx, rx) = watch::channel(Visibility::Hidden);
        drop(tx);
        let mut source = Some(rx);
        assert_eq!(next_visibility(&mut source).await, None);
    }
}
