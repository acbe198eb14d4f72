//! Connection gate: a deferred "database connection is ready" value.
//!
//! The gate settles at most once. It either resolves with the connection or
//! is rejected with [`GateError::LoggedOut`]; whichever happens first wins and
//! every later signal is a no-op. A rejected gate never resolves again.

use std::fmt;
use std::sync::Arc;

use shapeload_core::GateError;
use tokio::sync::watch;

enum GateState<T> {
    Pending,
    Ready(Arc<T>),
    LoggedOut,
}

impl<T> GateState<T> {
    fn settled(&self) -> Option<Result<Arc<T>, GateError>> {
        match self {
            GateState::Pending => None,
            GateState::Ready(conn) => Some(Ok(Arc::clone(conn))),
            GateState::LoggedOut => Some(Err(GateError::LoggedOut)),
        }
    }
}

/// Observable gate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStatus {
    Pending,
    Ready,
    LoggedOut,
}

/// Single-settlement gate shared by every loader call.
pub struct ConnectionGate<T> {
    state: watch::Sender<GateState<T>>,
}

impl<T> ConnectionGate<T> {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Pending);
        Self { state }
    }

    /// Resolve the gate with a live connection.
    ///
    /// Returns `false` when the gate had already settled.
    pub fn signal_ready(&self, conn: Arc<T>) -> bool {
        self.settle(GateState::Ready(conn))
    }

    /// Reject the gate permanently.
    ///
    /// Returns `false` when the gate had already settled.
    pub fn signal_logged_out(&self) -> bool {
        self.settle(GateState::LoggedOut)
    }

    fn settle(&self, next: GateState<T>) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, GateState::Pending) {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    pub fn status(&self) -> GateStatus {
        match &*self.state.borrow() {
            GateState::Pending => GateStatus::Pending,
            GateState::Ready(_) => GateStatus::Ready,
            GateState::LoggedOut => GateStatus::LoggedOut,
        }
    }

    /// Current settlement without waiting.
    pub fn try_get(&self) -> Option<Result<Arc<T>, GateError>> {
        self.state.borrow().settled()
    }

    /// Wait until the gate settles.
    pub async fn wait(&self) -> Result<Arc<T>, GateError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, GateState::Pending))
            .await
            .map_err(|_| GateError::Closed)?;
        let settled = state.settled();
        settled.unwrap_or(Err(GateError::Closed))
    }
}

impl<T> Default for ConnectionGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ConnectionGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGate")
            .field("status", &self.status())
            .finish()
    }
}
