//! Deadlines and cancellation for suspension points.
//!
//! Every await that can hang on an external collaborator (the connection
//! gate, readiness checks, shape sync, queries, live re-runs) goes through
//! [`Deadline::guard`], which races it against an optional instant and a
//! cancellation token.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DeadlineError;

/// Named suspension point, carried by deadline errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Waiting for the database connection.
    Gate,
    /// Evaluating shape readiness predicates.
    Readiness,
    /// Blocking on shape sync completion.
    Sync,
    /// Running query definitions.
    Query,
    /// Non-blocking shape sync after a load returned.
    BackgroundSync,
    /// One run of a live query.
    LiveQuery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Gate => "connection gate",
            Stage::Readiness => "shape readiness",
            Stage::Sync => "shape sync",
            Stage::Query => "query execution",
            Stage::BackgroundSync => "background shape sync",
            Stage::LiveQuery => "live query",
        };
        f.write_str(name)
    }
}

/// Optional point in time plus a cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancel: CancellationToken,
}

impl Deadline {
    /// No deadline; only cancellation can interrupt.
    pub fn never() -> Self {
        Self::default()
    }

    /// Expires `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// `None` maps to [`Deadline::never`].
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => Self::after(timeout),
            None => Self::never(),
        }
    }

    /// Replace the cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel every guard sharing this token.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left, or `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Await `fut`, failing if the deadline passes or the token fires first.
    ///
    /// A future that is already complete wins over an expired deadline.
    pub async fn guard<F>(&self, stage: Stage, fut: F) -> Result<F::Output, DeadlineError>
    where
        F: Future,
    {
        let expiry = async {
            match self.at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            output = fut => Ok(output),
            _ = self.cancel.cancelled() => Err(DeadlineError::Cancelled { stage }),
            _ = expiry => Err(DeadlineError::Elapsed { stage }),
        }
    }
}
