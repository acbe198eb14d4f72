//! Shape readiness tracking.
//!
//! Before queries run, every shape a loader depends on is asked whether it is
//! already synced locally. If all of them say yes, the full sync is started in
//! the background and the load continues immediately. Otherwise the load
//! blocks until every shape has finished syncing. A readiness check that
//! fails counts as "not ready".

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use shapeload_core::{Deadline, LoaderError, LoaderResult, ShapeError, Stage};
use tokio::task::JoinHandle;

/// A server-synced subset of data, as exposed by the sync engine.
#[async_trait]
pub trait Shape: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Whether the shape is already synced locally.
    async fn is_ready(&self) -> LoaderResult<bool>;

    /// Completes once the shape has fully synced.
    async fn synced(&self) -> LoaderResult<()>;
}

/// Shared handle to a shape.
pub type ShapeHandle = Arc<dyn Shape>;

/// Which sync path a load took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPath {
    /// Every shape was ready; sync continues in the background.
    NonBlocking,
    /// At least one shape was not ready; the load waited for full sync.
    Blocking,
}

impl fmt::Display for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPath::NonBlocking => f.write_str("non_blocking"),
            SyncPath::Blocking => f.write_str("blocking"),
        }
    }
}

/// Outcome of [`ShapeTracker::track`].
#[derive(Debug)]
pub struct SyncOutcome {
    path: SyncPath,
    background: Option<JoinHandle<LoaderResult<()>>>,
}

impl SyncOutcome {
    pub fn path(&self) -> SyncPath {
        self.path
    }

    pub fn is_blocking(&self) -> bool {
        self.path == SyncPath::Blocking
    }

    /// Completion signal of the background sync, present on the non-blocking path.
    pub fn take_background(&mut self) -> Option<JoinHandle<LoaderResult<()>>> {
        self.background.take()
    }

    pub(crate) fn into_parts(self) -> (SyncPath, Option<JoinHandle<LoaderResult<()>>>) {
        (self.path, self.background)
    }
}

/// Chooses between the blocking and non-blocking sync paths.
#[derive(Debug, Clone, Default)]
pub struct ShapeTracker {
    background_timeout: Option<Duration>,
}

impl ShapeTracker {
    pub fn new(background_timeout: Option<Duration>) -> Self {
        Self { background_timeout }
    }

    /// Check readiness of all shapes concurrently and pick a sync path.
    ///
    /// Must be called from within a tokio runtime: the non-blocking path
    /// spawns the background sync.
    pub async fn track(
        &self,
        shapes: Vec<ShapeHandle>,
        deadline: &Deadline,
    ) -> LoaderResult<SyncOutcome> {
        if all_ready(&shapes, deadline).await? {
            let background = Deadline::from_timeout(self.background_timeout)
                .with_cancellation(deadline.cancel_token().child_token());
            let handle = tokio::spawn(async move {
                let result = background
                    .guard(Stage::BackgroundSync, sync_all(&shapes))
                    .await
                    .map_err(LoaderError::from)
                    .and_then(|synced| synced);
                match &result {
                    Ok(()) => {
                        tracing::debug!(shapes = shapes.len(), "Background shape sync complete")
                    }
                    Err(e) => tracing::warn!(error = %e, "Background shape sync failed"),
                }
                result
            });
            return Ok(SyncOutcome {
                path: SyncPath::NonBlocking,
                background: Some(handle),
            });
        }

        deadline.guard(Stage::Sync, sync_all(&shapes)).await??;
        Ok(SyncOutcome {
            path: SyncPath::Blocking,
            background: None,
        })
    }
}

/// Evaluate every readiness predicate. Failures count as "not ready".
async fn all_ready(shapes: &[ShapeHandle], deadline: &Deadline) -> LoaderResult<bool> {
    let checks = deadline
        .guard(
            Stage::Readiness,
            join_all(shapes.iter().map(|shape| shape.is_ready())),
        )
        .await?;

    let mut ready = true;
    for (shape, check) in shapes.iter().zip(checks) {
        match check {
            Ok(true) => {}
            Ok(false) => ready = false,
            Err(e) => {
                tracing::warn!(
                    shape = shape.name(),
                    error = %e,
                    "Readiness check failed; treating shape as not ready"
                );
                ready = false;
            }
        }
    }
    Ok(ready)
}

async fn sync_all(shapes: &[ShapeHandle]) -> LoaderResult<()> {
    try_join_all(shapes.iter().map(|shape| async move {
        shape.synced().await.map_err(|e| {
            LoaderError::from(ShapeError::SyncFailed {
                shape: shape.name().to_string(),
                reason: e.to_string(),
            })
        })
    }))
    .await
    .map(|_| ())
}

/// Resolve a background sync handle, folding a panicked or aborted task
/// into a [`ShapeError`].
pub async fn join_background(handle: JoinHandle<LoaderResult<()>>) -> LoaderResult<()> {
    handle.await.map_err(|e| ShapeError::BackgroundTaskFailed {
        reason: e.to_string(),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapeload_core::DeadlineError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    enum Readiness {
        Ready,
        NotReady,
        Fails,
    }

    struct TestShape {
        readiness: Readiness,
        release: Arc<Notify>,
        gated: bool,
        synced: AtomicBool,
        ready_calls: AtomicUsize,
    }

    impl TestShape {
        fn new(readiness: Readiness, gated: bool) -> Arc<Self> {
            Arc::new(Self {
                readiness,
                release: Arc::new(Notify::new()),
                gated,
                synced: AtomicBool::new(false),
                ready_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Shape for TestShape {
        fn name(&self) -> &str {
            "issues"
        }

        async fn is_ready(&self) -> LoaderResult<bool> {
            self.ready_calls.fetch_add(1, Ordering::SeqCst);
            match self.readiness {
                Readiness::Ready => Ok(true),
                Readiness::NotReady => Ok(false),
                Readiness::Fails => Err(ShapeError::ReadinessFailed {
                    shape: "issues".to_string(),
                    reason: "boom".to_string(),
                }
                .into()),
            }
        }

        async fn synced(&self) -> LoaderResult<()> {
            if self.gated {
                self.release.notified().await;
            }
            self.synced.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_ready_takes_non_blocking_path() {
        let shape = TestShape::new(Readiness::Ready, true);
        let tracker = ShapeTracker::default();

        let mut outcome = tracker
            .track(vec![shape.clone() as ShapeHandle], &Deadline::never())
            .await
            .expect("track");

        assert_eq!(outcome.path(), SyncPath::NonBlocking);
        assert!(!shape.synced.load(Ordering::SeqCst));

        shape.release.notify_one();
        let handle = outcome.take_background().expect("background handle");
        join_background(handle).await.expect("background sync");
        assert!(shape.synced.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_not_ready_blocks_until_synced() {
        let shape = TestShape::new(Readiness::NotReady, false);
        let tracker = ShapeTracker::default();

        let outcome = tracker
            .track(vec![shape.clone() as ShapeHandle], &Deadline::never())
            .await
            .expect("track");

        assert!(outcome.is_blocking());
        assert!(shape.synced.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_predicate_behaves_like_not_ready() {
        let failing = TestShape::new(Readiness::Fails, false);
        let ready = TestShape::new(Readiness::Ready, false);
        let tracker = ShapeTracker::default();

        let outcome = tracker
            .track(
                vec![failing.clone() as ShapeHandle, ready.clone() as ShapeHandle],
                &Deadline::never(),
            )
            .await
            .expect("failing predicate is not fatal");

        assert_eq!(outcome.path(), SyncPath::Blocking);
        assert!(failing.synced.load(Ordering::SeqCst));
        assert!(ready.synced.load(Ordering::SeqCst));
        assert_eq!(failing.ready_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_shapes_is_non_blocking() {
        let tracker = ShapeTracker::default();
        let mut outcome = tracker
            .track(Vec::new(), &Deadline::never())
            .await
            .expect("track");
        assert_eq!(outcome.path(), SyncPath::NonBlocking);
        let handle = outcome.take_background().expect("background handle");
        assert!(join_background(handle).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_sync_respects_deadline() {
        let shape = TestShape::new(Readiness::NotReady, true);
        let tracker = ShapeTracker::default();

        let err = tracker
            .track(
                vec![shape as ShapeHandle],
                &Deadline::after(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            LoaderError::Deadline(DeadlineError::Elapsed { stage: Stage::Sync })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sync_has_its_own_deadline() {
        let shape = TestShape::new(Readiness::Ready, true);
        let tracker = ShapeTracker::new(Some(Duration::from_millis(50)));

        let mut outcome = tracker
            .track(vec![shape as ShapeHandle], &Deadline::never())
            .await
            .expect("track");

        let handle = outcome.take_background().expect("background handle");
        let err = join_background(handle).await.unwrap_err();
        assert_eq!(
            err,
            LoaderError::Deadline(DeadlineError::Elapsed {
                stage: Stage::BackgroundSync
            })
        );
    }
}
