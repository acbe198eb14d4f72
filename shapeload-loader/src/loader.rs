//! Route loader: the composition root.
//!
//! One `RouteLoader` owns the connection gate, the result store and the live
//! reader for an application. A load for a key runs
//! gate → shape readiness → query execution → cache write, in that order.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use shapeload_core::{
    Deadline, GateError, Generation, LoaderConfig, LoaderError, LoaderKey, LoaderResult,
    ResultSet, SessionError, Stage,
};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::{InMemoryResultStore, ResultStore};
use crate::executor::execute_queries;
use crate::gate::{ConnectionGate, GateStatus};
use crate::live::{ChangeFeedLiveQueries, LiveQueries, LiveReader, ReconciledRead};
use crate::query::QuerySource;
use crate::reconnect::{
    spawn_reconnect_supervisor, ReconnectSnapshot, ReconnectStats, ReconnectSupervisor,
};
use crate::session::{
    tab_scoped_db_name, DatabaseDriver, InitParams, SyncClient, SyncEngine, TabIdentity,
};
use crate::shape::{ShapeHandle, ShapeTracker, SyncPath};

/// Summary of a completed load.
#[derive(Debug)]
pub struct LoadReport {
    pub key: LoaderKey,
    pub generation: Generation,
    pub sync_path: SyncPath,
    pub query_count: usize,
    pub elapsed: Duration,
    background: Option<JoinHandle<LoaderResult<()>>>,
}

impl LoadReport {
    /// Background sync started by a non-blocking load. Awaiting it is
    /// optional; see [`crate::shape::join_background`].
    pub fn take_background(&mut self) -> Option<JoinHandle<LoaderResult<()>>> {
        self.background.take()
    }
}

/// Result of [`RouteLoader::load`].
#[derive(Debug)]
pub enum LoadOutcome {
    /// Results were computed and cached.
    Loaded(LoadReport),
    /// The gate rejected (not logged in); nothing was cached.
    Skipped,
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded(_))
    }

    pub fn into_report(self) -> Option<LoadReport> {
        match self {
            LoadOutcome::Loaded(report) => Some(report),
            LoadOutcome::Skipped => None,
        }
    }
}

/// Route-scoped loader over a synced local database.
pub struct RouteLoader<C, S = InMemoryResultStore, L = ChangeFeedLiveQueries> {
    gate: ConnectionGate<C>,
    store: Arc<S>,
    reader: LiveReader<L>,
    tracker: ShapeTracker,
    config: LoaderConfig,
    session: OnceCell<Arc<C>>,
    supervisor: Mutex<Option<ReconnectSupervisor>>,
    reconnect_stats: OnceLock<Arc<ReconnectStats>>,
    shutdown: CancellationToken,
}

impl<C: SyncClient, L: LiveQueries> RouteLoader<C, InMemoryResultStore, L> {
    /// Loader with a fresh in-memory store.
    pub fn in_memory(config: LoaderConfig, live: L) -> Self {
        Self::new(config, Arc::new(InMemoryResultStore::new()), live)
    }
}

impl<C, S, L> RouteLoader<C, S, L>
where
    C: SyncClient,
    S: ResultStore,
    L: LiveQueries,
{
    pub fn new(config: LoaderConfig, store: Arc<S>, live: L) -> Self {
        let tracker = ShapeTracker::new(config.background_sync_timeout());
        Self {
            gate: ConnectionGate::new(),
            store,
            reader: LiveReader::new(live),
            tracker,
            config,
            session: OnceCell::new(),
            supervisor: Mutex::new(None),
            reconnect_stats: OnceLock::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn gate_status(&self) -> GateStatus {
        self.gate.status()
    }

    /// The client produced by [`Self::initialize`], if it has completed.
    pub fn client(&self) -> Option<Arc<C>> {
        self.session.get().cloned()
    }

    /// Resolve the gate with an externally created client.
    ///
    /// Returns `false` when the gate had already settled.
    pub fn signal_ready(&self, client: Arc<C>) -> bool {
        self.gate.signal_ready(client)
    }

    /// Reject the gate: every pending and future load is skipped.
    ///
    /// Returns `false` when the gate had already settled.
    pub fn signal_logged_out(&self) -> bool {
        let settled = self.gate.signal_logged_out();
        if settled {
            tracing::info!("Connection gate rejected: logged out");
        }
        settled
    }

    /// Open the tab-scoped database, activate sync and resolve the gate.
    ///
    /// Runs once; concurrent and later calls share the same client. A failed
    /// attempt leaves the gate pending so initialization can be retried.
    pub async fn initialize<T, D, E>(
        &self,
        params: InitParams<E::Schema, E::Config>,
        tab: &T,
        driver: &D,
        engine: &E,
    ) -> LoaderResult<Arc<C>>
    where
        T: TabIdentity + ?Sized,
        D: DatabaseDriver,
        E: SyncEngine<D::Connection, Client = C>,
    {
        let client = self
            .session
            .get_or_try_init(|| async {
                let name = tab_scoped_db_name(
                    &params.app_name,
                    &tab.tab_id(),
                    &self.config.database_extension,
                );
                tracing::info!(database = %name, "Opening tab-scoped database");

                let conn = driver
                    .open(&name, &params.driver_path)
                    .await
                    .map_err(|e| SessionError::DriverOpen {
                        name: name.clone(),
                        reason: e.to_string(),
                    })?;
                let client = engine
                    .activate(conn, &params.schema, &params.config)
                    .await
                    .map_err(|e| SessionError::Activation {
                        reason: e.to_string(),
                    })?;
                let client = Arc::new(client);

                if !self.gate.signal_ready(Arc::clone(&client)) {
                    tracing::debug!(
                        status = ?self.gate.status(),
                        "Gate already settled; client not published"
                    );
                }

                if let Some(hook) = params.reconnect.clone() {
                    let supervisor = spawn_reconnect_supervisor(
                        Arc::clone(&client),
                        hook,
                        self.shutdown.child_token(),
                    );
                    let _ = self.reconnect_stats.set(supervisor.stats());
                    *self.supervisor.lock().await = Some(supervisor);
                }

                Ok::<_, LoaderError>(client)
            })
            .await?;

        Ok(Arc::clone(client))
    }

    /// Load `key` with the configured load deadline.
    pub async fn load<F>(
        &self,
        key: impl Into<LoaderKey>,
        shapes: F,
        queries: impl Into<QuerySource<C::Db>>,
    ) -> LoaderResult<LoadOutcome>
    where
        F: FnOnce(&C::Db) -> Vec<ShapeHandle>,
    {
        let deadline = self
            .config
            .load_deadline()
            .with_cancellation(self.shutdown.child_token());
        self.load_with_deadline(key, shapes, queries, &deadline).await
    }

    /// Load `key`, bounding every wait by `deadline`.
    ///
    /// On success the results and their definitions are cached under `key`,
    /// replacing any earlier entry. Any failure leaves the cache untouched.
    pub async fn load_with_deadline<F>(
        &self,
        key: impl Into<LoaderKey>,
        shapes: F,
        queries: impl Into<QuerySource<C::Db>>,
        deadline: &Deadline,
    ) -> LoaderResult<LoadOutcome>
    where
        F: FnOnce(&C::Db) -> Vec<ShapeHandle>,
    {
        let key = key.into();
        let queries = queries.into();
        let started = Instant::now();
        tracing::debug!(key = %key, "Load started");

        let client = match deadline.guard(Stage::Gate, self.gate.wait()).await? {
            Ok(client) => client,
            Err(GateError::LoggedOut) => {
                tracing::debug!(key = %key, "Not logged in; load skipped");
                return Ok(LoadOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        let db = client.db();

        let sync = self.tracker.track(shapes(db), deadline).await?;
        let definitions = queries.resolve(db);
        let query_count = definitions.len();
        let results = execute_queries(&definitions, deadline).await?;
        let generation = self.store.put(&key, results, definitions)?;

        let (sync_path, background) = sync.into_parts();
        let elapsed = started.elapsed();
        tracing::info!(
            key = %key,
            generation = %generation,
            sync_path = %sync_path,
            queries = query_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "Load complete"
        );

        Ok(LoadOutcome::Loaded(LoadReport {
            key,
            generation,
            sync_path,
            query_count,
            elapsed,
            background,
        }))
    }

    /// Current values for `key`: live when every live query has delivered,
    /// otherwise the cached snapshot.
    pub fn read(&self, key: impl Into<LoaderKey>) -> LoaderResult<ResultSet> {
        self.read_reconciled(key).map(|read| read.values)
    }

    /// Like [`Self::read`], also reporting which source served the values.
    pub fn read_reconciled(&self, key: impl Into<LoaderKey>) -> LoaderResult<ReconciledRead> {
        self.reader.read(self.store.as_ref(), &key.into())
    }

    /// Drop the live subscriptions for `key`. The cached entry stays.
    pub fn release(&self, key: impl Into<LoaderKey>) -> LoaderResult<bool> {
        self.reader.release(&key.into())
    }

    /// Drop both the live subscriptions and the cached entry for `key`.
    pub fn invalidate(&self, key: impl Into<LoaderKey>) -> LoaderResult<bool> {
        let key = key.into();
        self.reader.release(&key)?;
        self.store.remove(&key)
    }

    pub fn reconnect_stats(&self) -> Option<ReconnectSnapshot> {
        self.reconnect_stats.get().map(|stats| stats.snapshot())
    }

    /// Cancel in-flight loads and background syncs, and stop the reconnect
    /// supervisor.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let supervisor = self.supervisor.lock().await.take();
        if let Some(supervisor) = supervisor {
            supervisor.join().await;
        }
        tracing::info!("Route loader shut down");
    }
}
