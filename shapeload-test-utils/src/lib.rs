//! shapeload test utilities
//!
//! Shared test infrastructure for the shapeload workspace:
//! - Mock collaborators (shapes, sync client, driver, engine, tokens, live queries)
//! - Proptest generators for keys, values and query sets
//! - Fixtures for a ready-to-use loader

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

pub use shapeload_core::{
    CacheError, Deadline, GateError, LoaderConfig, LoaderError, LoaderKey, LoaderResult,
    QueryError, ResultSet, SessionError, ShapeError, Stage,
};
pub use shapeload_loader::{
    Connectivity, DatabaseDriver, DisconnectReason, InMemoryResultStore, LiveQueries, LiveValue,
    QueryFn, QuerySet, RouteLoader, Shape, ShapeHandle, SyncClient, SyncEngine, TabIdentity,
    TokenProvider, Visibility,
};

// ============================================================================
// EVENT LOG
// ============================================================================

/// Ordered record of what happened, shared between mocks and test queries.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().expect("event log lock").push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("event log lock").clone()
    }

    /// Position of the first occurrence of `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == event)
    }
}

// ============================================================================
// MOCK SHAPES
// ============================================================================

/// What a mock shape's readiness predicate reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockReadiness {
    Ready,
    NotReady,
    Fails,
}

/// Manually released sync completion. Releasing before anyone waits is fine.
#[derive(Debug, Clone)]
pub struct SyncTrigger(Arc<watch::Sender<bool>>);

impl SyncTrigger {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn release(&self) {
        self.0.send_replace(true);
    }

    pub fn is_released(&self) -> bool {
        *self.0.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|released| *released).await;
    }
}

impl Default for SyncTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape with scripted readiness and optionally manual sync completion.
#[derive(Debug)]
pub struct MockShape {
    name: String,
    readiness: MockReadiness,
    trigger: Option<SyncTrigger>,
    log: Option<EventLog>,
    sync_failure: Option<String>,
    synced: AtomicBool,
    ready_calls: AtomicUsize,
}

impl MockShape {
    pub fn new(name: impl Into<String>, readiness: MockReadiness) -> Self {
        Self {
            name: name.into(),
            readiness,
            trigger: None,
            log: None,
            sync_failure: None,
            synced: AtomicBool::new(false),
            ready_calls: AtomicUsize::new(0),
        }
    }

    /// Already synced locally; full sync completes immediately.
    pub fn ready(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name, MockReadiness::Ready))
    }

    /// Sync completes only once `trigger` is released.
    pub fn with_trigger(mut self, trigger: SyncTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Record `sync:{name}` in `log` when sync completes.
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Full sync rejects with `reason` instead of completing.
    pub fn with_sync_failure(mut self, reason: impl Into<String>) -> Self {
        self.sync_failure = Some(reason.into());
        self
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    pub fn handle(self: &Arc<Self>) -> ShapeHandle {
        Arc::clone(self) as ShapeHandle
    }
}

#[async_trait]
impl Shape for MockShape {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_ready(&self) -> LoaderResult<bool> {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        match self.readiness {
            MockReadiness::Ready => Ok(true),
            MockReadiness::NotReady => Ok(false),
            MockReadiness::Fails => Err(ShapeError::ReadinessFailed {
                shape: self.name.clone(),
                reason: "predicate rejected".to_string(),
            }
            .into()),
        }
    }

    async fn synced(&self) -> LoaderResult<()> {
        if let Some(trigger) = &self.trigger {
            trigger.wait().await;
        }
        if let Some(reason) = &self.sync_failure {
            return Err(QueryError::Rejected(reason.clone()).into());
        }
        self.synced.store(true, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.push(format!("sync:{}", self.name));
        }
        Ok(())
    }
}

// ============================================================================
// MOCK SESSION COLLABORATORS
// ============================================================================

/// Query-building accessor exposed by [`MockClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDb {
    pub name: String,
}

/// Sync client with scripted connectivity.
#[derive(Debug)]
pub struct MockClient {
    db: MockDb,
    connectivity: watch::Sender<Connectivity>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    tokens: Mutex<Vec<String>>,
}

impl MockClient {
    pub fn new(name: impl Into<String>) -> Self {
        let (connectivity, _) = watch::channel(Connectivity::Connected);
        Self {
            db: MockDb { name: name.into() },
            connectivity,
            connected: AtomicBool::new(true),
            fail_connect: AtomicBool::new(false),
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Publish a connectivity change.
    pub fn set_connectivity(&self, state: Connectivity) {
        self.connected
            .store(state == Connectivity::Connected, Ordering::SeqCst);
        self.connectivity.send_replace(state);
    }

    pub fn disconnect(&self, reason: DisconnectReason) {
        self.set_connectivity(Connectivity::Disconnected { reason });
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Tokens passed to `connect`, in call order.
    pub fn connect_tokens(&self) -> Vec<String> {
        self.tokens.lock().expect("tokens lock").clone()
    }
}

#[async_trait]
impl SyncClient for MockClient {
    type Db = MockDb;

    fn db(&self) -> &MockDb {
        &self.db
    }

    async fn connect(&self, token: &str) -> LoaderResult<()> {
        self.tokens.lock().expect("tokens lock").push(token.to_string());
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SessionError::Connect {
                reason: "sync service unavailable".to_string(),
            }
            .into());
        }
        self.set_connectivity(Connectivity::Connected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.subscribe()
    }
}

/// Tab identity with a fixed id.
#[derive(Debug, Clone)]
pub struct FixedTabIdentity(pub String);

impl TabIdentity for FixedTabIdentity {
    fn tab_id(&self) -> String {
        self.0.clone()
    }
}

/// Connection handed out by [`MockDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConnection {
    pub name: String,
    pub driver_path: String,
}

/// Driver that records every open.
#[derive(Debug, Default)]
pub struct MockDriver {
    opened: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_opens(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Database names passed to `open`, in call order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("opened lock").clone()
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    type Connection = MockConnection;

    async fn open(&self, name: &str, driver_path: &str) -> LoaderResult<MockConnection> {
        self.opened.lock().expect("opened lock").push(name.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::DriverOpen {
                name: name.to_string(),
                reason: "file locked".to_string(),
            }
            .into());
        }
        Ok(MockConnection {
            name: name.to_string(),
            driver_path: driver_path.to_string(),
        })
    }
}

/// Sync engine producing [`MockClient`]s.
#[derive(Debug, Default)]
pub struct MockEngine {
    activations: AtomicUsize,
    delay: Option<Duration>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every activation for `delay`, so concurrent callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncEngine<MockConnection> for MockEngine {
    type Client = MockClient;
    type Schema = ();
    type Config = ();

    async fn activate(
        &self,
        conn: MockConnection,
        _schema: &(),
        _config: &(),
    ) -> LoaderResult<MockClient> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(MockClient::new(conn.name))
    }
}

/// Token provider handing out `token-1`, `token-2`, ...
#[derive(Debug, Default)]
pub struct MockTokenProvider {
    issued: AtomicUsize,
    fail: AtomicBool,
    stall: AtomicBool,
}

impl MockTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make `token` hang forever, as a refresh endpoint that never answers.
    pub fn stall_refresh(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn token(&self) -> LoaderResult<String> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::TokenRefresh {
                reason: "refresh endpoint returned 401".to_string(),
            }
            .into());
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{n}"))
    }
}

// ============================================================================
// MANUAL LIVE QUERIES
// ============================================================================

type LiveSenders = HashMap<(LoaderKey, String), watch::Sender<Option<Value>>>;

/// Live queries whose values are pushed by the test.
#[derive(Debug, Clone, Default)]
pub struct ManualLiveQueries {
    senders: Arc<Mutex<LiveSenders>>,
    subscriptions: Arc<AtomicUsize>,
}

impl ManualLiveQueries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a value to the live query `name` of `key`. Returns `false`
    /// when nothing is subscribed to it.
    pub fn push(&self, key: &str, name: &str, value: Value) -> bool {
        self.set(key, name, Some(value))
    }

    /// Make the live query's value undefined again.
    pub fn clear(&self, key: &str, name: &str) -> bool {
        self.set(key, name, None)
    }

    fn set(&self, key: &str, name: &str, value: Option<Value>) -> bool {
        let senders = self.senders.lock().expect("senders lock");
        match senders.get(&(LoaderKey::new(key), name.to_string())) {
            Some(sender) => {
                sender.send_replace(value);
                true
            }
            None => false,
        }
    }

    /// Total subscriptions opened so far.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

impl LiveQueries for ManualLiveQueries {
    fn subscribe(&self, key: &LoaderKey, name: &str, _query: &QueryFn) -> LoaderResult<LiveValue> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(None);
        self.senders
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?
            .insert((key.clone(), name.to_string()), tx);
        Ok(rx)
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for shapeload types.

    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Generate a route-like loader key.
    pub fn arb_loader_key() -> impl Strategy<Value = LoaderKey> {
        "[a-z][a-z0-9/_-]{0,15}".prop_map(LoaderKey::new)
    }

    /// Generate a query name.
    pub fn arb_query_name() -> impl Strategy<Value = String> {
        "[a-z][a-zA-Z0-9_]{0,11}"
    }

    /// Generate a JSON value of the kind a query returns.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,16}".prop_map(Value::from),
        ];
        leaf.prop_recursive(2, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    /// Generate query names with their values.
    pub fn arb_named_values(max: usize) -> impl Strategy<Value = BTreeMap<String, Value>> {
        prop::collection::btree_map(arb_query_name(), arb_value(), 0..=max)
    }

    /// Generate a query set of literals together with the results it
    /// produces.
    pub fn arb_literal_query_set() -> impl Strategy<Value = (QuerySet, ResultSet)> {
        arb_named_values(6).prop_map(|values| {
            let set = values
                .iter()
                .fold(QuerySet::new(), |set, (name, value)| {
                    set.with_literal(name.clone(), value.clone())
                });
            (set, values)
        })
    }

    /// Generate a query set of callables that resolve to the given values.
    pub fn arb_callable_query_set() -> impl Strategy<Value = (QuerySet, ResultSet)> {
        arb_named_values(6).prop_map(|values| {
            let set = values.iter().fold(QuerySet::new(), |set, (name, value)| {
                let value = value.clone();
                set.with_query(name.clone(), move || {
                    let value = value.clone();
                    async move { Ok(value) }
                })
            });
            (set, values)
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-wired loaders for common scenarios.

    use super::*;

    /// Loader type used across the integration tests.
    pub type TestLoader = RouteLoader<MockClient, InMemoryResultStore, ManualLiveQueries>;

    /// Loader with an in-memory store and manual live queries, gate pending.
    pub fn pending_loader() -> (TestLoader, ManualLiveQueries) {
        let live = ManualLiveQueries::new();
        let loader = RouteLoader::in_memory(LoaderConfig::default(), live.clone());
        (loader, live)
    }

    /// Loader whose gate is already resolved with a fresh [`MockClient`].
    pub fn ready_loader() -> (TestLoader, Arc<MockClient>, ManualLiveQueries) {
        let (loader, live) = pending_loader();
        let client = Arc::new(MockClient::new("app-test.db"));
        loader.signal_ready(Arc::clone(&client));
        (loader, client, live)
    }

    /// Query set returning `value` from a single callable named `name`.
    pub fn single_query(name: &str, value: Value) -> QuerySet {
        QuerySet::new().with_query(name, move || {
            let value = value.clone();
            async move { Ok(value) }
        })
    }
}
