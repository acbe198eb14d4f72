//! Live reconciliation reader.
//!
//! A read looks up a key's definitions and snapshot, opens one live
//! subscription per callable definition (once per cache generation), and
//! decides what to hand back:
//!
//! - while any live subscription has not delivered a first value, the whole
//!   cached snapshot is returned, never a mix of live and cached values;
//! - once every subscription has delivered, the session switches to the live
//!   composite and stays there for the rest of that generation. A live value
//!   that goes missing again is served from that query's last live value.
//!
//! Literal definitions are never subscribed to; their snapshot value is used.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shapeload_core::{
    CacheError, Deadline, Generation, LoaderConfig, LoaderKey, LoaderResult, QueryName, ResultSet,
    Stage,
};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};

use crate::cache::{CachedDefinitions, CachedSnapshot, ResultStore};
use crate::query::{QueryDef, QueryFn};

/// Reactive container for a live query's current value. `None` until the
/// first result arrives.
pub type LiveValue = watch::Receiver<Option<Value>>;

/// Subscription mechanism of the underlying query engine.
pub trait LiveQueries: Send + Sync {
    /// Start tracking `query`. Dropping every clone of the returned receiver
    /// ends the subscription.
    fn subscribe(&self, key: &LoaderKey, name: &str, query: &QueryFn) -> LoaderResult<LiveValue>;
}

/// Notification that local data changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeNotice {
    /// Tables touched by the change; empty when unknown.
    pub tables: Vec<String>,
}

/// [`LiveQueries`] driven by a change feed: every subscription runs its
/// query once, then again after each [`ChangeNotice`].
pub struct ChangeFeedLiveQueries {
    runtime: Handle,
    feed: broadcast::Sender<ChangeNotice>,
    run_timeout: Option<Duration>,
}

impl ChangeFeedLiveQueries {
    pub fn new(runtime: Handle, feed: broadcast::Sender<ChangeNotice>) -> Self {
        Self {
            runtime,
            feed,
            run_timeout: None,
        }
    }

    /// Use the current tokio runtime.
    pub fn current(feed: broadcast::Sender<ChangeNotice>) -> Self {
        Self::new(Handle::current(), feed)
    }

    /// Current runtime, with runs bounded by `live_query_timeout_ms`.
    pub fn for_config(config: &LoaderConfig, feed: broadcast::Sender<ChangeNotice>) -> Self {
        Self::current(feed).with_run_timeout(config.live_query_timeout())
    }

    /// Bound every query run.
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Sender side of the change feed, for the sync engine to publish into.
    pub fn feed(&self) -> broadcast::Sender<ChangeNotice> {
        self.feed.clone()
    }
}

impl LiveQueries for ChangeFeedLiveQueries {
    fn subscribe(&self, key: &LoaderKey, name: &str, query: &QueryFn) -> LoaderResult<LiveValue> {
        let (tx, rx) = watch::channel(None);
        // Subscribe before the first run so no change between run and wait is lost.
        let mut changes = self.feed.subscribe();
        let query = query.clone();
        let run_timeout = self.run_timeout;
        let key = key.clone();
        let name = name.to_string();

        self.runtime.spawn(async move {
            loop {
                let run_deadline = Deadline::from_timeout(run_timeout);
                tokio::select! {
                    _ = tx.closed() => break,
                    outcome = run_deadline.guard(Stage::LiveQuery, query.call()) => {
                        match outcome {
                            Ok(Ok(value)) => {
                                tx.send_replace(Some(value));
                            }
                            Ok(Err(e)) => {
                                tracing::warn!(
                                    key = %key,
                                    query = %name,
                                    error = %e,
                                    "Live query run failed"
                                )
                            }
                            Err(e) => {
                                tracing::warn!(
                                    key = %key,
                                    query = %name,
                                    error = %e,
                                    "Live query run timed out"
                                )
                            }
                        }
                    }
                }

                tokio::select! {
                    _ = tx.closed() => break,
                    change = changes.recv() => match change {
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(
                                key = %key,
                                query = %name,
                                skipped,
                                "Live query lagged behind change feed"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::trace!(key = %key, query = %name, "Live query subscription ended");
        });

        Ok(rx)
    }
}

/// Which source a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadState {
    /// Cached snapshot for every query.
    Snapshot,
    /// Live value for every callable query.
    Live,
}

/// Result of one reconciled read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRead {
    pub state: ReadState,
    pub generation: Generation,
    pub values: ResultSet,
}

struct LiveSession {
    generation: Generation,
    subscriptions: BTreeMap<QueryName, LiveValue>,
    last_live: BTreeMap<QueryName, Value>,
    upgraded: bool,
}

impl LiveSession {
    fn open<L: LiveQueries + ?Sized>(
        live: &L,
        key: &LoaderKey,
        definitions: &CachedDefinitions,
    ) -> LoaderResult<Self> {
        let mut subscriptions = BTreeMap::new();
        for (name, def) in definitions.queries.iter() {
            if let QueryDef::Callable(query) = def {
                subscriptions.insert(name.clone(), live.subscribe(key, name, query)?);
            }
        }
        Ok(Self {
            generation: definitions.generation,
            subscriptions,
            last_live: BTreeMap::new(),
            upgraded: false,
        })
    }

    fn reconcile(
        &mut self,
        definitions: &CachedDefinitions,
        snapshot: &CachedSnapshot,
    ) -> ReconciledRead {
        if !self.upgraded {
            let all_delivered = self
                .subscriptions
                .values()
                .all(|value| value.borrow().is_some());
            if !all_delivered {
                return ReconciledRead {
                    state: ReadState::Snapshot,
                    generation: snapshot.generation,
                    values: (*snapshot.results).clone(),
                };
            }
            self.upgraded = true;
        }

        let mut values = ResultSet::new();
        for (name, def) in definitions.queries.iter() {
            let value = match def {
                QueryDef::Literal(literal) => snapshot
                    .results
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| literal.clone()),
                QueryDef::Callable(_) => {
                    let current = self
                        .subscriptions
                        .get(name)
                        .and_then(|value| value.borrow().clone());
                    match current {
                        Some(value) => {
                            self.last_live.insert(name.clone(), value.clone());
                            value
                        }
                        None => match self
                            .last_live
                            .get(name)
                            .or_else(|| snapshot.results.get(name))
                        {
                            Some(value) => value.clone(),
                            None => continue,
                        },
                    }
                }
            };
            values.insert(name.clone(), value);
        }

        ReconciledRead {
            state: ReadState::Live,
            generation: snapshot.generation,
            values,
        }
    }
}

/// Reads cached results, upgrading to live values when available.
pub struct LiveReader<L> {
    live: L,
    sessions: Mutex<HashMap<LoaderKey, LiveSession>>,
}

impl<L: LiveQueries> LiveReader<L> {
    pub fn new(live: L) -> Self {
        Self {
            live,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn live_queries(&self) -> &L {
        &self.live
    }

    /// Reconcile the cached entry for `key` with its live subscriptions.
    ///
    /// Fails with `DefinitionsNotFound` or `SnapshotNotFound` when `key` has
    /// not been loaded.
    pub fn read<S: ResultStore + ?Sized>(
        &self,
        store: &S,
        key: &LoaderKey,
    ) -> LoaderResult<ReconciledRead> {
        let definitions = store.get_definitions(key)?;
        let snapshot = store.get_result(key)?;

        // Entries from different writes; serve the snapshot until they agree.
        if definitions.generation != snapshot.generation {
            return Ok(ReconciledRead {
                state: ReadState::Snapshot,
                generation: snapshot.generation,
                values: (*snapshot.results).clone(),
            });
        }

        let mut sessions = self.sessions.lock().map_err(|_| CacheError::LockPoisoned)?;
        let stale = sessions
            .get(key)
            .is_some_and(|session| session.generation != definitions.generation);
        if stale {
            sessions.remove(key);
            tracing::debug!(
                key = %key,
                generation = %definitions.generation,
                "Replacing live session for new generation"
            );
        }
        if !sessions.contains_key(key) {
            let session = LiveSession::open(&self.live, key, &definitions)?;
            sessions.insert(key.clone(), session);
        }

        match sessions.get_mut(key) {
            Some(session) => Ok(session.reconcile(&definitions, &snapshot)),
            None => Err(CacheError::DefinitionsNotFound { key: key.clone() }.into()),
        }
    }

    /// Drop the live subscriptions for `key`. Returns whether any existed.
    pub fn release(&self, key: &LoaderKey) -> LoaderResult<bool> {
        let mut sessions = self.sessions.lock().map_err(|_| CacheError::LockPoisoned)?;
        Ok(sessions.remove(key).is_some())
    }

    /// Keys with an open live session.
    pub fn active_keys(&self) -> LoaderResult<Vec<LoaderKey>> {
        let sessions = self.sessions.lock().map_err(|_| CacheError::LockPoisoned)?;
        let mut keys: Vec<LoaderKey> = sessions.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
