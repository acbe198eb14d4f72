//! Result store trait and cache entry types.
//!
//! This module defines the trait that result store backends implement and
//! the entries they hand back.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use shapeload_core::{CacheError, Generation, LoaderKey, LoaderResult, ResultSet};

use crate::query::QuerySet;

/// Last snapshot written for a key.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub results: Arc<ResultSet>,
    pub generation: Generation,
    pub cached_at: DateTime<Utc>,
}

/// Query definitions that produced the snapshot for a key.
#[derive(Debug, Clone)]
pub struct CachedDefinitions {
    pub queries: Arc<QuerySet>,
    pub generation: Generation,
}

/// Process-lifetime store of loader snapshots and their definitions.
///
/// Entries never expire. A second `put` for the same key replaces the first
/// (last writer wins).
///
/// # Contract
///
/// - `put` rejects a result set whose query names differ from the
///   definitions' names, and writes nothing in that case
/// - snapshot and definitions written by one `put` share a generation
/// - `get_definitions` and `get_result` fail with distinct not-found errors
pub trait ResultStore: Send + Sync {
    /// Store a completed result set together with its definitions.
    fn put(
        &self,
        key: &LoaderKey,
        results: ResultSet,
        definitions: QuerySet,
    ) -> LoaderResult<Generation>;

    /// Last snapshot for `key`, or [`CacheError::SnapshotNotFound`].
    fn get_result(&self, key: &LoaderKey) -> LoaderResult<CachedSnapshot>;

    /// Last definitions for `key`, or [`CacheError::DefinitionsNotFound`].
    fn get_definitions(&self, key: &LoaderKey) -> LoaderResult<CachedDefinitions>;

    /// Drop the entry for `key`. Returns whether one existed.
    fn remove(&self, key: &LoaderKey) -> LoaderResult<bool>;

    /// Keys that currently have a snapshot.
    fn keys(&self) -> LoaderResult<Vec<LoaderKey>>;

    /// Usage counters.
    fn stats(&self) -> CacheStats;
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Successful reads of a snapshot.
    pub hits: u64,
    /// Reads of a key with no snapshot.
    pub misses: u64,
    /// Successful writes.
    pub puts: u64,
    /// Writes that replaced an existing entry.
    pub overwrites: u64,
    /// Number of keys currently stored.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Verify that `results` carries exactly the query names of `definitions`.
pub fn check_parity(
    key: &LoaderKey,
    results: &ResultSet,
    definitions: &QuerySet,
) -> Result<(), CacheError> {
    let expected = definitions.names();
    let actual: BTreeSet<&str> = results.keys().map(String::as_str).collect();
    if expected == actual {
        return Ok(());
    }

    Err(CacheError::ParityMismatch {
        key: key.clone(),
        missing: expected
            .difference(&actual)
            .map(|name| name.to_string())
            .collect(),
        unexpected: actual
            .difference(&expected)
            .map(|name| name.to_string())
            .collect(),
    })
}
