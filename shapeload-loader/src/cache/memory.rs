//! In-memory result store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use shapeload_core::{CacheError, Generation, LoaderKey, LoaderResult, ResultSet};

use super::traits::{check_parity, CacheStats, CachedDefinitions, CachedSnapshot, ResultStore};
use crate::query::QuerySet;

#[derive(Default)]
struct Entries {
    snapshots: HashMap<LoaderKey, CachedSnapshot>,
    definitions: HashMap<LoaderKey, CachedDefinitions>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    overwrites: AtomicU64,
}

/// Two parallel maps behind one lock: snapshots and the definitions that
/// produced them. Unbounded, no expiry.
#[derive(Default)]
pub struct InMemoryResultStore {
    entries: RwLock<Entries>,
    next_generation: AtomicU64,
    counters: Counters,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a snapshot.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.snapshots.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for InMemoryResultStore {
    fn put(
        &self,
        key: &LoaderKey,
        results: ResultSet,
        definitions: QuerySet,
    ) -> LoaderResult<Generation> {
        check_parity(key, &results, &definitions)?;

        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        // Allocated under the write lock so stored generations never go backwards.
        let generation = Generation::new(self.next_generation.fetch_add(1, Ordering::Relaxed) + 1);
        let snapshot = CachedSnapshot {
            results: Arc::new(results),
            generation,
            cached_at: Utc::now(),
        };
        let definitions = CachedDefinitions {
            queries: Arc::new(definitions),
            generation,
        };
        let replaced = entries.snapshots.insert(key.clone(), snapshot).is_some();
        entries.definitions.insert(key.clone(), definitions);
        drop(entries);

        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.counters.overwrites.fetch_add(1, Ordering::Relaxed);
        }
        Ok(generation)
    }

    fn get_result(&self, key: &LoaderKey) -> LoaderResult<CachedSnapshot> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        match entries.snapshots.get(key) {
            Some(snapshot) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(snapshot.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::SnapshotNotFound { key: key.clone() }.into())
            }
        }
    }

    fn get_definitions(&self, key: &LoaderKey) -> LoaderResult<CachedDefinitions> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        entries
            .definitions
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::DefinitionsNotFound { key: key.clone() }.into())
    }

    fn remove(&self, key: &LoaderKey) -> LoaderResult<bool> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let had_snapshot = entries.snapshots.remove(key).is_some();
        let had_definitions = entries.definitions.remove(key).is_some();
        Ok(had_snapshot || had_definitions)
    }

    fn keys(&self) -> LoaderResult<Vec<LoaderKey>> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let mut keys: Vec<LoaderKey> = entries.snapshots.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            overwrites: self.counters.overwrites.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
        }
    }
}
