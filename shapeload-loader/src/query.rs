//! Query definitions.
//!
//! A query set maps query names to either a literal value or a callable that
//! produces one. The variant is fixed when the definition is registered.

use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use shapeload_core::{LoaderResult, QueryName};

/// Boxed future returned by a [`QueryFn`].
pub type QueryFuture = BoxFuture<'static, LoaderResult<Value>>;

/// Shareable zero-argument query callable.
///
/// The same callable serves the initial snapshot run and every later live
/// re-run, so it must be callable more than once.
#[derive(Clone)]
pub struct QueryFn(Arc<dyn Fn() -> QueryFuture + Send + Sync>);

impl QueryFn {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LoaderResult<Value>> + Send + 'static,
    {
        Self(Arc::new(move || f().boxed()))
    }

    pub fn call(&self) -> QueryFuture {
        (self.0)()
    }

    /// Whether two handles share one callable.
    pub fn ptr_eq(&self, other: &QueryFn) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for QueryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryFn(..)")
    }
}

/// One named query.
#[derive(Debug, Clone)]
pub enum QueryDef {
    /// Precomputed value, cached as-is and never subscribed to.
    Literal(Value),
    /// Callable run on load and re-run by live subscriptions.
    Callable(QueryFn),
}

impl QueryDef {
    pub fn literal(value: impl Into<Value>) -> Self {
        QueryDef::Literal(value.into())
    }

    pub fn callable<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LoaderResult<Value>> + Send + 'static,
    {
        QueryDef::Callable(QueryFn::new(f))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, QueryDef::Callable(_))
    }
}

/// Query definitions for one loader key, keyed by query name.
#[derive(Debug, Clone, Default)]
pub struct QuerySet {
    queries: BTreeMap<QueryName, QueryDef>,
}

impl QuerySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callable query.
    pub fn with_query<F, Fut>(mut self, name: impl Into<QueryName>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LoaderResult<Value>> + Send + 'static,
    {
        self.queries.insert(name.into(), QueryDef::callable(f));
        self
    }

    /// Add a literal value.
    pub fn with_literal(mut self, name: impl Into<QueryName>, value: impl Into<Value>) -> Self {
        self.queries.insert(name.into(), QueryDef::literal(value));
        self
    }

    /// Insert a definition, returning the one it replaced.
    pub fn insert(&mut self, name: impl Into<QueryName>, def: QueryDef) -> Option<QueryDef> {
        self.queries.insert(name.into(), def)
    }

    pub fn get(&self, name: &str) -> Option<&QueryDef> {
        self.queries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.queries.keys().map(String::as_str).collect()
    }

    /// Number of callable (live-capable) definitions.
    pub fn callable_count(&self) -> usize {
        self.queries.values().filter(|def| def.is_callable()).count()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, QueryName, QueryDef> {
        self.queries.iter()
    }
}

impl FromIterator<(QueryName, QueryDef)> for QuerySet {
    fn from_iter<I: IntoIterator<Item = (QueryName, QueryDef)>>(iter: I) -> Self {
        Self {
            queries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a QuerySet {
    type Item = (&'a QueryName, &'a QueryDef);
    type IntoIter = btree_map::Iter<'a, QueryName, QueryDef>;

    fn into_iter(self) -> Self::IntoIter {
        self.queries.iter()
    }
}

type DeferredQueries<D> = Box<dyn FnOnce(&D) -> QuerySet + Send>;

/// Query definitions as handed to a loader: ready, or built from the
/// database accessor once the connection is available.
pub enum QuerySource<D> {
    Ready(QuerySet),
    Deferred(DeferredQueries<D>),
}

impl<D> QuerySource<D> {
    pub fn deferred<F>(f: F) -> Self
    where
        F: FnOnce(&D) -> QuerySet + Send + 'static,
    {
        QuerySource::Deferred(Box::new(f))
    }

    /// Produce the normalized query set. Runs a deferred builder exactly once.
    pub fn resolve(self, db: &D) -> QuerySet {
        match self {
            QuerySource::Ready(set) => set,
            QuerySource::Deferred(build) => build(db),
        }
    }
}

impl<D> From<QuerySet> for QuerySource<D> {
    fn from(set: QuerySet) -> Self {
        QuerySource::Ready(set)
    }
}

impl<D> fmt::Debug for QuerySource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuerySource::Ready(set) => f.debug_tuple("Ready").field(set).finish(),
            QuerySource::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_tags_variants() {
        let set = QuerySet::new()
            .with_query("count", || async { Ok(json!(5)) })
            .with_literal("title", "Inbox");

        assert_eq!(set.len(), 2);
        assert!(set.get("count").is_some_and(QueryDef::is_callable));
        assert!(matches!(set.get("title"), Some(QueryDef::Literal(v)) if v == &json!("Inbox")));
        assert_eq!(set.callable_count(), 1);
        assert_eq!(set.names().into_iter().collect::<Vec<_>>(), vec!["count", "title"]);
    }

    #[test]
    fn test_insert_replaces_same_name() {
        let mut set = QuerySet::new().with_literal("a", 1);
        let previous = set.insert("a", QueryDef::literal(2));
        assert!(matches!(previous, Some(QueryDef::Literal(v)) if v == json!(1)));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_query_fn_is_reusable() {
        let query = QueryFn::new(|| async { Ok(json!({"open": 3})) });
        let first = query.call().await.expect("first run");
        let second = query.call().await.expect("second run");
        assert_eq!(first, second);
        assert!(query.ptr_eq(&query.clone()));
    }

    #[test]
    fn test_deferred_source_sees_db() {
        let source: QuerySource<String> =
            QuerySource::deferred(|db: &String| QuerySet::new().with_literal("db", db.clone()));
        let set = source.resolve(&"tab-1.db".to_string());
        assert!(matches!(set.get("db"), Some(QueryDef::Literal(v)) if v == &json!("tab-1.db")));
    }

    #[test]
    fn test_ready_source_passes_through() {
        let source: QuerySource<()> = QuerySet::new().with_literal("x", true).into();
        assert_eq!(source.resolve(&()).len(), 1);
    }
}
