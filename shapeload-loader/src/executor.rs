//! Query execution.

use futures_util::future::try_join_all;
use serde_json::Value;
use shapeload_core::{Deadline, LoaderError, LoaderResult, QueryError, QueryName, ResultSet, Stage};

use crate::query::{QueryDef, QuerySet};

/// Run every definition in `queries` concurrently and collect the values by
/// name.
///
/// Literals resolve immediately. The first rejection fails the whole call, so
/// callers never see a partial result set.
pub async fn execute_queries(queries: &QuerySet, deadline: &Deadline) -> LoaderResult<ResultSet> {
    let runs = queries.iter().map(|(name, def)| run_one(name.clone(), def.clone()));
    let resolved = deadline.guard(Stage::Query, try_join_all(runs)).await??;
    Ok(resolved.into_iter().collect())
}

async fn run_one(name: QueryName, def: QueryDef) -> LoaderResult<(QueryName, Value)> {
    let value = match def {
        QueryDef::Literal(value) => value,
        QueryDef::Callable(query) => query.call().await.map_err(|e| {
            LoaderError::from(QueryError::Failed {
                query: name.clone(),
                reason: e.to_string(),
            })
        })?,
    };
    Ok((name, value))
}
