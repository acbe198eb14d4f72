//! shapeload loader
//!
//! Route-scoped data loading over a locally synced database. A
//! [`RouteLoader`] waits for the connection gate, makes sure the shapes a
//! route depends on are synced (or already ready), runs the route's queries
//! concurrently and caches the results by key. Reads serve the cached
//! snapshot until every live query for the key has delivered, then switch
//! to live values.

pub mod cache;
pub mod executor;
pub mod gate;
pub mod live;
pub mod loader;
pub mod query;
pub mod reconnect;
pub mod session;
pub mod shape;
pub mod telemetry;

pub use cache::{CacheStats, CachedDefinitions, CachedSnapshot, InMemoryResultStore, ResultStore};
pub use executor::execute_queries;
pub use gate::{ConnectionGate, GateStatus};
pub use live::{
    ChangeFeedLiveQueries, ChangeNotice, LiveQueries, LiveReader, LiveValue, ReadState,
    ReconciledRead,
};
pub use loader::{LoadOutcome, LoadReport, RouteLoader};
pub use query::{QueryDef, QueryFn, QueryFuture, QuerySet, QuerySource};
pub use reconnect::{
    spawn_reconnect_supervisor, ReconnectSnapshot, ReconnectStats, ReconnectSupervisor,
};
pub use session::{
    tab_scoped_db_name, Connectivity, DatabaseDriver, DisconnectReason, InitParams, ReconnectHook,
    SyncClient, SyncEngine, TabIdentity, TokenProvider, Visibility,
};
pub use shape::{join_background, Shape, ShapeHandle, ShapeTracker, SyncOutcome, SyncPath};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

pub use shapeload_core::{
    CacheError, ConfigError, Deadline, DeadlineError, GateError, Generation, LoaderConfig,
    LoaderError, LoaderKey, LoaderResult, QueryError, ResultSet, SessionError, ShapeError, Stage,
};
