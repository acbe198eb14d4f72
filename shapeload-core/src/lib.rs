//! shapeload core types
//!
//! Shared vocabulary for the loader crates: cache keys, result sets,
//! deadlines, configuration and the error taxonomy. No loading logic lives
//! here.

pub mod config;
pub mod deadline;
pub mod error;
pub mod key;

pub use config::LoaderConfig;
pub use deadline::{Deadline, Stage};
pub use error::{
    CacheError, ConfigError, DeadlineError, GateError, LoaderError, LoaderResult, QueryError,
    SessionError, ShapeError,
};
pub use key::{Generation, LoaderKey, QueryName, ResultSet};
