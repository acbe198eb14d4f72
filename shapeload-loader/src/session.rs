//! Session collaborators: tab identity, database driver, sync engine and the
//! active sync client.
//!
//! These traits are the seams to the external sync stack. The loader owns
//! none of their behavior; it only sequences them during initialization.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shapeload_core::LoaderResult;
use tokio::sync::watch;

/// Stable identifier of the current browser tab or client instance.
pub trait TabIdentity: Send + Sync {
    fn tab_id(&self) -> String;
}

/// Opens the local database file.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    type Connection: Send + 'static;

    async fn open(&self, name: &str, driver_path: &str) -> LoaderResult<Self::Connection>;
}

/// Turns a raw connection into an active, syncing client.
#[async_trait]
pub trait SyncEngine<Conn: Send + 'static>: Send + Sync {
    type Client: SyncClient;
    type Schema: Send + Sync;
    type Config: Send + Sync;

    async fn activate(
        &self,
        conn: Conn,
        schema: &Self::Schema,
        config: &Self::Config,
    ) -> LoaderResult<Self::Client>;
}

/// Active database handle produced by the sync engine.
#[async_trait]
pub trait SyncClient: Send + Sync + 'static {
    /// Query-building accessor handed to shape and query selectors.
    type Db: Send + Sync + 'static;

    fn db(&self) -> &Self::Db;

    /// (Re)connect to the sync service with an auth token.
    async fn connect(&self, token: &str) -> LoaderResult<()>;

    fn is_connected(&self) -> bool;

    /// Connectivity state changes.
    fn connectivity(&self) -> watch::Receiver<Connectivity>;
}

/// Supplies fresh auth tokens for reconnecting.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> LoaderResult<String>;
}

/// Why the client disconnected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The auth token expired; a fresh token can reconnect.
    AuthExpired,
    Network,
    Other(String),
}

/// Connectivity as reported by the sync client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    Connected,
    Disconnected { reason: DisconnectReason },
}

impl Connectivity {
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Connectivity::Disconnected {
                reason: DisconnectReason::AuthExpired
            }
        )
    }
}

/// Page or app visibility, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Token refresh wiring for [`InitParams`].
#[derive(Clone)]
pub struct ReconnectHook {
    pub tokens: Arc<dyn TokenProvider>,
    /// When present, becoming visible while disconnected also reconnects.
    pub visibility: Option<watch::Receiver<Visibility>>,
}

impl fmt::Debug for ReconnectHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectHook")
            .field("visibility", &self.visibility.as_ref().map(|v| *v.borrow()))
            .finish_non_exhaustive()
    }
}

/// Inputs for one-shot session initialization.
pub struct InitParams<Schema, Config> {
    pub app_name: String,
    /// Location of the database driver (e.g. a wasm build).
    pub driver_path: String,
    pub schema: Schema,
    pub config: Config,
    pub reconnect: Option<ReconnectHook>,
}

impl<Schema, Config> InitParams<Schema, Config> {
    pub fn new(
        app_name: impl Into<String>,
        driver_path: impl Into<String>,
        schema: Schema,
        config: Config,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            driver_path: driver_path.into(),
            schema,
            config,
            reconnect: None,
        }
    }

    pub fn with_reconnect(mut self, hook: ReconnectHook) -> Self {
        self.reconnect = Some(hook);
        self
    }
}

/// Per-tab database file name, so tabs never share a database file.
pub fn tab_scoped_db_name(app_name: &str, tab_id: &str, extension: &str) -> String {
    format!("{app_name}-{tab_id}.{extension}")
}
