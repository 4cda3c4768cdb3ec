//! Embedded Engine Boundary
//!
//! The sandbox talks to SQLite through two types:
//!
//! ```text
//! EngineLoader ──get_engine()──► Arc<EngineModule>        (shared, immutable)
//!                                     │
//!                                     └─new_database()──► DatabaseInstance (owned by one slot)
//!                                                            ├── run(sql)   setup scripts
//!                                                            ├── exec(sql)  user queries
//!                                                            └── close()    idempotent, also on Drop
//! ```
//!
//! Instances are purely in-memory and never persisted.

mod loader;

pub use loader::{BundledSqlite, EngineLoader, EngineSource, LoadError};

use crate::execution::{self, ExecutionResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Errors raised by the engine boundary itself (not by user SQL)
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The in-memory database could not be opened or configured
    #[error("failed to open sandbox database: {0}")]
    Open(#[source] rusqlite::Error),

    /// A script failed inside the engine
    #[error("{0}")]
    Sql(#[from] rusqlite::Error),

    /// The instance has already been disposed
    #[error("database instance is closed")]
    Closed,
}

/// The setup scripts a sandbox database is built from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub schema_sql: String,
    #[serde(default)]
    pub seed_sql: String,
}

impl Dataset {
    pub fn new(schema_sql: impl Into<String>, seed_sql: impl Into<String>) -> Self {
        Self {
            schema_sql: schema_sql.into(),
            seed_sql: seed_sql.into(),
        }
    }
}

/// Options applied to every connection the module opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub enforce_foreign_keys: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            enforce_foreign_keys: true,
        }
    }
}

/// Handle to the loaded engine runtime.
///
/// Shared read-only by every slot in the process. The only state it tracks is
/// bookkeeping: how many instances are currently open and the next instance id.
#[derive(Debug)]
pub struct EngineModule {
    version: String,
    options: ConnectionOptions,
    live_instances: Arc<AtomicUsize>,
    next_instance_id: AtomicU64,
}

impl EngineModule {
    pub fn new(version: impl Into<String>, options: ConnectionOptions) -> Self {
        Self {
            version: version.into(),
            options,
            live_instances: Arc::new(AtomicUsize::new(0)),
            next_instance_id: AtomicU64::new(1),
        }
    }

    /// Version string reported by the runtime
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn options(&self) -> ConnectionOptions {
        self.options
    }

    /// Number of instances opened by this module and not yet closed
    pub fn live_instances(&self) -> usize {
        self.live_instances.load(Ordering::SeqCst)
    }

    /// Open a fresh, empty in-memory database.
    ///
    /// `dataset` is only recorded on the instance; running it is the caller's
    /// job so setup failures can be classified separately.
    pub fn new_database(&self, dataset: Dataset) -> Result<DatabaseInstance, EngineError> {
        let conn = Connection::open_in_memory().map_err(EngineError::Open)?;
        conn.pragma_update(None, "foreign_keys", self.options.enforce_foreign_keys)
            .map_err(EngineError::Open)?;

        let id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
        self.live_instances.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(instance_id = id, "database_opened");

        Ok(DatabaseInstance {
            id,
            conn: Some(conn),
            dataset,
            live_instances: self.live_instances.clone(),
        })
    }
}

/// One disposable in-memory database.
pub struct DatabaseInstance {
    id: u64,
    conn: Option<Connection>,
    dataset: Dataset,
    live_instances: Arc<AtomicUsize>,
}

impl DatabaseInstance {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.conn.is_some()
    }

    /// Setup scripts this instance was created for
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Run a script without collecting results (schema/seed setup)
    pub fn run(&self, sql: &str) -> Result<(), EngineError> {
        let conn = self.conn.as_ref().ok_or(EngineError::Closed)?;
        execution::run_setup(conn, sql)?;
        Ok(())
    }

    /// Run a user query and normalize its outcome
    pub fn exec(&self, sql: &str) -> ExecutionResult {
        match &self.conn {
            Some(conn) => execution::execute(conn, sql),
            None => ExecutionResult::failure(EngineError::Closed.to_string(), 0.0),
        }
    }

    /// Release the native handle. Safe to call any number of times; close
    /// failures are logged and swallowed.
    pub fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        self.live_instances.fetch_sub(1, Ordering::SeqCst);
        if let Err((_conn, e)) = conn.close() {
            tracing::warn!(instance_id = self.id, error = %e, "database_close_failed");
        } else {
            tracing::debug!(instance_id = self.id, "database_closed");
        }
    }
}

impl Drop for DatabaseInstance {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DatabaseInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseInstance")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}
