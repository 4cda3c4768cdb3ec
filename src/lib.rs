//! # Query Sandbox
//!
//! Disposable databases for interactive query exercises. An exercise names a
//! target engine and a dataset (schema and seed scripts); learners type queries
//! and get back a normalized table.
//!
//! ## Architecture
//!
//! ```text
//! Sandbox (target routing, remote sessions)
//!     ├── Sqlite ──► DatabaseManager (lifecycle state machine)
//!     │                  └── EngineLoader ──► EngineModule ──► DatabaseInstance
//!     │                                                            └── executor
//!     └── remote ──► RemoteExecutor (HTTP) ──► sandbox server
//! ```
//!
//! Results from either path are [`ExecutionResult`] values holding
//! [`SqlValue`] cells. Query errors are data, never `Err`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use query_sandbox::{Config, Dataset, Sandbox, SandboxTarget};
//!
//! let config = Config::load()?;
//! let sandbox = Sandbox::from_config("exercise-1", &config)?;
//! sandbox
//!     .configure(
//!         SandboxTarget::Sqlite,
//!         Dataset::new("CREATE TABLE t(x);", "INSERT INTO t VALUES (1);"),
//!     )
//!     .await;
//!
//! let result = sandbox.execute("SELECT x FROM t").await;
//! assert_eq!(result.row_count, 1);
//! ```

pub mod config; // Layered configuration
pub mod engine; // Embedded engine: loader, module, instances
pub mod execution; // Query executor, results, timeouts
pub mod lifecycle; // Per-slot database lifecycle
pub mod protocol; // Remote sandbox wire types and client
pub mod sandbox; // Target routing and orchestration
pub mod session; // Remote session ids and expiry
pub mod target; // Sandbox targets and dialects
pub mod value; // Normalized scalar values

pub use config::Config;
pub use engine::{
    BundledSqlite, DatabaseInstance, Dataset, EngineError, EngineLoader, EngineModule,
    EngineSource, LoadError,
};
pub use execution::{ExecutionResult, TimeoutError};
pub use lifecycle::{DatabaseManager, InitError, InitOutcome, LifecycleState};
pub use protocol::{HttpRemoteExecutor, RemoteError, RemoteExecutor, RemoteRequest, RemoteResponse};
pub use sandbox::Sandbox;
pub use session::{ExpirySentinel, RemoteSession};
pub use target::{Dialect, ExecutionPath, SandboxTarget};
pub use value::SqlValue;
