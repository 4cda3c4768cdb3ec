//! Database Lifecycle Manager
//!
//! Owns the create / execute / reset / dispose cycle of the single database
//! behind one sandbox slot (one exercise widget, one REPL).
//!
//! ## State Machine
//!
//! ```text
//!                 init_database()
//! Uninitialized ─────────────────► Initializing ──ok──► Ready ─┐
//!                                        │                     │ init_database() / reset()
//!                                        └──err──► Failed ─────┤
//!                                        ▲                     │
//!                                        └─────────────────────┘
//! any state ──close()──► Closed   (terminal)
//! ```
//!
//! The current [`LifecycleState`] is the only thing that decides whether an
//! init may start: a second `init_database` while one is in flight is
//! rejected with [`InitError::AlreadyInitializing`], never queued or raced.
//!
//! At most one [`DatabaseInstance`] is alive per slot. The previous instance
//! is disposed before the replacement is created, and a failed setup discards
//! the half-built instance.

use crate::engine::{DatabaseInstance, Dataset, EngineLoader, LoadError};
use crate::execution::ExecutionResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Where a slot is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    /// Last init failed; holds the user-facing message
    Failed(String),
    Closed,
}

/// Setup failure. Distinct from query failures, which are reported inside
/// [`ExecutionResult`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("database initialization already in progress")]
    AlreadyInitializing,

    #[error("sandbox slot is closed")]
    Closed,

    #[error("could not set up database: {0}")]
    Load(#[from] LoadError),

    #[error("could not set up database: {0}")]
    Engine(String),

    #[error("could not set up database: schema failed: {0}")]
    Schema(String),

    #[error("could not set up database: seed data failed: {0}")]
    Seed(String),
}

/// UI-facing form of an init result: `{ success, error? }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Result<(), InitError>> for InitOutcome {
    fn from(result: &Result<(), InitError>) -> Self {
        match result {
            Ok(()) => InitOutcome {
                success: true,
                error: None,
            },
            Err(e) => InitOutcome {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}

struct SlotInner {
    state: LifecycleState,
    active: Option<DatabaseInstance>,
    /// Setup of the most recent successful init, replayed by `reset`
    applied: Option<Dataset>,
}

/// Lifecycle manager for one sandbox slot.
///
/// Dropping the manager closes the slot, so whoever creates it owns the
/// release of its database on every exit path.
pub struct DatabaseManager {
    slot: String,
    loader: Arc<EngineLoader>,
    inner: Mutex<SlotInner>,
}

/// Puts the slot back to `Uninitialized` if an init future is dropped before
/// it settles, so the slot never stays stuck in `Initializing`.
struct InitTicket<'a> {
    manager: &'a DatabaseManager,
    settled: bool,
}

impl InitTicket<'_> {
    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for InitTicket<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.manager.inner.lock();
        if inner.state == LifecycleState::Initializing {
            inner.state = LifecycleState::Uninitialized;
            tracing::debug!(slot = %self.manager.slot, "init_cancelled");
        }
    }
}

impl DatabaseManager {
    pub fn new(slot: impl Into<String>, loader: Arc<EngineLoader>) -> Self {
        Self {
            slot: slot.into(),
            loader,
            inner: Mutex::new(SlotInner {
                state: LifecycleState::Uninitialized,
                active: None,
                applied: None,
            }),
        }
    }

    /// Manager backed by the process-wide engine loader
    pub fn with_global_engine(slot: impl Into<String>) -> Self {
        Self::new(slot, EngineLoader::global())
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().state == LifecycleState::Ready
    }

    /// Message of the last failed init, if the slot is in `Failed`
    pub fn init_error(&self) -> Option<String> {
        match &self.inner.lock().state {
            LifecycleState::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }

    /// Id of the active instance
    pub fn instance_id(&self) -> Option<u64> {
        self.inner.lock().active.as_ref().map(DatabaseInstance::id)
    }

    /// Setup that `reset` would replay
    pub fn applied_dataset(&self) -> Option<Dataset> {
        self.inner.lock().applied.clone()
    }

    /// Build a fresh database from `schema_sql` then `seed_sql`.
    pub async fn init_database(&self, schema_sql: &str, seed_sql: &str) -> Result<(), InitError> {
        let previous = {
            let mut inner = self.inner.lock();
            match inner.state {
                LifecycleState::Initializing => return Err(InitError::AlreadyInitializing),
                LifecycleState::Closed => return Err(InitError::Closed),
                _ => {}
            }
            inner.state = LifecycleState::Initializing;
            inner.active.take()
        };
        let mut ticket = InitTicket {
            manager: self,
            settled: false,
        };

        if let Some(mut previous) = previous {
            previous.close();
        }

        tracing::debug!(slot = %self.slot, "init_started");
        let built = self.build_instance(Dataset::new(schema_sql, seed_sql)).await;
        ticket.settle();

        let mut inner = self.inner.lock();
        if inner.state == LifecycleState::Closed {
            // Torn down while we were building; `built` is dropped and closed here
            return Err(InitError::Closed);
        }
        match built {
            Ok(instance) => {
                tracing::info!(slot = %self.slot, instance_id = instance.id(), "database_ready");
                inner.applied = Some(instance.dataset().clone());
                inner.active = Some(instance);
                inner.state = LifecycleState::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(slot = %self.slot, error = %e, "init_failed");
                inner.state = LifecycleState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn build_instance(&self, dataset: Dataset) -> Result<DatabaseInstance, InitError> {
        let engine = self.loader.get_engine().await?;
        let instance = engine
            .new_database(dataset)
            .map_err(|e| InitError::Engine(e.to_string()))?;
        instance
            .run(&instance.dataset().schema_sql)
            .map_err(|e| InitError::Schema(e.to_string()))?;
        instance
            .run(&instance.dataset().seed_sql)
            .map_err(|e| InitError::Seed(e.to_string()))?;
        Ok(instance)
    }

    /// Run a query against the active database. `None` means there is no
    /// ready database to run against; SQL errors come back as a failed
    /// [`ExecutionResult`].
    pub fn execute(&self, query: &str) -> Option<ExecutionResult> {
        let inner = self.inner.lock();
        if inner.state != LifecycleState::Ready {
            return None;
        }
        let instance = inner.active.as_ref()?;
        let result = instance.exec(query);
        tracing::debug!(
            slot = %self.slot,
            instance_id = instance.id(),
            success = result.success,
            elapsed_ms = result.execution_time_ms,
            "query_executed"
        );
        Some(result)
    }

    /// Rebuild from the last successfully applied setup. Without one, just
    /// drop the current database.
    pub async fn reset(&self) -> Result<(), InitError> {
        let dataset = {
            let mut inner = self.inner.lock();
            match inner.state {
                LifecycleState::Initializing => return Err(InitError::AlreadyInitializing),
                LifecycleState::Closed => return Err(InitError::Closed),
                _ => {}
            }
            match inner.applied.clone() {
                Some(dataset) => dataset,
                None => {
                    if let Some(mut instance) = inner.active.take() {
                        instance.close();
                    }
                    inner.state = LifecycleState::Uninitialized;
                    return Ok(());
                }
            }
        };
        self.init_database(&dataset.schema_sql, &dataset.seed_sql)
            .await
    }

    /// Drop the active database and forget its setup. The slot goes back to
    /// `Uninitialized` and accepts a new init. An init in flight is left alone.
    pub fn discard(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            if matches!(
                inner.state,
                LifecycleState::Closed | LifecycleState::Initializing
            ) {
                return;
            }
            inner.state = LifecycleState::Uninitialized;
            inner.applied = None;
            inner.active.take()
        };
        if let Some(mut instance) = previous {
            instance.close();
            tracing::debug!(slot = %self.slot, instance_id = instance.id(), "database_discarded");
        }
    }

    /// Tear the slot down. Idempotent; the slot rejects further inits.
    pub fn close(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            if inner.state == LifecycleState::Closed {
                return;
            }
            inner.state = LifecycleState::Closed;
            inner.active.take()
        };
        if let Some(mut instance) = previous {
            instance.close();
        }
        tracing::debug!(slot = %self.slot, "slot_closed");
    }
}

impl Drop for DatabaseManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("slot", &self.slot)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    const SCHEMA: &str = "CREATE TABLE t(id INTEGER, name TEXT);";
    const SEED: &str = "INSERT INTO t VALUES (1,'Alice'),(2,'Bob');";

    fn manager() -> DatabaseManager {
        DatabaseManager::new(
            "test",
            Arc::new(EngineLoader::bundled(EngineConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_new_manager_is_uninitialized() {
        let m = manager();
        assert_eq!(m.state(), LifecycleState::Uninitialized);
        assert!(!m.is_ready());
        assert!(m.init_error().is_none());
        assert!(m.execute("SELECT 1").is_none());
    }

    #[tokio::test]
    async fn test_init_reaches_ready() {
        let m = manager();
        m.init_database(SCHEMA, SEED).await.unwrap();
        assert!(m.is_ready());
        assert!(m.instance_id().is_some());
        assert_eq!(m.applied_dataset(), Some(Dataset::new(SCHEMA, SEED)));
    }

    #[tokio::test]
    async fn test_bad_schema_fails_and_discards() {
        let m = manager();
        let err = m.init_database("CREATE TABLE (", SEED).await.unwrap_err();
        assert!(matches!(err, InitError::Schema(_)));
        assert!(err.to_string().starts_with("could not set up database"));
        assert!(matches!(m.state(), LifecycleState::Failed(_)));
        assert!(m.init_error().is_some());
        assert!(m.instance_id().is_none());
        assert!(m.execute("SELECT 1").is_none());
    }

    #[tokio::test]
    async fn test_bad_seed_is_classified_as_seed() {
        let m = manager();
        let err = m
            .init_database(SCHEMA, "INSERT INTO missing VALUES (1)")
            .await
            .unwrap_err();
        assert!(matches!(err, InitError::Seed(_)));
    }

    #[tokio::test]
    async fn test_retry_after_failure() {
        let m = manager();
        assert!(m.init_database("nonsense", "").await.is_err());
        m.init_database(SCHEMA, SEED).await.unwrap();
        assert!(m.is_ready());
        assert!(m.init_error().is_none());
    }

    #[tokio::test]
    async fn test_failed_init_keeps_last_good_setup_for_reset() {
        let m = manager();
        m.init_database(SCHEMA, SEED).await.unwrap();
        assert!(m.init_database("nonsense", "").await.is_err());
        assert_eq!(m.applied_dataset(), Some(Dataset::new(SCHEMA, SEED)));

        m.reset().await.unwrap();
        let r = m.execute("SELECT count(*) FROM t").unwrap();
        assert_eq!(r.rows[0][0].as_i64(), Some(2));
    }

    #[tokio::test]
    async fn test_reset_without_setup_disposes() {
        let m = manager();
        m.reset().await.unwrap();
        assert_eq!(m.state(), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn test_discard_forgets_setup_but_stays_usable() {
        let m = manager();
        m.init_database(SCHEMA, SEED).await.unwrap();
        m.discard();
        assert_eq!(m.state(), LifecycleState::Uninitialized);
        assert!(m.instance_id().is_none());
        assert!(m.applied_dataset().is_none());

        m.init_database("CREATE TABLE u(x);", "").await.unwrap();
        assert!(m.execute("SELECT * FROM u").unwrap().success);
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let m = manager();
        m.init_database(SCHEMA, SEED).await.unwrap();
        m.close();
        m.close();
        assert_eq!(m.state(), LifecycleState::Closed);
        assert!(m.execute("SELECT 1").is_none());
        assert_eq!(m.init_database(SCHEMA, SEED).await, Err(InitError::Closed));
        assert_eq!(m.reset().await, Err(InitError::Closed));
    }

    #[test]
    fn test_init_outcome_shape() {
        let ok = InitOutcome::from(&Ok(()));
        assert!(ok.success && ok.error.is_none());

        let failed = InitOutcome::from(&Err(InitError::Schema("near \"(\": syntax error".into())));
        assert!(!failed.success);
        assert_eq!(
            failed.error.as_deref(),
            Some("could not set up database: schema failed: near \"(\": syntax error")
        );
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, serde_json::json!({"success": true}));
    }
}
