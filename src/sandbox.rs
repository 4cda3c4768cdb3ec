//! Sandbox Orchestration
//!
//! One [`Sandbox`] backs one exercise. It routes each query to the embedded
//! engine or to the remote sandbox server depending on the configured
//! [`SandboxTarget`], and hides the remote session protocol from the caller.
//!
//! ```text
//! execute(query)
//!     │
//!     ├─ Sqlite ─────► DatabaseManager (init on demand) ─► ExecutionResult
//!     │
//!     └─ remote ─────► RemoteExecutor  ──expired?──► new session, replay once
//! ```
//!
//! Every failure, including setup, transport and timeout, comes back as a
//! failed [`ExecutionResult`]; `execute` never returns `Err`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, RemoteConfig};
use crate::engine::{Dataset, EngineLoader};
use crate::execution::{with_deadline, with_timeout, ExecutionResult};
use crate::lifecycle::{DatabaseManager, InitError};
use crate::protocol::{HttpRemoteExecutor, RemoteError, RemoteExecutor, RemoteRequest, RemoteResponse};
use crate::session::{ExpirySentinel, RemoteSession};
use crate::target::{ExecutionPath, SandboxTarget};

#[derive(Debug, Default)]
struct SandboxState {
    target: Option<SandboxTarget>,
    dataset: Dataset,
    session: RemoteSession,
}

pub struct Sandbox {
    embedded: DatabaseManager,
    remote: Arc<dyn RemoteExecutor>,
    request_timeout: Option<Duration>,
    sentinel: ExpirySentinel,
    /// Held for the whole of an execution, so remote requests of one
    /// sandbox never interleave
    state: Mutex<SandboxState>,
}

impl Sandbox {
    pub fn new(
        slot: impl Into<String>,
        loader: Arc<EngineLoader>,
        remote: Arc<dyn RemoteExecutor>,
        config: &RemoteConfig,
    ) -> Self {
        Self {
            embedded: DatabaseManager::new(slot, loader),
            remote,
            request_timeout: config.request_timeout(),
            sentinel: ExpirySentinel::new(config.session_expired_sentinel.clone()),
            state: Mutex::new(SandboxState::default()),
        }
    }

    /// Sandbox on the process-wide bundled engine and the HTTP remote client
    pub fn from_config(slot: impl Into<String>, config: &Config) -> Result<Self, RemoteError> {
        let loader = EngineLoader::global_with(&config.engine);
        let remote = Arc::new(HttpRemoteExecutor::new(&config.remote)?);
        Ok(Self::new(slot, loader, remote, &config.remote))
    }

    /// The embedded lifecycle manager (state, init error, instance id)
    pub fn embedded(&self) -> &DatabaseManager {
        &self.embedded
    }

    pub async fn target(&self) -> Option<SandboxTarget> {
        self.state.lock().await.target
    }

    pub async fn dataset(&self) -> Dataset {
        self.state.lock().await.dataset.clone()
    }

    /// Current remote session id, if one has been minted
    pub async fn session_id(&self) -> Option<String> {
        self.state.lock().await.session.id().map(str::to_owned)
    }

    /// Point the sandbox at `target` with `dataset`. A change of either
    /// discards the embedded database and the remote session; the next
    /// execution starts from scratch.
    pub async fn configure(&self, target: SandboxTarget, dataset: Dataset) {
        let mut state = self.state.lock().await;
        if state.target == Some(target) && state.dataset == dataset {
            return;
        }
        self.teardown(&mut state).await;
        state.target = Some(target);
        state.dataset = dataset;
        info!(slot = %self.embedded.slot(), target = %target, "sandbox_configured");
    }

    pub async fn execute(&self, query: &str) -> ExecutionResult {
        let mut state = self.state.lock().await;
        let Some(target) = state.target else {
            return ExecutionResult::failure("no sandbox target configured", 0.0);
        };
        match target.path() {
            ExecutionPath::Embedded => self.execute_embedded(&state.dataset, query).await,
            ExecutionPath::Remote => self.execute_remote(target, &mut state, query).await,
        }
    }

    /// Back to the configured dataset. Embedded: rebuild the database.
    /// Remote: release the session; the next execution sets up a new one.
    pub async fn reset(&self) -> Result<(), InitError> {
        let mut state = self.state.lock().await;
        match state.target.map(SandboxTarget::path) {
            Some(ExecutionPath::Embedded) => self.embedded.reset().await,
            Some(ExecutionPath::Remote) => {
                self.release_session(&mut state.session).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Release everything. The sandbox cannot run embedded queries afterwards.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        self.release_session(&mut state.session).await;
        self.embedded.close();
        state.target = None;
    }

    async fn teardown(&self, state: &mut SandboxState) {
        self.embedded.discard();
        self.release_session(&mut state.session).await;
    }

    /// Best effort: a server that cannot be reached will expire the session
    /// on its own.
    async fn release_session(&self, session: &mut RemoteSession) {
        let Some(id) = session.take() else {
            return;
        };
        match with_timeout(self.request_timeout, self.remote.release(&id)).await {
            Ok(Ok(())) => debug!(session_id = %id, "session_released"),
            Ok(Err(e)) => warn!(session_id = %id, error = %e, "session_release_failed"),
            Err(e) => warn!(session_id = %id, error = %e, "session_release_failed"),
        }
    }

    async fn execute_embedded(&self, dataset: &Dataset, query: &str) -> ExecutionResult {
        let current = self.embedded.is_ready()
            && self.embedded.applied_dataset().as_ref() == Some(dataset);
        if !current {
            if let Err(e) = self
                .embedded
                .init_database(&dataset.schema_sql, &dataset.seed_sql)
                .await
            {
                return ExecutionResult::failure(e.to_string(), 0.0);
            }
        }
        self.embedded
            .execute(query)
            .unwrap_or_else(|| ExecutionResult::failure("database is not ready", 0.0))
    }

    async fn execute_remote(
        &self,
        target: SandboxTarget,
        state: &mut SandboxState,
        query: &str,
    ) -> ExecutionResult {
        let SandboxState {
            dataset, session, ..
        } = state;
        // One request_timeout covers the first attempt and the replay
        let started = Instant::now();

        let response = match self.send(target, dataset, session, query, started).await {
            Ok(response) => response,
            Err(e) => return ExecutionResult::failure(e.to_string(), 0.0),
        };
        if !self.sentinel.matches(response.result.error_message.as_deref()) {
            return settle(session, response);
        }

        // The server lost our database. Start a new session and replay with
        // setup, once; a second expiry is reported like any other failure.
        let expired = session.id().unwrap_or_default().to_string();
        let renewed = session.renew();
        info!(
            target = %target,
            expired_session = %expired,
            session_id = %renewed,
            "session_expired_replaying"
        );
        match self.send(target, dataset, session, query, started).await {
            Ok(response) => settle(session, response),
            Err(e) => ExecutionResult::failure(e.to_string(), 0.0),
        }
    }

    async fn send(
        &self,
        target: SandboxTarget,
        dataset: &Dataset,
        session: &mut RemoteSession,
        query: &str,
        started: Instant,
    ) -> Result<RemoteResponse, RemoteError> {
        let session_id = session.ensure_id();
        let mut request = RemoteRequest::new(target, query).with_session(session_id.clone());
        if session.needs_setup() {
            request = request.with_setup(dataset);
        }

        let sent = Instant::now();
        let outcome =
            with_deadline(self.request_timeout, started, self.remote.execute(request)).await;
        let elapsed_ms = sent.elapsed().as_secs_f64() * 1000.0;
        match &outcome {
            Ok(Ok(response)) => debug!(
                session_id = %session_id,
                success = response.result.success,
                elapsed_ms,
                "remote_executed"
            ),
            Ok(Err(e)) => warn!(session_id = %session_id, error = %e, elapsed_ms, "remote_failed"),
            Err(e) => warn!(session_id = %session_id, error = %e, "remote_timed_out"),
        }
        Ok(outcome??)
    }
}

/// Only a successful execution proves the server holds our dataset.
fn settle(session: &mut RemoteSession, response: RemoteResponse) -> ExecutionResult {
    if response.result.success {
        session.mark_established(response.session_id.as_deref());
    }
    response.result.normalized()
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("embedded", &self.embedded)
            .field("request_timeout", &self.request_timeout)
            .field("sentinel", &self.sentinel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl RemoteExecutor for Unreachable {
        async fn execute(&self, _: RemoteRequest) -> Result<RemoteResponse, RemoteError> {
            Err(RemoteError::Transport("connection refused".to_string()))
        }

        async fn release(&self, _: &str) -> Result<(), RemoteError> {
            Err(RemoteError::Transport("connection refused".to_string()))
        }
    }

    fn sandbox() -> Sandbox {
        Sandbox::new(
            "unit",
            Arc::new(EngineLoader::bundled(EngineConfig::default())),
            Arc::new(Unreachable),
            &RemoteConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_unconfigured_execute_fails() {
        let r = sandbox().execute("SELECT 1").await;
        assert!(!r.success);
        assert_eq!(r.error_message.as_deref(), Some("no sandbox target configured"));
    }

    #[tokio::test]
    async fn test_transport_error_becomes_failure() {
        let sb = sandbox();
        sb.configure(SandboxTarget::Postgres, Dataset::default()).await;
        let r = sb.execute("SELECT 1").await;
        assert!(!r.success);
        assert!(r
            .error_message
            .unwrap()
            .starts_with("sandbox server unreachable"));
        // The session id stays; nothing was established
        assert!(sb.session_id().await.is_some());
    }

    #[tokio::test]
    async fn test_failed_release_is_swallowed() {
        let sb = sandbox();
        sb.configure(SandboxTarget::Redis, Dataset::default()).await;
        sb.execute("GET k").await;
        sb.reset().await.unwrap();
        assert!(sb.session_id().await.is_none());
    }

    #[tokio::test]
    async fn test_same_configuration_keeps_database() {
        let sb = sandbox();
        let dataset = Dataset::new("CREATE TABLE t(x);", "INSERT INTO t VALUES (1);");
        sb.configure(SandboxTarget::Sqlite, dataset.clone()).await;
        assert!(sb.execute("SELECT * FROM t").await.success);
        let id = sb.embedded().instance_id();

        sb.configure(SandboxTarget::Sqlite, dataset).await;
        assert!(sb.execute("SELECT * FROM t").await.success);
        assert_eq!(sb.embedded().instance_id(), id);
    }
}
