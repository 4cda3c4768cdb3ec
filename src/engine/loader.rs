//! Engine Loader
//!
//! Hands out the shared [`EngineModule`]. The first caller starts the load;
//! everyone who arrives while it is in flight awaits the same shared future,
//! so the underlying [`EngineSource`] runs once no matter how many slots ask
//! at the same time.
//!
//! Only a successful load is cached. A failure is delivered to every waiter of
//! that attempt and then forgotten, so a later call (for example after the
//! user fixes their environment and retries) loads again instead of replaying
//! the old error forever.

use super::{ConnectionOptions, EngineModule};
use crate::config::EngineConfig;
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Engine load failure. Cloned into every waiter of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The runtime could not be brought up at all
    #[error("embedded engine unavailable: {0}")]
    Unavailable(String),

    /// The runtime is older than the configured minimum
    #[error("SQLite {found} is older than the required {required}")]
    UnsupportedVersion { found: String, required: String },

    /// The load task died before producing a result
    #[error("engine loader worker failed: {0}")]
    Worker(String),
}

/// Something that can bring the embedded engine runtime up.
#[async_trait]
pub trait EngineSource: Send + Sync {
    async fn load(&self) -> Result<EngineModule, LoadError>;
}

/// Loads the SQLite library compiled into this binary.
///
/// The check runs on a blocking thread: it opens a scratch in-memory
/// connection, reads `sqlite_version()` and checks it against
/// [`EngineConfig::min_sqlite_version`].
#[derive(Debug, Clone, Default)]
pub struct BundledSqlite {
    config: EngineConfig,
}

impl BundledSqlite {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineSource for BundledSqlite {
    async fn load(&self) -> Result<EngineModule, LoadError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || open_bundled(&config))
            .await
            .map_err(|e| LoadError::Worker(e.to_string()))?
    }
}

fn open_bundled(config: &EngineConfig) -> Result<EngineModule, LoadError> {
    let conn = Connection::open_in_memory().map_err(|e| LoadError::Unavailable(e.to_string()))?;
    let version: String = conn
        .query_row("SELECT sqlite_version()", [], |row| row.get(0))
        .map_err(|e| LoadError::Unavailable(e.to_string()))?;
    drop(conn);

    check_version(&version, &config.min_sqlite_version)?;

    Ok(EngineModule::new(
        version,
        ConnectionOptions {
            enforce_foreign_keys: config.enforce_foreign_keys,
        },
    ))
}

/// Parse a dotted version (`3.45.1`), missing components count as 0
fn parse_version(text: &str) -> Option<(u32, u32, u32)> {
    let mut parts = text.trim().split('.').map(str::parse::<u32>);
    let major = parts.next()?.ok()?;
    let minor = parts.next().transpose().ok()?.unwrap_or(0);
    let patch = parts.next().transpose().ok()?.unwrap_or(0);
    Some((major, minor, patch))
}

fn check_version(found: &str, required: &str) -> Result<(), LoadError> {
    let unsupported = || LoadError::UnsupportedVersion {
        found: found.to_string(),
        required: required.to_string(),
    };
    // An unparseable minimum means no minimum
    let Some(min) = parse_version(required) else {
        return Ok(());
    };
    let have = parse_version(found).ok_or_else(unsupported)?;
    if have < min {
        return Err(unsupported());
    }
    Ok(())
}

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<EngineModule>, LoadError>>>;

enum LoaderState {
    Idle,
    Loading(SharedLoad),
    Loaded(Arc<EngineModule>),
}

/// Memoized, retryable access to the engine module.
pub struct EngineLoader {
    source: Arc<dyn EngineSource>,
    /// Config of a bundled loader, to spot conflicting global installs
    config: Option<EngineConfig>,
    state: Mutex<LoaderState>,
}

static GLOBAL_LOADER: OnceLock<Arc<EngineLoader>> = OnceLock::new();

impl EngineLoader {
    pub fn new(source: Arc<dyn EngineSource>) -> Self {
        Self {
            source,
            config: None,
            state: Mutex::new(LoaderState::Idle),
        }
    }

    /// Loader for the bundled engine built from `config`
    pub fn bundled(config: EngineConfig) -> Self {
        Self {
            config: Some(config.clone()),
            ..Self::new(Arc::new(BundledSqlite::new(config)))
        }
    }

    /// Process-wide loader. Installed by the first call to this or
    /// [`EngineLoader::global_with`]; defaults apply if this one came first.
    pub fn global() -> Arc<EngineLoader> {
        Self::global_with(&EngineConfig::default())
    }

    /// Process-wide loader, built from `config` if it does not exist yet.
    /// A config passed after installation is ignored.
    pub fn global_with(config: &EngineConfig) -> Arc<EngineLoader> {
        let mut installed = false;
        let loader = GLOBAL_LOADER
            .get_or_init(|| {
                installed = true;
                Arc::new(EngineLoader::bundled(config.clone()))
            })
            .clone();
        if !installed && loader.config.as_ref() != Some(config) {
            tracing::warn!("engine loader already installed; ignoring differing [engine] config");
        }
        loader
    }

    /// Get the engine module, loading it on first use.
    pub async fn get_engine(&self) -> Result<Arc<EngineModule>, LoadError> {
        let load = {
            let mut state = self.state.lock();
            match &*state {
                LoaderState::Loaded(module) => return Ok(module.clone()),
                LoaderState::Loading(load) => load.clone(),
                LoaderState::Idle => {
                    let source = self.source.clone();
                    let load = async move {
                        let started = Instant::now();
                        tracing::debug!("engine_load_started");
                        let result = source.load().await.map(Arc::new);
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        match &result {
                            Ok(module) => {
                                tracing::info!(version = module.version(), elapsed_ms, "engine_loaded");
                            }
                            Err(e) => tracing::warn!(error = %e, elapsed_ms, "engine_load_failed"),
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *state = LoaderState::Loading(load.clone());
                    load
                }
            }
        };

        let result = load.clone().await;

        // Whoever settles first records the outcome; a stale attempt must not
        // overwrite a newer one started after a reset.
        let mut state = self.state.lock();
        if let LoaderState::Loading(current) = &*state {
            if current.ptr_eq(&load) {
                *state = match &result {
                    Ok(module) => LoaderState::Loaded(module.clone()),
                    Err(_) => LoaderState::Idle,
                };
            }
        }
        result
    }

    /// Whether a module is cached
    pub fn is_loaded(&self) -> bool {
        matches!(&*self.state.lock(), LoaderState::Loaded(_))
    }

    /// Forget the cached module so the next call loads again
    pub fn reset(&self) {
        *self.state.lock() = LoaderState::Idle;
    }
}

impl std::fmt::Debug for EngineLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock() {
            LoaderState::Idle => "idle",
            LoaderState::Loading(_) => "loading",
            LoaderState::Loaded(_) => "loaded",
        };
        f.debug_struct("EngineLoader").field("state", &state).finish()
    }
}
