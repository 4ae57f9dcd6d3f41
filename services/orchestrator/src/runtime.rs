use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use modelops::{ActiveSelection, BackendMode, Blacklist, Catalog, ModelDescriptor};
use serde::Serialize;
use serde_json::json;
use statestore::{QueryRecord, StateStore, Storage};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::catalog::ModelCatalog;
use crate::config::{ManagerConfig, Timeouts};
use crate::probe::{self, bounded};
use crate::provider::{BackendError, LLMProvider, ProviderConnector};

pub type SharedStore = Arc<StateStore<Box<dyn Storage>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    Uninitialized,
    LocalActive,
    RemoteActive,
    /// No working backend; the selection is remembered but unusable.
    Degraded,
}

impl LifecyclePhase {
    pub fn active(mode: BackendMode) -> Self {
        match mode {
            BackendMode::Local => LifecyclePhase::LocalActive,
            BackendMode::Remote => LifecyclePhase::RemoteActive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Uninitialized => "UNINITIALIZED",
            LifecyclePhase::LocalActive => "LOCAL_ACTIVE",
            LifecyclePhase::RemoteActive => "REMOTE_ACTIVE",
            LifecyclePhase::Degraded => "DEGRADED",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend bound to one model.
#[derive(Clone)]
pub struct ModelHandle {
    provider: Arc<dyn LLMProvider>,
    model: String,
    opened_at: DateTime<Utc>,
    warmed: bool,
}

impl ModelHandle {
    pub async fn open(provider: Arc<dyn LLMProvider>, model: &str, timeouts: &Timeouts) -> Result<Self, BackendError> {
        bounded("load", timeouts.inference_first_token, provider.load(model)).await?;
        Ok(Self {
            provider,
            model: model.to_string(),
            opened_at: Utc::now(),
            warmed: true,
        })
    }

    /// Rebinds to a persisted selection without touching the backend.
    pub fn restored(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            opened_at: Utc::now(),
            warmed: false,
        }
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn warmed(&self) -> bool {
        self.warmed
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("provider", &self.provider.info())
            .field("model", &self.model)
            .field("warmed", &self.warmed)
            .finish()
    }
}

/// Everything a reader needs, replaced as one value on every commit.
#[derive(Clone, Debug)]
pub struct RuntimeSnapshot {
    pub phase: LifecyclePhase,
    pub selection: ActiveSelection,
    pub catalog: Arc<Catalog>,
    pub handle: Option<ModelHandle>,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("local backend not detected")]
    LocalNotInstalled,

    #[error("no working backend")]
    NoBackend,

    #[error("could not connect to {endpoint}: {source}")]
    Connect { endpoint: String, source: BackendError },

    #[error("backend at {endpoint} is unavailable: {reason}")]
    Unavailable { endpoint: String, reason: String },

    #[error("could not list models at {endpoint}: {source}")]
    Catalog { endpoint: String, source: BackendError },

    #[error("model {0} is blacklisted due to known compatibility issues")]
    Blacklisted(String),

    #[error("could not acquire model {model}: {source}")]
    Acquisition { model: String, source: BackendError },

    #[error("model {model} failed to initialize: {source}")]
    Initialize { model: String, source: BackendError },
}

impl SwitchError {
    pub fn hint(&self) -> &'static str {
        match self {
            SwitchError::LocalNotInstalled => "install ollama locally or switch to remote with POST /mode",
            SwitchError::NoBackend => "use POST /mode to recover",
            SwitchError::Connect { .. } | SwitchError::Unavailable { .. } | SwitchError::Catalog { .. } => {
                "check connectivity to the endpoint"
            }
            SwitchError::Blacklisted(_) => "pick another model from GET /models",
            SwitchError::Acquisition { .. } => "pull the model manually or pick one from GET /models",
            SwitchError::Initialize { .. } => "try another model with POST /models/active",
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("no backend reachable (local: {local}; remote: {remote})")]
    NoBackend { local: String, remote: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCheck {
    pub model: String,
    pub ok: bool,
    pub error: Option<String>,
    pub blacklisted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendInfo {
    pub phase: LifecyclePhase,
    pub mode: BackendMode,
    pub endpoint: String,
    pub model: String,
    pub available: bool,
    pub version: Option<String>,
    pub error: Option<String>,
    pub models: usize,
}

/// Owns the active backend and model.
///
/// Readers take [`ModelManager::snapshot`]; mutations build a complete
/// replacement off to the side and swap it in only once every step passed,
/// so a failed switch leaves nothing behind.
pub struct ModelManager {
    pub(crate) config: ManagerConfig,
    connector: Arc<dyn ProviderConnector>,
    store: SharedStore,
    pub(crate) catalogs: ModelCatalog,
    pub(crate) blacklist: RwLock<Blacklist>,
    live: RwLock<Arc<RuntimeSnapshot>>,
    // switch_mode, set_active_model and resolve_best_model never interleave
    pub(crate) serial: tokio::sync::Mutex<()>,
}

impl ModelManager {
    pub fn new(config: ManagerConfig, connector: Arc<dyn ProviderConnector>, store: SharedStore) -> Self {
        let initial = RuntimeSnapshot {
            phase: LifecyclePhase::Uninitialized,
            selection: ActiveSelection::new(BackendMode::Local, &config.local_endpoint, &config.default_model),
            catalog: Arc::new(Catalog::empty(BackendMode::Local, &config.local_endpoint)),
            handle: None,
            since: Utc::now(),
        };
        Self {
            catalogs: ModelCatalog::new(config.timeouts.clone()),
            blacklist: RwLock::new(Blacklist::new(config.blacklist.iter().cloned())),
            config,
            connector,
            store,
            live: RwLock::new(Arc::new(initial)),
            serial: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<RuntimeSnapshot> {
        self.live.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.snapshot().phase
    }

    pub fn selection(&self) -> ActiveSelection {
        self.snapshot().selection.clone()
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.snapshot().catalog.clone()
    }

    pub fn blacklist(&self) -> Blacklist {
        self.blacklist.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_blacklisted(&self, model: &str) -> bool {
        self.blacklist
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(model)
    }

    pub(crate) fn swap(&self, next: RuntimeSnapshot) -> Arc<RuntimeSnapshot> {
        let next = Arc::new(next);
        self.catalogs.install(next.catalog.clone());
        *self.live.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
        next
    }

    /// Swaps in `next` and force-flushes it to the state store.
    pub(crate) async fn commit(&self, next: RuntimeSnapshot) -> Arc<RuntimeSnapshot> {
        let next = self.swap(next);
        info!(phase = %next.phase, selection = %next.selection, "lifecycle: committed");

        let store = self.store.clone();
        let catalog = next.catalog.clone();
        let selection = next.selection.clone();
        let flushed = tokio::task::spawn_blocking(move || {
            store.update_model_info(&catalog, &selection);
            store.update_config([
                ("ollama_host", json!(selection.endpoint)),
                ("backend_mode", json!(selection.mode.as_str())),
            ]);
            store.save(true)
        })
        .await;
        match flushed {
            Ok(true) => debug!("lifecycle: state flushed"),
            Ok(false) => warn!("lifecycle: state not flushed; will retry on next save"),
            Err(e) => error!("lifecycle: state flush task failed: {e}"),
        }
        next
    }

    /// Restores the persisted selection, or probes local then remote.
    /// Ends DEGRADED when neither works; that is an error only with `require_backend`.
    pub async fn bootstrap(&self) -> Result<Arc<RuntimeSnapshot>, LifecycleError> {
        let _serial = self.serial.lock().await;

        // 1) persisted selection, trusted without probing
        if self.config.restore_state {
            if let Some(restored) = self.restore() {
                info!(selection = %restored.selection, "lifecycle: restored persisted selection");
                return Ok(self.swap(restored));
            }
        }

        let preferred = self.config.default_model.clone();

        // 2) local
        let local = match self
            .prepare(BackendMode::Local, &self.config.local_endpoint, &preferred)
            .await
        {
            Ok(next) => return Ok(self.commit(next).await),
            Err(e) => {
                info!(endpoint = %self.config.local_endpoint, "lifecycle: local backend not usable: {e}");
                e
            }
        };

        // 3) remote
        let remote = match self
            .prepare(BackendMode::Remote, &self.config.remote_endpoint, &preferred)
            .await
        {
            Ok(next) => return Ok(self.commit(next).await),
            Err(e) => {
                warn!(endpoint = %self.config.remote_endpoint, "lifecycle: remote backend not usable: {e}");
                e
            }
        };

        // 4) degraded; not persisted so a restart probes again
        let endpoint = self.config.remote_endpoint.clone();
        let degraded = self.swap(RuntimeSnapshot {
            phase: LifecyclePhase::Degraded,
            selection: ActiveSelection::new(BackendMode::Remote, &endpoint, &preferred),
            catalog: Arc::new(Catalog::empty(BackendMode::Remote, &endpoint)),
            handle: None,
            since: Utc::now(),
        });
        error!(model = %preferred, "lifecycle: no working backend, running degraded");

        if self.config.require_backend {
            return Err(LifecycleError::NoBackend {
                local: local.to_string(),
                remote: remote.to_string(),
            });
        }
        Ok(degraded)
    }

    fn restore(&self) -> Option<RuntimeSnapshot> {
        let persisted = self.store.snapshot();
        let active = persisted.active?;
        if self.is_blacklisted(&active.model) {
            info!(model = %active.model, "lifecycle: persisted model is blacklisted, not restoring");
            return None;
        }
        let provider = match self.connector.connect(active.mode, &active.endpoint) {
            Ok(p) => p,
            Err(e) => {
                warn!(endpoint = %active.endpoint, "lifecycle: cannot rebuild persisted backend: {e}");
                return None;
            }
        };
        let catalog = persisted
            .catalog
            .filter(|c| c.belongs_to(active.mode, &active.endpoint))
            .unwrap_or_else(|| Catalog::empty(active.mode, &active.endpoint));

        Some(RuntimeSnapshot {
            phase: LifecyclePhase::active(active.mode),
            handle: Some(ModelHandle::restored(provider, &active.model)),
            selection: active,
            catalog: Arc::new(catalog),
            since: Utc::now(),
        })
    }

    /// Builds a complete replacement state for `mode` without touching the live one.
    async fn prepare(&self, mode: BackendMode, endpoint: &str, preferred: &str) -> Result<RuntimeSnapshot, SwitchError> {
        let timeouts = &self.config.timeouts;

        // 1) local needs a runner on this host
        if mode == BackendMode::Local && !self.connector.local_installed().await {
            return Err(SwitchError::LocalNotInstalled);
        }

        // 2) probe
        let provider = self
            .connector
            .connect(mode, endpoint)
            .map_err(|source| SwitchError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let availability = probe::check_availability(provider.as_ref(), timeouts).await;
        if !availability.available {
            return Err(SwitchError::Unavailable {
                endpoint: endpoint.to_string(),
                reason: availability.error.unwrap_or_default(),
            });
        }

        // 3) discover, not installed until commit
        let catalog = self
            .catalogs
            .fetch(provider.as_ref())
            .await
            .map_err(|source| SwitchError::Catalog {
                endpoint: endpoint.to_string(),
                source,
            })?;

        // 4) resolve against the new catalog
        let resolved = self.resolve_in(Some(&provider), mode, catalog, preferred).await;
        let model = resolved.resolution.model;
        if self.is_blacklisted(&model) {
            return Err(SwitchError::Blacklisted(model));
        }

        // 5) warm
        let handle = ModelHandle::open(provider, &model, timeouts)
            .await
            .map_err(|source| SwitchError::Initialize {
                model: model.clone(),
                source,
            })?;

        Ok(RuntimeSnapshot {
            phase: LifecyclePhase::active(mode),
            selection: ActiveSelection::new(mode, endpoint, model),
            catalog: Arc::new(resolved.catalog),
            handle: Some(handle),
            since: Utc::now(),
        })
    }

    pub async fn switch_mode(&self, target: BackendMode, endpoint: Option<&str>) -> bool {
        self.try_switch_mode(target, endpoint).await.is_ok()
    }

    /// On error the manager is exactly as it was before the call.
    pub async fn try_switch_mode(
        &self,
        target: BackendMode,
        endpoint: Option<&str>,
    ) -> Result<Arc<RuntimeSnapshot>, SwitchError> {
        let _serial = self.serial.lock().await;
        let current = self.snapshot();

        let requested = endpoint.map(|e| e.trim_end_matches('/').to_string());
        let same_endpoint = requested
            .as_deref()
            .map_or(true, |e| e == current.selection.endpoint);
        if current.phase == LifecyclePhase::active(target) && same_endpoint {
            debug!(mode = %target, "lifecycle: already active");
            return Ok(current);
        }

        let endpoint = requested.unwrap_or_else(|| self.config.endpoint_for(target).to_string());
        info!(from = %current.selection, mode = %target, endpoint = %endpoint, "lifecycle: switching mode");
        match self.prepare(target, &endpoint, &current.selection.model).await {
            Ok(next) => Ok(self.commit(next).await),
            Err(e) => {
                warn!(mode = %target, endpoint = %endpoint, "lifecycle: switch failed, keeping {}: {e}", current.selection);
                Err(e)
            }
        }
    }

    pub async fn set_active_model(&self, name: &str) -> bool {
        self.try_set_active_model(name).await.is_ok()
    }

    /// On error the previous model and handle stay in effect.
    pub async fn try_set_active_model(&self, name: &str) -> Result<Arc<RuntimeSnapshot>, SwitchError> {
        let _serial = self.serial.lock().await;
        let current = self.snapshot();
        let Some(old) = current.handle.as_ref() else {
            return Err(SwitchError::NoBackend);
        };
        if self.is_blacklisted(name) {
            return Err(SwitchError::Blacklisted(name.to_string()));
        }

        let provider = old.provider().clone();
        let mut catalog = (*current.catalog).clone();
        if !catalog.contains(name) && current.selection.mode == BackendMode::Local {
            catalog = self
                .acquire(&provider, name, &catalog)
                .await
                .map_err(|source| SwitchError::Acquisition {
                    model: name.to_string(),
                    source,
                })?;
        }

        let handle = match ModelHandle::open(provider, name, &self.config.timeouts).await {
            Ok(h) => h,
            Err(source) => {
                warn!(model = %name, "lifecycle: model failed to load, keeping {}: {source}", old.model());
                return Err(SwitchError::Initialize {
                    model: name.to_string(),
                    source,
                });
            }
        };
        if !catalog.contains(name) {
            // served by the remote even though discovery missed it
            catalog.models.insert(name.to_string(), ModelDescriptor::new(name, None));
        }

        Ok(self
            .commit(RuntimeSnapshot {
                phase: current.phase,
                selection: current.selection.with_model(name),
                catalog: Arc::new(catalog),
                handle: Some(handle),
                since: Utc::now(),
            })
            .await)
    }

    /// Re-discovers the active backend's models and swaps the catalog in.
    pub async fn refresh_catalog(&self) -> Result<Arc<Catalog>, SwitchError> {
        let _serial = self.serial.lock().await;
        let current = self.snapshot();
        let Some(handle) = current.handle.as_ref() else {
            return Err(SwitchError::NoBackend);
        };

        let catalog = self
            .catalogs
            .refresh(handle.provider().as_ref())
            .await
            .map_err(|source| SwitchError::Catalog {
                endpoint: current.selection.endpoint.clone(),
                source,
            })?;
        self.swap(RuntimeSnapshot {
            catalog: catalog.clone(),
            ..(*current).clone()
        });

        let store = self.store.clone();
        let recorded = catalog.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.update_catalog_info(&recorded)).await {
            error!("lifecycle: catalog record task failed: {e}");
        }
        Ok(catalog)
    }

    pub async fn describe_model(&self, name: &str) -> Option<ModelDescriptor> {
        let current = self.snapshot();
        match current.handle.as_ref() {
            Some(h) => self.catalogs.describe(h.provider().as_ref(), name).await,
            None => current.catalog.get(name).cloned(),
        }
    }

    pub async fn backend_info(&self) -> BackendInfo {
        let current = self.snapshot();
        let availability = match current.handle.as_ref() {
            Some(h) => probe::check_availability(h.provider().as_ref(), &self.config.timeouts).await,
            None => probe::Availability {
                available: false,
                version: None,
                error: Some(SwitchError::NoBackend.to_string()),
            },
        };
        BackendInfo {
            phase: current.phase,
            mode: current.selection.mode,
            endpoint: current.selection.endpoint.clone(),
            model: current.selection.model.clone(),
            available: availability.available,
            version: availability.version,
            error: availability.error,
            models: current.catalog.len(),
        }
    }

    /// Records the last query outcome; selection state is left alone.
    pub async fn record_query_outcome(
        &self,
        question: impl Into<String>,
        query: Option<String>,
        duration: Option<Duration>,
        error: Option<String>,
    ) {
        let record = QueryRecord {
            question: question.into(),
            query,
            duration_ms: duration.map(|d| d.as_millis() as u64),
            error,
            recorded_at: Utc::now(),
        };
        let store = self.store.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || store.update_last_query(record)).await {
            error!("lifecycle: query record task failed: {e}");
        }
    }
}
