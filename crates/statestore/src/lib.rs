//! Durable session state
//!
//! One JSON document holding the active selection, the catalog it came from,
//! free-form configuration and the last query outcome. Loaded once at
//! startup and merged over defaults, then rewritten whole on every save.

mod storage;
mod summary;
mod types;

pub use storage::{write_atomic, FileBackedStorage, InMemoryStorage, Storage};
pub use summary::summary;
pub use types::{PersistedState, QueryRecord, STATE_VERSION};

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use modelops::{ActiveSelection, Catalog};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct StateStore<S: Storage = FileBackedStorage> {
    storage: S,
    state: Mutex<PersistedState>,
    last_save: Mutex<Option<Instant>>,
    // serializes writers; never taken together with `state`
    write_lock: Mutex<()>,
    debounce: Duration,
}

impl<S: Storage> StateStore<S> {
    /// Store holding defaults only; call [`StateStore::load`] to read storage.
    pub fn new(storage: S, debounce: Duration) -> Self {
        Self {
            storage,
            state: Mutex::new(PersistedState::default()),
            last_save: Mutex::new(None),
            write_lock: Mutex::new(()),
            debounce,
        }
    }

    pub fn open(storage: S, debounce: Duration) -> Self {
        let store = Self::new(storage, debounce);
        store.load();
        store
    }

    pub fn location(&self) -> String {
        self.storage.describe()
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Never fails: a missing or unreadable document leaves the defaults in place.
    pub fn load(&self) -> PersistedState {
        match self.read_merged() {
            Ok(Some(loaded)) => {
                info!(location = %self.location(), "statestore: loaded state");
                *lock(&self.state) = loaded;
            }
            Ok(None) => {
                debug!(location = %self.location(), "statestore: no saved state, using defaults");
            }
            Err(e) => {
                warn!(location = %self.location(), "statestore: ignoring unreadable state: {e}");
            }
        }
        self.snapshot()
    }

    fn read_merged(&self) -> Result<Option<PersistedState>> {
        let Some(bytes) = self.storage.read()? else {
            return Ok(None);
        };
        let loaded: JsonValue = serde_json::from_slice(&bytes)?;
        let defaults = PersistedState::default();
        Ok(Some(PersistedState::merged_over(&defaults, loaded)?))
    }

    /// Returns whether a write happened. Unforced saves are skipped until the
    /// debounce interval has passed since the last successful write.
    pub fn save(&self, force: bool) -> bool {
        match self.try_save(force) {
            Ok(saved) => saved,
            Err(e) => {
                error!(location = %self.location(), "statestore: save failed: {e}");
                false
            }
        }
    }

    pub fn try_save(&self, force: bool) -> Result<bool> {
        if !force && !self.debounce_elapsed() {
            return Ok(false);
        }

        let _writer = lock(&self.write_lock);
        let snapshot = {
            let mut st = lock(&self.state);
            st.last_updated = Utc::now();
            st.clone()
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        self.storage.write(&bytes)?;

        *lock(&self.last_save) = Some(Instant::now());
        debug!(location = %self.location(), force, "statestore: saved state");
        Ok(true)
    }

    fn debounce_elapsed(&self) -> bool {
        if self.debounce.is_zero() {
            return true;
        }
        match *lock(&self.last_save) {
            Some(at) => at.elapsed() >= self.debounce,
            None => true,
        }
    }

    pub fn snapshot(&self) -> PersistedState {
        lock(&self.state).clone()
    }

    fn update<F: FnOnce(&mut PersistedState)>(&self, f: F) {
        f(&mut lock(&self.state));
    }

    pub fn update_catalog_info(&self, catalog: &Catalog) {
        self.update(|st| st.catalog = Some(catalog.clone()));
        self.save(false);
    }

    pub fn update_model_info(&self, catalog: &Catalog, active: &ActiveSelection) {
        self.update(|st| {
            st.catalog = Some(catalog.clone());
            st.active = Some(active.clone());
        });
        self.save(false);
    }

    pub fn update_config<I, K>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, JsonValue)>,
        K: Into<String>,
    {
        self.update(|st| {
            for (k, v) in entries {
                st.config.insert(k.into(), v);
            }
        });
        self.save(false);
    }

    pub fn update_database_info(&self, databases: BTreeMap<String, JsonValue>, current: Option<String>) {
        self.update(|st| {
            st.databases = databases;
            st.current_db = current;
        });
        self.save(false);
    }

    pub fn update_last_query(&self, record: QueryRecord) {
        self.update(|st| st.last_query = Some(record));
        self.save(false);
    }

    pub fn summary(&self) -> String {
        summary(&self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelops::BackendMode;

    fn store(debounce: Duration) -> (StateStore<InMemoryStorage>, InMemoryStorage) {
        let mem = InMemoryStorage::new();
        (StateStore::new(mem.clone(), debounce), mem)
    }

    #[test]
    fn test_unforced_save_is_debounced() {
        let (s, mem) = store(Duration::from_secs(60));
        assert!(s.save(false));
        assert!(!s.save(false));
        assert!(s.save(true));
        assert_eq!(mem.write_count(), 2);
    }

    #[test]
    fn test_zero_debounce_always_writes() {
        let (s, mem) = store(Duration::ZERO);
        s.update_config([("ui_port", JsonValue::from(9000))]);
        s.update_config([("ui_port", JsonValue::from(9001))]);
        assert_eq!(mem.write_count(), 2);
    }

    #[test]
    fn test_debounce_expires() {
        let (s, _mem) = store(Duration::from_millis(20));
        assert!(s.save(false));
        std::thread::sleep(Duration::from_millis(40));
        assert!(s.save(false));
    }

    #[test]
    fn test_corrupt_document_keeps_defaults() {
        let mem = InMemoryStorage::with_contents(b"{ not json".to_vec());
        let s = StateStore::open(mem, Duration::ZERO);
        assert_eq!(s.snapshot().config["ollama_host"], "http://localhost:11434");
        assert!(s.snapshot().active.is_none());
    }

    #[test]
    fn test_update_model_info_sets_both_sections() {
        let (s, mem) = store(Duration::ZERO);
        let catalog = Catalog::empty(BackendMode::Remote, "http://gpu:11434");
        let active = ActiveSelection::new(BackendMode::Remote, "http://gpu:11434", "phi:latest");
        s.update_model_info(&catalog, &active);

        let written: PersistedState = serde_json::from_slice(&mem.contents().unwrap()).unwrap();
        assert_eq!(written.active, Some(active));
        assert_eq!(written.catalog.unwrap().endpoint, "http://gpu:11434");
    }
}
