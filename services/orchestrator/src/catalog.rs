use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use modelops::{BackendMode, Catalog, ModelDescriptor};
use tracing::{debug, info};

use crate::config::Timeouts;
use crate::probe::{self, bounded};
use crate::provider::{BackendError, LLMProvider};

type Key = (BackendMode, String);

/// Last discovered catalog per backend. Entries are immutable and replaced whole.
pub struct ModelCatalog {
    entries: RwLock<HashMap<Key, Arc<Catalog>>>,
    timeouts: Timeouts,
}

impl ModelCatalog {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            timeouts,
        }
    }

    /// Discovers without installing.
    pub async fn fetch(&self, provider: &dyn LLMProvider) -> Result<Catalog, BackendError> {
        probe::list_models(provider, &self.timeouts).await
    }

    pub async fn refresh(&self, provider: &dyn LLMProvider) -> Result<Arc<Catalog>, BackendError> {
        let catalog = self.fetch(provider).await?;
        info!(endpoint = %catalog.endpoint, models = catalog.len(), "catalog: refreshed");
        Ok(self.install(Arc::new(catalog)))
    }

    pub fn install(&self, catalog: Arc<Catalog>) -> Arc<Catalog> {
        let key = (catalog.mode, catalog.endpoint.clone());
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, catalog.clone());
        catalog
    }

    pub fn get(&self, mode: BackendMode, endpoint: &str) -> Option<Arc<Catalog>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(mode, endpoint.to_string()))
            .cloned()
    }

    /// Cached entry first, then a single-model probe. Any probe failure is "not found".
    pub async fn describe(&self, provider: &dyn LLMProvider, name: &str) -> Option<ModelDescriptor> {
        let info = provider.info();
        if let Some(found) = self
            .get(info.mode, &info.base_url)
            .and_then(|c| c.get(name).cloned())
        {
            return Some(found);
        }
        match bounded("show_model", self.timeouts.api_calls, provider.show_model(name)).await {
            Ok(d) => Some(d),
            Err(e) => {
                debug!(model = %name, "catalog: describe failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider_memory::InMemoryProvider;

    #[tokio::test]
    async fn test_refresh_replaces_whole_catalog() {
        let p = InMemoryProvider::new(BackendMode::Remote, "http://gpu:11434").with_models(["a", "b"]);
        let cat = ModelCatalog::new(Timeouts::default());

        let first = cat.refresh(&p).await.unwrap();
        assert_eq!(first.len(), 2);

        p.add_model("c");
        let second = cat.refresh(&p).await.unwrap();
        assert_eq!(second.len(), 3);
        // the earlier snapshot is untouched
        assert_eq!(first.len(), 2);
        assert_eq!(cat.get(BackendMode::Remote, "http://gpu:11434").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_does_not_install() {
        let p = InMemoryProvider::new(BackendMode::Local, "http://localhost:11434").with_models(["a"]);
        let cat = ModelCatalog::new(Timeouts::default());
        cat.fetch(&p).await.unwrap();
        assert!(cat.get(BackendMode::Local, "http://localhost:11434").is_none());
    }

    #[tokio::test]
    async fn test_describe_prefers_cache_then_probes() {
        let p = InMemoryProvider::new(BackendMode::Remote, "http://gpu:11434").with_models(["a"]);
        let cat = ModelCatalog::new(Timeouts::default());
        cat.refresh(&p).await.unwrap();

        assert_eq!(cat.describe(&p, "a").await.unwrap().name, "a");
        assert!(!p.calls().iter().any(|c| c == "show a"));

        p.add_model("late");
        assert_eq!(cat.describe(&p, "late").await.unwrap().name, "late");
        assert!(cat.describe(&p, "ghost").await.is_none());
    }
}
