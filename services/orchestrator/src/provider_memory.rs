//! Scripted provider (for testing and demos)

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use modelops::{BackendMode, ModelDescriptor};

use crate::provider::{BackendError, LLMProvider, ProviderConnector, ProviderInfo};

#[derive(Default)]
struct Script {
    reachable: bool,
    models: BTreeMap<String, ModelDescriptor>,
    pullable: BTreeSet<String>,
    load_failures: BTreeMap<String, String>,
    generate_failures: BTreeMap<String, String>,
    delay: Option<Duration>,
    pull_delay: Option<Duration>,
    calls: Vec<String>,
}

pub struct InMemoryProvider {
    mode: BackendMode,
    endpoint: String,
    script: Mutex<Script>,
}

impl InMemoryProvider {
    pub fn new(mode: BackendMode, endpoint: impl Into<String>) -> Self {
        Self {
            mode,
            endpoint: endpoint.into(),
            script: Mutex::new(Script {
                reachable: true,
                ..Script::default()
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_models<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for n in names {
            self.add_model(n);
        }
        self
    }

    pub fn unreachable(self) -> Self {
        self.set_reachable(false);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.script().delay = Some(delay);
        self
    }

    pub fn with_pull_delay(self, delay: Duration) -> Self {
        self.script().pull_delay = Some(delay);
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.script().reachable = reachable;
    }

    pub fn add_model(&self, name: impl Into<String>) {
        let name = name.into();
        self.script()
            .models
            .insert(name.clone(), ModelDescriptor::new(name, Some(1 << 30)));
    }

    pub fn allow_pull(&self, name: impl Into<String>) {
        self.script().pullable.insert(name.into());
    }

    pub fn fail_load(&self, name: impl Into<String>, error: impl Into<String>) {
        self.script().load_failures.insert(name.into(), error.into());
    }

    pub fn fail_generate(&self, name: impl Into<String>, error: impl Into<String>) {
        self.script().generate_failures.insert(name.into(), error.into());
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.script().models.contains_key(name)
    }

    /// Every call received, e.g. `"version"`, `"pull phi:latest"`.
    pub fn calls(&self) -> Vec<String> {
        self.script().calls.clone()
    }

    async fn begin(&self, call: String) -> Result<(), BackendError> {
        let (delay, reachable) = {
            let mut s = self.script();
            let delay = if call.starts_with("pull ") {
                s.pull_delay.or(s.delay)
            } else {
                s.delay
            };
            s.calls.push(call);
            (delay, s.reachable)
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if reachable {
            Ok(())
        } else {
            Err(BackendError::Unreachable {
                endpoint: self.endpoint.clone(),
                reason: "connection refused".to_string(),
            })
        }
    }

    fn require(&self, model: &str) -> Result<(), BackendError> {
        if self.has_model(model) {
            Ok(())
        } else {
            Err(BackendError::NotFound(model.to_string()))
        }
    }
}

#[async_trait]
impl LLMProvider for InMemoryProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "memory".to_string(),
            mode: self.mode,
            base_url: self.endpoint.clone(),
        }
    }

    async fn version(&self) -> Result<String, BackendError> {
        self.begin("version".to_string()).await?;
        Ok("0.0.0-memory".to_string())
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
        self.begin("list".to_string()).await?;
        Ok(self.script().models.values().cloned().collect())
    }

    async fn show_model(&self, name: &str) -> Result<ModelDescriptor, BackendError> {
        self.begin(format!("show {name}")).await?;
        self.script()
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    async fn generate(&self, model: &str, _prompt: &str) -> Result<String, BackendError> {
        self.begin(format!("generate {model}")).await?;
        if let Some(body) = self.script().generate_failures.get(model).cloned() {
            return Err(BackendError::Http { status: 500, body });
        }
        self.require(model)?;
        Ok("Hello World".to_string())
    }

    async fn pull(&self, model: &str) -> Result<(), BackendError> {
        self.begin(format!("pull {model}")).await?;
        let mut s = self.script();
        if s.pullable.contains(model) {
            s.models
                .insert(model.to_string(), ModelDescriptor::new(model, Some(1 << 30)));
            Ok(())
        } else {
            Err(BackendError::Acquisition(format!(
                "pull model manifest: file does not exist: {model}"
            )))
        }
    }

    async fn load(&self, model: &str) -> Result<(), BackendError> {
        self.begin(format!("load {model}")).await?;
        if let Some(body) = self.script().load_failures.get(model).cloned() {
            return Err(BackendError::Http { status: 500, body });
        }
        self.require(model)
    }
}

/// Hands out registered providers by endpoint.
pub struct InMemoryConnector {
    local_installed: AtomicBool,
    providers: Mutex<HashMap<String, Arc<InMemoryProvider>>>,
}

impl InMemoryConnector {
    pub fn new(local_installed: bool) -> Self {
        Self {
            local_installed: AtomicBool::new(local_installed),
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with(self, provider: Arc<InMemoryProvider>) -> Self {
        self.add(provider);
        self
    }

    pub fn add(&self, provider: Arc<InMemoryProvider>) {
        self.providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.endpoint.clone(), provider);
    }

    pub fn set_local_installed(&self, installed: bool) {
        self.local_installed.store(installed, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderConnector for InMemoryConnector {
    async fn local_installed(&self) -> bool {
        self.local_installed.load(Ordering::SeqCst)
    }

    fn connect(&self, mode: BackendMode, endpoint: &str) -> Result<Arc<dyn LLMProvider>, BackendError> {
        let providers = self.providers.lock().unwrap_or_else(PoisonError::into_inner);
        match providers.get(endpoint) {
            Some(p) if p.mode == mode => Ok(p.clone() as Arc<dyn LLMProvider>),
            _ => Err(BackendError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: format!("no {mode} provider registered"),
            }),
        }
    }
}
