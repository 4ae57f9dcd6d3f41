use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modelops::{BackendMode, ModelDescriptor};
use serde::Deserialize;
use tracing::debug;

use crate::provider::{BackendError, LLMProvider, ProviderConnector, ProviderInfo};

#[derive(Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

impl From<TagEntry> for ModelDescriptor {
    fn from(t: TagEntry) -> Self {
        let mut d = ModelDescriptor::new(t.name, t.size);
        if let Some(m) = t.modified_at {
            d = d.with_modified(m);
        }
        if let Some(g) = t.digest {
            d = d.with_digest(g);
        }
        if let Some(x) = t.details {
            d = d.with_details(x);
        }
        d
    }
}

#[derive(Deserialize)]
struct ShowResponse {
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Talks to an Ollama-compatible HTTP API.
pub struct OllamaHttpBackend {
    mode: BackendMode,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaHttpBackend {
    pub fn new(mode: BackendMode, base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            mode,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport(&self, e: reqwest::Error) -> BackendError {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Unreachable {
                endpoint: self.base_url.clone(),
                reason: e.to_string(),
            }
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.decode(resp, None).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        model: &str,
        body: serde_json::Value,
    ) -> Result<T, BackendError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.decode(resp, Some(model)).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
        model: Option<&str>,
    ) -> Result<T, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return resp.json::<T>().await.map_err(|e| self.transport(e));
        }

        let text = resp.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        debug!(endpoint = %self.base_url, status = status.as_u16(), "ollama: {body}");

        if modelops::is_incompatibility(&body) {
            return Err(BackendError::Incompatible(body));
        }
        match (status.as_u16(), model) {
            (404, Some(m)) => Err(BackendError::NotFound(m.to_string())),
            (code, _) => Err(BackendError::Http { status: code, body }),
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaHttpBackend {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "ollama".to_string(),
            mode: self.mode,
            base_url: self.base_url.clone(),
        }
    }

    async fn version(&self) -> Result<String, BackendError> {
        let v: VersionResponse = self.get("/api/version").await?;
        Ok(v.version)
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
        let tags: TagsResponse = self.get("/api/tags").await?;
        Ok(tags.models.into_iter().map(ModelDescriptor::from).collect())
    }

    async fn show_model(&self, name: &str) -> Result<ModelDescriptor, BackendError> {
        let body = serde_json::json!({ "model": name, "name": name });
        let show: ShowResponse = self.post("/api/show", name, body).await?;
        let mut d = ModelDescriptor::new(name, None);
        if let Some(m) = show.modified_at {
            d = d.with_modified(m);
        }
        if let Some(x) = show.details {
            d = d.with_details(x);
        }
        Ok(d)
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, BackendError> {
        let body = serde_json::json!({ "model": model, "prompt": prompt, "stream": false });
        let out: GenerateResponse = self.post("/api/generate", model, body).await?;
        Ok(out.response)
    }

    async fn pull(&self, model: &str) -> Result<(), BackendError> {
        let body = serde_json::json!({ "model": model, "name": model, "stream": false });
        match self.post::<serde_json::Value>("/api/pull", model, body).await {
            Ok(_) => Ok(()),
            Err(e @ BackendError::Unreachable { .. }) => Err(e),
            Err(e) => Err(BackendError::Acquisition(e.to_string())),
        }
    }

    async fn load(&self, model: &str) -> Result<(), BackendError> {
        // an empty generate request loads the model and returns immediately
        let body = serde_json::json!({ "model": model, "keep_alive": "5m" });
        self.post::<serde_json::Value>("/api/generate", model, body).await?;
        Ok(())
    }
}

/// Builds HTTP backends sharing one client and checks for a local binary on PATH.
pub struct HttpConnector {
    client: reqwest::Client,
    ollama_bin: String,
}

impl HttpConnector {
    pub fn new(ollama_bin: impl Into<String>, connect_timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| BackendError::Process(format!("http client: {e}")))?;
        Ok(Self {
            client,
            ollama_bin: ollama_bin.into(),
        })
    }
}

#[async_trait]
impl ProviderConnector for HttpConnector {
    async fn local_installed(&self) -> bool {
        crate::provider_cli::binary_on_path(&self.ollama_bin)
    }

    fn connect(&self, mode: BackendMode, endpoint: &str) -> Result<Arc<dyn LLMProvider>, BackendError> {
        Ok(Arc::new(OllamaHttpBackend::new(mode, endpoint, self.client.clone())))
    }
}
