use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modelops::{BackendMode, ModelDescriptor};
pub use modelops::ErrorKind;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub mode: BackendMode,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("backend unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("{op} timed out after {}s", after.as_secs_f32())]
    Timeout { op: &'static str, after: Duration },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("model not found: {0}")]
    NotFound(String),

    #[error("incompatible model: {0}")]
    Incompatible(String),

    #[error("pull failed: {0}")]
    Acquisition(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Unreachable { .. } | BackendError::Timeout { .. } => ErrorKind::Unavailable,
            BackendError::Incompatible(_) => ErrorKind::Incompatible,
            BackendError::Acquisition(_) => ErrorKind::Acquisition,
            BackendError::NotFound(_) => ErrorKind::NotFound,
            BackendError::Http { .. } | BackendError::Process(_) | BackendError::Decode(_) => {
                if self.is_incompatible() {
                    ErrorKind::Incompatible
                } else {
                    ErrorKind::Protocol
                }
            }
        }
    }

    /// Also true for errors whose text carries the tensor signature, since
    /// runners report it as a plain 500 or a non-zero exit.
    pub fn is_incompatible(&self) -> bool {
        matches!(self, BackendError::Incompatible(_)) || modelops::is_incompatibility(&self.to_string())
    }
}

/// One inference endpoint. Implementations do not bound their own calls;
/// callers wrap every call with [`crate::probe::bounded`].
#[async_trait]
pub trait LLMProvider: Send + Sync {
    fn info(&self) -> ProviderInfo;
    async fn version(&self) -> Result<String, BackendError>;
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, BackendError>;
    async fn show_model(&self, name: &str) -> Result<ModelDescriptor, BackendError>;
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, BackendError>;
    async fn pull(&self, model: &str) -> Result<(), BackendError>;
    /// Brings the model into memory so the first real request is fast.
    async fn load(&self, model: &str) -> Result<(), BackendError>;
}

/// Builds providers for an endpoint and knows whether a local runner exists.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn local_installed(&self) -> bool;
    fn connect(&self, mode: BackendMode, endpoint: &str) -> Result<Arc<dyn LLMProvider>, BackendError>;
}
