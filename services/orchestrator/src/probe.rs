use std::future::Future;
use std::time::Duration;

use modelops::Catalog;
use serde::Serialize;
use tracing::debug;

use crate::config::Timeouts;
use crate::provider::{BackendError, LLMProvider};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub version: Option<String>,
    pub error: Option<String>,
}

/// Runs `fut` for at most `after`. The call completes, fails or times out;
/// it is never left pending.
pub async fn bounded<T, F>(op: &'static str, after: Duration, fut: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res,
        Err(_) => Err(BackendError::Timeout { op, after }),
    }
}

pub async fn check_availability(provider: &dyn LLMProvider, timeouts: &Timeouts) -> Availability {
    match bounded("version", timeouts.connection_check, provider.version()).await {
        Ok(version) => Availability {
            available: true,
            version: Some(version),
            error: None,
        },
        Err(e) => {
            debug!(endpoint = %provider.info().base_url, "probe: unavailable: {e}");
            Availability {
                available: false,
                version: None,
                error: Some(e.to_string()),
            }
        }
    }
}

pub async fn list_models(provider: &dyn LLMProvider, timeouts: &Timeouts) -> Result<Catalog, BackendError> {
    let info = provider.info();
    let models = bounded("list_models", timeouts.api_calls, provider.list_models()).await?;
    Ok(Catalog::from_models(info.mode, info.base_url, models))
}
