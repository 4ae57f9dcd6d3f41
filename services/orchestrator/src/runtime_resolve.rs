use std::sync::{Arc, PoisonError};

use modelops::{Attempt, AttemptOutcome, BackendMode, Catalog, ModelDescriptor, Resolution};
use tracing::{error, info, warn};

use crate::probe::{self, bounded};
use crate::provider::{BackendError, LLMProvider};
use crate::runtime::{ModelCheck, ModelManager, RuntimeSnapshot};

pub const TEST_PROMPT: &str = "Generate 'Hello World'";

pub(crate) struct Resolved {
    pub resolution: Resolution,
    pub catalog: Catalog,
    /// True when a pull changed the catalog.
    pub acquired: bool,
}

impl ModelManager {
    /// Picks the preferred model if usable, else the first usable fallback.
    ///
    /// Blacklisted names are never returned unless the whole chain is
    /// exhausted, in which case the request comes back unresolved with
    /// `was_fallback` set.
    pub async fn resolve_best_model(&self, preferred: &str) -> Resolution {
        let _serial = self.serial.lock().await;
        let current = self.snapshot();
        let provider = current.handle.as_ref().map(|h| h.provider().clone());

        let resolved = self
            .resolve_in(
                provider.as_ref(),
                current.selection.mode,
                (*current.catalog).clone(),
                preferred,
            )
            .await;

        if resolved.acquired {
            let catalog = Arc::new(resolved.catalog);
            self.swap(RuntimeSnapshot {
                catalog: catalog.clone(),
                ..(*current).clone()
            });
            let store = self.store().clone();
            if let Err(e) = tokio::task::spawn_blocking(move || store.update_catalog_info(&catalog)).await {
                error!("lifecycle: catalog record task failed: {e}");
            }
        }
        resolved.resolution
    }

    pub(crate) async fn resolve_in(
        &self,
        provider: Option<&Arc<dyn LLMProvider>>,
        mode: BackendMode,
        mut catalog: Catalog,
        preferred: &str,
    ) -> Resolved {
        let blacklist = self.blacklist();
        let mut attempts = Vec::new();
        let mut acquired = false;

        // 1) preferred, as-is
        if !blacklist.contains(preferred) && catalog.contains(preferred) {
            attempts.push(Attempt {
                model: preferred.to_string(),
                outcome: AttemptOutcome::Selected,
            });
            return Resolved {
                resolution: Resolution {
                    model: preferred.to_string(),
                    was_fallback: false,
                    resolved: true,
                    attempts,
                },
                catalog,
                acquired,
            };
        }
        attempts.push(Attempt {
            model: preferred.to_string(),
            outcome: if blacklist.contains(preferred) {
                AttemptOutcome::Blacklisted
            } else {
                AttemptOutcome::Missing
            },
        });

        // 2) fallback chain; only local mode can acquire
        for (candidate, blocked) in self.config.fallbacks.candidates(&blacklist) {
            if blocked {
                attempts.push(Attempt {
                    model: candidate.to_string(),
                    outcome: AttemptOutcome::Blacklisted,
                });
                continue;
            }

            let usable = if catalog.contains(candidate) {
                Ok(())
            } else {
                match (mode, provider) {
                    (BackendMode::Local, Some(p)) => match self.acquire(p, candidate, &catalog).await {
                        Ok(refreshed) => {
                            catalog = refreshed;
                            acquired = true;
                            Ok(())
                        }
                        Err(e) => Err(AttemptOutcome::AcquisitionFailed {
                            kind: e.kind(),
                            detail: e.to_string(),
                        }),
                    },
                    _ => Err(AttemptOutcome::Missing),
                }
            };

            match usable {
                Ok(()) => {
                    attempts.push(Attempt {
                        model: candidate.to_string(),
                        outcome: AttemptOutcome::Selected,
                    });
                    info!(preferred = %preferred, model = %candidate, "lifecycle: using fallback model");
                    return Resolved {
                        resolution: Resolution {
                            model: candidate.to_string(),
                            was_fallback: true,
                            resolved: true,
                            attempts,
                        },
                        catalog,
                        acquired,
                    };
                }
                Err(outcome) => attempts.push(Attempt {
                    model: candidate.to_string(),
                    outcome,
                }),
            }
        }

        // 3) exhausted: hand the request back rather than block
        warn!(preferred = %preferred, tried = attempts.len(), "lifecycle: fallback chain exhausted");
        Resolved {
            resolution: Resolution {
                model: preferred.to_string(),
                was_fallback: true,
                resolved: false,
                attempts,
            },
            catalog,
            acquired,
        }
    }

    /// Pulls `model` and returns a catalog that contains it.
    pub(crate) async fn acquire(
        &self,
        provider: &Arc<dyn LLMProvider>,
        model: &str,
        current: &Catalog,
    ) -> Result<Catalog, BackendError> {
        let timeouts = &self.config.timeouts;
        info!(model = %model, endpoint = %current.endpoint, "lifecycle: pulling model");
        bounded("pull", timeouts.model_download, provider.pull(model)).await?;

        let mut refreshed = match probe::list_models(provider.as_ref(), timeouts).await {
            Ok(c) => c,
            Err(e) => {
                warn!(model = %model, "lifecycle: catalog refresh after pull failed: {e}");
                current.clone()
            }
        };
        if !refreshed.contains(model) {
            refreshed
                .models
                .insert(model.to_string(), ModelDescriptor::new(model, None));
        }
        info!(model = %model, "lifecycle: pulled model");
        Ok(refreshed)
    }

    /// Minimal generation against `name`. Incompatible models are blacklisted.
    pub async fn test_model(&self, name: &str) -> ModelCheck {
        let failed = |error: String, blacklisted: bool| ModelCheck {
            model: name.to_string(),
            ok: false,
            error: Some(error),
            blacklisted,
        };

        if self.is_blacklisted(name) {
            return failed("Model is blacklisted due to known compatibility issues".to_string(), true);
        }
        let current = self.snapshot();
        let Some(handle) = current.handle.as_ref() else {
            return failed("No working backend".to_string(), false);
        };

        let timeouts = &self.config.timeouts;
        let run = bounded(
            "generate",
            timeouts.inference_first_token,
            handle.provider().generate(name, TEST_PROMPT),
        )
        .await;

        match run {
            Ok(_) => ModelCheck {
                model: name.to_string(),
                ok: true,
                error: None,
                blacklisted: false,
            },
            Err(e) if e.is_incompatible() => {
                let added = self
                    .blacklist
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name);
                if added {
                    warn!(model = %name, "lifecycle: blacklisted incompatible model: {e}");
                }
                failed(format!("Tensor initialization error: {e}"), true)
            }
            Err(BackendError::Timeout { .. }) => failed("Timeout waiting for model response".to_string(), false),
            Err(e) => failed(format!("Model test failed: {e}"), false),
        }
    }
}
