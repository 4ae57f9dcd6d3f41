use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use statestore::{FileBackedStorage, StateStore, Storage};
use tracing::info;

use orchestrator::config::{AppConfig, ProbeStrategy};
use orchestrator::provider::ProviderConnector;
use orchestrator::provider_cli::CliConnector;
use orchestrator::provider_ollama::HttpConnector;
use orchestrator::reporter::StatusReporter;
use orchestrator::runtime::ModelManager;
use orchestrator::state::{live_status, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;
    let started_at = Instant::now();

    // --- State store ---
    let storage: Box<dyn Storage> = Box::new(FileBackedStorage::new(&cfg.state_file));
    let store = Arc::new(StateStore::open(storage, cfg.save_debounce));

    // --- Backend access ---
    let connector: Arc<dyn ProviderConnector> = match cfg.probe {
        ProbeStrategy::Api => Arc::new(
            HttpConnector::new(&cfg.ollama_bin, cfg.manager.timeouts.connection_check)
                .context("Failed to build HTTP client")?,
        ),
        ProbeStrategy::Cli => Arc::new(CliConnector::new(
            &cfg.ollama_bin,
            cfg.manager.timeouts.system_commands,
        )),
    };

    // --- Lifecycle ---
    let manager = Arc::new(ModelManager::new(cfg.manager.clone(), connector, store.clone()));
    let snap = manager
        .bootstrap()
        .await
        .context("No inference backend available")?;
    info!(phase = %snap.phase, selection = %snap.selection, "lifecycle: ready");

    // --- Status reporter ---
    let reporter = Arc::new(StatusReporter::new(
        store.clone(),
        &cfg.reporter,
        Some(live_status(manager.clone(), started_at)),
    ));
    reporter.start();
    reporter.update_now(true).await;

    let app_state = Arc::new(AppState::new(manager, reporter.clone(), started_at));
    let app = orchestrator::router(app_state);

    let addr = &cfg.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("orchestrator listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Teardown ---
    reporter.update_now(true).await;
    reporter.stop().await;
    info!("orchestrator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
    }
}
