use std::collections::BTreeMap;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use modelops::{ActiveSelection, BackendMode};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderInfo;
use crate::routes_models::{reject, switch_rejection, Rejection};
use crate::runtime::{BackendInfo, LifecyclePhase, RuntimeSnapshot};
use crate::state::{format_uptime, SharedState};

#[derive(Serialize)]
pub struct RuntimeView {
    pub phase: LifecyclePhase,
    pub selection: ActiveSelection,
    pub since: DateTime<Utc>,
    pub provider: Option<ProviderInfo>,
    pub warmed: bool,
    pub handle_opened_at: Option<DateTime<Utc>>,
    pub models: usize,
    pub blacklist: Vec<String>,
    pub uptime: String,
}

fn view(st: &SharedState, snap: &RuntimeSnapshot) -> RuntimeView {
    RuntimeView {
        phase: snap.phase,
        selection: snap.selection.clone(),
        since: snap.since,
        provider: snap.handle.as_ref().map(|h| h.provider().info()),
        warmed: snap.handle.as_ref().is_some_and(|h| h.warmed()),
        handle_opened_at: snap.handle.as_ref().map(|h| h.opened_at()),
        models: snap.catalog.len(),
        blacklist: st.manager.blacklist().iter().map(str::to_string).collect(),
        uptime: format_uptime(st.started_at.elapsed()),
    }
}

pub async fn get_runtime(State(st): State<SharedState>) -> Json<RuntimeView> {
    let snap = st.manager.snapshot();
    Json(view(&st, &snap))
}

#[derive(Deserialize)]
pub struct ModeReq {
    pub mode: BackendMode,
    pub endpoint: Option<String>,
}

pub async fn post_mode(State(st): State<SharedState>, Json(req): Json<ModeReq>) -> Result<Json<RuntimeView>, Rejection> {
    match st.manager.try_switch_mode(req.mode, req.endpoint.as_deref()).await {
        Ok(snap) => Ok(Json(view(&st, &snap))),
        Err(e) => Err(switch_rejection(&e)),
    }
}

pub async fn get_backend(State(st): State<SharedState>) -> Json<BackendInfo> {
    Json(st.manager.backend_info().await)
}

#[derive(Deserialize)]
pub struct QueryReq {
    pub question: String,
    pub query: Option<String>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

pub async fn post_query(State(st): State<SharedState>, Json(req): Json<QueryReq>) -> StatusCode {
    st.manager
        .record_query_outcome(
            req.question,
            req.query,
            req.duration_ms.map(Duration::from_millis),
            req.error,
        )
        .await;
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct DatabasesReq {
    #[serde(default)]
    pub databases: BTreeMap<String, serde_json::Value>,
    pub current: Option<String>,
}

/// Records the known databases and the current one for recovery instructions.
pub async fn post_databases(State(st): State<SharedState>, Json(req): Json<DatabasesReq>) -> Result<StatusCode, Rejection> {
    let store = st.manager.store().clone();
    tokio::task::spawn_blocking(move || store.update_database_info(req.databases, req.current))
        .await
        .map_err(|e| {
            reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("database info task failed: {e}"),
                "retry the request",
            )
        })?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
pub struct RefreshReq {
    #[serde(default)]
    pub force: bool,
}

pub async fn post_status_refresh(
    State(st): State<SharedState>,
    body: Option<Json<RefreshReq>>,
) -> Result<StatusCode, Rejection> {
    let force = body.map(|Json(r)| r.force).unwrap_or(true);
    if st.reporter.update_now(force).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("could not write {}", st.reporter.status_file().display()),
            "check that the status file location is writable",
        ))
    }
}
