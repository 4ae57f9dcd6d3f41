use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use modelops::{Catalog, ModelDescriptor, Resolution};
use serde::{Deserialize, Serialize};

use crate::runtime::{ModelCheck, SwitchError};
use crate::state::SharedState;

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub hint: String,
}

pub type Rejection = (StatusCode, Json<ApiError>);

pub fn reject(status: StatusCode, error: impl ToString, hint: &str) -> Rejection {
    (
        status,
        Json(ApiError {
            error: error.to_string(),
            hint: hint.to_string(),
        }),
    )
}

pub fn switch_rejection(e: &SwitchError) -> Rejection {
    let status = match e {
        SwitchError::Blacklisted(_) => StatusCode::CONFLICT,
        SwitchError::Acquisition { .. } | SwitchError::Initialize { .. } => StatusCode::BAD_GATEWAY,
        SwitchError::LocalNotInstalled
        | SwitchError::NoBackend
        | SwitchError::Connect { .. }
        | SwitchError::Unavailable { .. }
        | SwitchError::Catalog { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    reject(status, e, e.hint())
}

#[derive(Deserialize)]
pub struct ModelReq {
    pub model: String,
}

#[derive(Serialize)]
pub struct ActiveResp {
    pub model: String,
    pub mode: modelops::BackendMode,
    pub endpoint: String,
}

pub async fn get_models(State(st): State<SharedState>) -> Json<Catalog> {
    Json((*st.manager.catalog()).clone())
}

pub async fn get_model(
    State(st): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<ModelDescriptor>, Rejection> {
    match st.manager.describe_model(&name).await {
        Some(d) => Ok(Json(d)),
        None => Err(reject(
            StatusCode::NOT_FOUND,
            format!("model {name} not found"),
            "list available models with GET /models",
        )),
    }
}

pub async fn post_resolve(State(st): State<SharedState>, Json(req): Json<ModelReq>) -> Json<Resolution> {
    Json(st.manager.resolve_best_model(&req.model).await)
}

pub async fn post_active(
    State(st): State<SharedState>,
    Json(req): Json<ModelReq>,
) -> Result<Json<ActiveResp>, Rejection> {
    match st.manager.try_set_active_model(&req.model).await {
        Ok(snap) => Ok(Json(ActiveResp {
            model: snap.selection.model.clone(),
            mode: snap.selection.mode,
            endpoint: snap.selection.endpoint.clone(),
        })),
        Err(e) => Err(switch_rejection(&e)),
    }
}

pub async fn post_test(State(st): State<SharedState>, Json(req): Json<ModelReq>) -> Json<ModelCheck> {
    Json(st.manager.test_model(&req.model).await)
}

pub async fn post_refresh(State(st): State<SharedState>) -> Result<Json<Catalog>, Rejection> {
    st.manager
        .refresh_catalog()
        .await
        .map(|c| Json((*c).clone()))
        .map_err(|e| switch_rejection(&e))
}
