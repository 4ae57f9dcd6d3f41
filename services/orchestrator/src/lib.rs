//! Backend and model lifecycle over Ollama-compatible endpoints, with a
//! background status reporter and an HTTP control surface.

pub mod catalog;
pub mod config;
pub mod probe;
pub mod provider;
pub mod provider_cli;
pub mod provider_memory;
pub mod provider_ollama;
pub mod reporter;
pub mod routes_models;
pub mod routes_runtime;
pub mod runtime;
pub mod runtime_resolve;
pub mod state;

pub use state::SharedState;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/runtime", get(routes_runtime::get_runtime))
        .route("/backend", get(routes_runtime::get_backend))
        .route("/mode", post(routes_runtime::post_mode))
        .route("/queries", post(routes_runtime::post_query))
        .route("/databases", post(routes_runtime::post_databases))
        .route("/status/refresh", post(routes_runtime::post_status_refresh))
        .route("/models", get(routes_models::get_models))
        .route("/models/:name", get(routes_models::get_model))
        .route("/models/resolve", post(routes_models::post_resolve))
        .route("/models/active", post(routes_models::post_active))
        .route("/models/test", post(routes_models::post_test))
        .route("/models/refresh", post(routes_models::post_refresh))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
