//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! A single page at `/` drives the whole sign-in flow, including the Google
//! callback. `/api/view` exposes the same render outcome as JSON.

pub mod page;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(page::show))
        .route("/logout", post(page::logout))
        .route("/api/view", get(page::view_json))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
