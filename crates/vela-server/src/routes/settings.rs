//! Platform settings endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use vela_core::Platform;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings))
}

/// The snapshot currently in effect on this server.
async fn get_settings(State(state): State<AppState>) -> Json<Platform> {
    Json((*state.settings.load()).clone())
}
