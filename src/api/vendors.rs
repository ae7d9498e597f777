use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;

use crate::protocol::app::AppInfo;
use crate::state::AppState;

/// Vendors, their projects and models. Project keys are never exposed.
pub fn handler(State(state): State<Arc<AppState>>) -> Json<AppInfo> {
    Json(state.app_info().clone())
}
