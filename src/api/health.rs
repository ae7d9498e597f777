use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    let info = state.app_info();
    let enabled: Vec<String> = info
        .vendors
        .iter()
        .filter(|(_, vendor)| vendor.enabled)
        .map(|(id, _)| id.to_string())
        .collect();
    Json(json!({
        "status": format!("{} is running", info.name),
        "config": {
            "enabled_vendors": enabled,
            "body_size_limit_bytes": config.server.body_size_limit_bytes,
            "features": {
                "log_level": config.features.log_level,
            }
        }
    }))
}
