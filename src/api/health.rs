use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary. Never requires authentication.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "diamond-relay is running",
        "config": {
            "upstream_endpoints_count": state.upstream.endpoints().len(),
            "endpoint_selection": state.upstream.selection_name(),
            "models_count": state.model_router.known_model_count(),
            "client_authentication": state.auth_enabled(),
            "max_concurrent_upstream_requests": state.transport.max_submissions(),
            "features": {
                "log_level": config.features.log_level,
                "token_counter": config.features.token_counter.to_string(),
                "system_prompt": config.features.system_prompt.is_some(),
                "default_temperature": config.features.default_temperature,
                "default_top_p": config.features.default_top_p,
            }
        }
    }))
}
