use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness plus a snapshot of what the inference runtime can serve.
/// Reports `degraded` rather than failing when the runtime is down so
/// load balancers keep the server itself in rotation.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let connected = state.runtime.check_health().await;
    let models = if connected {
        state.registry.list_available().await.unwrap_or_default()
    } else {
        Vec::new()
    };

    Json(json!({
        "status": if connected { "healthy" } else { "degraded" },
        "runtime_connected": connected,
        "models_available": models.len(),
        "models": models.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
    }))
}

async fn status() -> &'static str {
    "ok"
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}
