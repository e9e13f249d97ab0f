use std::sync::Arc;

use axum::{extract::Query, extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use ember::runtime::ModelDescriptor;

use crate::routes::errors::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    /// Bypass the registry cache and ask the runtime directly.
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    name: String,
    size: u64,
    modified: String,
}

impl From<ModelDescriptor> for ModelInfo {
    fn from(descriptor: ModelDescriptor) -> Self {
        Self {
            name: descriptor.name,
            size: descriptor.size,
            modified: descriptor.modified_at.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ModelListResponse {
    models: Vec<ModelInfo>,
}

pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModelsQuery>,
) -> Result<Json<ModelListResponse>, ErrorResponse> {
    let models = if query.refresh {
        state.registry.refresh().await?
    } else {
        state.registry.list_available().await?
    };

    Ok(Json(ModelListResponse {
        models: models.into_iter().map(ModelInfo::from).collect(),
    }))
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/models", get(list_models))
        .with_state(state)
}
