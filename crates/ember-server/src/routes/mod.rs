use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

pub mod chat;
pub mod errors;
pub mod health;
pub mod models;

// Merge the route handlers
pub fn configure(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::routes(state.clone()))
        .merge(models::routes(state.clone()))
        .merge(chat::routes(state))
}
