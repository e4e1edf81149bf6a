pub mod backups;
pub mod schedule;

use crate::state::AppState;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Body of every response: `{"success": .., "data": .., "errors": [..]}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            errors: Vec::new(),
        }
    }

    pub fn with_errors(success: bool, data: T, errors: Vec<String>) -> Self {
        Self {
            success,
            data,
            errors,
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/backups", backups::router())
        .nest("/api/schedule", schedule::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
