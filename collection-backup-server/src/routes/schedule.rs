use crate::error::AppError;
use crate::routes::ApiResponse;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use collection_backup::models::SchedulerConfigUpdate;
use collection_backup::scheduler::{LastRun, RunOutcome, SchedulerStatus};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_schedule).put(update_schedule))
        .route("/run", post(run_now))
}

async fn get_schedule(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SchedulerStatus>> {
    Json(ApiResponse::ok(state.scheduler.status().await))
}

async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SchedulerConfigUpdate>,
) -> Result<Json<ApiResponse<SchedulerStatus>>, AppError> {
    // The server owns the scheduler, so enabling it here also starts it.
    let config = state.scheduler.update_config(update).await?;
    if config.enabled {
        state.scheduler.start().await?;
    }
    Ok(Json(ApiResponse::ok(state.scheduler.status().await)))
}

async fn run_now(State(state): State<Arc<AppState>>) -> Result<Json<ApiResponse<LastRun>>, AppError> {
    match state.scheduler.run_now().await {
        RunOutcome::Finished(run) => {
            let errors = run.error.iter().cloned().collect();
            Ok(Json(ApiResponse::with_errors(run.error.is_none(), run, errors)))
        }
        RunOutcome::Skipped => Err(AppError::Conflict(
            "a scheduled run is already in progress".into(),
        )),
    }
}
