use crate::error::AppError;
use crate::routes::ApiResponse;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use collection_backup::executor::BackupReport;
use collection_backup::models::{
    BackupMetadata, BackupStatus, BackupSummary, RestoreOptions, RestoreOutcome, ValidationReport,
};
use collection_backup::scheduler::SchedulerStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/summary", get(summary))
        .route("/{id}", get(get_backup).delete(delete_backup))
        .route("/{id}/validate", get(validate_backup))
        .route("/{id}/restore", axum::routing::post(restore_backup))
}

#[derive(Deserialize, Default)]
pub struct CreateBackupRequest {
    #[serde(default)]
    pub collections: Option<Vec<String>>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub remote: bool,
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub remote: bool,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    #[serde(flatten)]
    pub backups: BackupSummary,
    pub scheduler: SchedulerStatus,
}

async fn create_backup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBackupRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BackupReport>>), AppError> {
    let report = state.service.create_backup(request.collections).await?;
    let errors = report.metadata.errors.clone();

    let (status, success) = match report.metadata.status {
        BackupStatus::Failed => (StatusCode::INTERNAL_SERVER_ERROR, false),
        BackupStatus::Completed | BackupStatus::Partial => (StatusCode::CREATED, true),
    };
    Ok((status, Json(ApiResponse::with_errors(success, report, errors))))
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<BackupMetadata>>>, AppError> {
    let backups = state.service.list(query.limit, query.remote).await?;
    Ok(Json(ApiResponse::ok(backups)))
}

async fn summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<SummaryResponse>>, AppError> {
    let backups = state.service.summary().await?;
    let scheduler = state.scheduler.status().await;
    Ok(Json(ApiResponse::ok(SummaryResponse { backups, scheduler })))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<BackupMetadata>>, AppError> {
    let metadata = state.service.get(&id).await?;
    Ok(Json(ApiResponse::ok(metadata)))
}

async fn validate_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ValidationReport>>, AppError> {
    let report = state.service.validate(&id).await?;
    let errors = report.errors.clone();
    Ok(Json(ApiResponse::with_errors(true, report, errors)))
}

async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(options): Json<RestoreOptions>,
) -> Result<Json<ApiResponse<RestoreOutcome>>, AppError> {
    let outcome = state.service.restore(&id, options).await?;
    let errors: Vec<String> = outcome
        .results
        .iter()
        .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.collection, e)))
        .collect();
    Ok(Json(ApiResponse::with_errors(outcome.success, outcome, errors)))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    state.service.delete(&id, query.remote).await?;
    Ok(Json(ApiResponse::ok(id)))
}
