use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use dvr_core::{CompletedRecording, DvrEngine, DvrJob, DvrResult, EngineStatus, ScheduleRequest};
use http::StatusCode;

use super::auth::Owner;
use super::error::{ApiError, ApiResult};
use super::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route("/dvr/schedule", post(schedule))
        .route("/dvr/jobs", get(jobs))
        .route("/dvr/jobs/:id", get(job).delete(cancel))
        .route("/dvr/recordings", get(recordings))
        .route("/dvr/recordings/:id", delete(delete_recording))
        .route("/dvr/status", get(status))
}

async fn schedule(
    State(state): State<AppState>,
    Extension(Owner(user_id)): Extension<Owner>,
    Json(request): Json<ScheduleRequest>,
) -> ApiResult<(StatusCode, Json<DvrJob>)> {
    let job = blocking(&state, move |engine| engine.schedule_request(user_id, request)).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn jobs(
    State(state): State<AppState>,
    Extension(Owner(user_id)): Extension<Owner>,
) -> ApiResult<Json<Vec<DvrJob>>> {
    Ok(Json(blocking(&state, move |engine| engine.jobs(user_id)).await?))
}

async fn job(
    State(state): State<AppState>,
    Extension(Owner(user_id)): Extension<Owner>,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<DvrJob>> {
    Ok(Json(blocking(&state, move |engine| engine.job(user_id, job_id)).await?))
}

async fn cancel(
    State(state): State<AppState>,
    Extension(Owner(user_id)): Extension<Owner>,
    Path(job_id): Path<i64>,
) -> ApiResult<Json<DvrJob>> {
    Ok(Json(
        blocking(&state, move |engine| engine.cancel_job(user_id, job_id)).await?,
    ))
}

async fn recordings(
    State(state): State<AppState>,
    Extension(Owner(user_id)): Extension<Owner>,
) -> ApiResult<Json<Vec<CompletedRecording>>> {
    Ok(Json(blocking(&state, move |engine| engine.recordings(user_id)).await?))
}

async fn delete_recording(
    State(state): State<AppState>,
    Extension(Owner(user_id)): Extension<Owner>,
    Path(recording_id): Path<i64>,
) -> ApiResult<StatusCode> {
    blocking(&state, move |engine| engine.delete_recording(user_id, recording_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn status(State(state): State<AppState>) -> ApiResult<Json<EngineStatus>> {
    Ok(Json(blocking(&state, |engine| engine.status()).await?))
}

/// The engine talks to SQLite and the filesystem synchronously.
async fn blocking<T, F>(state: &AppState, call: F) -> ApiResult<T>
where
    F: FnOnce(&DvrEngine) -> DvrResult<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || call(&engine))
        .await
        .map_err(|err| ApiError::Internal(err.into()))?
        .map_err(ApiError::from)
}
