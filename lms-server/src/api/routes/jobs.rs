//! Background job operator routes.
//!
//! Dead-lettered jobs stop retrying on their own; these routes are the
//! explicit operator path to inspect and revive them.

use axum::http::HeaderMap;
use axum::{Json, Router, extract::Path, extract::Query, extract::State, routing::get, routing::post};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::TaskView;
use crate::api::routes::{authenticate, require_admin};
use crate::api::server::AppState;

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/dead-letter", get(list_dead_letter))
        .route("/{id}/requeue", post(requeue_job))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// List recent jobs across all queues.
#[utoipa::path(
    get,
    path = "/api/jobs",
    params(("limit" = Option<i64>, Query, description = "Max rows, default 50")),
    responses((status = 200, body = [TaskView]))
)]
pub(crate) async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<TaskView>>> {
    let claims = authenticate(&state, &headers, None)?;
    require_admin(&claims)?;

    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Task queue not configured"))?;
    let tasks = queue
        .repository()
        .list_recent(query.limit.unwrap_or(50).clamp(1, 500))
        .await
        .map_err(ApiError::from)?;
    Ok(Json(tasks.into_iter().map(TaskView::from).collect()))
}

/// List dead-lettered jobs.
#[utoipa::path(
    get,
    path = "/api/jobs/dead-letter",
    responses((status = 200, body = [TaskView]))
)]
pub(crate) async fn list_dead_letter(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<TaskView>>> {
    let claims = authenticate(&state, &headers, None)?;
    require_admin(&claims)?;

    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Task queue not configured"))?;
    let tasks = queue
        .repository()
        .list_dead_letter()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(tasks.into_iter().map(TaskView::from).collect()))
}

/// Requeue a dead-lettered job with a fresh attempt budget.
#[utoipa::path(
    post,
    path = "/api/jobs/{id}/requeue",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, body = TaskView),
        (status = 422, description = "Task is not dead-lettered")
    )
)]
pub(crate) async fn requeue_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<TaskView>> {
    let claims = authenticate(&state, &headers, None)?;
    require_admin(&claims)?;

    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Task queue not configured"))?;
    let task = queue.requeue_dead_letter(&id).await.map_err(ApiError::from)?;
    Ok(Json(task.into()))
}
