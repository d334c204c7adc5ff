//! Progress tracking routes (REST ingress of the notification bridge).

use axum::http::{HeaderMap, StatusCode};
use axum::{Json, Router, extract::Path, extract::State, routing::get, routing::post};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    ContentProgressEntry, CourseProgressSummary, ProgressRequest, ProgressResponse,
};
use crate::api::routes::authenticate;
use crate::api::server::AppState;
use crate::progress::ProgressUpdate;

/// Create the progress router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_progress))
        .route("/content/{content_id}", get(get_content_progress))
        .route("/course/{course_id}", get(get_course_progress))
}

/// Verify the caller is enrolled in a course.
async fn ensure_enrolled(state: &AppState, user_id: &str, course_id: &str) -> ApiResult<()> {
    let enrollments = state
        .enrollments
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Database not configured"))?;
    if !enrollments
        .is_enrolled(user_id, course_id)
        .await
        .map_err(ApiError::from)?
    {
        return Err(ApiError::forbidden(
            "You must be enrolled in this course to track progress",
        ));
    }
    Ok(())
}

/// Create or update progress for a content item.
///
/// Same persistence-and-broadcast contract as the realtime
/// `progress_update` message; both paths call the one bridge operation.
#[utoipa::path(
    post,
    path = "/api/progress",
    request_body = ProgressRequest,
    responses(
        (status = 201, body = ProgressResponse),
        (status = 403, description = "Not enrolled"),
        (status = 422, description = "Percentage out of range")
    )
)]
pub(crate) async fn create_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ProgressRequest>,
) -> ApiResult<(StatusCode, Json<ProgressResponse>)> {
    let claims = authenticate(&state, &headers, None)?;
    ensure_enrolled(&state, &claims.sub, &request.course_id).await?;

    let progress_service = state
        .progress_service
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Progress service not configured"))?;

    let row = progress_service
        .apply_update(
            &claims.sub,
            &request.course_id,
            &ProgressUpdate {
                content_id: request.content_id.clone(),
                progress_percentage: request.progress_percentage,
                last_position: request.last_position,
            },
        )
        .await
        .map_err(ApiError::from)?;

    Ok((StatusCode::CREATED, Json(row.into())))
}

/// Get progress for a specific content item.
#[utoipa::path(
    get,
    path = "/api/progress/content/{content_id}",
    params(("content_id" = String, Path, description = "Content record id")),
    responses((status = 200, body = ProgressResponse))
)]
pub(crate) async fn get_content_progress(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ProgressResponse>> {
    let claims = authenticate(&state, &headers, None)?;

    let contents = state
        .contents
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Database not configured"))?;
    let content = contents.get(&content_id).await.map_err(ApiError::from)?;
    ensure_enrolled(&state, &claims.sub, &content.course_id).await?;

    let progress_service = state
        .progress_service
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Progress service not configured"))?;

    let response = match progress_service
        .get(&claims.sub, &content_id)
        .await
        .map_err(ApiError::from)?
    {
        Some(row) => row.into(),
        // No row yet: report zero progress rather than 404.
        None => ProgressResponse::empty(&claims.sub, &content.course_id, &content_id),
    };
    Ok(Json(response))
}

/// Get a progress summary for a whole course.
#[utoipa::path(
    get,
    path = "/api/progress/course/{course_id}",
    params(("course_id" = String, Path, description = "Course id")),
    responses((status = 200, body = CourseProgressSummary))
)]
pub(crate) async fn get_course_progress(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<CourseProgressSummary>> {
    let claims = authenticate(&state, &headers, None)?;
    ensure_enrolled(&state, &claims.sub, &course_id).await?;

    let contents = state
        .contents
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Database not configured"))?;
    let progress_service = state
        .progress_service
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Progress service not configured"))?;

    let items = contents
        .list_for_course(&course_id)
        .await
        .map_err(ApiError::from)?;
    let rows = progress_service
        .course_snapshot(&claims.sub, &course_id)
        .await
        .map_err(ApiError::from)?;
    let by_content: std::collections::HashMap<_, _> =
        rows.iter().map(|r| (r.content_id.clone(), r)).collect();

    let mut completed_content = 0;
    let mut total_progress = 0i64;
    let content_progress: Vec<ContentProgressEntry> = items
        .iter()
        .map(|content| match by_content.get(&content.id) {
            Some(row) => {
                if row.completed {
                    completed_content += 1;
                }
                total_progress += row.progress_percentage;
                ContentProgressEntry {
                    content_id: content.id.clone(),
                    title: content.title.clone(),
                    content_type: content.content_type.clone(),
                    progress_percentage: row.progress_percentage,
                    completed: row.completed,
                    last_position: row.last_position,
                    updated_at: Some(row.updated_at.clone()),
                }
            }
            None => ContentProgressEntry {
                content_id: content.id.clone(),
                title: content.title.clone(),
                content_type: content.content_type.clone(),
                progress_percentage: 0,
                completed: false,
                last_position: None,
                updated_at: None,
            },
        })
        .collect();

    let overall_progress = if items.is_empty() {
        0.0
    } else {
        (total_progress as f64 / items.len() as f64 * 100.0).round() / 100.0
    };

    Ok(Json(CourseProgressSummary {
        course_id,
        total_content: items.len(),
        completed_content,
        overall_progress,
        content_progress,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::test_support::jwt;
    use crate::config::UploadConfig;
    use crate::database::models::{ContentDbModel, ContentType, EnrollmentDbModel};
    use crate::database::repositories::content::test_support::{seed_course, seed_user};
    use crate::database::repositories::{
        ContentRepository, EnrollmentRepository, SqlxContentRepository, SqlxEnrollmentRepository,
        SqlxProgressRepository, SqlxTaskRepository,
    };
    use crate::database::test_pool;
    use crate::progress::ProgressService;
    use crate::queue::TaskQueue;
    use crate::realtime::{ConnectionHandle, ConnectionRegistry};
    use crate::storage::MemoryObjectStore;
    use axum::body::Body;
    use axum::http::{Request, header};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        token: String,
        content_id: String,
        registry: Arc<ConnectionRegistry>,
    }

    async fn fixture(enrolled: bool) -> Fixture {
        let pool = test_pool().await;
        seed_course(&pool, "course-1", "Rust Basics").await;
        seed_user(&pool, "user-1").await;

        let contents = Arc::new(SqlxContentRepository::new(pool.clone()));
        let content = ContentDbModel::new("course-1", ContentType::Video, "Lesson 1", "u", 0);
        contents.create(&content).await.unwrap();

        let enrollments = Arc::new(SqlxEnrollmentRepository::new(pool.clone()));
        if enrolled {
            enrollments
                .create(&EnrollmentDbModel::new("user-1", "course-1"))
                .await
                .unwrap();
        }

        let registry = Arc::new(ConnectionRegistry::new());
        let progress = Arc::new(ProgressService::new(
            Arc::new(SqlxProgressRepository::new(pool.clone())),
            registry.clone(),
        ));
        let queue = Arc::new(TaskQueue::new(Arc::new(SqlxTaskRepository::new(pool))));

        let jwt = jwt();
        let token = jwt.generate_token("user-1", vec![]).unwrap();
        let state = AppState::with_services(
            Some(jwt),
            contents,
            enrollments,
            progress,
            queue,
            Arc::new(MemoryObjectStore::new()),
            registry.clone(),
            UploadConfig::default(),
        );

        Fixture {
            app: Router::new().nest("/api/progress", router()).with_state(state),
            token,
            content_id: content.id,
            registry,
        }
    }

    fn post_progress(token: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/progress")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_progress_persists_and_broadcasts() {
        let fx = fixture(true).await;

        let (subscriber, mut rx) = ConnectionHandle::new("instructor");
        fx.registry.register(&subscriber);
        fx.registry.subscribe_course(&subscriber, "course-1");

        let response = fx
            .app
            .clone()
            .oneshot(post_progress(
                &fx.token,
                serde_json::json!({
                    "course_id": "course-1",
                    "content_id": fx.content_id,
                    "progress_percentage": 45,
                    "last_position": 120
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["progress_percentage"], 45);
        assert_eq!(parsed["completed"], false);

        // The REST path fans out exactly like the realtime path.
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains(r#""type":"progress_updated""#));
    }

    #[tokio::test]
    async fn test_not_enrolled_is_403() {
        let fx = fixture(false).await;
        let response = fx
            .app
            .clone()
            .oneshot(post_progress(
                &fx.token,
                serde_json::json!({
                    "course_id": "course-1",
                    "content_id": fx.content_id,
                    "progress_percentage": 45
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_out_of_range_percentage_is_422() {
        let fx = fixture(true).await;
        let response = fx
            .app
            .clone()
            .oneshot(post_progress(
                &fx.token,
                serde_json::json!({
                    "course_id": "course-1",
                    "content_id": fx.content_id,
                    "progress_percentage": 150
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_get_content_progress_defaults_to_zero() {
        let fx = fixture(true).await;
        let request = Request::builder()
            .uri(format!("/api/progress/content/{}", fx.content_id))
            .header(header::AUTHORIZATION, format!("Bearer {}", fx.token))
            .body(Body::empty())
            .unwrap();
        let response = fx.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["progress_percentage"], 0);
        assert!(parsed["id"].is_null());
    }

    #[tokio::test]
    async fn test_course_summary_aggregates() {
        let fx = fixture(true).await;
        fx.app
            .clone()
            .oneshot(post_progress(
                &fx.token,
                serde_json::json!({
                    "course_id": "course-1",
                    "content_id": fx.content_id,
                    "progress_percentage": 100
                }),
            ))
            .await
            .unwrap();

        let request = Request::builder()
            .uri("/api/progress/course/course-1")
            .header(header::AUTHORIZATION, format!("Bearer {}", fx.token))
            .body(Body::empty())
            .unwrap();
        let response = fx.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["total_content"], 1);
        assert_eq!(parsed["completed_content"], 1);
        assert_eq!(parsed["overall_progress"], 100.0);
    }
}
