//! OpenAPI document.

use utoipa::OpenApi;

use crate::api::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "LMS Server API",
        description = "Course content backend: uploads, streaming, progress tracking, and background job operations."
    ),
    paths(
        crate::api::routes::health::health_check,
        crate::api::routes::upload::upload_content,
        crate::api::routes::upload::upload_thumbnail,
        crate::api::routes::streaming::get_manifest,
        crate::api::routes::progress::create_progress,
        crate::api::routes::progress::get_content_progress,
        crate::api::routes::progress::get_course_progress,
        crate::api::routes::jobs::list_jobs,
        crate::api::routes::jobs::list_dead_letter,
        crate::api::routes::jobs::requeue_job,
    ),
    components(schemas(
        models::HealthResponse,
        models::RealtimeStats,
        models::UploadResponse,
        models::ThumbnailUploadResponse,
        models::ProgressRequest,
        models::ProgressResponse,
        models::ContentProgressEntry,
        models::CourseProgressSummary,
        models::ManifestQuality,
        models::ManifestResponse,
        models::TaskView,
    ))
)]
pub struct ApiDoc;
