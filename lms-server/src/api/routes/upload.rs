//! Upload ingress routes.
//!
//! Validation happens here, synchronously: disallowed types and oversized
//! bodies are rejected before anything is stored or enqueued. Acceptance is
//! immediate; transcoding is observed later via the manifest or a push.

use axum::http::HeaderMap;
use axum::{Json, Router, extract::Multipart, extract::State, routing::post};
use bytes::Bytes;
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{ThumbnailUploadResponse, UploadResponse};
use crate::api::routes::{authenticate, require_admin};
use crate::api::server::AppState;
use crate::database::models::{ContentDbModel, ContentMetadata, ContentType};
use crate::pipeline::ProcessVideoPayload;
use crate::storage::unique_key;

/// Create the upload router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/content", post(upload_content))
        .route("/thumbnail", post(upload_thumbnail))
}

struct UploadedFile {
    bytes: Bytes,
    filename: String,
    mime: String,
}

struct ContentForm {
    file: UploadedFile,
    course_id: String,
    content_type: ContentType,
}

async fn read_content_form(mut multipart: Multipart) -> ApiResult<ContentForm> {
    let mut file = None;
    let mut course_id = None;
    let mut content_type = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;
                file = Some(UploadedFile {
                    bytes,
                    filename,
                    mime,
                });
            }
            Some("course_id") => {
                course_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Invalid course_id: {e}")))?,
                );
            }
            Some("content_type") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid content_type: {e}")))?;
                content_type = Some(ContentType::parse(&raw).ok_or_else(|| {
                    ApiError::bad_request("Content type must be 'video' or 'presentation'")
                })?);
            }
            _ => {}
        }
    }

    Ok(ContentForm {
        file: file.ok_or_else(|| ApiError::bad_request("Missing 'file' field"))?,
        course_id: course_id.ok_or_else(|| ApiError::bad_request("Missing 'course_id' field"))?,
        content_type: content_type
            .ok_or_else(|| ApiError::bad_request("Missing 'content_type' field"))?,
    })
}

/// Upload course content (video or presentation).
///
/// Returns immediately; for videos the response carries the enqueued
/// pipeline job's id and `status: "processing"`.
#[utoipa::path(
    post,
    path = "/api/upload/content",
    responses(
        (status = 200, body = UploadResponse),
        (status = 400, description = "Disallowed type or malformed form"),
        (status = 413, description = "File exceeds the upload ceiling")
    )
)]
pub(crate) async fn upload_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let claims = authenticate(&state, &headers, None)?;
    require_admin(&claims)?;

    let store = state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Storage not configured"))?;
    let contents = state
        .contents
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Database not configured"))?;
    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Task queue not configured"))?;

    let form = read_content_form(multipart).await?;

    // Validate MIME against the per-type allow-list.
    let allowed = match form.content_type {
        ContentType::Video => &state.upload_config.allowed_video_formats,
        ContentType::Presentation => &state.upload_config.allowed_presentation_formats,
    };
    if !allowed.contains(&form.file.mime) {
        return Err(ApiError::bad_request(format!(
            "Unsupported {} format '{}'. Allowed: {:?}",
            form.content_type, form.file.mime, allowed
        )));
    }

    // Validate size against the configured ceiling.
    let size = form.file.bytes.len() as u64;
    if size > state.upload_config.max_upload_size {
        return Err(ApiError::payload_too_large(format!(
            "File too large. Maximum size: {} bytes",
            state.upload_config.max_upload_size
        )));
    }

    if !contents.course_exists(&form.course_id).await.map_err(ApiError::from)? {
        return Err(ApiError::not_found(format!(
            "Course with id '{}' not found",
            form.course_id
        )));
    }

    // Store the raw object.
    let key = unique_key(
        &format!("content/{}/{}", form.course_id, form.content_type),
        &form.file.filename,
    );
    let url = store
        .put_bytes(&key, form.file.bytes.clone(), &form.file.mime)
        .await
        .map_err(ApiError::from)?;

    // Create the content record for this upload.
    let order_index = contents
        .list_for_course(&form.course_id)
        .await
        .map_err(ApiError::from)?
        .len() as i64;
    let title = std::path::Path::new(&form.file.filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Untitled")
        .to_string();
    let mut record = ContentDbModel::new(&form.course_id, form.content_type, title, &url, order_index);
    record.file_size = Some(size as i64);
    contents.create(&record).await.map_err(ApiError::from)?;

    if form.content_type == ContentType::Video {
        let handle = queue
            .enqueue(
                "process_video",
                &ProcessVideoPayload {
                    video_url: url.clone(),
                    course_id: form.course_id.clone(),
                    content_id: Some(record.id.clone()),
                },
            )
            .await
            .map_err(ApiError::from)?;

        // Visible as "processing" until the pipeline publishes or fails.
        if let Err(e) = contents
            .set_metadata(&record.id, &ContentMetadata::processing())
            .await
        {
            warn!(content_id = %record.id, "Failed to mark record processing: {}", e);
        }

        info!(content_id = %record.id, task_id = %handle.id, "Video accepted for processing");
        return Ok(Json(UploadResponse {
            url,
            status: "processing".to_string(),
            content_id: record.id,
            task_id: Some(handle.id),
            message: "Video uploaded successfully and processing started".to_string(),
        }));
    }

    info!(content_id = %record.id, "Presentation uploaded");
    Ok(Json(UploadResponse {
        url,
        status: "complete".to_string(),
        content_id: record.id,
        task_id: None,
        message: "Presentation uploaded successfully".to_string(),
    }))
}

/// Upload a course thumbnail image.
#[utoipa::path(
    post,
    path = "/api/upload/thumbnail",
    responses(
        (status = 200, body = ThumbnailUploadResponse),
        (status = 400, description = "File is not an allowed image format")
    )
)]
pub(crate) async fn upload_thumbnail(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<ThumbnailUploadResponse>> {
    let claims = authenticate(&state, &headers, None)?;
    require_admin(&claims)?;

    let store = state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Storage not configured"))?;

    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("thumbnail").to_string();
            let mime = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;
            file = Some(UploadedFile {
                bytes,
                filename,
                mime,
            });
        }
    }
    let file = file.ok_or_else(|| ApiError::bad_request("Missing 'file' field"))?;

    if !state.upload_config.allowed_image_formats.contains(&file.mime) {
        return Err(ApiError::bad_request(format!(
            "Unsupported image format '{}'. Allowed: {:?}",
            file.mime, state.upload_config.allowed_image_formats
        )));
    }

    let key = unique_key("thumbnails", &file.filename);
    let url = store
        .put_bytes(&key, file.bytes, &file.mime)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ThumbnailUploadResponse {
        url,
        message: "Thumbnail uploaded successfully".to_string(),
    }))
}
