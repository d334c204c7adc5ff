//! Streaming egress routes.
//!
//! Serves processed renditions by proxying ranged fetches against the object
//! store, so byte-range seeking works without the store being exposed to
//! clients directly.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::TryStreamExt;
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{ManifestQuality, ManifestResponse};
use crate::api::routes::authenticate;
use crate::api::server::AppState;
use crate::database::models::{ContentDbModel, ContentMetadata, ProcessingStatus};
use crate::pipeline::ffmpeg::QUALITY_LADDER;

/// Fallback order when no explicit quality is requested.
const PREFERRED_ORDER: [&str; 4] = ["720p", "1080p", "480p", "360p"];

/// Create the streaming router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/video/{content_id}", get(stream_video))
        .route("/video/{content_id}/thumbnail", get(get_thumbnail))
        .route("/video/{content_id}/preview", get(get_preview))
        .route("/video/{content_id}/manifest", get(get_manifest))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Bearer token alternative for media elements.
    pub token: Option<String>,
    /// Explicit quality label from the manifest.
    pub quality: Option<String>,
}

/// Load a content record and verify the caller may access it.
async fn authorized_content(
    state: &AppState,
    headers: &HeaderMap,
    token: Option<&str>,
    content_id: &str,
) -> ApiResult<ContentDbModel> {
    let claims = authenticate(state, headers, token)?;

    let contents = state
        .contents
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Database not configured"))?;
    let enrollments = state
        .enrollments
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Database not configured"))?;

    let content = contents.get(content_id).await.map_err(ApiError::from)?;

    if !enrollments
        .is_enrolled(&claims.sub, &content.course_id)
        .await
        .map_err(ApiError::from)?
    {
        return Err(ApiError::forbidden(
            "You must be enrolled in this course to access content",
        ));
    }

    Ok(content)
}

/// Published metadata, or the error that tells the client to stop polling.
fn processed_metadata(content: &ContentDbModel) -> ApiResult<ContentMetadata> {
    let metadata = content
        .parsed_metadata()
        .ok_or_else(|| ApiError::not_found("Video not processed yet"))?;
    match metadata.processing_status {
        ProcessingStatus::Completed => Ok(metadata),
        ProcessingStatus::Failed => Err(ApiError::new(
            StatusCode::GONE,
            "PROCESSING_FAILED",
            format!(
                "Video processing failed: {}",
                metadata.failure_reason.as_deref().unwrap_or("unknown error")
            ),
        )),
        ProcessingStatus::Pending | ProcessingStatus::Processing => {
            Err(ApiError::not_found("Video not processed yet"))
        }
    }
}

/// Pick the rendition to serve: the explicit quality if available, otherwise
/// 720p with fallback down the ladder, otherwise whatever exists.
fn pick_rendition(metadata: &ContentMetadata, quality: Option<&str>) -> Option<String> {
    if let Some(label) = quality
        && let Some(url) = metadata.processed_urls.get(label)
    {
        return Some(url.clone());
    }
    for label in PREFERRED_ORDER {
        if let Some(url) = metadata.processed_urls.get(label) {
            return Some(url.clone());
        }
    }
    metadata.processed_urls.values().next().cloned()
}

/// Parse a `Range: bytes=start-end` header. Open-ended and prefix-less
/// starts are tolerated; anything else is a 400 at the ingress boundary.
fn parse_range(raw: &str) -> Result<(u64, Option<u64>), ()> {
    let range = raw.strip_prefix("bytes=").ok_or(())?;
    let (start_raw, end_raw) = range.split_once('-').ok_or(())?;
    let start = if start_raw.is_empty() {
        0
    } else {
        start_raw.parse().map_err(|_| ())?
    };
    let end = if end_raw.is_empty() {
        None
    } else {
        Some(end_raw.parse().map_err(|_| ())?)
    };
    Ok((start, end))
}

/// Stream video content with range request support.
pub(crate) async fn stream_video(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let content =
        authorized_content(&state, &headers, query.token.as_deref(), &content_id).await?;
    let metadata = processed_metadata(&content)?;
    let video_url = pick_rendition(&metadata, query.quality.as_deref())
        .ok_or_else(|| ApiError::not_found("Video not processed yet"))?;

    match headers.get(header::RANGE) {
        Some(range) => {
            let raw = range
                .to_str()
                .map_err(|_| ApiError::bad_request("Malformed Range header"))?;
            let (start, end) =
                parse_range(raw).map_err(|_| ApiError::bad_request("Malformed Range header"))?;
            stream_with_range(&state.http_client, &video_url, start, end).await
        }
        None => stream_full(&state.http_client, &video_url).await,
    }
}

async fn stream_with_range(
    client: &reqwest::Client,
    video_url: &str,
    start: u64,
    end: Option<u64>,
) -> ApiResult<Response> {
    // The rendition's size isn't recorded anywhere; ask the store.
    let head = client
        .head(video_url)
        .send()
        .await
        .map_err(|e| ApiError::bad_gateway(format!("Failed to stream video: {e}")))?;
    let size: u64 = head
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .filter(|len| *len > 0)
        .ok_or_else(|| ApiError::bad_gateway("Upstream did not report object size"))?;

    let end = end.unwrap_or(size - 1).min(size - 1);
    if start > end || start >= size {
        return Err(ApiError::range_not_satisfiable(format!(
            "Requested range {}-{:?} outside object of {} bytes",
            start, end, size
        )));
    }

    let upstream = client
        .get(video_url)
        .header(header::RANGE, format!("bytes={start}-{end}"))
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ApiError::bad_gateway(format!("Failed to stream video: {e}")))?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_str(&format!("bytes {start}-{end}/{size}"))
            .map_err(|_| ApiError::internal("Invalid range header"))?,
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&(end - start + 1).to_string())
            .map_err(|_| ApiError::internal("Invalid length header"))?,
    );
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );

    let body = Body::from_stream(upstream.bytes_stream().map_err(std::io::Error::other));
    let mut response = (StatusCode::PARTIAL_CONTENT, body).into_response();
    response.headers_mut().extend(response_headers);
    Ok(response)
}

async fn stream_full(client: &reqwest::Client, video_url: &str) -> ApiResult<Response> {
    let upstream = client
        .get(video_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ApiError::bad_gateway(format!("Failed to stream video: {e}")))?;

    let mut response_headers = HeaderMap::new();
    if let Some(len) = upstream.headers().get(header::CONTENT_LENGTH) {
        response_headers.insert(header::CONTENT_LENGTH, len.clone());
    }
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );

    let body = Body::from_stream(upstream.bytes_stream().map_err(std::io::Error::other));
    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().extend(response_headers);
    Ok(response)
}

/// Proxy a stored object (thumbnail/preview) with long-lived caching.
async fn proxy_object(
    client: &reqwest::Client,
    url: &str,
    content_type: &'static str,
) -> ApiResult<Response> {
    let upstream = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ApiError::bad_gateway(format!("Failed to load object: {e}")))?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );

    let body = Body::from_stream(upstream.bytes_stream().map_err(std::io::Error::other));
    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().extend(response_headers);
    Ok(response)
}

/// Get the video thumbnail.
pub(crate) async fn get_thumbnail(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let content =
        authorized_content(&state, &headers, query.token.as_deref(), &content_id).await?;
    let thumbnail_url = content
        .parsed_metadata()
        .and_then(|m| m.thumbnail_url)
        .ok_or_else(|| ApiError::not_found("Thumbnail not available"))?;
    proxy_object(&state.http_client, &thumbnail_url, "image/jpeg").await
}

/// Get the short preview clip.
pub(crate) async fn get_preview(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let content =
        authorized_content(&state, &headers, query.token.as_deref(), &content_id).await?;
    let preview_url = content
        .parsed_metadata()
        .and_then(|m| m.preview_url)
        .ok_or_else(|| ApiError::not_found("Preview not available"))?;
    proxy_object(&state.http_client, &preview_url, "video/mp4").await
}

/// Get the video manifest with available qualities.
#[utoipa::path(
    get,
    path = "/api/stream/video/{content_id}/manifest",
    params(("content_id" = String, Path, description = "Content record id")),
    responses(
        (status = 200, body = ManifestResponse),
        (status = 404, description = "Not processed yet"),
        (status = 410, description = "Processing failed")
    )
)]
pub(crate) async fn get_manifest(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<ManifestResponse>> {
    let content =
        authorized_content(&state, &headers, query.token.as_deref(), &content_id).await?;
    let metadata = processed_metadata(&content)?;

    let qualities = QUALITY_LADDER
        .iter()
        .filter(|rung| metadata.processed_urls.contains_key(rung.label))
        .map(|rung| ManifestQuality {
            name: rung.label.to_string(),
            url: format!("/api/stream/video/{}?quality={}", content_id, rung.label),
            height: rung.height,
            bitrate: rung.video_bitrate.to_string(),
        })
        .collect();

    Ok(Json(ManifestResponse {
        content_id,
        title: content.title,
        duration: metadata
            .video_metadata
            .as_ref()
            .map(|m| m.duration)
            .unwrap_or(0.0),
        qualities,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::test_support::jwt;
    use crate::config::UploadConfig;
    use crate::database::models::{ContentDbModel, ContentType, EnrollmentDbModel, VideoMetadata};
    use crate::database::repositories::content::test_support::{seed_course, seed_user};
    use crate::database::repositories::{
        ContentRepository, EnrollmentRepository, SqlxContentRepository, SqlxEnrollmentRepository,
        SqlxProgressRepository, SqlxTaskRepository,
    };
    use crate::database::test_pool;
    use crate::progress::ProgressService;
    use crate::queue::TaskQueue;
    use crate::realtime::ConnectionRegistry;
    use crate::storage::MemoryObjectStore;
    use axum::http::Request;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    const OBJECT_SIZE: usize = 1000;

    fn object_bytes() -> Vec<u8> {
        (0..OBJECT_SIZE).map(|i| (i % 251) as u8).collect()
    }

    /// Range-honoring upstream standing in for the object store.
    async fn object_store_upstream() -> String {
        async fn serve(headers: HeaderMap) -> Response {
            let data = object_bytes();
            match headers
                .get(header::RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(|raw| parse_range(raw).ok())
            {
                Some((start, end)) => {
                    let end = end.unwrap_or(data.len() as u64 - 1).min(data.len() as u64 - 1);
                    let slice = data[start as usize..=end as usize].to_vec();
                    let mut headers = HeaderMap::new();
                    headers.insert(
                        header::CONTENT_RANGE,
                        HeaderValue::from_str(&format!("bytes {start}-{end}/{}", data.len()))
                            .unwrap(),
                    );
                    (StatusCode::PARTIAL_CONTENT, headers, slice).into_response()
                }
                None => data.into_response(),
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/{rendition}", get(serve));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    struct Fixture {
        app: Router,
        token: String,
        content_id: String,
    }

    async fn fixture(metadata: Option<ContentMetadata>, enrolled: bool) -> Fixture {
        let pool = test_pool().await;
        seed_course(&pool, "course-1", "Rust Basics").await;
        seed_user(&pool, "user-1").await;

        let contents = Arc::new(SqlxContentRepository::new(pool.clone()));
        let enrollments = Arc::new(SqlxEnrollmentRepository::new(pool.clone()));
        if enrolled {
            enrollments
                .create(&EnrollmentDbModel::new("user-1", "course-1"))
                .await
                .unwrap();
        }

        let mut content = ContentDbModel::new("course-1", ContentType::Video, "Lesson 1", "u", 0);
        if let Some(metadata) = &metadata {
            content.metadata = Some(serde_json::to_string(metadata).unwrap());
        }
        contents.create(&content).await.unwrap();

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
            registry,
            UploadConfig::default(),
        );

        Fixture {
            app: Router::new().nest("/api/stream", router()).with_state(state),
            token,
            content_id: content.id,
        }
    }

    fn completed_metadata(base: &str) -> ContentMetadata {
        let mut urls = BTreeMap::new();
        for rung in &QUALITY_LADDER {
            urls.insert(rung.label.to_string(), format!("{base}/{}.mp4", rung.label));
        }
        ContentMetadata {
            processed_urls: urls,
            thumbnail_url: Some(format!("{base}/thumb.jpg")),
            video_metadata: Some(VideoMetadata {
                duration: 30.0,
                width: 1920,
                height: 1080,
                fps: 30.0,
                codec: "h264".to_string(),
                bitrate: 4_000_000,
            }),
            processing_status: ProcessingStatus::Completed,
            failure_reason: None,
            preview_url: None,
        }
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=100-199"), Ok((100, Some(199))));
        assert_eq!(parse_range("bytes=100-"), Ok((100, None)));
        assert_eq!(parse_range("bytes=-500"), Ok((0, Some(500))));
        assert!(parse_range("items=1-2").is_err());
        assert!(parse_range("bytes=a-b").is_err());
    }

    #[test]
    fn test_pick_rendition_prefers_720p_then_descends() {
        let metadata = completed_metadata("http://cdn");
        assert_eq!(
            pick_rendition(&metadata, None).unwrap(),
            "http://cdn/720p.mp4"
        );
        assert_eq!(
            pick_rendition(&metadata, Some("360p")).unwrap(),
            "http://cdn/360p.mp4"
        );
        // Unknown label falls back to the preferred order.
        assert_eq!(
            pick_rendition(&metadata, Some("4k")).unwrap(),
            "http://cdn/720p.mp4"
        );

        let mut only_360 = metadata.clone();
        only_360.processed_urls.retain(|k, _| k == "360p");
        assert_eq!(
            pick_rendition(&only_360, None).unwrap(),
            "http://cdn/360p.mp4"
        );
    }

    #[tokio::test]
    async fn test_range_request_round_trip() {
        let base = object_store_upstream().await;
        let fx = fixture(Some(completed_metadata(&base)), true).await;

        let request = Request::builder()
            .uri(format!(
                "/api/stream/video/{}?token={}",
                fx.content_id, fx.token
            ))
            .header(header::RANGE, "bytes=100-199")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = fx.app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            &format!("bytes 100-199/{OBJECT_SIZE}")
        );
        assert_eq!(response.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "100");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), &object_bytes()[100..200]);
    }

    #[tokio::test]
    async fn test_full_fetch_without_range() {
        let base = object_store_upstream().await;
        let fx = fixture(Some(completed_metadata(&base)), true).await;

        let request = Request::builder()
            .uri(format!(
                "/api/stream/video/{}?token={}",
                fx.content_id, fx.token
            ))
            .body(axum::body::Body::empty())
            .unwrap();
        let response = fx.app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.len(), OBJECT_SIZE);
    }

    #[tokio::test]
    async fn test_malformed_range_is_400() {
        let base = object_store_upstream().await;
        let fx = fixture(Some(completed_metadata(&base)), true).await;

        let request = Request::builder()
            .uri(format!(
                "/api/stream/video/{}?token={}",
                fx.content_id, fx.token
            ))
            .header(header::RANGE, "bytes=oops")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = fx.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_not_enrolled_is_403() {
        let base = object_store_upstream().await;
        let fx = fixture(Some(completed_metadata(&base)), false).await;

        let request = Request::builder()
            .uri(format!(
                "/api/stream/video/{}?token={}",
                fx.content_id, fx.token
            ))
            .body(axum::body::Body::empty())
            .unwrap();
        let response = fx.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unprocessed_video_is_404() {
        let fx = fixture(None, true).await;
        let request = Request::builder()
            .uri(format!(
                "/api/stream/video/{}/manifest?token={}",
                fx.content_id, fx.token
            ))
            .body(axum::body::Body::empty())
            .unwrap();
        let response = fx.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_failed_processing_is_gone() {
        let fx = fixture(Some(ContentMetadata::failed("no video stream")), true).await;
        let request = Request::builder()
            .uri(format!(
                "/api/stream/video/{}/manifest?token={}",
                fx.content_id, fx.token
            ))
            .body(axum::body::Body::empty())
            .unwrap();
        let response = fx.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_manifest_lists_ladder_in_order() {
        let base = object_store_upstream().await;
        let fx = fixture(Some(completed_metadata(&base)), true).await;

        let request = Request::builder()
            .uri(format!(
                "/api/stream/video/{}/manifest?token={}",
                fx.content_id, fx.token
            ))
            .body(axum::body::Body::empty())
            .unwrap();
        let response = fx.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let manifest: ManifestResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(manifest.duration, 30.0);
        assert_eq!(manifest.qualities.len(), 4);
        assert_eq!(manifest.qualities[0].name, "1080p");
        assert_eq!(manifest.qualities[0].height, 1080);
        assert_eq!(manifest.qualities[0].bitrate, "5000k");
        assert_eq!(manifest.qualities[3].name, "360p");
        assert!(manifest.qualities[1].url.contains("quality=720p"));
    }
}
