//! API route modules.
//!
//! Organizes routes by resource type.

pub mod health;
pub mod jobs;
pub mod progress;
pub mod streaming;
pub mod upload;
pub mod ws;

use axum::Router;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::error::{ApiError, ApiResult};
use crate::api::jwt::Claims;
use crate::api::openapi::ApiDoc;
use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/upload", upload::router())
        .nest("/api/stream", streaming::router())
        .nest("/api/progress", progress::router())
        .nest("/api/jobs", jobs::router())
        .nest("/api/ws", ws::router())
        .nest("/health", health::router())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

/// Authenticate a request from its bearer header, or from a `token` query
/// parameter for clients that cannot set headers (media elements).
pub(crate) fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    token_query: Option<&str>,
) -> ApiResult<Claims> {
    let jwt_service = state
        .jwt_service
        .as_ref()
        .ok_or_else(|| ApiError::unauthorized("Authentication not configured"))?;

    let token = if let Some(t) = token_query {
        t.to_string()
    } else if let Some(t) = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(String::from)
    {
        t
    } else {
        return Err(ApiError::unauthorized(
            "Missing or invalid Authorization header or token query",
        ));
    };

    jwt_service
        .validate_token(&token)
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))
}

/// Require the admin role on already-validated claims.
pub(crate) fn require_admin(claims: &Claims) -> ApiResult<()> {
    if claims.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Admin role required"))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::api::jwt::JwtService;
    use crate::api::server::AppState;

    pub fn jwt() -> Arc<JwtService> {
        Arc::new(JwtService::new(
            "test-secret-key-32-chars-long!!",
            "lms-server",
            "lms-api",
            Some(3600),
        ))
    }

    pub fn state_with_jwt() -> (AppState, Arc<JwtService>) {
        let jwt = jwt();
        let mut state = AppState::new();
        state.jwt_service = Some(jwt.clone());
        (state, jwt)
    }
}
