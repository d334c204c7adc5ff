//! API server setup and configuration.

use axum::extract::DefaultBodyLimit;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::jwt::JwtService;
use crate::api::routes;
use crate::config::UploadConfig;
use crate::database::repositories::{ContentRepository, EnrollmentRepository};
use crate::error::Result;
use crate::progress::ProgressService;
use crate::queue::TaskQueue;
use crate::realtime::ConnectionRegistry;
use crate::storage::ObjectStore;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Request body size limit in bytes
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            // Uploads go through this server, so the limit tracks the upload
            // ceiling plus multipart overhead.
            body_limit: 2 * 1024 * 1024 * 1024 + 1024 * 1024,
        }
    }
}

impl ApiServerConfig {
    /// Load API server config from environment variables, falling back to
    /// defaults.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS` (e.g. "0.0.0.0")
    /// - `API_PORT` (e.g. "8000")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(bind_address) = std::env::var("API_BIND_ADDRESS")
            && !bind_address.trim().is_empty()
        {
            config.bind_address = bind_address;
        }

        if let Ok(port) = std::env::var("API_PORT")
            && let Ok(parsed) = port.parse::<u16>()
        {
            config.port = parsed;
        }

        config
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    /// JWT service for authentication
    pub jwt_service: Option<Arc<JwtService>>,
    /// Content metadata store
    pub contents: Option<Arc<dyn ContentRepository>>,
    /// Enrollment checks for ingress authorization
    pub enrollments: Option<Arc<dyn EnrollmentRepository>>,
    /// Progress notification bridge
    pub progress_service: Option<Arc<ProgressService>>,
    /// Durable task queue
    pub queue: Option<Arc<TaskQueue>>,
    /// Object store client
    pub store: Option<Arc<dyn ObjectStore>>,
    /// Realtime connection registry (always present; shared with workers)
    pub registry: Arc<ConnectionRegistry>,
    /// Upload validation limits
    pub upload_config: UploadConfig,
    /// Shared HTTP client for streaming egress
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Create a new application state without services (for testing).
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            jwt_service: None,
            contents: None,
            enrollments: None,
            progress_service: None,
            queue: None,
            store: None,
            registry: Arc::new(ConnectionRegistry::new()),
            upload_config: UploadConfig::default(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Create application state with all services wired in.
    #[allow(clippy::too_many_arguments)]
    pub fn with_services(
        jwt_service: Option<Arc<JwtService>>,
        contents: Arc<dyn ContentRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        progress_service: Arc<ProgressService>,
        queue: Arc<TaskQueue>,
        store: Arc<dyn ObjectStore>,
        registry: Arc<ConnectionRegistry>,
        upload_config: UploadConfig,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            jwt_service,
            contents: Some(contents),
            enrollments: Some(enrollments),
            progress_service: Some(progress_service),
            queue: Some(queue),
            store: Some(store),
            registry,
            upload_config,
            http_client: reqwest::Client::new(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the API server until the process is stopped.
pub async fn serve(config: ApiServerConfig, state: AppState) -> Result<()> {
    let mut app = routes::create_router(state).layer(TraceLayer::new_for_http());

    if config.enable_cors {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }
    app = app.layer(DefaultBodyLimit::max(config.body_limit));

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.port, 8000);
        assert!(config.enable_cors);
    }

    #[test]
    fn test_empty_state_has_registry() {
        let state = AppState::new();
        assert_eq!(state.registry.stats().total_connections, 0);
        assert!(state.jwt_service.is_none());
    }
}
