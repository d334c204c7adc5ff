use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lms_server::api::jwt::JwtService;
use lms_server::api::server::{ApiServerConfig, AppState, serve};
use lms_server::config::{MediaConfig, SearchConfig, StorageConfig, UploadConfig};
use lms_server::database;
use lms_server::database::repositories::{
    SqlxContentRepository, SqlxEnrollmentRepository, SqlxProgressRepository, SqlxTaskRepository,
};
use lms_server::pipeline::{FfmpegEngine, PreviewHandler, ProcessVideoHandler, VideoPipeline};
use lms_server::progress::ProgressService;
use lms_server::queue::{
    JobHandler, QUEUE_MAINTENANCE, QUEUE_VIDEO, TaskQueue, WorkerPool, WorkerPoolConfig,
};
use lms_server::realtime::{ConnectionRegistry, ContentReadyHandler};
use lms_server::search::{SearchDeleteHandler, SearchIndexHandler, SearchIndexer};
use lms_server::storage::HttpObjectStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lms_server=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize database
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:lms.db?mode=rwc".to_string());
    let pool = database::init_pool(&database_url).await?;
    database::run_migrations(&pool).await?;

    // Repositories
    let contents = Arc::new(SqlxContentRepository::new(pool.clone()));
    let enrollments = Arc::new(SqlxEnrollmentRepository::new(pool.clone()));
    let progress_repo = Arc::new(SqlxProgressRepository::new(pool.clone()));
    let task_repo = Arc::new(SqlxTaskRepository::new(pool.clone()));

    // Shared services
    let registry = Arc::new(ConnectionRegistry::new());
    let queue = Arc::new(TaskQueue::new(task_repo));
    let store = Arc::new(HttpObjectStore::new(StorageConfig::from_env_or_default()));
    let progress_service = Arc::new(ProgressService::new(progress_repo, registry.clone()));

    // Tasks claimed before a previous shutdown run again (at-least-once).
    queue.recover_interrupted().await?;

    // Pipeline and job handlers
    let media_config = MediaConfig::from_env_or_default();
    let pipeline = Arc::new(VideoPipeline::new(
        Arc::new(FfmpegEngine::new(&media_config)),
        store.clone(),
        contents.clone(),
        queue.clone(),
        media_config.preview_duration_secs,
    ));
    let indexer = Arc::new(SearchIndexer::new(SearchConfig::from_env_or_default()));

    let video_handlers: Vec<Arc<dyn JobHandler>> = vec![
        Arc::new(ProcessVideoHandler::new(pipeline.clone())),
        Arc::new(PreviewHandler::new(pipeline)),
    ];
    let maintenance_handlers: Vec<Arc<dyn JobHandler>> = vec![
        Arc::new(SearchIndexHandler::new(indexer.clone(), contents.clone())),
        Arc::new(SearchDeleteHandler::new(indexer)),
        Arc::new(ContentReadyHandler::new(registry.clone(), contents.clone())),
    ];

    // Worker pools: transcoding is bounded separately from the light
    // maintenance jobs so a video backlog cannot starve them.
    let video_pool = WorkerPool::new(QUEUE_VIDEO);
    video_pool.start(queue.clone(), video_handlers);

    let maintenance_pool = WorkerPool::with_config(
        QUEUE_MAINTENANCE,
        WorkerPoolConfig {
            max_workers: 4,
            soft_time_limit_secs: 60,
            hard_time_limit_secs: 120,
            poll_interval_ms: 500,
        },
    );
    maintenance_pool.start(queue.clone(), maintenance_handlers);

    // API server
    let state = AppState::with_services(
        JwtService::from_env().map(Arc::new),
        contents,
        enrollments,
        progress_service,
        queue,
        store,
        registry,
        UploadConfig::from_env_or_default(),
    );

    tracing::info!("lms-server initialized");
    serve(ApiServerConfig::from_env_or_default(), state).await?;

    video_pool.stop().await;
    maintenance_pool.stop().await;

    Ok(())
}
