//! Claim correctness under concurrent workers.
//!
//! Many workers race the guarded-UPDATE claim against one SQLite file; no
//! task may ever be claimed twice and none may be left behind.

use dashmap::DashSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinSet;

use lms_server::database::models::TaskDbModel;
use lms_server::database::repositories::{SqlxTaskRepository, TaskRepository};
use lms_server::database::{init_pool_with_size, run_migrations};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_claims_never_double_claim_or_lose_tasks() {
    const TASKS: usize = 60;
    const WORKERS: usize = 8;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("contention.db");
    let db_url = format!(
        "sqlite:{}?mode=rwc",
        db_path.to_string_lossy().replace('\\', "/")
    );

    let pool = init_pool_with_size(&db_url, 16).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let repo = Arc::new(SqlxTaskRepository::new(pool.clone()));
    for i in 0..TASKS {
        let task = TaskDbModel::new(
            "video_processing",
            "process_video",
            format!(r#"{{"video_url":"input-{i}","course_id":"c"}}"#),
            4,
        );
        repo.create(&task).await.unwrap();
    }

    let claimed_ids = Arc::new(DashSet::<String>::new());
    let mut workers = JoinSet::new();
    for _ in 0..WORKERS {
        let repo = repo.clone();
        let pool = pool.clone();
        let claimed_ids = claimed_ids.clone();
        workers.spawn(async move {
            loop {
                match repo.claim_next("video_processing").await.unwrap() {
                    Some(claimed) => {
                        let inserted = claimed_ids.insert(claimed.id.clone());
                        assert!(inserted, "double-claimed task {}", claimed.id);
                        tokio::task::yield_now().await;
                        repo.complete(&claimed.id).await.unwrap();
                    }
                    None => {
                        // claim_next reports None after losing a few races;
                        // only stop once the backlog is truly drained.
                        let queued: i64 = sqlx::query_scalar(
                            "SELECT COUNT(*) FROM tasks WHERE status = 'queued'",
                        )
                        .fetch_one(&pool)
                        .await
                        .unwrap();
                        if queued == 0 {
                            break;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            }
        });
    }

    let joined = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    assert!(joined.is_ok(), "workers timed out (possible deadlock)");

    assert_eq!(claimed_ids.len(), TASKS, "not all tasks were claimed");

    let remaining: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tasks WHERE status IN ('queued', 'running')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(remaining, 0, "tasks left unfinished");

    let completed: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = 'completed'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(completed, TASKS as i64);
}
