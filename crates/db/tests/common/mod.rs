#![allow(dead_code)]

use tempfile::TempDir;
use taskforge_core::task::TaskParams;
use taskforge_core::types::{new_task_id, DbId};
use taskforge_db::models::task::{CreateTask, Task};
use taskforge_db::models::user::CreateUser;
use taskforge_db::repositories::{TaskRepo, UserRepo};
use taskforge_db::DbPool;

/// A migrated database in a temporary directory. Keep the `TempDir` alive
/// for as long as the pool is used.
pub async fn test_pool() -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = taskforge_db::create_pool(&url).await.expect("pool");
    taskforge_db::run_migrations(&pool).await.expect("migrations");
    (dir, pool)
}

pub async fn create_user(pool: &DbPool, username: &str) -> DbId {
    UserRepo::create(
        pool,
        &CreateUser {
            username: username.to_string(),
            password_hash: "not-a-real-hash".to_string(),
        },
    )
    .await
    .expect("create user")
    .id
}

pub fn new_task(owner_id: DbId, iterations: u64) -> CreateTask {
    CreateTask {
        id: new_task_id(),
        owner_id,
        params: TaskParams { iterations },
    }
}

pub async fn create_task(pool: &DbPool, owner_id: DbId) -> Task {
    TaskRepo::create(pool, &new_task(owner_id, 1_000))
        .await
        .expect("create task")
}
