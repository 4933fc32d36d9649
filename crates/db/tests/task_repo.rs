mod common;

use assert_matches::assert_matches;
use taskforge_core::task::{TaskResult, TaskStatus};
use taskforge_core::types::new_task_id;
use taskforge_db::models::task::{StatusChange, StatusUpdate};
use taskforge_db::repositories::{JobQueueRepo, Submission, TaskRepo};

use common::{create_task, create_user, new_task, test_pool};

// ---------------------------------------------------------------------------
// Create / read
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_starts_pending_with_no_result() {
    let (_dir, pool) = test_pool().await;
    let owner = create_user(&pool, "alice").await;

    let task = create_task(&pool, owner).await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.progress, 0);
    assert_eq!(task.result, None);
    assert_eq!(task.params.iterations, 1_000);

    let fetched = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(fetched, task);
}

#[tokio::test]
async fn find_for_owner_hides_other_users_tasks() {
    let (_dir, pool) = test_pool().await;
    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;
    let task = create_task(&pool, alice).await;

    assert!(TaskRepo::find_for_owner(&pool, task.id, alice).await.unwrap().is_some());
    assert!(TaskRepo::find_for_owner(&pool, task.id, bob).await.unwrap().is_none());
}

#[tokio::test]
async fn list_by_owner_is_newest_first() {
    let (_dir, pool) = test_pool().await;
    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;

    let first = create_task(&pool, alice).await;
    let _other = create_task(&pool, bob).await;
    let second = create_task(&pool, alice).await;
    let third = create_task(&pool, alice).await;

    let ids: Vec<_> = TaskRepo::list_by_owner(&pool, alice)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![third.id, second.id, first.id]);
}

#[tokio::test]
async fn count_active_ignores_terminal_tasks() {
    let (_dir, pool) = test_pool().await;
    let owner = create_user(&pool, "alice").await;

    let a = create_task(&pool, owner).await;
    let _b = create_task(&pool, owner).await;
    let c = create_task(&pool, owner).await;

    TaskRepo::update_status(&pool, a.id, &StatusChange::running(0, "w1"))
        .await
        .unwrap();
    TaskRepo::update_status(&pool, c.id, &StatusChange::canceled())
        .await
        .unwrap();

    assert_eq!(TaskRepo::count_active(&pool, owner).await.unwrap(), 2);
}

// ---------------------------------------------------------------------------
// Conditional status writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn running_then_completed_sets_result_once() {
    let (_dir, pool) = test_pool().await;
    let owner = create_user(&pool, "alice").await;
    let task = create_task(&pool, owner).await;

    let running = TaskRepo::update_status(&pool, task.id, &StatusChange::running(0, "w1"))
        .await
        .unwrap();
    assert_matches!(running, StatusUpdate::Applied(t) => {
        assert_eq!(t.status, TaskStatus::Running);
        assert_eq!(t.worker_id.as_deref(), Some("w1"));
    });

    let estimate = TaskResult::Estimate {
        value: 3.14,
        iterations: 1_000,
    };
    let done = TaskRepo::update_status(&pool, task.id, &StatusChange::completed(estimate.clone()))
        .await
        .unwrap();
    assert_matches!(done, StatusUpdate::Applied(t) => {
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.progress, 100);
        assert_eq!(t.result, Some(estimate.clone()));
        assert!(t.updated_at >= task.updated_at);
    });
}

#[tokio::test]
async fn terminal_status_is_never_overwritten() {
    let (_dir, pool) = test_pool().await;
    let owner = create_user(&pool, "alice").await;
    let task = create_task(&pool, owner).await;

    TaskRepo::update_status(&pool, task.id, &StatusChange::canceled())
        .await
        .unwrap();

    for change in [
        StatusChange::running(50, "w1"),
        StatusChange::completed(TaskResult::Estimate {
            value: 3.0,
            iterations: 1,
        }),
        StatusChange::failed("boom"),
        StatusChange::canceled(),
    ] {
        let outcome = TaskRepo::update_status(&pool, task.id, &change).await.unwrap();
        assert_eq!(
            outcome,
            StatusUpdate::Rejected {
                current: TaskStatus::Canceled
            }
        );
    }

    let stored = TaskRepo::find_by_id(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Canceled);
    assert_eq!(stored.result, Some(TaskResult::canceled_by_user()));
}

#[tokio::test]
async fn pending_cannot_complete_directly() {
    let (_dir, pool) = test_pool().await;
    let owner = create_user(&pool, "alice").await;
    let task = create_task(&pool, owner).await;

    let outcome = TaskRepo::update_status(
        &pool,
        task.id,
        &StatusChange::completed(TaskResult::Estimate {
            value: 3.0,
            iterations: 1,
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        outcome,
        StatusUpdate::Rejected {
            current: TaskStatus::Pending
        }
    );
}

#[tokio::test]
async fn progress_never_decreases() {
    let (_dir, pool) = test_pool().await;
    let owner = create_user(&pool, "alice").await;
    let task = create_task(&pool, owner).await;

    TaskRepo::update_status(&pool, task.id, &StatusChange::running(40, "w1"))
        .await
        .unwrap();
    let outcome = TaskRepo::update_status(&pool, task.id, &StatusChange::running(10, "w1"))
        .await
        .unwrap();
    assert_matches!(outcome, StatusUpdate::Applied(t) if t.progress == 40);

    // Cancellation keeps the progress reached so far.
    let outcome = TaskRepo::update_status(&pool, task.id, &StatusChange::canceled())
        .await
        .unwrap();
    assert_matches!(outcome, StatusUpdate::Applied(t) => {
        assert_eq!(t.status, TaskStatus::Canceled);
        assert_eq!(t.progress, 40);
    });
}

#[tokio::test]
async fn update_of_unknown_task_is_not_found() {
    let (_dir, pool) = test_pool().await;
    let outcome = TaskRepo::update_status(&pool, new_task_id(), &StatusChange::running(0, "w1"))
        .await
        .unwrap();
    assert_eq!(outcome, StatusUpdate::NotFound);
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_enqueues_the_task() {
    let (_dir, pool) = test_pool().await;
    let owner = create_user(&pool, "alice").await;

    let outcome = TaskRepo::submit(&pool, &new_task(owner, 500), 5).await.unwrap();
    let task = assert_matches!(outcome, Submission::Accepted(t) => t);
    assert!(JobQueueRepo::contains(&pool, task.id).await.unwrap());
}

#[tokio::test]
async fn submit_over_cap_writes_nothing() {
    let (_dir, pool) = test_pool().await;
    let owner = create_user(&pool, "alice").await;

    for _ in 0..5 {
        let outcome = TaskRepo::submit(&pool, &new_task(owner, 500), 5).await.unwrap();
        assert_matches!(outcome, Submission::Accepted(_));
    }

    let rejected = new_task(owner, 500);
    let outcome = TaskRepo::submit(&pool, &rejected, 5).await.unwrap();
    assert_eq!(outcome, Submission::Rejected { active: 5 });

    assert!(TaskRepo::find_by_id(&pool, rejected.id).await.unwrap().is_none());
    assert!(!JobQueueRepo::contains(&pool, rejected.id).await.unwrap());
    assert_eq!(JobQueueRepo::depth(&pool).await.unwrap(), 5);
}

#[tokio::test]
async fn cap_is_per_owner_and_frees_up_on_terminal() {
    let (_dir, pool) = test_pool().await;
    let alice = create_user(&pool, "alice").await;
    let bob = create_user(&pool, "bob").await;

    let first = assert_matches!(
        TaskRepo::submit(&pool, &new_task(alice, 500), 1).await.unwrap(),
        Submission::Accepted(t) => t
    );
    assert_matches!(
        TaskRepo::submit(&pool, &new_task(alice, 500), 1).await.unwrap(),
        Submission::Rejected { active: 1 }
    );
    assert_matches!(
        TaskRepo::submit(&pool, &new_task(bob, 500), 1).await.unwrap(),
        Submission::Accepted(_)
    );

    TaskRepo::update_status(&pool, first.id, &StatusChange::canceled())
        .await
        .unwrap();
    assert_matches!(
        TaskRepo::submit(&pool, &new_task(alice, 500), 1).await.unwrap(),
        Submission::Accepted(_)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_submissions_never_exceed_the_cap() {
    let (_dir, pool) = test_pool().await;
    let owner = create_user(&pool, "alice").await;

    let attempts: Vec<_> = (0..12)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { TaskRepo::submit(&pool, &new_task(owner, 500), 5).await })
        })
        .collect();
    let outcomes: Vec<Submission> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("submit task panicked").expect("submit failed"))
        .collect();

    let accepted = outcomes
        .iter()
        .filter(|o| matches!(o, Submission::Accepted(_)))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, Submission::Rejected { .. }))
        .count();
    assert_eq!(accepted, 5);
    assert_eq!(rejected, 7);
    assert_eq!(TaskRepo::count_active(&pool, owner).await.unwrap(), 5);
    assert_eq!(JobQueueRepo::depth(&pool).await.unwrap(), 5);
}
