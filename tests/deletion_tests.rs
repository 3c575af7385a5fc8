//! Integration tests for deleting external services.

mod test_utils;

use std::time::Duration;

use extsvc::error::StoreError;
use extsvc::models::external_service_repo;
use extsvc::models::sync_job::SyncJobState;
use extsvc::repositories::audit::{self, EXTERNAL_SERVICE_DELETED};
use extsvc::repositories::{
    DeletionCoordinator, DrainSettings, JobOutcome, ListOptions, SyncJobStore,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use test_utils::*;
use tokio_util::sync::CancellationToken;

fn coordinator(db: &DatabaseConnection, timeout: Duration) -> DeletionCoordinator {
    DeletionCoordinator::new(
        db.clone(),
        DrainSettings {
            timeout,
            poll_interval: Duration::from_millis(20),
        },
    )
}

async fn association_count(db: &DatabaseConnection, external_service_id: i64) -> u64 {
    external_service_repo::Entity::find()
        .filter(external_service_repo::Column::ExternalServiceId.eq(external_service_id))
        .count(db)
        .await
        .unwrap()
}

#[tokio::test]
async fn shared_repositories_survive_until_their_last_owner_is_deleted() {
    let test_db = setup_test_db().await.unwrap();
    let db = &test_db.db;
    let store = store(db);
    let a = create_github_service(&store, "A").await.unwrap();
    let b = create_github_service(&store, "B").await.unwrap();

    let shared = insert_repo(db, "github.com/acme/shared").await.unwrap();
    let only_a = insert_repo(db, "github.com/acme/only-a").await.unwrap();
    associate(db, a.id, shared.id).await.unwrap();
    associate(db, a.id, only_a.id).await.unwrap();
    associate(db, b.id, shared.id).await.unwrap();

    let deletions = coordinator(db, Duration::from_secs(5));
    let summary = deletions.delete(a.id).await.unwrap();
    assert_eq!(summary.associations_removed, 2);
    assert_eq!(summary.repos_soft_deleted, 1);

    let only_a = find_repo(db, only_a.id).await.unwrap();
    assert!(only_a.deleted_at.is_some());
    assert!(only_a.name.starts_with("DELETED-"));
    assert!(only_a.name.ends_with("-github.com/acme/only-a"));

    let still_shared = find_repo(db, shared.id).await.unwrap();
    assert!(still_shared.deleted_at.is_none());
    assert_eq!(still_shared.name, "github.com/acme/shared");
    assert_eq!(association_count(db, a.id).await, 0);
    assert_eq!(association_count(db, b.id).await, 1);

    let summary = deletions.delete(b.id).await.unwrap();
    assert_eq!(summary.repos_soft_deleted, 1);
    let shared = find_repo(db, shared.id).await.unwrap();
    assert!(shared.deleted_at.is_some());
    assert!(shared.name.starts_with("DELETED-"));

    // The earlier soft delete is not repeated.
    let only_a_again = find_repo(db, only_a.id).await.unwrap();
    assert_eq!(only_a_again.name, only_a.name);

    assert_eq!(store.count(&ListOptions::default()).await.unwrap(), 0);
    assert!(store.get_by_id(a.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn reimported_repository_can_be_orphaned_again() {
    let test_db = setup_test_db().await.unwrap();
    let db = &test_db.db;
    let store = store(db);
    let a = create_github_service(&store, "A").await.unwrap();
    let b = create_github_service(&store, "B").await.unwrap();
    let deletions = coordinator(db, Duration::from_secs(5));

    let first = insert_repo(db, "github.com/acme/x").await.unwrap();
    associate(db, a.id, first.id).await.unwrap();
    deletions.delete(a.id).await.unwrap();

    // Same name imported again under another connection, then orphaned in
    // quick succession.
    let second = insert_repo(db, "github.com/acme/x").await.unwrap();
    associate(db, b.id, second.id).await.unwrap();
    let summary = deletions.delete(b.id).await.unwrap();
    assert_eq!(summary.repos_soft_deleted, 1);

    let first = find_repo(db, first.id).await.unwrap();
    let second = find_repo(db, second.id).await.unwrap();
    assert!(second.deleted_at.is_some());
    assert!(second.name.ends_with("-github.com/acme/x"));
    assert_ne!(first.name, second.name);
}

#[tokio::test]
async fn deleting_twice_is_not_found() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let service = create_github_service(&store, "Once").await.unwrap();

    let deletions = coordinator(&test_db.db, Duration::from_secs(5));
    deletions.delete(service.id).await.unwrap();

    let err = deletions.delete(service.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { id } if id == service.id));
    assert!(deletions.delete(9999).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn deletion_writes_an_audit_event() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let service = create_github_service(&store, "Audited").await.unwrap();

    coordinator(&test_db.db, Duration::from_secs(5))
        .delete(service.id)
        .await
        .unwrap();

    let events = audit::list_by_name(&test_db.db, EXTERNAL_SERVICE_DELETED)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].argument.as_ref().unwrap()["id"], service.id);
}

#[tokio::test]
async fn queued_jobs_are_canceled_and_do_not_block_deletion() {
    let test_db = setup_test_db().await.unwrap();
    let db = &test_db.db;
    let store = store(db);
    let service = create_github_service(&store, "Queued").await.unwrap();

    let jobs = SyncJobStore::new(db.clone());
    let job = jobs.enqueue(service.id).await.unwrap();

    let summary = coordinator(db, Duration::from_secs(5))
        .delete(service.id)
        .await
        .unwrap();
    assert_eq!(summary.jobs_canceled, 1);

    let job = jobs.get_by_id(job.id).await.unwrap();
    assert_eq!(job.state, SyncJobState::Canceled);
    assert!(job.cancel);
    assert!(job.finished_at.is_some());

    let err = jobs.enqueue(service.id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn processing_job_that_never_stops_times_out_without_mutation() {
    let test_db = setup_test_db().await.unwrap();
    let db = &test_db.db;
    let store = store(db);
    let service = create_github_service(&store, "Busy").await.unwrap();
    let repo = insert_repo(db, "github.com/acme/busy").await.unwrap();
    associate(db, service.id, repo.id).await.unwrap();
    let job = insert_sync_job(db, service.id, SyncJobState::Processing)
        .await
        .unwrap();

    let err = coordinator(db, Duration::from_millis(200))
        .delete(service.id)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::DeletionTimedOut { id, .. } if id == service.id));

    assert!(store.get_by_id(service.id).await.is_ok());
    let repo = find_repo(db, repo.id).await.unwrap();
    assert!(repo.deleted_at.is_none());
    assert_eq!(repo.name, "github.com/acme/busy");
    assert_eq!(association_count(db, service.id).await, 1);

    // Cancellation was requested, but the worker still owns the job.
    let jobs = SyncJobStore::new(db.clone());
    let job = jobs.get_by_id(job.id).await.unwrap();
    assert_eq!(job.state, SyncJobState::Processing);
    assert!(job.cancel);
    assert!(job.finished_at.is_none());
}

#[tokio::test]
async fn deletion_waits_for_the_worker_to_finish() {
    let test_db = setup_test_db().await.unwrap();
    let db = &test_db.db;
    let store = store(db);
    let service = create_github_service(&store, "Draining").await.unwrap();
    let repo = insert_repo(db, "github.com/acme/draining").await.unwrap();
    associate(db, service.id, repo.id).await.unwrap();
    let job = insert_sync_job(db, service.id, SyncJobState::Processing)
        .await
        .unwrap();

    let jobs = SyncJobStore::new(db.clone());
    let worker = {
        let jobs = jobs.clone();
        tokio::spawn(async move {
            loop {
                if jobs.is_cancel_requested(job.id).await.unwrap() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            jobs.mark_finished(job.id, JobOutcome::Canceled).await.unwrap()
        })
    };

    let summary = coordinator(db, Duration::from_secs(10))
        .delete(service.id)
        .await
        .unwrap();
    assert!(worker.await.unwrap(), "worker reports its own terminal state");
    assert_eq!(summary.repos_soft_deleted, 1);

    let job = jobs.get_by_id(job.id).await.unwrap();
    assert_eq!(job.state, SyncJobState::Canceled);
    assert!(find_repo(db, repo.id).await.unwrap().deleted_at.is_some());
}

#[tokio::test]
async fn caller_cancellation_aborts_the_drain_immediately() {
    let test_db = setup_test_db().await.unwrap();
    let db = &test_db.db;
    let store = store(db);
    let service = create_github_service(&store, "Stuck").await.unwrap();
    let repo = insert_repo(db, "github.com/acme/stuck").await.unwrap();
    associate(db, service.id, repo.id).await.unwrap();
    insert_sync_job(db, service.id, SyncJobState::Processing)
        .await
        .unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = coordinator(db, Duration::from_secs(30))
        .delete_with_cancellation(service.id, &token)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Canceled));
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(store.get_by_id(service.id).await.is_ok());
    assert!(find_repo(db, repo.id).await.unwrap().deleted_at.is_none());
    assert_eq!(association_count(db, service.id).await, 1);
}
