//! Integration tests for creating, updating and upserting external services.

mod test_utils;

use std::sync::Arc;

use chrono::{Duration, Utc};
use extsvc::error::StoreError;
use extsvc::kinds::ConnectionKind;
use extsvc::models::sync_job::SyncJobState;
use extsvc::models::{code_host, external_service, sync_job};
use extsvc::repositories::audit::{self, EXTERNAL_SERVICE_CREATED};
use extsvc::repositories::{
    ConnectionLimitHook, ExternalServiceStore, ExternalServiceUpdate, ListOptions,
    NewExternalService, SortDirection, SyncJobStore,
};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{Value, json};
use test_utils::*;

fn github(display_name: &str, config: Value) -> NewExternalService {
    NewExternalService::new(ConnectionKind::GitHub, display_name, config.to_string())
}

#[tokio::test]
async fn create_then_update_recomputes_unrestricted_and_schedules_sync() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);

    let created = store
        .create(github("GitHub", json!({"token": "t", "repos": ["a/b"]})), &[])
        .await
        .unwrap();
    assert_eq!(created.id, 1);
    assert!(created.unrestricted);
    assert!(created.next_sync_at.is_none());

    let before = Utc::now().fixed_offset() - Duration::seconds(1);
    store
        .update(
            1,
            ExternalServiceUpdate {
                config: Some(
                    json!({"token": "t", "repos": ["a/b"], "authorization": {}}).to_string(),
                ),
                ..Default::default()
            },
            &[],
        )
        .await
        .unwrap();
    let after = Utc::now().fixed_offset() + Duration::seconds(1);

    let updated = store.get_by_id(1).await.unwrap();
    assert!(!updated.unrestricted);
    let next_sync_at = updated.next_sync_at.expect("config change schedules a sync");
    assert!(next_sync_at >= before && next_sync_at <= after);
}

#[tokio::test]
async fn explicit_next_sync_time_wins_over_immediate_resync() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let created = create_github_service(&store, "GitHub").await.unwrap();

    let later = Utc::now().fixed_offset() + Duration::hours(6);
    store
        .update(
            created.id,
            ExternalServiceUpdate {
                config: Some(github_config(&["a/b", "c/d"])),
                next_sync_at: Some(later),
                ..Default::default()
            },
            &[],
        )
        .await
        .unwrap();

    let updated = store.get_by_id(created.id).await.unwrap();
    let next_sync_at = updated.next_sync_at.unwrap();
    assert!((next_sync_at - later).num_seconds().abs() <= 1);
}

#[tokio::test]
async fn configs_are_sealed_at_rest() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);

    let created = store
        .create(
            github("GitHub", json!({"token": "secret-token", "repos": ["a/b"]})),
            &[],
        )
        .await
        .unwrap();

    let row = external_service::Entity::find_by_id(created.id)
        .one(&test_db.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.encryption_key_id, store.codec().key_id());
    assert!(!row.encryption_key_id.is_empty());
    assert!(
        !String::from_utf8_lossy(&row.config).contains("secret-token"),
        "plaintext must not be stored"
    );

    let loaded = store.get_by_id(created.id).await.unwrap();
    let doc: Value = serde_json::from_str(&loaded.config).unwrap();
    assert_eq!(doc["token"], "secret-token");
}

#[tokio::test]
async fn jsonc_configs_are_stored_normalized() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);

    let created = store
        .create(
            NewExternalService::new(
                ConnectionKind::GitHub,
                "GitHub",
                "{\n  // personal token\n  \"token\": \"t\",\n  \"repos\": [\"a/b\",],\n}",
            ),
            &[],
        )
        .await
        .unwrap();

    let loaded = store.get_by_id(created.id).await.unwrap();
    assert!(!loaded.config.contains("personal token"));
    let doc: Value = serde_json::from_str(&loaded.config).unwrap();
    assert_eq!(doc["repos"], json!(["a/b"]));
}

#[tokio::test]
async fn redacted_sentinel_is_rejected_on_create_and_update() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);

    let err = store
        .create(github("GitHub", json!({"token": "REDACTED", "repos": ["a/b"]})), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::RedactedSecretPresent));

    let created = create_github_service(&store, "GitHub").await.unwrap();
    let err = store
        .update(
            created.id,
            ExternalServiceUpdate {
                config: Some(json!({"token": "t", "repos": ["REDACTED/x"]}).to_string()),
                ..Default::default()
            },
            &[],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::RedactedSecretPresent));
}

#[tokio::test]
async fn echoing_a_redacted_config_keeps_the_stored_secret() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let created = store
        .create(github("GitHub", json!({"token": "real", "repos": ["a/b"]})), &[])
        .await
        .unwrap();

    let redacted = created.redacted().unwrap();
    assert!(redacted.config.contains("REDACTED"));

    let mut echoed: Value = serde_json::from_str(&redacted.config).unwrap();
    echoed["repos"] = json!(["a/b", "c/d"]);
    store
        .update(
            created.id,
            ExternalServiceUpdate {
                config: Some(echoed.to_string()),
                ..Default::default()
            },
            &[],
        )
        .await
        .unwrap();

    let loaded = store.get_by_id(created.id).await.unwrap();
    let doc: Value = serde_json::from_str(&loaded.config).unwrap();
    assert_eq!(doc["token"], "real");
    assert_eq!(doc["repos"], json!(["a/b", "c/d"]));
}

#[tokio::test]
async fn validation_errors_are_aggregated() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);

    let err = store
        .create(
            NewExternalService::new(
                ConnectionKind::BitbucketServer,
                "Bitbucket",
                json!({"url": "https://bbs.example.com", "token": 1, "extra": true}).to_string(),
            ),
            &[],
        )
        .await
        .unwrap_err();

    let StoreError::ValidationFailed(errs) = err else {
        panic!("expected validation failure");
    };
    assert_eq!(errs.len(), 3, "{errs}");
    assert!(errs.to_string().starts_with("3 errors occurred:"));
    assert_eq!(store.count(&ListOptions::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn update_of_missing_service_is_not_found() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);

    let err = store
        .update(
            42,
            ExternalServiceUpdate {
                display_name: Some("renamed".into()),
                ..Default::default()
            },
            &[],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { id: 42 }));
    assert!(store.get_by_id(42).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn upsert_refuses_to_delete_live_services_and_writes_nothing() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let live = create_github_service(&store, "Live").await.unwrap();

    let mut marked = live.clone();
    marked.deleted_at = Some(Utc::now().fixed_offset());
    let mut fresh = live.clone();
    fresh.id = 0;
    fresh.display_name = "Fresh".into();

    let err = store.upsert(vec![fresh, marked], &[]).await.unwrap_err();
    assert!(matches!(err, StoreError::IllegalDeleteViaUpsert));

    let remaining = store.list(&ListOptions::default()).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].display_name, "Live");
}

#[tokio::test]
async fn upsert_inserts_new_and_overwrites_existing() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let existing = create_github_service(&store, "Before").await.unwrap();

    let mut renamed = existing.clone();
    renamed.display_name = "After".into();
    renamed.config = json!({"token": "t", "repos": ["a/b"], "authorization": {}}).to_string();
    let mut fresh = existing.clone();
    fresh.id = 0;
    fresh.display_name = "Fresh".into();

    let written = store.upsert(vec![renamed, fresh], &[]).await.unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].id, existing.id);
    assert!(!written[0].unrestricted);
    assert_ne!(written[1].id, existing.id);

    let reloaded = store.get_by_id(existing.id).await.unwrap();
    assert_eq!(reloaded.display_name, "After");
    assert_eq!(store.count(&ListOptions::default()).await.unwrap(), 2);
}

#[tokio::test]
async fn upsert_mirrors_unparseable_tombstones_without_webhooks() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);

    let mut tombstone = create_github_service(&store, "Template").await.unwrap();
    tombstone.id = 0;
    tombstone.display_name = "Tombstone".into();
    tombstone.config = json!({"webhooks": "not-a-list"}).to_string();
    tombstone.deleted_at = Some(Utc::now().fixed_offset());

    let written = store.upsert(vec![tombstone], &[]).await.unwrap();
    assert!(written[0].is_deleted());
    assert!(!written[0].has_webhooks);
    assert_eq!(store.count(&ListOptions::default()).await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_rate_limit_on_one_code_host_is_rejected() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);

    let limited = store
        .create(
            github(
                "Limited",
                json!({
                    "token": "t",
                    "repos": ["a/b"],
                    "rateLimit": {"enabled": true, "requestsPerHour": 100}
                }),
            ),
            &[],
        )
        .await
        .unwrap();

    let host = code_host::Entity::find_by_id(limited.code_host_id.unwrap())
        .one(&test_db.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(host.url, "https://github.com/");
    assert_eq!(host.api_rate_limit_quota, Some(100));
    assert_eq!(host.api_rate_limit_interval_seconds, Some(3600));

    let err = store
        .create(
            github(
                "Second",
                json!({
                    "token": "t",
                    "repos": ["c/d"],
                    "rateLimit": {"enabled": true, "requestsPerHour": 200}
                }),
            ),
            &[],
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "1 error occurred:\n\t* existing external service, \"Limited\", already has a rate limit set"
    );

    // The owner of the limit may still change it.
    store
        .update(
            limited.id,
            ExternalServiceUpdate {
                config: Some(
                    json!({
                        "token": "t",
                        "repos": ["a/b"],
                        "rateLimit": {"enabled": true, "requestsPerHour": 300}
                    })
                    .to_string(),
                ),
                ..Default::default()
            },
            &[],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn services_on_one_host_share_a_code_host_row() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);

    let a = create_github_service(&store, "A").await.unwrap();
    let b = store
        .create(
            github(
                "B",
                json!({"url": "https://GitHub.com", "token": "t", "repos": ["c/d"]}),
            ),
            &[],
        )
        .await
        .unwrap();
    let gitlab = store
        .create(
            NewExternalService::new(
                ConnectionKind::GitLab,
                "GitLab",
                json!({"token": "t"}).to_string(),
            ),
            &[],
        )
        .await
        .unwrap();

    assert!(a.code_host_id.is_some());
    assert_eq!(a.code_host_id, b.code_host_id);
    assert_ne!(a.code_host_id, gitlab.code_host_id);

    let hosts = code_host::Entity::find().all(&test_db.db).await.unwrap();
    assert_eq!(hosts.len(), 2);
}

#[tokio::test]
async fn untrusted_mode_strips_authorization() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db).with_untrusted_code_host_permissions(true);

    let created = store
        .create(
            github(
                "GitHub",
                json!({"token": "t", "repos": ["a/b"], "authorization": {}}),
            ),
            &[],
        )
        .await
        .unwrap();
    assert!(!created.unrestricted);

    let loaded = store.get_by_id(created.id).await.unwrap();
    let doc: Value = serde_json::from_str(&loaded.config).unwrap();
    assert!(doc.get("authorization").is_none());
    assert!(!loaded.unrestricted);
}

#[tokio::test]
async fn connection_limit_hook_rejects_inside_the_transaction() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db).with_before_create_hook(Arc::new(ConnectionLimitHook::new(1)));

    create_github_service(&store, "First").await.unwrap();
    let err = create_github_service(&store, "Second").await.unwrap_err();
    let err = err.downcast::<StoreError>().unwrap();
    assert!(matches!(
        err,
        StoreError::Rejected(ref message) if message == "maximum number of external services (1) reached"
    ));

    assert_eq!(store.count(&ListOptions::default()).await.unwrap(), 1);
    let events = audit::list_by_name(&test_db.db, EXTERNAL_SERVICE_CREATED)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn create_writes_an_audit_event_without_the_config() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let created = create_github_service(&store, "Audited").await.unwrap();

    let events = audit::list_by_name(&test_db.db, EXTERNAL_SERVICE_CREATED)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    let argument = events[0].argument.clone().unwrap();
    assert_eq!(argument["id"], created.id);
    assert_eq!(argument["kind"], "GITHUB");
    assert_eq!(argument["displayName"], "Audited");
    assert!(argument.get("config").is_none());
}

#[tokio::test]
async fn list_count_and_distinct_kinds() {
    let test_db = setup_test_db().await.unwrap();
    let store = ExternalServiceStore::new(
        test_db.db.clone(),
        extsvc::crypto::EncryptedConfigCodec::plaintext(),
    );

    let first = create_github_service(&store, "one").await.unwrap();
    let second = create_github_service(&store, "two").await.unwrap();
    store
        .create(
            NewExternalService::new(
                ConnectionKind::GitLab,
                "three",
                json!({"token": "t"}).to_string(),
            ),
            &[],
        )
        .await
        .unwrap();

    let all = store.list(&ListOptions::default()).await.unwrap();
    let names: Vec<_> = all.iter().map(|s| s.display_name.as_str()).collect();
    assert_eq!(names, ["three", "two", "one"]);

    let github_only = ListOptions {
        kinds: vec![ConnectionKind::GitHub],
        ..Default::default()
    };
    assert_eq!(store.count(&github_only).await.unwrap(), 2);

    let page = store
        .list(&ListOptions {
            after_id: Some(first.id),
            direction: SortDirection::Asc,
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, second.id);

    assert_eq!(
        store.distinct_kinds().await.unwrap(),
        vec![ConnectionKind::GitHub, ConnectionKind::GitLab]
    );
}

#[tokio::test]
async fn cloud_default_flag_is_updatable_and_filterable() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let managed = create_github_service(&store, "Managed").await.unwrap();
    let personal = create_github_service(&store, "Personal").await.unwrap();
    assert!(!managed.cloud_default);

    let only_cloud_default = ListOptions {
        only_cloud_default: true,
        ..Default::default()
    };
    assert_eq!(store.count(&only_cloud_default).await.unwrap(), 0);

    store
        .update(
            managed.id,
            ExternalServiceUpdate {
                cloud_default: Some(true),
                ..Default::default()
            },
            &[],
        )
        .await
        .unwrap();

    let reloaded = store.get_by_id(managed.id).await.unwrap();
    assert!(reloaded.cloud_default);
    // Flag-only updates leave the config and sync schedule alone.
    assert_eq!(reloaded.config, managed.config);
    assert_eq!(reloaded.next_sync_at, managed.next_sync_at);

    let listed = store.list(&only_cloud_default).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|s| s.id).collect();
    assert_eq!(ids, [managed.id]);
    assert_eq!(store.count(&ListOptions::default()).await.unwrap(), 2);
    assert!(!store.get_by_id(personal.id).await.unwrap().cloud_default);
}

#[tokio::test]
async fn last_sync_error_reflects_latest_finished_job() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let service = create_github_service(&store, "GitHub").await.unwrap();

    assert_eq!(store.get_last_sync_error(service.id).await.unwrap(), None);

    insert_sync_job(&test_db.db, service.id, SyncJobState::Errored)
        .await
        .unwrap();
    assert_eq!(
        store.get_last_sync_error(service.id).await.unwrap(),
        Some("Errored sync".to_string())
    );

    insert_sync_job(&test_db.db, service.id, SyncJobState::Completed)
        .await
        .unwrap();
    assert_eq!(store.get_last_sync_error(service.id).await.unwrap(), None);
}

#[tokio::test]
async fn last_sync_error_ignores_jobs_without_a_finish_time() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let service = create_github_service(&store, "GitHub").await.unwrap();

    let job = insert_sync_job(&test_db.db, service.id, SyncJobState::Errored)
        .await
        .unwrap();
    let mut job: sync_job::ActiveModel = job.into();
    job.finished_at = Set(None);
    job.update(&test_db.db).await.unwrap();

    assert_eq!(store.get_last_sync_error(service.id).await.unwrap(), None);

    // Agrees with the per-service summary.
    let summary = SyncJobStore::new(test_db.db.clone())
        .latest_sync_errors()
        .await
        .unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].failure_message, "");
}

#[tokio::test]
async fn repo_count_counts_associations() {
    let test_db = setup_test_db().await.unwrap();
    let store = store(&test_db.db);
    let service = create_github_service(&store, "GitHub").await.unwrap();

    for name in ["github.com/a/b", "github.com/c/d"] {
        let repo = insert_repo(&test_db.db, name).await.unwrap();
        associate(&test_db.db, service.id, repo.id).await.unwrap();
    }
    assert_eq!(store.repo_count(service.id).await.unwrap(), 2);
}
