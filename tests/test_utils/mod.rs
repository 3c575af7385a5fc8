//! Test utilities for database testing.
//!
//! Every test gets its own file-backed SQLite database in a temporary
//! directory. A file (rather than `sqlite::memory:`) lets the pool hand out
//! several connections that see the same data, which the deletion
//! coordinator needs: it holds a lock transaction while cancelling and
//! polling through other connections.

#![allow(dead_code)]

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use extsvc::crypto::EncryptedConfigCodec;
use extsvc::kinds::ConnectionKind;
use extsvc::models::sync_job::SyncJobState;
use extsvc::models::{external_service_repo, repo, sync_job};
use extsvc::repositories::{ExternalService, ExternalServiceStore, NewExternalService};
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    Set, Statement,
};
use tempfile::TempDir;

/// A migrated database that lives as long as this value.
pub struct TestDb {
    pub db: DatabaseConnection,
    _dir: TempDir,
}

/// Sets up a file-backed SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<TestDb> {
    let dir = TempDir::new()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("extsvc.db").display());

    let mut opt = ConnectOptions::new(url);
    opt.max_connections(4)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .sqlx_logging(false);
    let db = Database::connect(opt).await?;

    // WAL lets readers proceed while another connection writes.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA journal_mode = WAL".to_string(),
    ))
    .await?;

    Migrator::up(&db, None).await?;

    Ok(TestDb { db, _dir: dir })
}

/// Key bytes for tests that exercise the encrypting codec.
pub const TEST_KEY: [u8; 32] = [7u8; 32];

pub fn encrypting_codec() -> EncryptedConfigCodec {
    EncryptedConfigCodec::from_key_bytes(Some(&TEST_KEY[..])).expect("valid test key")
}

pub fn store(db: &DatabaseConnection) -> ExternalServiceStore {
    ExternalServiceStore::new(db.clone(), encrypting_codec())
}

/// A minimal valid GitHub config listing `repos`.
pub fn github_config(repos: &[&str]) -> String {
    serde_json::json!({ "token": "t", "repos": repos }).to_string()
}

pub async fn create_github_service(
    store: &ExternalServiceStore,
    display_name: &str,
) -> Result<ExternalService> {
    let created = store
        .create(
            NewExternalService::new(
                ConnectionKind::GitHub,
                display_name,
                github_config(&["a/b"]),
            ),
            &[],
        )
        .await?;
    Ok(created)
}

pub async fn insert_repo(db: &DatabaseConnection, name: &str) -> Result<repo::Model> {
    let now = Utc::now().fixed_offset();
    let model = repo::ActiveModel {
        name: Set(name.to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model)
}

/// Records that `external_service_id` owns `repo_id`.
pub async fn associate(
    db: &DatabaseConnection,
    external_service_id: i64,
    repo_id: i64,
) -> Result<()> {
    external_service_repo::Entity::insert(external_service_repo::ActiveModel {
        external_service_id: Set(external_service_id),
        repo_id: Set(repo_id),
        clone_url: Set(format!("https://github.com/repo-{}.git", repo_id)),
        created_at: Set(Utc::now().fixed_offset()),
    })
    .exec_without_returning(db)
    .await?;
    Ok(())
}

/// Inserts a job directly in `state`, bypassing the state machine.
pub async fn insert_sync_job(
    db: &DatabaseConnection,
    external_service_id: i64,
    state: SyncJobState,
) -> Result<sync_job::Model> {
    let now = Utc::now().fixed_offset();
    let started = !matches!(state, SyncJobState::Queued);
    let finished = state.is_terminal();
    let failure_message = match state {
        SyncJobState::Errored | SyncJobState::Failed => Some(format!("{:?} sync", state)),
        _ => None,
    };

    let model = sync_job::ActiveModel {
        external_service_id: Set(external_service_id),
        state: Set(state),
        failure_message: Set(failure_message),
        queued_at: Set(now),
        started_at: Set(started.then_some(now)),
        finished_at: Set(finished.then_some(now)),
        process_after: Set(None),
        num_resets: Set(0),
        num_failures: Set(0),
        cancel: Set(false),
        repos_synced: Set(0),
        repos_added: Set(0),
        repos_modified: Set(0),
        repos_unmodified: Set(0),
        repos_deleted: Set(0),
        repo_sync_errors: Set(0),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model)
}

pub async fn find_repo(db: &DatabaseConnection, id: i64) -> Result<repo::Model> {
    repo::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| anyhow::anyhow!("repo {} not found", id))
}
