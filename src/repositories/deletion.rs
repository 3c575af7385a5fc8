//! # Deletion Coordinator
//!
//! Removes an external service without racing an in-flight sync:
//!
//! 1. lock the live service row (`SELECT ... FOR UPDATE`) so no new sync job
//!    can be enqueued against it;
//! 2. outside that transaction, request cancellation of its active jobs;
//! 3. poll until no job is queued or processing, bounded by the drain timeout
//!    and aborted early by the caller's cancellation token;
//! 4. in a fresh transaction, stage the ids of its repositories and drop the
//!    associations;
//! 5. soft delete every staged repository that no other service still owns;
//! 6. soft delete the service itself.
//!
//! Nothing is mutated before step 4, so a timed out or canceled deletion
//! leaves the service and its repositories intact.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, Query, SelectStatement};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QuerySelect, TransactionTrait,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::{DbResultExt, StoreError, StoreResult};
use crate::models::{external_service, external_service_repo, repo};
use crate::repositories::audit::{self, EXTERNAL_SERVICE_DELETED, ExternalServiceEvent};
use crate::repositories::sync_job::{SyncJobStore, active_job_count};

/// Bounds of the drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl DrainSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timeout: config.drain_timeout(),
            poll_interval: config.drain_poll_interval(),
        }
    }
}

/// What a successful deletion changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionSummary {
    pub external_service_id: i64,
    /// Jobs newly flagged for cancellation.
    pub jobs_canceled: u64,
    pub associations_removed: u64,
    pub repos_soft_deleted: u64,
}

#[derive(Debug, Clone)]
pub struct DeletionCoordinator {
    db: DatabaseConnection,
    jobs: SyncJobStore,
    drain: DrainSettings,
}

impl DeletionCoordinator {
    pub fn new(db: DatabaseConnection, drain: DrainSettings) -> Self {
        Self {
            jobs: SyncJobStore::new(db.clone()),
            db,
            drain,
        }
    }

    pub async fn delete(&self, id: i64) -> StoreResult<DeletionSummary> {
        self.delete_with_cancellation(id, &CancellationToken::new())
            .await
    }

    /// Delete `id`, aborting the drain with [`StoreError::Canceled`] as soon
    /// as `cancel` fires.
    pub async fn delete_with_cancellation(
        &self,
        id: i64,
        cancel: &CancellationToken,
    ) -> StoreResult<DeletionSummary> {
        let result = self.run(id, cancel).await;

        let outcome = match &result {
            Ok(_) => "deleted",
            Err(StoreError::DeletionTimedOut { .. }) => "timed_out",
            Err(StoreError::Canceled) => "canceled",
            Err(err) if err.is_not_found() => "not_found",
            Err(_) => "error",
        };
        counter!("extsvc_deletions_total", "outcome" => outcome).increment(1);

        match &result {
            Ok(summary) => tracing::info!(
                external_service_id = id,
                jobs_canceled = summary.jobs_canceled,
                associations_removed = summary.associations_removed,
                repos_soft_deleted = summary.repos_soft_deleted,
                "External service deleted"
            ),
            Err(err) => tracing::warn!(
                external_service_id = id,
                outcome,
                error = %err,
                "External service deletion failed"
            ),
        }
        result
    }

    async fn run(&self, id: i64, cancel: &CancellationToken) -> StoreResult<DeletionSummary> {
        let deadline = Instant::now() + self.drain.timeout;
        let mut jobs_canceled = 0;

        loop {
            let lock = self
                .db
                .begin()
                .await
                .context("beginning deletion lock transaction")?;
            lock_live_service(&lock, id).await?;

            jobs_canceled += self.jobs.cancel_by_external_service(id).await?;

            let drain_started = Instant::now();
            self.wait_for_drain(id, deadline, cancel).await?;
            histogram!("extsvc_deletion_drain_seconds")
                .record(drain_started.elapsed().as_secs_f64());

            lock.commit()
                .await
                .context("releasing deletion lock transaction")?;

            let txn = self
                .db
                .begin()
                .await
                .context("beginning deletion transaction")?;
            let service = lock_live_service(&txn, id).await?;

            // A job enqueued between the two transactions is drained again.
            let active = active_job_count(&txn, id)
                .await
                .context("rechecking active sync jobs")?;
            if active > 0 {
                txn.rollback()
                    .await
                    .context("rolling back deletion transaction")?;
                tracing::debug!(
                    external_service_id = id,
                    active,
                    "Sync job started while draining, draining again"
                );
                continue;
            }

            let (associations_removed, repos_soft_deleted) =
                remove_service(&txn, &service).await?;
            txn.commit().await.context("committing deletion")?;

            counter!("extsvc_repos_soft_deleted_total").increment(repos_soft_deleted);
            return Ok(DeletionSummary {
                external_service_id: id,
                jobs_canceled,
                associations_removed,
                repos_soft_deleted,
            });
        }
    }

    async fn wait_for_drain(
        &self,
        id: i64,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Canceled),
            drained = tokio::time::timeout_at(deadline, self.poll_until_drained(id)) => {
                match drained {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::DeletionTimedOut {
                        id,
                        waited: self.drain.timeout,
                    }),
                }
            }
        }
    }

    async fn poll_until_drained(&self, id: i64) -> StoreResult<()> {
        loop {
            if !self.jobs.has_active_jobs(id).await? {
                return Ok(());
            }
            tokio::time::sleep(self.drain.poll_interval).await;
        }
    }
}

async fn lock_live_service(
    txn: &DatabaseTransaction,
    id: i64,
) -> StoreResult<external_service::Model> {
    external_service::Entity::find_by_id(id)
        .filter(external_service::Column::DeletedAt.is_null())
        .lock_exclusive()
        .one(txn)
        .await
        .context("locking external service for deletion")?
        .ok_or(StoreError::NotFound { id })
}

/// Steps 4 to 6, inside the deletion transaction.
async fn remove_service(
    txn: &DatabaseTransaction,
    service: &external_service::Model,
) -> StoreResult<(u64, u64)> {
    let id = service.id;

    let staged: BTreeSet<i64> = external_service_repo::Entity::find()
        .select_only()
        .column(external_service_repo::Column::RepoId)
        .filter(external_service_repo::Column::ExternalServiceId.eq(id))
        .into_tuple::<i64>()
        .all(txn)
        .await
        .context("staging affected repositories")?
        .into_iter()
        .collect();

    let removed = external_service_repo::Entity::delete_many()
        .filter(external_service_repo::Column::ExternalServiceId.eq(id))
        .exec(txn)
        .await
        .context("deleting external service repo associations")?
        .rows_affected;

    let now = Utc::now().fixed_offset();
    // Consumes the staging set.
    let soft_deleted = soft_delete_orphans(txn, staged, now).await?;

    let result = external_service::Entity::update_many()
        .col_expr(external_service::Column::DeletedAt, Expr::value(now))
        .col_expr(external_service::Column::UpdatedAt, Expr::value(now))
        .filter(external_service::Column::Id.eq(id))
        .filter(external_service::Column::DeletedAt.is_null())
        .exec(txn)
        .await
        .context("soft deleting external service")?;
    if result.rows_affected == 0 {
        return Err(StoreError::NotFound { id });
    }

    audit::record(
        txn,
        EXTERNAL_SERVICE_DELETED,
        &ExternalServiceEvent {
            id,
            kind: service.kind,
            display_name: &service.display_name,
        },
    )
    .await?;

    Ok((removed, soft_deleted))
}

fn has_association() -> SelectStatement {
    Query::select()
        .expr(Expr::val(1))
        .from(external_service_repo::Entity)
        .and_where(
            Expr::col((
                external_service_repo::Entity,
                external_service_repo::Column::RepoId,
            ))
            .equals((repo::Entity, repo::Column::Id)),
        )
        .to_owned()
}

/// Soft delete staged repositories that no service owns any more.
///
/// The orphan check is repeated in each update so an association added by a
/// concurrent sync after the candidate query still protects its repository.
async fn soft_delete_orphans<C: ConnectionTrait>(
    conn: &C,
    staged: BTreeSet<i64>,
    now: DateTimeWithTimeZone,
) -> StoreResult<u64> {
    if staged.is_empty() {
        return Ok(0);
    }

    let candidates = repo::Entity::find()
        .filter(repo::Column::Id.is_in(staged))
        .filter(repo::Column::DeletedAt.is_null())
        .filter(Expr::exists(has_association()).not())
        .all(conn)
        .await
        .context("finding orphaned repositories")?;

    let mut soft_deleted = 0;
    for candidate in candidates {
        let result = repo::Entity::update_many()
            .col_expr(
                repo::Column::Name,
                Expr::value(repo::soft_deleted_name(&candidate.name, now)),
            )
            .col_expr(repo::Column::DeletedAt, Expr::value(now))
            .col_expr(repo::Column::UpdatedAt, Expr::value(now))
            .filter(repo::Column::Id.eq(candidate.id))
            .filter(repo::Column::DeletedAt.is_null())
            .filter(Expr::exists(has_association()).not())
            .exec(conn)
            .await
            .context("soft deleting orphaned repository")?;
        soft_deleted += result.rows_affected;
    }

    tracing::debug!(repos = soft_deleted, "Soft deleted orphaned repositories");
    Ok(soft_deleted)
}
