//! # SyncJob Repository
//!
//! State machine operations for the external_service_sync_jobs table.
//!
//! Jobs move `queued -> processing -> {completed, errored, failed}`. A queued
//! job can be canceled outright; a processing job is only flagged with
//! `cancel = true` and the worker that owns it is expected to notice the flag
//! and report its own terminal state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::{
    Expr, IntoCondition, LockBehavior, LockType, NullOrdering, Order,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set,
    TransactionTrait,
};

use crate::error::{DbResultExt, StoreError, StoreResult};
use crate::models::external_service;
use crate::models::sync_job::{ActiveModel, Column, Entity, Model, SyncJobState};

/// Result counters reported by a sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncJobCounters {
    pub repos_synced: i32,
    pub repos_added: i32,
    pub repos_modified: i32,
    pub repos_unmodified: i32,
    pub repos_deleted: i32,
    pub repo_sync_errors: i32,
}

/// How a worker finished a processing job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Errored(String),
    Failed(String),
    /// The worker observed the cancel flag and stopped.
    Canceled,
}

impl JobOutcome {
    fn state(&self) -> SyncJobState {
        match self {
            JobOutcome::Completed => SyncJobState::Completed,
            JobOutcome::Errored(_) => SyncJobState::Errored,
            JobOutcome::Failed(_) => SyncJobState::Failed,
            JobOutcome::Canceled => SyncJobState::Canceled,
        }
    }

    fn failure_message(&self) -> Option<String> {
        match self {
            JobOutcome::Errored(message) | JobOutcome::Failed(message) => Some(message.clone()),
            JobOutcome::Completed | JobOutcome::Canceled => None,
        }
    }
}

/// Filters for listing and counting jobs.
#[derive(Debug, Clone, Default)]
pub struct SyncJobListOptions {
    pub external_service_id: Option<i64>,
    /// Empty means any state.
    pub states: Vec<SyncJobState>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SyncJobListOptions {
    fn apply(&self, mut query: Select<Entity>) -> Select<Entity> {
        if let Some(id) = self.external_service_id {
            query = query.filter(Column::ExternalServiceId.eq(id));
        }
        if !self.states.is_empty() {
            query = query.filter(Column::State.is_in(self.states.iter().copied()));
        }
        query
    }
}

/// Most recent sync result of one external service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestSyncError {
    pub external_service_id: i64,
    /// Empty when the latest finished run succeeded or there was none.
    pub failure_message: String,
}

/// Repository for sync job database operations
#[derive(Debug, Clone)]
pub struct SyncJobStore {
    db: DatabaseConnection,
}

impl SyncJobStore {
    /// Create a new SyncJobStore with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Queue a sync for a live external service.
    ///
    /// The service row is locked for the duration of the insert so that a
    /// concurrent deletion either sees the new job or blocks it. If a job is
    /// already queued or processing, that job is returned instead.
    pub async fn enqueue(&self, external_service_id: i64) -> StoreResult<Model> {
        let txn = self
            .db
            .begin()
            .await
            .context("beginning enqueue transaction")?;

        let service = external_service::Entity::find_by_id(external_service_id)
            .filter(external_service::Column::DeletedAt.is_null())
            .lock_exclusive()
            .one(&txn)
            .await
            .context("locking external service for enqueue")?;
        if service.is_none() {
            return Err(StoreError::NotFound {
                id: external_service_id,
            });
        }

        let existing = Entity::find()
            .filter(Column::ExternalServiceId.eq(external_service_id))
            .filter(Column::State.is_in(SyncJobState::ACTIVE))
            .order_by_asc(Column::Id)
            .one(&txn)
            .await
            .context("looking up active sync job")?;
        if let Some(job) = existing {
            txn.commit().await.context("committing enqueue")?;
            tracing::debug!(
                job_id = job.id,
                external_service_id,
                state = ?job.state,
                "Sync job already active, not enqueuing another"
            );
            return Ok(job);
        }

        let now = Utc::now().fixed_offset();
        let job = ActiveModel {
            external_service_id: Set(external_service_id),
            state: Set(SyncJobState::Queued),
            failure_message: Set(None),
            queued_at: Set(now),
            started_at: Set(None),
            finished_at: Set(None),
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
        .insert(&txn)
        .await
        .context("inserting sync job")?;

        txn.commit().await.context("committing enqueue")?;

        tracing::info!(
            job_id = job.id,
            external_service_id,
            "Sync job enqueued"
        );
        Ok(job)
    }

    /// Claim the oldest due queued job and move it to `processing`.
    pub async fn dequeue(&self) -> StoreResult<Option<Model>> {
        let now = Utc::now().fixed_offset();
        let txn = self
            .db
            .begin()
            .await
            .context("beginning dequeue transaction")?;

        let candidate = Entity::find()
            .filter(Column::State.eq(SyncJobState::Queued))
            .filter(
                Condition::any()
                    .add(Column::ProcessAfter.is_null())
                    .add(Column::ProcessAfter.lte(now)),
            )
            .order_by_asc(Column::QueuedAt)
            .order_by_asc(Column::Id)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await
            .context("selecting queued sync job")?;

        let Some(candidate) = candidate else {
            txn.commit().await.context("committing dequeue")?;
            return Ok(None);
        };

        // Double-check it is still queued
        let claimed = Entity::update_many()
            .col_expr(Column::State, Expr::value(SyncJobState::Processing))
            .col_expr(Column::StartedAt, Expr::value(now))
            .filter(Column::Id.eq(candidate.id))
            .filter(Column::State.eq(SyncJobState::Queued))
            .exec(&txn)
            .await
            .context("claiming sync job")?;

        if claimed.rows_affected == 0 {
            txn.commit().await.context("committing dequeue")?;
            return Ok(None);
        }

        let job = Entity::find_by_id(candidate.id)
            .one(&txn)
            .await
            .context("reloading claimed sync job")?
            .ok_or(StoreError::JobNotFound { id: candidate.id })?;
        txn.commit().await.context("committing dequeue")?;

        tracing::info!(
            job_id = job.id,
            external_service_id = job.external_service_id,
            "Sync job claimed"
        );
        Ok(Some(job))
    }

    /// Request cancellation of one job.
    ///
    /// Jobs that are already terminal or already flagged are left untouched
    /// and are not an error; only a missing job is.
    pub async fn cancel_by_id(&self, id: i64) -> StoreResult<()> {
        let affected = request_cancel(&self.db, Column::Id.eq(id))
            .await
            .context("canceling sync job")?;

        if affected == 0 {
            let exists = Entity::find_by_id(id)
                .one(&self.db)
                .await
                .context("looking up sync job")?
                .is_some();
            if !exists {
                return Err(StoreError::JobNotFound { id });
            }
            tracing::debug!(job_id = id, "Sync job already canceled or finished");
            return Ok(());
        }

        counter!("extsvc_sync_jobs_cancel_requested_total").increment(affected);
        tracing::info!(job_id = id, "Sync job cancellation requested");
        Ok(())
    }

    /// Request cancellation of every active job of an external service.
    ///
    /// Returns how many jobs were newly flagged; zero is not an error.
    pub async fn cancel_by_external_service(&self, external_service_id: i64) -> StoreResult<u64> {
        let affected = request_cancel(
            &self.db,
            Column::ExternalServiceId.eq(external_service_id),
        )
        .await
        .context("canceling sync jobs of external service")?;

        if affected > 0 {
            counter!("extsvc_sync_jobs_cancel_requested_total").increment(affected);
            tracing::info!(
                external_service_id,
                jobs = affected,
                "Sync job cancellation requested"
            );
        }
        Ok(affected)
    }

    /// Persist the six result counters of a job.
    pub async fn update_counters(&self, id: i64, counters: SyncJobCounters) -> StoreResult<()> {
        let result = Entity::update_many()
            .col_expr(Column::ReposSynced, Expr::value(counters.repos_synced))
            .col_expr(Column::ReposAdded, Expr::value(counters.repos_added))
            .col_expr(Column::ReposModified, Expr::value(counters.repos_modified))
            .col_expr(Column::ReposUnmodified, Expr::value(counters.repos_unmodified))
            .col_expr(Column::ReposDeleted, Expr::value(counters.repos_deleted))
            .col_expr(Column::RepoSyncErrors, Expr::value(counters.repo_sync_errors))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await
            .context("updating sync job counters")?;

        if result.rows_affected == 0 {
            return Err(StoreError::JobNotFound { id });
        }
        Ok(())
    }

    /// Whether the worker owning `id` has been asked to stop.
    pub async fn is_cancel_requested(&self, id: i64) -> StoreResult<bool> {
        Entity::find_by_id(id)
            .select_only()
            .column(Column::Cancel)
            .into_tuple::<bool>()
            .one(&self.db)
            .await
            .context("reading sync job cancel flag")?
            .ok_or(StoreError::JobNotFound { id })
    }

    /// Record the terminal state of a processing job.
    ///
    /// Returns `false` when the job exists but is no longer processing.
    pub async fn mark_finished(&self, id: i64, outcome: JobOutcome) -> StoreResult<bool> {
        let now = Utc::now().fixed_offset();
        let mut update = Entity::update_many()
            .col_expr(Column::State, Expr::value(outcome.state()))
            .col_expr(Column::FinishedAt, Expr::value(now))
            .col_expr(Column::FailureMessage, Expr::value(outcome.failure_message()));
        if matches!(outcome, JobOutcome::Errored(_) | JobOutcome::Failed(_)) {
            update = update.col_expr(
                Column::NumFailures,
                Expr::col(Column::NumFailures).add(1),
            );
        }

        let result = update
            .filter(Column::Id.eq(id))
            .filter(Column::State.eq(SyncJobState::Processing))
            .exec(&self.db)
            .await
            .context("finishing sync job")?;

        if result.rows_affected == 0 {
            let job = self.get_by_id(id).await?;
            tracing::warn!(
                job_id = id,
                state = ?job.state,
                "Ignoring finish report for a job that is not processing"
            );
            return Ok(false);
        }

        tracing::info!(job_id = id, state = ?outcome.state(), "Sync job finished");
        Ok(true)
    }

    pub async fn get_by_id(&self, id: i64) -> StoreResult<Model> {
        Entity::find_by_id(id)
            .one(&self.db)
            .await
            .context("fetching sync job")?
            .ok_or(StoreError::JobNotFound { id })
    }

    /// The most recently created job of an external service.
    pub async fn get_last(&self, external_service_id: i64) -> StoreResult<Option<Model>> {
        Entity::find()
            .filter(Column::ExternalServiceId.eq(external_service_id))
            .order_by_desc(Column::Id)
            .one(&self.db)
            .await
            .context("fetching last sync job")
    }

    /// Jobs ordered by start time, newest first; never-started jobs last.
    pub async fn list(&self, options: &SyncJobListOptions) -> StoreResult<Vec<Model>> {
        options
            .apply(Entity::find())
            .order_by_with_nulls(Column::StartedAt, Order::Desc, NullOrdering::Last)
            .order_by_desc(Column::Id)
            .limit(options.limit)
            .offset(options.offset)
            .all(&self.db)
            .await
            .context("listing sync jobs")
    }

    /// Number of jobs matching `options`, ignoring limit and offset.
    pub async fn count(&self, options: &SyncJobListOptions) -> StoreResult<u64> {
        options
            .apply(Entity::find())
            .count(&self.db)
            .await
            .context("counting sync jobs")
    }

    /// Whether any job of the service is still queued or processing.
    pub async fn has_active_jobs(&self, external_service_id: i64) -> StoreResult<bool> {
        let active = active_job_count(&self.db, external_service_id)
            .await
            .context("counting active sync jobs")?;
        Ok(active > 0)
    }

    /// Latest finished-run message for every live, non cloud-default service.
    pub async fn latest_sync_errors(&self) -> StoreResult<Vec<LatestSyncError>> {
        let service_ids: Vec<i64> = external_service::Entity::find()
            .select_only()
            .column(external_service::Column::Id)
            .filter(external_service::Column::DeletedAt.is_null())
            .filter(external_service::Column::CloudDefault.eq(false))
            .into_tuple::<i64>()
            .all(&self.db)
            .await
            .context("listing external services for sync errors")?;

        if service_ids.is_empty() {
            return Ok(Vec::new());
        }

        let finished = Entity::find()
            .filter(Column::ExternalServiceId.is_in(service_ids.iter().copied()))
            .filter(Column::State.is_in(SyncJobState::FINISHED))
            .filter(Column::FinishedAt.is_not_null())
            .order_by_asc(Column::ExternalServiceId)
            .order_by_desc(Column::FinishedAt)
            .order_by_desc(Column::Id)
            .all(&self.db)
            .await
            .context("listing finished sync jobs")?;

        let mut latest: BTreeMap<i64, Option<String>> =
            service_ids.into_iter().map(|id| (id, None)).collect();
        for job in finished {
            if let Some(slot) = latest.get_mut(&job.external_service_id) {
                if slot.is_none() {
                    *slot = Some(job.failure_message.unwrap_or_default());
                }
            }
        }

        Ok(latest
            .into_iter()
            .map(|(external_service_id, message)| LatestSyncError {
                external_service_id,
                failure_message: message.unwrap_or_default(),
            })
            .collect())
    }

    /// True if any of `ids` is due to sync within `within`, or already has a
    /// queued or processing job.
    pub async fn sync_due(&self, ids: &[i64], within: Duration) -> StoreResult<bool> {
        if ids.is_empty() {
            return Ok(false);
        }

        let deadline = chrono::Duration::from_std(within)
            .ok()
            .and_then(|horizon| Utc::now().checked_add_signed(horizon))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .fixed_offset();

        let due = external_service::Entity::find()
            .filter(external_service::Column::Id.is_in(ids.iter().copied()))
            .filter(
                Condition::any()
                    .add(external_service::Column::NextSyncAt.is_null())
                    .add(external_service::Column::NextSyncAt.lte(deadline)),
            )
            .count(&self.db)
            .await
            .context("checking next sync times")?;
        if due > 0 {
            return Ok(true);
        }

        let running = Entity::find()
            .filter(Column::ExternalServiceId.is_in(ids.iter().copied()))
            .filter(Column::State.is_in(SyncJobState::ACTIVE))
            .count(&self.db)
            .await
            .context("checking active sync jobs")?;
        Ok(running > 0)
    }
}

/// Flag matching active jobs for cancellation in a single statement.
///
/// Queued jobs are moved straight to `canceled` with `finished_at` stamped;
/// processing jobs keep their state and timestamps.
async fn request_cancel<C, F>(conn: &C, target: F) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
    F: IntoCondition,
{
    let now = Utc::now().fixed_offset();
    let is_queued = Column::State.eq(SyncJobState::Queued);

    let result = Entity::update_many()
        .col_expr(Column::Cancel, Expr::value(true))
        .col_expr(
            Column::State,
            Expr::case(is_queued.clone(), Expr::value(SyncJobState::Canceled))
                .finally(Expr::col(Column::State))
                .into(),
        )
        .col_expr(
            Column::FinishedAt,
            Expr::case(is_queued, Expr::value(now))
                .finally(Expr::col(Column::FinishedAt))
                .into(),
        )
        .filter(target)
        .filter(Column::State.is_in(SyncJobState::ACTIVE))
        .filter(Column::Cancel.eq(false))
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}

pub(crate) async fn active_job_count<C: ConnectionTrait>(
    conn: &C,
    external_service_id: i64,
) -> Result<u64, DbErr> {
    Entity::find()
        .filter(Column::ExternalServiceId.eq(external_service_id))
        .filter(Column::State.is_in(SyncJobState::ACTIVE))
        .count(conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_terminal_state() {
        assert_eq!(JobOutcome::Completed.state(), SyncJobState::Completed);
        assert_eq!(
            JobOutcome::Errored("boom".into()).state(),
            SyncJobState::Errored
        );
        assert_eq!(JobOutcome::Failed("x".into()).state(), SyncJobState::Failed);
        assert_eq!(JobOutcome::Canceled.state(), SyncJobState::Canceled);
        for outcome in [
            JobOutcome::Completed,
            JobOutcome::Errored(String::new()),
            JobOutcome::Failed(String::new()),
            JobOutcome::Canceled,
        ] {
            assert!(outcome.state().is_terminal());
        }
    }

    #[test]
    fn only_error_outcomes_carry_a_message() {
        assert_eq!(JobOutcome::Completed.failure_message(), None);
        assert_eq!(JobOutcome::Canceled.failure_message(), None);
        assert_eq!(
            JobOutcome::Failed("rate limited".into()).failure_message(),
            Some("rate limited".to_string())
        );
    }
}
