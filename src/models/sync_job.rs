//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the
//! external_service_sync_jobs table, which records background imports of
//! repositories for one external service. Rows are kept as history after the
//! job terminates.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

/// Lifecycle states of a sync job.
///
/// `queued -> processing -> {completed, errored, failed}`, plus `canceled`
/// which is only entered directly from `queued`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum SyncJobState {
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "errored")]
    Errored,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl SyncJobState {
    /// States a job can still be canceled or drained from.
    pub const ACTIVE: [SyncJobState; 2] = [SyncJobState::Queued, SyncJobState::Processing];

    /// Terminal states that report a sync result.
    pub const FINISHED: [SyncJobState; 3] = [
        SyncJobState::Completed,
        SyncJobState::Errored,
        SyncJobState::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        !Self::ACTIVE.contains(&self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "external_service_sync_jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub external_service_id: i64,

    pub state: SyncJobState,

    pub failure_message: Option<String>,

    pub queued_at: DateTimeWithTimeZone,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Earliest time a worker may pick the job up
    pub process_after: Option<DateTimeWithTimeZone>,

    pub num_resets: i32,
    pub num_failures: i32,

    /// Cooperative cancellation flag observed by the worker
    pub cancel: bool,

    pub repos_synced: i32,
    pub repos_added: i32,
    pub repos_modified: i32,
    pub repos_unmodified: i32,
    pub repos_deleted: i32,
    pub repo_sync_errors: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::external_service::Entity",
        from = "Column::ExternalServiceId",
        to = "super::external_service::Column::Id"
    )]
    ExternalService,
}

impl Related<super::external_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExternalService.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_queued_and_processing_are_active() {
        assert!(!SyncJobState::Queued.is_terminal());
        assert!(!SyncJobState::Processing.is_terminal());
        for state in SyncJobState::FINISHED {
            assert!(state.is_terminal());
        }
        assert!(SyncJobState::Canceled.is_terminal());
    }
}
