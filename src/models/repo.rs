//! Repo entity model
//!
//! Repositories are soft deleted: `deleted_at` is stamped and the name is
//! rewritten so the original name can be reused.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "repo")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique)]
    pub name: String,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

/// Name a soft-deleted repository is renamed to. The fractional epoch keeps
/// a re-imported repository of the same name from colliding with an earlier
/// tombstone.
pub fn soft_deleted_name(name: &str, deleted_at: DateTimeWithTimeZone) -> String {
    format!(
        "DELETED-{}.{:06}-{}",
        deleted_at.timestamp(),
        deleted_at.timestamp_subsec_micros(),
        name
    )
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::external_service_repo::Entity")]
    ExternalServiceRepo,
}

impl Related<super::external_service_repo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExternalServiceRepo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
