//! CodeHost entity model
//!
//! One row per physical code host, keyed by its normalized base URL. Many
//! external services may point at the same row.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use crate::kinds::ConnectionKind;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "code_hosts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub kind: ConnectionKind,

    /// Normalized base URL or opaque `scheme://host/` identifier
    #[sea_orm(unique)]
    pub url: String,

    /// Requests allowed per API interval; `None` keeps the platform default
    pub api_rate_limit_quota: Option<i32>,
    pub api_rate_limit_interval_seconds: Option<i32>,

    /// Process-wide git request ceiling, when one is configured
    pub git_rate_limit_quota: Option<i32>,
    pub git_rate_limit_interval_seconds: Option<i32>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::external_service::Entity")]
    ExternalService,
}

impl Related<super::external_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExternalService.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
