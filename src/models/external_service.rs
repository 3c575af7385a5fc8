//! ExternalService entity model
//!
//! This module contains the SeaORM entity model for the external_services
//! table. Each row is a code host connection; `config` holds the sealed
//! configuration document and `encryption_key_id` names the key that sealed
//! it (empty for plaintext rows).

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use crate::kinds::ConnectionKind;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "external_services")]
pub struct Model {
    /// Surrogate key (primary key)
    #[sea_orm(primary_key)]
    pub id: i64,

    pub kind: ConnectionKind,

    pub display_name: String,

    /// Sealed configuration bytes; never logged
    pub config: Vec<u8>,

    /// Identifier of the key that sealed `config`, empty when unencrypted
    pub encryption_key_id: String,

    /// Whether repository permissions are NOT enforced for this connection
    pub unrestricted: bool,

    pub cloud_default: bool,

    /// Derived from the typed config at write time
    pub has_webhooks: bool,

    pub code_host_id: Option<i64>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,

    /// Soft delete marker
    pub deleted_at: Option<DateTimeWithTimeZone>,

    pub last_sync_at: Option<DateTimeWithTimeZone>,
    pub next_sync_at: Option<DateTimeWithTimeZone>,
    pub token_expires_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::code_host::Entity",
        from = "Column::CodeHostId",
        to = "super::code_host::Column::Id"
    )]
    CodeHost,
    #[sea_orm(has_many = "super::sync_job::Entity")]
    SyncJob,
    #[sea_orm(has_many = "super::external_service_repo::Entity")]
    ExternalServiceRepo,
}

impl Related<super::code_host::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CodeHost.def()
    }
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJob.def()
    }
}

impl Related<super::external_service_repo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExternalServiceRepo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
