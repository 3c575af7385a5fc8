//! Audit events for external service lifecycle changes.
//!
//! Events are written with the caller's connection so they commit or roll
//! back together with the change they describe.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{DbResultExt, StoreResult};
use crate::kinds::ConnectionKind;
use crate::models::security_event_log::{ActiveModel, Column, Entity, Model};

pub const EXTERNAL_SERVICE_CREATED: &str = "ExternalServiceCreated";
pub const EXTERNAL_SERVICE_DELETED: &str = "ExternalServiceDeleted";

/// Argument recorded with external service events. Never carries the config.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalServiceEvent<'a> {
    pub id: i64,
    pub kind: ConnectionKind,
    pub display_name: &'a str,
}

/// Write one audit event.
///
/// An argument that fails to serialize is logged and the event skipped; it
/// never fails the surrounding operation.
pub async fn record<C, T>(conn: &C, name: &str, argument: &T) -> StoreResult<()>
where
    C: ConnectionTrait,
    T: Serialize + ?Sized,
{
    let argument = match serde_json::to_value(argument) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(event = name, error = %err, "Skipping audit event with unserializable argument");
            return Ok(());
        }
    };

    ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        argument: Set(Some(argument)),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(conn)
    .await
    .context("writing audit event")?;

    Ok(())
}

/// Events with the given name, oldest first.
pub async fn list_by_name<C: ConnectionTrait>(conn: &C, name: &str) -> StoreResult<Vec<Model>> {
    Entity::find()
        .filter(Column::Name.eq(name))
        .order_by_asc(Column::CreatedAt)
        .all(conn)
        .await
        .context("listing audit events")
}
