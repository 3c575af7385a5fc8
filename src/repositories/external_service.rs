//! # ExternalService Store
//!
//! Create, update, upsert and read external services. Every write runs the
//! same pipeline inside one transaction: validate the config, strip
//! authorization when code host permissions are untrusted, recompute the
//! derived columns, resolve the code host, seal the config, write the row.
//! Deletion lives in [`crate::repositories::deletion`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde_json::Value;

use crate::config::AppConfig;
use crate::crypto::EncryptedConfigCodec;
use crate::error::{DbResultExt, StoreError, StoreResult, ValidationErrors};
use crate::kinds::codehost::{api_rate_limit, code_host_url};
use crate::kinds::redact::{redact_config, unredact_config};
use crate::kinds::typed::TypedConfig;
use crate::kinds::{AuthProvider, ConnectionKind, jsonc};
use crate::models::external_service::{ActiveModel, Column, Entity, Model};
use crate::models::external_service_repo;
use crate::models::sync_job::{self, SyncJobState};
use crate::repositories::audit::{self, EXTERNAL_SERVICE_CREATED, ExternalServiceEvent};
use crate::repositories::code_host::CodeHostRegistry;
use crate::validation::{ConfigValidator, ValidatedConfig};

const AUTHORIZATION_FIELD: &str = "authorization";
const RATE_LIMIT_SCAN_BATCH: u64 = 500;

/// An external service with its config opened.
#[derive(Clone, PartialEq, Eq)]
pub struct ExternalService {
    /// Zero for a service that has not been written yet.
    pub id: i64,
    pub kind: ConnectionKind,
    pub display_name: String,
    /// Plaintext JSON config.
    pub config: String,
    pub unrestricted: bool,
    pub cloud_default: bool,
    pub has_webhooks: bool,
    pub code_host_id: Option<i64>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub deleted_at: Option<DateTimeWithTimeZone>,
    pub last_sync_at: Option<DateTimeWithTimeZone>,
    pub next_sync_at: Option<DateTimeWithTimeZone>,
    pub token_expires_at: Option<DateTimeWithTimeZone>,
}

impl ExternalService {
    fn from_model(model: Model, config: String) -> Self {
        Self {
            id: model.id,
            kind: model.kind,
            display_name: model.display_name,
            config,
            unrestricted: model.unrestricted,
            cloud_default: model.cloud_default,
            has_webhooks: model.has_webhooks,
            code_host_id: model.code_host_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
            deleted_at: model.deleted_at,
            last_sync_at: model.last_sync_at,
            next_sync_at: model.next_sync_at,
            token_expires_at: model.token_expires_at,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Copy with every secret of the config replaced by the redaction sentinel.
    pub fn redacted(&self) -> StoreResult<Self> {
        Ok(Self {
            config: redact_config(self.kind, &self.config)?,
            ..self.clone()
        })
    }
}

impl fmt::Debug for ExternalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalService")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("display_name", &self.display_name)
            .field("config", &"[REDACTED]")
            .field("unrestricted", &self.unrestricted)
            .field("cloud_default", &self.cloud_default)
            .field("has_webhooks", &self.has_webhooks)
            .field("code_host_id", &self.code_host_id)
            .field("deleted_at", &self.deleted_at)
            .finish()
    }
}

/// Input for [`ExternalServiceStore::create`].
#[derive(Clone)]
pub struct NewExternalService {
    pub kind: ConnectionKind,
    pub display_name: String,
    /// Raw JSONC config as supplied by the caller.
    pub config: String,
    pub cloud_default: bool,
    pub token_expires_at: Option<DateTimeWithTimeZone>,
}

impl NewExternalService {
    pub fn new(
        kind: ConnectionKind,
        display_name: impl Into<String>,
        config: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            display_name: display_name.into(),
            config: config.into(),
            cloud_default: false,
            token_expires_at: None,
        }
    }
}

impl fmt::Debug for NewExternalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewExternalService")
            .field("kind", &self.kind)
            .field("display_name", &self.display_name)
            .field("cloud_default", &self.cloud_default)
            .finish_non_exhaustive()
    }
}

/// Partial update; `None` fields are left as they are.
#[derive(Clone, Default)]
pub struct ExternalServiceUpdate {
    pub display_name: Option<String>,
    /// Raw JSONC config, possibly carrying redacted secrets.
    pub config: Option<String>,
    pub cloud_default: Option<bool>,
    pub token_expires_at: Option<DateTimeWithTimeZone>,
    pub last_sync_at: Option<DateTimeWithTimeZone>,
    /// Overrides the immediate re-sync a config change schedules.
    pub next_sync_at: Option<DateTimeWithTimeZone>,
}

impl fmt::Debug for ExternalServiceUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalServiceUpdate")
            .field("display_name", &self.display_name)
            .field("config", &self.config.as_ref().map(|_| "[REDACTED]"))
            .field("cloud_default", &self.cloud_default)
            .field("token_expires_at", &self.token_expires_at)
            .field("last_sync_at", &self.last_sync_at)
            .field("next_sync_at", &self.next_sync_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Filters for [`ExternalServiceStore::list`] and [`ExternalServiceStore::count`].
/// Deleted services are never returned.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub ids: Vec<i64>,
    pub kinds: Vec<ConnectionKind>,
    /// Keyset cursor: only ids past this one in `direction`.
    pub after_id: Option<i64>,
    pub direction: SortDirection,
    pub only_cloud_default: bool,
    pub code_host_id: Option<i64>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl ListOptions {
    fn condition(&self) -> Condition {
        let mut cond = Condition::all().add(Column::DeletedAt.is_null());
        if !self.ids.is_empty() {
            cond = cond.add(Column::Id.is_in(self.ids.iter().copied()));
        }
        if !self.kinds.is_empty() {
            cond = cond.add(Column::Kind.is_in(self.kinds.iter().copied()));
        }
        if let Some(after_id) = self.after_id {
            cond = match self.direction {
                SortDirection::Desc => cond.add(Column::Id.lt(after_id)),
                SortDirection::Asc => cond.add(Column::Id.gt(after_id)),
            };
        }
        if self.only_cloud_default {
            cond = cond.add(Column::CloudDefault.eq(true));
        }
        if let Some(code_host_id) = self.code_host_id {
            cond = cond.add(Column::CodeHostId.eq(code_host_id));
        }
        cond
    }
}

/// Consulted inside the create transaction before the row is written.
#[async_trait]
pub trait BeforeCreateHook: Send + Sync {
    async fn before_create(
        &self,
        txn: &DatabaseTransaction,
        service: &NewExternalService,
    ) -> StoreResult<()>;
}

/// Refuses creation once `max_services` live services exist.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimitHook {
    max_services: u64,
}

impl ConnectionLimitHook {
    pub fn new(max_services: u64) -> Self {
        Self { max_services }
    }
}

#[async_trait]
impl BeforeCreateHook for ConnectionLimitHook {
    async fn before_create(
        &self,
        txn: &DatabaseTransaction,
        _service: &NewExternalService,
    ) -> StoreResult<()> {
        let live = Entity::find()
            .filter(Column::DeletedAt.is_null())
            .count(txn)
            .await
            .context("counting external services")?;
        if live >= self.max_services {
            return Err(StoreError::Rejected(format!(
                "maximum number of external services ({}) reached",
                self.max_services
            )));
        }
        Ok(())
    }
}

/// Config ready to be sealed, with the columns derived from it.
struct PreparedConfig {
    plaintext: String,
    typed: TypedConfig,
    unrestricted: bool,
    has_webhooks: bool,
}

/// Store for external service database operations
#[derive(Clone)]
pub struct ExternalServiceStore {
    db: DatabaseConnection,
    codec: EncryptedConfigCodec,
    validator: ConfigValidator,
    code_hosts: CodeHostRegistry,
    untrusted_code_host_permissions: bool,
    before_create: Option<Arc<dyn BeforeCreateHook>>,
}

impl fmt::Debug for ExternalServiceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalServiceStore")
            .field("codec", &self.codec)
            .field("validator", &self.validator)
            .field("code_hosts", &self.code_hosts)
            .field(
                "untrusted_code_host_permissions",
                &self.untrusted_code_host_permissions,
            )
            .field("before_create", &self.before_create.is_some())
            .finish()
    }
}

impl ExternalServiceStore {
    /// Create a store with the built-in validator and no git rate ceiling.
    pub fn new(db: DatabaseConnection, codec: EncryptedConfigCodec) -> Self {
        Self {
            db,
            codec,
            validator: ConfigValidator::default(),
            code_hosts: CodeHostRegistry::default(),
            untrusted_code_host_permissions: false,
            before_create: None,
        }
    }

    /// Wire a store from application configuration.
    pub fn from_config(db: DatabaseConnection, config: &AppConfig) -> StoreResult<Self> {
        let codec = EncryptedConfigCodec::from_key_bytes(config.crypto_key.as_deref())?;
        Ok(Self::new(db, codec)
            .with_code_host_registry(CodeHostRegistry::new(
                config.git_max_codehost_requests_per_second,
            ))
            .with_untrusted_code_host_permissions(config.untrusted_code_host_permissions))
    }

    pub fn with_validator(mut self, validator: ConfigValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_code_host_registry(mut self, code_hosts: CodeHostRegistry) -> Self {
        self.code_hosts = code_hosts;
        self
    }

    /// In untrusted mode `authorization` is stripped from every written config
    /// and services are never unrestricted.
    pub fn with_untrusted_code_host_permissions(mut self, untrusted: bool) -> Self {
        self.untrusted_code_host_permissions = untrusted;
        self
    }

    pub fn with_before_create_hook(mut self, hook: Arc<dyn BeforeCreateHook>) -> Self {
        self.before_create = Some(hook);
        self
    }

    pub fn codec(&self) -> &EncryptedConfigCodec {
        &self.codec
    }

    /// Validate and write a new external service.
    pub async fn create(
        &self,
        new: NewExternalService,
        auth_providers: &[AuthProvider],
    ) -> StoreResult<ExternalService> {
        let validated = self
            .validator
            .validate(new.kind, &new.config, auth_providers)?;
        let prepared = self.prepare_config(validated)?;

        let txn = self
            .db
            .begin()
            .await
            .context("beginning create transaction")?;

        self.check_duplicate_rate_limits(&txn, 0, &prepared.typed)
            .await?;

        if let Some(hook) = &self.before_create {
            hook.before_create(&txn, &new).await?;
        }

        let code_host_id = self
            .code_hosts
            .ensure_code_host(&txn, &prepared.typed)
            .await?;
        let (sealed, key_id) = self.codec.encrypt(&prepared.plaintext)?;

        let now = Utc::now().fixed_offset();
        let model = ActiveModel {
            kind: Set(new.kind),
            display_name: Set(new.display_name),
            config: Set(sealed),
            encryption_key_id: Set(key_id),
            unrestricted: Set(prepared.unrestricted),
            cloud_default: Set(new.cloud_default),
            has_webhooks: Set(prepared.has_webhooks),
            code_host_id: Set(Some(code_host_id)),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
            last_sync_at: Set(None),
            next_sync_at: Set(None),
            token_expires_at: Set(new.token_expires_at),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .context("inserting external service")?;

        audit::record(
            &txn,
            EXTERNAL_SERVICE_CREATED,
            &ExternalServiceEvent {
                id: model.id,
                kind: model.kind,
                display_name: &model.display_name,
            },
        )
        .await?;

        txn.commit().await.context("committing create")?;

        tracing::info!(
            external_service_id = model.id,
            kind = %model.kind,
            code_host_id,
            unrestricted = model.unrestricted,
            "External service created"
        );
        Ok(ExternalService::from_model(model, prepared.plaintext))
    }

    /// Apply a partial update to a live external service.
    ///
    /// A new config is un-redacted against the stored one, then goes through
    /// the full create pipeline, and schedules an immediate sync unless
    /// `next_sync_at` is given.
    pub async fn update(
        &self,
        id: i64,
        update: ExternalServiceUpdate,
        auth_providers: &[AuthProvider],
    ) -> StoreResult<()> {
        let txn = self
            .db
            .begin()
            .await
            .context("beginning update transaction")?;

        let existing = Entity::find_by_id(id)
            .filter(Column::DeletedAt.is_null())
            .lock_exclusive()
            .one(&txn)
            .await
            .context("locking external service for update")?
            .ok_or(StoreError::NotFound { id })?;

        let now = Utc::now().fixed_offset();
        let mut query = Entity::update_many()
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::DeletedAt.is_null());

        if let Some(display_name) = update.display_name {
            query = query.col_expr(Column::DisplayName, Expr::value(display_name));
        }

        let config_changed = update.config.is_some();
        if let Some(raw) = update.config {
            let stored = self
                .codec
                .decrypt(&existing.config, &existing.encryption_key_id)?;
            let raw = unredact_config(existing.kind, &raw, &stored)?;

            let validated = self
                .validator
                .validate(existing.kind, &raw, auth_providers)?;
            let prepared = self.prepare_config(validated)?;
            self.check_duplicate_rate_limits(&txn, id, &prepared.typed)
                .await?;
            let code_host_id = self
                .code_hosts
                .ensure_code_host(&txn, &prepared.typed)
                .await?;
            let (sealed, key_id) = self.codec.encrypt(&prepared.plaintext)?;

            query = query
                .col_expr(Column::Config, Expr::value(sealed))
                .col_expr(Column::EncryptionKeyId, Expr::value(key_id))
                .col_expr(Column::Unrestricted, Expr::value(prepared.unrestricted))
                .col_expr(Column::HasWebhooks, Expr::value(prepared.has_webhooks))
                .col_expr(Column::CodeHostId, Expr::value(code_host_id));
            if update.next_sync_at.is_none() {
                query = query.col_expr(Column::NextSyncAt, Expr::value(now));
            }
        }

        if let Some(cloud_default) = update.cloud_default {
            query = query.col_expr(Column::CloudDefault, Expr::value(cloud_default));
        }
        if let Some(token_expires_at) = update.token_expires_at {
            query = query.col_expr(Column::TokenExpiresAt, Expr::value(token_expires_at));
        }
        if let Some(last_sync_at) = update.last_sync_at {
            query = query.col_expr(Column::LastSyncAt, Expr::value(last_sync_at));
        }
        if let Some(next_sync_at) = update.next_sync_at {
            query = query.col_expr(Column::NextSyncAt, Expr::value(next_sync_at));
        }

        let result = query
            .exec(&txn)
            .await
            .context("updating external service")?;
        if result.rows_affected == 0 {
            return Err(StoreError::NotFound { id });
        }

        txn.commit().await.context("committing update")?;

        tracing::info!(
            external_service_id = id,
            kind = %existing.kind,
            config_changed,
            "External service updated"
        );
        Ok(())
    }

    /// Insert or overwrite a batch of services, keyed by id (zero inserts).
    ///
    /// The batch is all-or-nothing. Marking a live service deleted is refused
    /// with [`StoreError::IllegalDeleteViaUpsert`]; deletion must go through
    /// the deletion coordinator.
    pub async fn upsert(
        &self,
        services: Vec<ExternalService>,
        auth_providers: &[AuthProvider],
    ) -> StoreResult<Vec<ExternalService>> {
        if services.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self
            .db
            .begin()
            .await
            .context("beginning upsert transaction")?;

        let marked_deleted: Vec<i64> = services
            .iter()
            .filter(|s| s.id != 0 && s.is_deleted())
            .map(|s| s.id)
            .collect();
        if !marked_deleted.is_empty() {
            let live = Entity::find()
                .filter(Column::Id.is_in(marked_deleted))
                .filter(Column::DeletedAt.is_null())
                .count(&txn)
                .await
                .context("fetching services marked for deletion")?;
            if live > 0 {
                return Err(StoreError::IllegalDeleteViaUpsert);
            }
        }

        let mut written = Vec::with_capacity(services.len());
        for service in services {
            written.push(self.upsert_one(&txn, service, auth_providers).await?);
        }

        txn.commit().await.context("committing upsert")?;

        tracing::info!(count = written.len(), "External services upserted");
        Ok(written)
    }

    async fn upsert_one(
        &self,
        txn: &DatabaseTransaction,
        service: ExternalService,
        auth_providers: &[AuthProvider],
    ) -> StoreResult<ExternalService> {
        let existing = if service.id != 0 {
            Entity::find_by_id(service.id)
                .one(txn)
                .await
                .context("fetching external service for upsert")?
        } else {
            None
        };

        // Tombstones are mirrored as-is: no validation, no code host.
        let (plaintext, unrestricted, has_webhooks, code_host_id) = if service.is_deleted() {
            let (normalized, document) =
                jsonc::parse(&service.config).map_err(StoreError::MalformedJson)?;
            let unrestricted = !self.untrusted_code_host_permissions
                && document.get(AUTHORIZATION_FIELD).is_none();
            (
                normalized,
                unrestricted,
                has_webhooks_or_false(service.kind, &document),
                existing.as_ref().and_then(|e| e.code_host_id),
            )
        } else {
            let validated = self
                .validator
                .validate(service.kind, &service.config, auth_providers)?;
            let prepared = self.prepare_config(validated)?;
            self.check_duplicate_rate_limits(txn, service.id, &prepared.typed)
                .await?;
            let code_host_id = self
                .code_hosts
                .ensure_code_host(txn, &prepared.typed)
                .await?;
            (
                prepared.plaintext,
                prepared.unrestricted,
                prepared.has_webhooks,
                Some(code_host_id),
            )
        };

        let (sealed, key_id) = self.codec.encrypt(&plaintext)?;
        let now = Utc::now().fixed_offset();
        let mut row = ActiveModel {
            kind: Set(service.kind),
            display_name: Set(service.display_name),
            config: Set(sealed),
            encryption_key_id: Set(key_id),
            unrestricted: Set(unrestricted),
            cloud_default: Set(service.cloud_default),
            has_webhooks: Set(has_webhooks),
            code_host_id: Set(code_host_id),
            updated_at: Set(now),
            deleted_at: Set(service.deleted_at),
            last_sync_at: Set(service.last_sync_at),
            next_sync_at: Set(service.next_sync_at),
            token_expires_at: Set(service.token_expires_at),
            ..Default::default()
        };

        let model = match existing {
            Some(existing) => {
                row.id = ActiveValue::Unchanged(existing.id);
                row.update(txn)
                    .await
                    .context("updating external service in upsert")?
            }
            None => {
                if service.id != 0 {
                    row.id = Set(service.id);
                }
                row.created_at = Set(now);
                row.insert(txn)
                    .await
                    .context("inserting external service in upsert")?
            }
        };

        Ok(ExternalService::from_model(model, plaintext))
    }

    /// A live external service by id.
    pub async fn get_by_id(&self, id: i64) -> StoreResult<ExternalService> {
        let model = Entity::find_by_id(id)
            .filter(Column::DeletedAt.is_null())
            .one(&self.db)
            .await
            .context("fetching external service")?
            .ok_or(StoreError::NotFound { id })?;
        self.open(model)
    }

    pub async fn list(&self, options: &ListOptions) -> StoreResult<Vec<ExternalService>> {
        let query = Entity::find().filter(options.condition());
        let query = match options.direction {
            SortDirection::Asc => query.order_by_asc(Column::Id),
            SortDirection::Desc => query.order_by_desc(Column::Id),
        };

        let models = query
            .limit(options.limit)
            .offset(options.offset)
            .all(&self.db)
            .await
            .context("listing external services")?;

        models.into_iter().map(|model| self.open(model)).collect()
    }

    /// Number of services matching `options`, ignoring limit and offset.
    pub async fn count(&self, options: &ListOptions) -> StoreResult<u64> {
        Entity::find()
            .filter(options.condition())
            .count(&self.db)
            .await
            .context("counting external services")
    }

    /// Number of repositories currently associated with the service.
    pub async fn repo_count(&self, id: i64) -> StoreResult<u64> {
        external_service_repo::Entity::find()
            .filter(external_service_repo::Column::ExternalServiceId.eq(id))
            .count(&self.db)
            .await
            .context("counting external service repos")
    }

    /// Kinds of all live services, without duplicates.
    pub async fn distinct_kinds(&self) -> StoreResult<Vec<ConnectionKind>> {
        Entity::find()
            .select_only()
            .column(Column::Kind)
            .distinct()
            .filter(Column::DeletedAt.is_null())
            .order_by_asc(Column::Kind)
            .into_tuple::<ConnectionKind>()
            .all(&self.db)
            .await
            .context("listing distinct external service kinds")
    }

    /// Failure message of the latest finished sync, `None` if it succeeded
    /// or no sync has finished yet.
    pub async fn get_last_sync_error(&self, id: i64) -> StoreResult<Option<String>> {
        let latest = sync_job::Entity::find()
            .filter(sync_job::Column::ExternalServiceId.eq(id))
            .filter(sync_job::Column::State.is_in(SyncJobState::FINISHED))
            .filter(sync_job::Column::FinishedAt.is_not_null())
            .order_by_desc(sync_job::Column::FinishedAt)
            .order_by_desc(sync_job::Column::Id)
            .one(&self.db)
            .await
            .context("fetching last sync error")?;
        Ok(latest.and_then(|job| job.failure_message))
    }

    fn open(&self, model: Model) -> StoreResult<ExternalService> {
        let config = self
            .codec
            .decrypt(&model.config, &model.encryption_key_id)?;
        Ok(ExternalService::from_model(model, config))
    }

    fn prepare_config(&self, validated: ValidatedConfig) -> StoreResult<PreparedConfig> {
        let has_authorization = validated.has_authorization();
        let ValidatedConfig {
            normalized,
            mut document,
            typed,
        } = validated;

        let (plaintext, unrestricted) = if self.untrusted_code_host_permissions {
            let plaintext = if has_authorization {
                if let Some(fields) = document.as_object_mut() {
                    fields.remove(AUTHORIZATION_FIELD);
                }
                serde_json::to_string(&document)
                    .map_err(|e| StoreError::MalformedJson(e.to_string()))?
            } else {
                normalized
            };
            (plaintext, false)
        } else {
            (normalized, !has_authorization)
        };

        Ok(PreparedConfig {
            plaintext,
            has_webhooks: typed.has_webhooks(),
            typed,
            unrestricted,
        })
    }

    /// Refuse a non-default API rate limit when another live service on the
    /// same code host already declares one.
    async fn check_duplicate_rate_limits<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: i64,
        typed: &TypedConfig,
    ) -> StoreResult<()> {
        if api_rate_limit(typed).is_default {
            return Ok(());
        }
        // An unresolvable host is reported by code host resolution.
        let Ok(host_url) = code_host_url(typed) else {
            return Ok(());
        };

        let mut after_id = 0;
        loop {
            let batch = Entity::find()
                .filter(Column::Kind.eq(typed.kind()))
                .filter(Column::DeletedAt.is_null())
                .filter(Column::Id.gt(after_id))
                .filter(Column::Id.ne(id))
                .order_by_asc(Column::Id)
                .limit(RATE_LIMIT_SCAN_BATCH)
                .all(conn)
                .await
                .context("listing external services for rate limit check")?;

            let Some(last) = batch.last() else {
                break;
            };
            after_id = last.id;
            let exhausted = (batch.len() as u64) < RATE_LIMIT_SCAN_BATCH;

            for other in batch {
                let config = self
                    .codec
                    .decrypt(&other.config, &other.encryption_key_id)?;
                let Ok((_, document)) = jsonc::parse(&config) else {
                    continue;
                };
                let Ok(other_typed) = other.kind.parse_typed(&document) else {
                    continue;
                };
                if api_rate_limit(&other_typed).is_default {
                    continue;
                }
                if code_host_url(&other_typed).is_ok_and(|url| url == host_url) {
                    let mut errs = ValidationErrors::new();
                    errs.push(format!(
                        "existing external service, {:?}, already has a rate limit set",
                        other.display_name
                    ));
                    return Err(StoreError::ValidationFailed(errs));
                }
            }

            if exhausted {
                break;
            }
        }
        Ok(())
    }
}

/// Webhook detection for configs written without validation.
fn has_webhooks_or_false(kind: ConnectionKind, document: &Value) -> bool {
    match kind.parse_typed(document) {
        Ok(typed) => typed.has_webhooks(),
        Err(err) => {
            tracing::warn!(
                kind = %kind,
                error = %err,
                "Config does not parse into its typed form, assuming no webhooks"
            );
            false
        }
    }
}
