//! # CodeHost Registry
//!
//! Resolves the shared code host row for a connection config. Resolution is
//! keyed by the normalized URL, so retries and concurrent creates converge on
//! one row instead of inserting duplicates.

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
};

use crate::error::{StoreError, StoreResult, ValidationErrors};
use crate::kinds::codehost::CodeHostSpec;
use crate::kinds::typed::TypedConfig;
use crate::models::code_host::{self, ActiveModel, Column, Entity, Model};

#[derive(Debug, Clone, Copy, Default)]
pub struct CodeHostRegistry {
    git_requests_per_second: Option<i32>,
}

impl CodeHostRegistry {
    /// `git_requests_per_second` is the process-wide git ceiling attached to
    /// every code host, if configured.
    pub fn new(git_requests_per_second: Option<i32>) -> Self {
        Self {
            git_requests_per_second,
        }
    }

    /// Look up or create the code host for `config`, returning its id.
    ///
    /// Limits carried by `config` overwrite the stored ones; default limits
    /// never clear a value another connection set.
    pub async fn ensure_code_host<C: ConnectionTrait>(
        &self,
        conn: &C,
        config: &TypedConfig,
    ) -> StoreResult<i64> {
        let spec = CodeHostSpec::derive(config, self.git_requests_per_second).map_err(|message| {
            let mut errs = ValidationErrors::new();
            errs.push(message);
            StoreError::ValidationFailed(errs)
        })?;

        let host = self
            .upsert(conn, &spec)
            .await
            .map_err(StoreError::CodeHostCreateFailed)?;

        tracing::debug!(
            code_host_id = host.id,
            kind = %spec.kind,
            url = %spec.url,
            "Resolved code host"
        );
        Ok(host.id)
    }

    pub async fn get_by_url<C: ConnectionTrait>(
        &self,
        conn: &C,
        url: &str,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find().filter(Column::Url.eq(url)).one(conn).await
    }

    async fn upsert<C: ConnectionTrait>(&self, conn: &C, spec: &CodeHostSpec) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();

        if let Some(existing) = self.get_by_url(conn, &spec.url).await? {
            return self.merge_limits(conn, existing, spec).await;
        }

        let host = ActiveModel {
            kind: Set(spec.kind),
            url: Set(spec.url.clone()),
            api_rate_limit_quota: Set(spec.api_rate_limit_quota),
            api_rate_limit_interval_seconds: Set(spec.api_rate_limit_interval_seconds),
            git_rate_limit_quota: Set(spec.git_rate_limit_quota),
            git_rate_limit_interval_seconds: Set(spec.git_rate_limit_interval_seconds),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        // A concurrent writer may have inserted the same URL since the lookup.
        match Entity::insert(host)
            .on_conflict(OnConflict::column(Column::Url).do_nothing().to_owned())
            .exec_without_returning(conn)
            .await
        {
            Ok(_) | Err(DbErr::RecordNotInserted) => {}
            Err(err) => return Err(err),
        }

        let host = self
            .get_by_url(conn, &spec.url)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("code host {}", spec.url)))?;
        tracing::info!(code_host_id = host.id, url = %host.url, "Code host created");
        Ok(host)
    }

    async fn merge_limits<C: ConnectionTrait>(
        &self,
        conn: &C,
        existing: Model,
        spec: &CodeHostSpec,
    ) -> Result<Model, DbErr> {
        let api_changed = spec.api_rate_limit_quota.is_some()
            && (spec.api_rate_limit_quota, spec.api_rate_limit_interval_seconds)
                != (
                    existing.api_rate_limit_quota,
                    existing.api_rate_limit_interval_seconds,
                );
        let git_changed = spec.git_rate_limit_quota.is_some()
            && (spec.git_rate_limit_quota, spec.git_rate_limit_interval_seconds)
                != (
                    existing.git_rate_limit_quota,
                    existing.git_rate_limit_interval_seconds,
                );
        if !api_changed && !git_changed {
            return Ok(existing);
        }

        let mut host: code_host::ActiveModel = existing.into();
        if api_changed {
            host.api_rate_limit_quota = Set(spec.api_rate_limit_quota);
            host.api_rate_limit_interval_seconds = Set(spec.api_rate_limit_interval_seconds);
        }
        if git_changed {
            host.git_rate_limit_quota = Set(spec.git_rate_limit_quota);
            host.git_rate_limit_interval_seconds = Set(spec.git_rate_limit_interval_seconds);
        }
        host.updated_at = Set(Utc::now().fixed_offset());
        host.update(conn).await
    }
}
