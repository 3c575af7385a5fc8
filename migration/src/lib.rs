//! Database migrations for the external service store.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_11_10_000001_create_code_hosts;
mod m2025_11_10_000002_create_external_services;
mod m2025_11_10_000003_create_external_service_sync_jobs;
mod m2025_11_10_000004_create_repo;
mod m2025_11_10_000005_create_security_event_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_11_10_000001_create_code_hosts::Migration),
            Box::new(m2025_11_10_000002_create_external_services::Migration),
            Box::new(m2025_11_10_000003_create_external_service_sync_jobs::Migration),
            Box::new(m2025_11_10_000004_create_repo::Migration),
            Box::new(m2025_11_10_000005_create_security_event_logs::Migration),
        ]
    }
}
