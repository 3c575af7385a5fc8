//! # Repository Layer
//!
//! Stores that encapsulate the SeaORM operations behind the external service
//! lifecycle: code host resolution, create/update/upsert, sync jobs and
//! deletion.

pub mod audit;
pub mod code_host;
pub mod deletion;
pub mod external_service;
pub mod sync_job;

pub use code_host::CodeHostRegistry;
pub use deletion::{DeletionCoordinator, DeletionSummary, DrainSettings};
pub use external_service::{
    BeforeCreateHook, ConnectionLimitHook, ExternalService, ExternalServiceStore,
    ExternalServiceUpdate, ListOptions, NewExternalService, SortDirection,
};
pub use sync_job::{JobOutcome, SyncJobCounters, SyncJobListOptions, SyncJobStore};
