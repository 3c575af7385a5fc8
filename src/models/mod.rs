//! # Data Models
//!
//! SeaORM entities for the external service store.

pub mod code_host;
pub mod external_service;
pub mod external_service_repo;
pub mod repo;
pub mod security_event_log;
pub mod sync_job;

pub use code_host::Entity as CodeHost;
pub use external_service::Entity as ExternalService;
pub use external_service_repo::Entity as ExternalServiceRepo;
pub use repo::Entity as Repo;
pub use security_event_log::Entity as SecurityEventLog;
pub use sync_job::{Entity as SyncJob, SyncJobState};
