//! # External Service Store
//!
//! Persistence and lifecycle management for code host connections: config
//! validation, encrypted storage, code host resolution, sync job
//! cancellation and orphan-safe deletion.

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod kinds;
pub mod models;
pub mod repositories;
pub mod telemetry;
pub mod validation;
pub use kinds::{AuthProvider, ConnectionKind};
pub use migration;
