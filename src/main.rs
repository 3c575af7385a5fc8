//! # External Service Store Entry Point
//!
//! Loads configuration, installs telemetry, connects to the database and
//! applies migrations. Exits non-zero when the store is not usable.

use anyhow::{Context, Result};
use extsvc::{config::ConfigLoader, db, repositories::ExternalServiceStore, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let pool = db::init_pool(&config).await?;
    db::migrate(&pool).await?;
    db::health_check(&pool).await?;

    let store = ExternalServiceStore::from_config(pool, &config)
        .context("building external service store")?;
    let live = store
        .count(&Default::default())
        .await
        .context("counting external services")?;
    tracing::info!(
        external_services = live,
        encrypting = store.codec().is_encrypting(),
        "External service store ready"
    );

    Ok(())
}
