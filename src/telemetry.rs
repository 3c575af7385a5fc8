//! Process-wide tracing for the store binaries.
//!
//! `RUST_LOG` takes precedence over the configured level. Records emitted
//! through the `log` facade (sqlx, sea-orm-migration) are forwarded into the
//! same subscriber.

use std::sync::Mutex;

use log::LevelFilter;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Registry, fmt,
    layer::{Layer, SubscriberExt},
};

use crate::config::AppConfig;

/// Noisy dependencies are capped unless `RUST_LOG` says otherwise.
const DEPENDENCY_DIRECTIVES: &str = "sqlx=warn,sea_orm_migration=warn";

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn from_config(config: &AppConfig) -> Self {
        match config.log_format.as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }

    fn layer(self) -> Box<dyn Layer<Registry> + Send + Sync> {
        match self {
            LogFormat::Json => fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true)
                .boxed(),
            LogFormat::Pretty => fmt::layer().pretty().boxed(),
        }
    }
}

fn filter_for(config: &AppConfig) -> Result<EnvFilter, TelemetryInitError> {
    if let Ok(from_env) = EnvFilter::try_from_default_env() {
        return Ok(from_env);
    }
    let filter = format!("{},{}", config.log_level, DEPENDENCY_DIRECTIVES);
    EnvFilter::try_new(&filter).map_err(|source| TelemetryInitError::Filter { filter, source })
}

static INSTALLED: Mutex<bool> = Mutex::new(false);

/// Install the global subscriber. Later calls are no-ops once one succeeded.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    let mut installed = INSTALLED.lock().unwrap_or_else(|poison| poison.into_inner());
    if *installed {
        return Ok(());
    }

    let subscriber = tracing_subscriber::registry()
        .with(LogFormat::from_config(config).layer())
        .with(filter_for(config)?);
    tracing::subscriber::set_global_default(subscriber)?;

    // Fails only when some other logger owns the `log` facade already.
    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        tracing::warn!(error = %err, "log records will not reach tracing");
    }

    *installed = true;
    Ok(())
}
