//! Configuration loading for the external service store.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `EXTSVC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "EXTSVC_";

/// Application configuration derived from `EXTSVC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Raw 32-byte key for sealing configs. `None` stores configs unencrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    /// When set, authorization and permission-sync fields are stripped from configs.
    #[serde(default)]
    pub untrusted_code_host_permissions: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_max_codehost_requests_per_second: Option<i32>,
    #[serde(default = "default_deletion_drain_timeout_ms")]
    pub deletion_drain_timeout_ms: u64,
    #[serde(default = "default_deletion_drain_poll_interval_ms")]
    pub deletion_drain_poll_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            crypto_key: None,
            untrusted_code_host_permissions: false,
            git_max_codehost_requests_per_second: None,
            deletion_drain_timeout_ms: default_deletion_drain_timeout_ms(),
            deletion_drain_poll_interval_ms: default_deletion_drain_poll_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Pretty JSON for startup logs, with the crypto key masked.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if self.crypto_key.is_some() {
            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "CRYPTO_KEY".to_string(),
                    serde_json::Value::String("[REDACTED]".to_string()),
                );
            }
        }
        serde_json::to_string_pretty(&value)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.deletion_drain_timeout_ms)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deletion_drain_poll_interval_ms)
    }

    /// Validates the configuration, returning an error on out-of-range settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key.as_deref() {
            Some(key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            _ => {}
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections {
                value: self.db_max_connections,
            });
        }

        if self.deletion_drain_timeout_ms == 0
            || self.deletion_drain_poll_interval_ms == 0
            || self.deletion_drain_poll_interval_ms > self.deletion_drain_timeout_ms
        {
            return Err(ConfigError::InvalidDrainBounds {
                timeout_ms: self.deletion_drain_timeout_ms,
                poll_interval_ms: self.deletion_drain_poll_interval_ms,
            });
        }

        match self.git_max_codehost_requests_per_second {
            Some(limit) if limit < 0 => {
                return Err(ConfigError::InvalidGitRateLimit { value: limit });
            }
            _ => {}
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/extsvc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_deletion_drain_timeout_ms() -> u64 {
    45_000
}

fn default_deletion_drain_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("database max connections must be positive, got {value}")]
    InvalidDbMaxConnections { value: u32 },
    #[error(
        "deletion drain bounds are invalid (timeout: {timeout_ms}ms, poll interval: {poll_interval_ms}ms)"
    )]
    InvalidDrainBounds {
        timeout_ms: u64,
        poll_interval_ms: u64,
    },
    #[error("git requests per second ceiling must not be negative, got {value}")]
    InvalidGitRateLimit { value: i32 },
}

/// Loads configuration using layered `.env` files and `EXTSVC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (values, profile) = self.collect_layered_env()?;
        let mut vars = LayeredVars(values);

        // Process environment wins over every file.
        for (key, value) in env::vars() {
            if let Some(name) = key.strip_prefix(ENV_PREFIX) {
                vars.0.insert(name.to_string(), value);
            }
        }

        let config = AppConfig {
            profile: vars.text("PROFILE", || profile.clone()),
            log_level: vars.text("LOG_LEVEL", default_log_level),
            log_format: vars.text("LOG_FORMAT", default_log_format),
            database_url: vars.text("DATABASE_URL", default_database_url),
            db_max_connections: vars.parsed("DB_MAX_CONNECTIONS", default_db_max_connections)?,
            db_acquire_timeout_ms: vars
                .parsed("DB_ACQUIRE_TIMEOUT_MS", default_db_acquire_timeout_ms)?,
            crypto_key: vars.crypto_key()?,
            untrusted_code_host_permissions: vars.flag("UNTRUSTED_CODE_HOST_PERMISSIONS")?,
            git_max_codehost_requests_per_second: vars
                .optional("GIT_MAX_CODEHOST_REQUESTS_PER_SECOND")?,
            deletion_drain_timeout_ms: vars
                .parsed("DELETION_DRAIN_TIMEOUT_MS", default_deletion_drain_timeout_ms)?,
            deletion_drain_poll_interval_ms: vars.parsed(
                "DELETION_DRAIN_POLL_INTERVAL_MS",
                default_deletion_drain_poll_interval_ms,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix-stripped variables gathered from every layer. Blank values count
/// as unset.
struct LayeredVars(BTreeMap<String, String>);

impl LayeredVars {
    fn take(&mut self, key: &str) -> Option<String> {
        self.0
            .remove(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    }

    fn text(&mut self, key: &str, default: impl FnOnce() -> String) -> String {
        self.take(key).unwrap_or_else(default)
    }

    fn optional<T: FromStr>(&mut self, key: &'static str) -> Result<Option<T>, ConfigError> {
        self.take(key)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| ConfigError::InvalidValue { key, value: raw })
            })
            .transpose()
    }

    fn parsed<T: FromStr>(
        &mut self,
        key: &'static str,
        default: fn() -> T,
    ) -> Result<T, ConfigError> {
        Ok(self.optional(key)?.unwrap_or_else(default))
    }

    fn flag(&mut self, key: &'static str) -> Result<bool, ConfigError> {
        match self.take(key) {
            Some(raw) => parse_bool(key, &raw),
            None => Ok(false),
        }
    }

    fn crypto_key(&mut self) -> Result<Option<Vec<u8>>, ConfigError> {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        self.take("CRYPTO_KEY")
            .map(|encoded| {
                STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    })
            })
            .transpose()
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        }),
    }
}
