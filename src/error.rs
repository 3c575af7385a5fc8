//! # Error Handling
//!
//! Error taxonomy for the external service store. Validation problems are
//! aggregated into a single [`ValidationErrors`] value so callers can present
//! every issue at once; storage failures carry the operation they happened in.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::crypto::CryptoError;

/// Result alias used throughout the store.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the external service store and its collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("external service not found: {id}")]
    NotFound { id: i64 },

    #[error("invalid external service kind: {0}")]
    UnknownKind(String),

    #[error("unable to normalize JSON: {0}")]
    MalformedJson(String),

    #[error(
        "unable to write external service config as it contains redacted fields, this is likely a bug rather than a problem with your config"
    )]
    RedactedSecretPresent,

    #[error("{0}")]
    ValidationFailed(ValidationErrors),

    #[error("failed to create code host: {0}")]
    CodeHostCreateFailed(#[source] sea_orm::DbErr),

    #[error("sync job not found: {id}")]
    JobNotFound { id: i64 },

    #[error("timed out after {waited:?} waiting for sync jobs of external service {id} to stop")]
    DeletionTimedOut { id: i64, waited: Duration },

    #[error("operation canceled by caller")]
    Canceled,

    #[error("deletion via upsert is not allowed, use delete")]
    IllegalDeleteViaUpsert,

    #[error("external service creation rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: sea_orm::DbErr,
    },
}

impl StoreError {
    /// Wrap a storage error with the operation it happened in.
    pub fn db(context: impl Into<String>, source: sea_orm::DbErr) -> Self {
        StoreError::Database {
            context: context.into(),
            source,
        }
    }

    /// True for the "entity absent" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::JobNotFound { .. }
        )
    }
}

/// Extension for attaching operation context to sea-orm results.
pub trait DbResultExt<T> {
    fn context(self, context: &str) -> StoreResult<T>;
}

impl<T> DbResultExt<T> for Result<T, sea_orm::DbErr> {
    fn context(self, context: &str) -> StoreResult<T> {
        self.map_err(|err| StoreError::db(context, err))
    }
}

/// Aggregated validation failures, rendered like a multi-error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn extend<I, S>(&mut self, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.errors.extend(messages.into_iter().map(Into::into));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn messages(&self) -> &[String] {
        &self.errors
    }

    /// Returns `Ok(())` when nothing was collected.
    pub fn into_result(self) -> StoreResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::ValidationFailed(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no validation errors"),
            [only] => write!(f, "1 error occurred:\n\t* {}", only),
            many => {
                write!(f, "{} errors occurred:", many.len())?;
                for err in many {
                    write!(f, "\n\t* {}", err)?;
                }
                Ok(())
            }
        }
    }
}
