//! # Config validation
//!
//! [`ConfigValidator`] runs, in order: schema lookup, JSONC normalization, the
//! redacted-secret guard, schema validation, then the kind's built-in semantic
//! checks and any extra validators registered for that kind. Schema and
//! semantic problems are aggregated into one [`ValidationErrors`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{StoreError, StoreResult, ValidationErrors};
use crate::kinds::redact::REDACTED_SENTINEL;
use crate::kinds::schema::{BuiltinSchemas, SchemaValidator};
use crate::kinds::typed::TypedConfig;
use crate::kinds::{AuthProvider, ConnectionKind, jsonc};

/// Caller-registered semantic check for one kind.
pub type ExtraValidator =
    Arc<dyn Fn(&TypedConfig, &[AuthProvider]) -> Result<(), String> + Send + Sync>;

/// Output of a successful validation.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    /// Strict JSON with comments and trailing commas removed.
    pub normalized: String,
    pub document: Value,
    pub typed: TypedConfig,
}

impl ValidatedConfig {
    pub fn has_authorization(&self) -> bool {
        self.document.get("authorization").is_some()
    }
}

#[derive(Clone)]
pub struct ConfigValidator {
    schemas: Arc<dyn SchemaValidator>,
    extra: HashMap<ConnectionKind, Vec<ExtraValidator>>,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinSchemas))
    }
}

impl std::fmt::Debug for ConfigValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self.extra.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("ConfigValidator")
            .field("extra_validators", &counts)
            .finish()
    }
}

impl ConfigValidator {
    pub fn new(schemas: Arc<dyn SchemaValidator>) -> Self {
        Self {
            schemas,
            extra: HashMap::new(),
        }
    }

    /// Register an extra validator for `kind`.
    pub fn with_validator(mut self, kind: ConnectionKind, validator: ExtraValidator) -> Self {
        self.extra.entry(kind).or_default().push(validator);
        self
    }

    pub fn validate(
        &self,
        kind: ConnectionKind,
        raw_config: &str,
        auth_providers: &[AuthProvider],
    ) -> StoreResult<ValidatedConfig> {
        let spec = kind.spec();

        if !self.schemas.has_schema(spec.schema) {
            return Err(StoreError::UnknownKind(kind.to_string()));
        }

        let (normalized, document) = jsonc::parse(raw_config).map_err(StoreError::MalformedJson)?;

        if normalized.contains(REDACTED_SENTINEL) {
            return Err(StoreError::RedactedSecretPresent);
        }

        let mut errs = ValidationErrors::new();
        let violations = self
            .schemas
            .validate(spec.schema, &document)
            .ok_or_else(|| StoreError::UnknownKind(kind.to_string()))?;
        errs.extend(violations.into_iter().map(|v| {
            let rendered = v.to_string();
            rendered
                .strip_prefix("(root): ")
                .map(str::to_string)
                .unwrap_or(rendered)
        }));

        let typed = match kind.parse_typed(&document) {
            Ok(typed) => typed,
            Err(err) => {
                // Schema errors already describe a document this malformed.
                if errs.is_empty() {
                    errs.push(err.to_string());
                }
                return Err(StoreError::ValidationFailed(errs));
            }
        };

        for check in spec.checks {
            errs.extend(check(&typed, auth_providers));
        }
        if let Some(validators) = self.extra.get(&kind) {
            for validator in validators {
                if let Err(message) = validator(&typed, auth_providers) {
                    errs.push(message);
                }
            }
        }

        errs.into_result()?;
        Ok(ValidatedConfig {
            normalized,
            document,
            typed,
        })
    }
}
