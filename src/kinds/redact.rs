//! Secret redaction for configs shown to clients.
//!
//! Redacted configs carry [`REDACTED_SENTINEL`] in place of each secret. A
//! client echoing such a config back must have it un-redacted against the
//! stored version before it is validated and written.

use serde_json::Value;

use super::{ConnectionKind, SecretPath, jsonc};
use crate::error::{StoreError, StoreResult};

pub const REDACTED_SENTINEL: &str = "REDACTED";

fn lookup_mut<'a>(doc: &'a mut Value, path: SecretPath) -> Option<&'a mut Value> {
    path.iter()
        .try_fold(doc, |node, segment| node.as_object_mut()?.get_mut(*segment))
}

fn lookup<'a>(doc: &'a Value, path: SecretPath) -> Option<&'a Value> {
    path.iter()
        .try_fold(doc, |node, segment| node.as_object()?.get(*segment))
}

/// Replace every non-empty secret of `kind` with the sentinel.
pub fn redact_config(kind: ConnectionKind, config: &str) -> StoreResult<String> {
    let (_, mut doc) = jsonc::parse(config).map_err(StoreError::MalformedJson)?;

    for path in kind.spec().secret_paths {
        if let Some(slot) = lookup_mut(&mut doc, *path) {
            if slot.as_str().is_some_and(|s| !s.is_empty()) {
                *slot = Value::String(REDACTED_SENTINEL.to_string());
            }
        }
    }

    serde_json::to_string(&doc).map_err(|e| StoreError::MalformedJson(e.to_string()))
}

/// Restore sentinel-valued secrets in `new` from `old`.
///
/// Documents without a sentinel are returned untouched, comments included.
pub fn unredact_config(kind: ConnectionKind, new: &str, old: &str) -> StoreResult<String> {
    if !new.contains(REDACTED_SENTINEL) {
        return Ok(new.to_string());
    }

    let (_, mut new_doc) = jsonc::parse(new).map_err(StoreError::MalformedJson)?;
    let (_, old_doc) = jsonc::parse(old).map_err(StoreError::MalformedJson)?;

    let mut restored = false;
    for path in kind.spec().secret_paths {
        let Some(slot) = lookup_mut(&mut new_doc, *path) else {
            continue;
        };
        if slot.as_str() != Some(REDACTED_SENTINEL) {
            continue;
        }
        if let Some(previous) = lookup(&old_doc, *path) {
            *slot = previous.clone();
            restored = true;
        }
    }

    if !restored {
        return Ok(new.to_string());
    }
    serde_json::to_string(&new_doc).map_err(|e| StoreError::MalformedJson(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_kind_specific_secrets() {
        let config = r#"{"url": "https://bb.example.com", "username": "u", "token": "secret", "password": ""}"#;
        let redacted = redact_config(ConnectionKind::BitbucketServer, config).unwrap();
        let doc: Value = serde_json::from_str(&redacted).unwrap();
        assert_eq!(doc["token"], REDACTED_SENTINEL);
        assert_eq!(doc["password"], "");
        assert_eq!(doc["username"], "u");
    }

    #[test]
    fn redacts_nested_and_dotted_keys() {
        let aws = redact_config(
            ConnectionKind::AwsCodeCommit,
            r#"{"secretAccessKey": "s", "gitCredentials": {"username": "u", "password": "p"}}"#,
        )
        .unwrap();
        let doc: Value = serde_json::from_str(&aws).unwrap();
        assert_eq!(doc["gitCredentials"]["password"], REDACTED_SENTINEL);
        assert_eq!(doc["gitCredentials"]["username"], "u");

        let p4 = redact_config(ConnectionKind::Perforce, r#"{"p4.passwd": "pw"}"#).unwrap();
        assert_eq!(p4, json!({"p4.passwd": REDACTED_SENTINEL}).to_string());
    }

    #[test]
    fn unredact_restores_from_stored_config() {
        let stored = r#"{"url": "https://github.com", "token": "real-token", "repos": ["a/b"]}"#;
        let redacted = redact_config(ConnectionKind::GitHub, stored).unwrap();
        assert!(!redacted.contains("real-token"));

        let edited = redacted.replace("a/b", "c/d");
        let restored = unredact_config(ConnectionKind::GitHub, &edited, stored).unwrap();
        let doc: Value = serde_json::from_str(&restored).unwrap();
        assert_eq!(doc["token"], "real-token");
        assert_eq!(doc["repos"], json!(["c/d"]));
    }

    #[test]
    fn unredact_leaves_plain_documents_alone() {
        let new = "{\n  // keep me\n  \"token\": \"fresh\"\n}";
        let restored = unredact_config(ConnectionKind::GitHub, new, r#"{"token": "old"}"#).unwrap();
        assert_eq!(restored, new);
    }
}
