//! # Connection kinds
//!
//! Every supported code host kind is a variant of [`ConnectionKind`]. Per-kind
//! behavior (schema name, typed parse, built-in semantic checks, secret fields,
//! default API rate limit) lives in one [`KindSpec`] registry entry, so adding
//! a kind means adding a variant and its entry.

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

pub mod codehost;
pub mod jsonc;
pub mod redact;
pub mod schema;
pub mod typed;

use typed::TypedConfig;

/// Supported code host kinds, stored as upper-case strings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionKind {
    #[sea_orm(string_value = "GITHUB")]
    GitHub,
    #[sea_orm(string_value = "GITLAB")]
    GitLab,
    #[sea_orm(string_value = "BITBUCKETSERVER")]
    BitbucketServer,
    #[sea_orm(string_value = "BITBUCKETCLOUD")]
    BitbucketCloud,
    #[sea_orm(string_value = "AWSCODECOMMIT")]
    AwsCodeCommit,
    #[sea_orm(string_value = "GITOLITE")]
    Gitolite,
    #[sea_orm(string_value = "PERFORCE")]
    Perforce,
    #[sea_orm(string_value = "OTHER")]
    Other,
}

/// Secret field locations, as key paths from the document root.
pub type SecretPath = &'static [&'static str];

/// Built-in semantic check over a typed config. Returns every problem found.
pub type BuiltinCheck = fn(&TypedConfig, &[AuthProvider]) -> Vec<String>;

/// An authentication provider configured on the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProvider {
    /// Provider type, e.g. `gitlab` or `github`.
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Option<String>,
}

impl AuthProvider {
    pub fn new(kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            url: Some(url.into()),
        }
    }
}

/// Registry entry describing one connection kind.
pub struct KindSpec {
    pub kind: ConnectionKind,
    pub schema: &'static str,
    pub parse: fn(&Value) -> Result<TypedConfig, serde_json::Error>,
    pub checks: &'static [BuiltinCheck],
    pub secret_paths: &'static [SecretPath],
    /// Built-in API rate limit in requests per hour, if the kind has one.
    pub default_requests_per_hour: Option<f64>,
}

static GITHUB: KindSpec = KindSpec {
    kind: ConnectionKind::GitHub,
    schema: "github",
    parse: typed::parse_github,
    checks: &[typed::check_github_credentials, typed::check_github_discovery],
    secret_paths: &[&["token"], &["gitHubAppDetails", "privateKey"]],
    default_requests_per_hour: Some(5000.0),
};

static GITLAB: KindSpec = KindSpec {
    kind: ConnectionKind::GitLab,
    schema: "gitlab",
    parse: typed::parse_gitlab,
    checks: &[typed::check_gitlab_identity_provider],
    secret_paths: &[&["token"], &["token.oauth.refresh"]],
    default_requests_per_hour: Some(36000.0),
};

static BITBUCKET_SERVER: KindSpec = KindSpec {
    kind: ConnectionKind::BitbucketServer,
    schema: "bitbucket_server",
    parse: typed::parse_bitbucket_server,
    checks: &[
        typed::check_bitbucket_server_credentials,
        typed::check_bitbucket_server_discovery,
    ],
    secret_paths: &[&["token"], &["password"]],
    default_requests_per_hour: Some(28800.0),
};

static BITBUCKET_CLOUD: KindSpec = KindSpec {
    kind: ConnectionKind::BitbucketCloud,
    schema: "bitbucket_cloud",
    parse: typed::parse_bitbucket_cloud,
    checks: &[],
    secret_paths: &[&["appPassword"], &["webhookSecret"]],
    default_requests_per_hour: Some(7200.0),
};

static AWS_CODE_COMMIT: KindSpec = KindSpec {
    kind: ConnectionKind::AwsCodeCommit,
    schema: "aws_codecommit",
    parse: typed::parse_aws_code_commit,
    checks: &[],
    secret_paths: &[&["secretAccessKey"], &["gitCredentials", "password"]],
    default_requests_per_hour: None,
};

static GITOLITE: KindSpec = KindSpec {
    kind: ConnectionKind::Gitolite,
    schema: "gitolite",
    parse: typed::parse_gitolite,
    checks: &[],
    secret_paths: &[],
    default_requests_per_hour: None,
};

static PERFORCE: KindSpec = KindSpec {
    kind: ConnectionKind::Perforce,
    schema: "perforce",
    parse: typed::parse_perforce,
    checks: &[typed::check_perforce_depots, typed::check_perforce_password],
    secret_paths: &[&["p4.passwd"]],
    default_requests_per_hour: Some(5000.0),
};

static OTHER: KindSpec = KindSpec {
    kind: ConnectionKind::Other,
    schema: "other",
    parse: typed::parse_other,
    checks: &[typed::check_other_repo_schemes],
    secret_paths: &[],
    default_requests_per_hour: None,
};

impl ConnectionKind {
    pub const ALL: [ConnectionKind; 8] = [
        ConnectionKind::GitHub,
        ConnectionKind::GitLab,
        ConnectionKind::BitbucketServer,
        ConnectionKind::BitbucketCloud,
        ConnectionKind::AwsCodeCommit,
        ConnectionKind::Gitolite,
        ConnectionKind::Perforce,
        ConnectionKind::Other,
    ];

    pub fn spec(self) -> &'static KindSpec {
        match self {
            ConnectionKind::GitHub => &GITHUB,
            ConnectionKind::GitLab => &GITLAB,
            ConnectionKind::BitbucketServer => &BITBUCKET_SERVER,
            ConnectionKind::BitbucketCloud => &BITBUCKET_CLOUD,
            ConnectionKind::AwsCodeCommit => &AWS_CODE_COMMIT,
            ConnectionKind::Gitolite => &GITOLITE,
            ConnectionKind::Perforce => &PERFORCE,
            ConnectionKind::Other => &OTHER,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionKind::GitHub => "GITHUB",
            ConnectionKind::GitLab => "GITLAB",
            ConnectionKind::BitbucketServer => "BITBUCKETSERVER",
            ConnectionKind::BitbucketCloud => "BITBUCKETCLOUD",
            ConnectionKind::AwsCodeCommit => "AWSCODECOMMIT",
            ConnectionKind::Gitolite => "GITOLITE",
            ConnectionKind::Perforce => "PERFORCE",
            ConnectionKind::Other => "OTHER",
        }
    }

    /// Typed parse through the registry.
    pub fn parse_typed(self, document: &Value) -> Result<TypedConfig, serde_json::Error> {
        (self.spec().parse)(document)
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        ConnectionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == upper)
            .ok_or_else(|| StoreError::UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_case_insensitively() {
        assert_eq!(
            "github".parse::<ConnectionKind>().unwrap(),
            ConnectionKind::GitHub
        );
        assert_eq!(
            "BitbucketServer".parse::<ConnectionKind>().unwrap(),
            ConnectionKind::BitbucketServer
        );
        assert!(matches!(
            "phabricator".parse::<ConnectionKind>(),
            Err(StoreError::UnknownKind(ref k)) if k == "phabricator"
        ));
    }

    #[test]
    fn registry_entries_match_their_variant() {
        for kind in ConnectionKind::ALL {
            assert_eq!(kind.spec().kind, kind);
            assert_eq!(kind.as_str().parse::<ConnectionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn display_uses_stored_form() {
        assert_eq!(ConnectionKind::AwsCodeCommit.to_string(), "AWSCODECOMMIT");
    }
}
