//! Typed views of connection configs.
//!
//! These parse only the fields the store itself needs: identity of the code
//! host, rate limits, webhook presence and the inputs of the built-in
//! semantic checks. Unknown fields are ignored.

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{AuthProvider, ConnectionKind};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub enabled: bool,
    pub requests_per_hour: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubConnection {
    #[serde(default)]
    pub url: String,
    pub token: Option<String>,
    pub git_hub_app_details: Option<GitHubAppDetails>,
    pub repos: Option<Vec<String>>,
    pub repository_query: Option<Vec<String>>,
    pub orgs: Option<Vec<String>>,
    pub authorization: Option<Value>,
    pub rate_limit: Option<RateLimit>,
    #[serde(default)]
    pub webhooks: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubAppDetails {
    pub app_id: Option<String>,
    pub installation_id: Option<i64>,
    #[serde(default)]
    pub clone_all_repositories: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitLabConnection {
    #[serde(default)]
    pub url: String,
    pub token: Option<String>,
    pub authorization: Option<GitLabAuthorization>,
    pub rate_limit: Option<RateLimit>,
    #[serde(default)]
    pub webhooks: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitLabAuthorization {
    pub identity_provider: Option<IdentityProvider>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityProvider {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketServerConnection {
    #[serde(default)]
    pub url: String,
    pub username: Option<String>,
    pub token: Option<String>,
    pub password: Option<String>,
    pub repos: Option<Vec<String>>,
    pub repository_query: Option<Vec<String>>,
    pub rate_limit: Option<RateLimit>,
    pub webhooks: Option<BitbucketServerWebhooks>,
    pub plugin: Option<BitbucketServerPlugin>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BitbucketServerWebhooks {
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BitbucketServerPlugin {
    pub webhooks: Option<BitbucketServerWebhooks>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitbucketCloudConnection {
    #[serde(default)]
    pub url: String,
    pub username: Option<String>,
    pub app_password: Option<String>,
    pub rate_limit: Option<RateLimit>,
    #[serde(default)]
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsCodeCommitConnection {
    #[serde(default)]
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitoliteConnection {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerforceConnection {
    #[serde(rename = "p4.port", default)]
    pub p4_port: String,
    #[serde(rename = "p4.user")]
    pub p4_user: Option<String>,
    #[serde(rename = "p4.passwd")]
    pub p4_passwd: Option<String>,
    pub depots: Option<Vec<String>>,
    pub rate_limit: Option<RateLimit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OtherConnection {
    pub url: Option<String>,
    #[serde(default)]
    pub repos: Vec<String>,
}

/// A config parsed into the typed view of its kind.
#[derive(Debug, Clone)]
pub enum TypedConfig {
    GitHub(GitHubConnection),
    GitLab(GitLabConnection),
    BitbucketServer(BitbucketServerConnection),
    BitbucketCloud(BitbucketCloudConnection),
    AwsCodeCommit(AwsCodeCommitConnection),
    Gitolite(GitoliteConnection),
    Perforce(PerforceConnection),
    Other(OtherConnection),
}

impl TypedConfig {
    pub fn kind(&self) -> ConnectionKind {
        match self {
            TypedConfig::GitHub(_) => ConnectionKind::GitHub,
            TypedConfig::GitLab(_) => ConnectionKind::GitLab,
            TypedConfig::BitbucketServer(_) => ConnectionKind::BitbucketServer,
            TypedConfig::BitbucketCloud(_) => ConnectionKind::BitbucketCloud,
            TypedConfig::AwsCodeCommit(_) => ConnectionKind::AwsCodeCommit,
            TypedConfig::Gitolite(_) => ConnectionKind::Gitolite,
            TypedConfig::Perforce(_) => ConnectionKind::Perforce,
            TypedConfig::Other(_) => ConnectionKind::Other,
        }
    }

    /// Whether the config declares any webhook receiver.
    pub fn has_webhooks(&self) -> bool {
        match self {
            TypedConfig::GitHub(c) => !c.webhooks.is_empty(),
            TypedConfig::GitLab(c) => !c.webhooks.is_empty(),
            TypedConfig::BitbucketServer(c) => {
                let direct = c.webhooks.as_ref().is_some_and(|w| !w.secret.is_empty());
                let plugin = c
                    .plugin
                    .as_ref()
                    .and_then(|p| p.webhooks.as_ref())
                    .is_some_and(|w| !w.secret.is_empty());
                direct || plugin
            }
            TypedConfig::BitbucketCloud(c) => !c.webhook_secret.is_empty(),
            _ => false,
        }
    }

    pub fn rate_limit(&self) -> Option<&RateLimit> {
        match self {
            TypedConfig::GitHub(c) => c.rate_limit.as_ref(),
            TypedConfig::GitLab(c) => c.rate_limit.as_ref(),
            TypedConfig::BitbucketServer(c) => c.rate_limit.as_ref(),
            TypedConfig::BitbucketCloud(c) => c.rate_limit.as_ref(),
            TypedConfig::Perforce(c) => c.rate_limit.as_ref(),
            _ => None,
        }
    }
}

pub fn parse_github(doc: &Value) -> Result<TypedConfig, serde_json::Error> {
    GitHubConnection::deserialize(doc).map(TypedConfig::GitHub)
}

pub fn parse_gitlab(doc: &Value) -> Result<TypedConfig, serde_json::Error> {
    GitLabConnection::deserialize(doc).map(TypedConfig::GitLab)
}

pub fn parse_bitbucket_server(doc: &Value) -> Result<TypedConfig, serde_json::Error> {
    BitbucketServerConnection::deserialize(doc).map(TypedConfig::BitbucketServer)
}

pub fn parse_bitbucket_cloud(doc: &Value) -> Result<TypedConfig, serde_json::Error> {
    BitbucketCloudConnection::deserialize(doc).map(TypedConfig::BitbucketCloud)
}

pub fn parse_aws_code_commit(doc: &Value) -> Result<TypedConfig, serde_json::Error> {
    AwsCodeCommitConnection::deserialize(doc).map(TypedConfig::AwsCodeCommit)
}

pub fn parse_gitolite(doc: &Value) -> Result<TypedConfig, serde_json::Error> {
    GitoliteConnection::deserialize(doc).map(TypedConfig::Gitolite)
}

pub fn parse_perforce(doc: &Value) -> Result<TypedConfig, serde_json::Error> {
    PerforceConnection::deserialize(doc).map(TypedConfig::Perforce)
}

pub fn parse_other(doc: &Value) -> Result<TypedConfig, serde_json::Error> {
    OtherConnection::deserialize(doc).map(TypedConfig::Other)
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

pub fn check_github_credentials(config: &TypedConfig, _: &[AuthProvider]) -> Vec<String> {
    let TypedConfig::GitHub(c) = config else {
        return Vec::new();
    };
    if is_blank(&c.token) && c.git_hub_app_details.is_none() {
        return vec!["at least one of token or gitHubAppDetails must be set".to_string()];
    }
    Vec::new()
}

pub fn check_github_discovery(config: &TypedConfig, _: &[AuthProvider]) -> Vec<String> {
    let TypedConfig::GitHub(c) = config else {
        return Vec::new();
    };
    let clone_all = c
        .git_hub_app_details
        .as_ref()
        .is_some_and(|app| app.clone_all_repositories);
    if c.repos.is_none() && c.repository_query.is_none() && c.orgs.is_none() && !clone_all {
        return vec![
            "at least one of repositoryQuery, repos, orgs or gitHubAppDetails.cloneAllRepositories must be set"
                .to_string(),
        ];
    }
    Vec::new()
}

pub fn check_gitlab_identity_provider(config: &TypedConfig, providers: &[AuthProvider]) -> Vec<String> {
    let TypedConfig::GitLab(c) = config else {
        return Vec::new();
    };
    let Some(provider) = c
        .authorization
        .as_ref()
        .and_then(|a| a.identity_provider.as_ref())
    else {
        return Vec::new();
    };
    if provider.kind != "oauth" {
        return Vec::new();
    }

    let wanted = super::codehost::normalize_base_url(&c.url).ok();
    let matched = providers.iter().any(|p| {
        p.kind.eq_ignore_ascii_case("gitlab")
            && p.url
                .as_deref()
                .and_then(|u| super::codehost::normalize_base_url(u).ok())
                .is_some_and(|u| Some(&u) == wanted.as_ref())
    });
    if matched {
        Vec::new()
    } else {
        vec![format!(
            "did not find authentication provider matching {:?}, a gitlab auth provider for this url is required by authorization.identityProvider",
            c.url
        )]
    }
}

pub fn check_bitbucket_server_credentials(config: &TypedConfig, _: &[AuthProvider]) -> Vec<String> {
    let TypedConfig::BitbucketServer(c) = config else {
        return Vec::new();
    };
    if is_blank(&c.token) && is_blank(&c.password) {
        return vec!["at least one of token or password must be set".to_string()];
    }
    Vec::new()
}

pub fn check_bitbucket_server_discovery(config: &TypedConfig, _: &[AuthProvider]) -> Vec<String> {
    let TypedConfig::BitbucketServer(c) = config else {
        return Vec::new();
    };
    if c.repos.is_none() && c.repository_query.is_none() {
        return vec!["at least one of repositoryQuery or repos must be set".to_string()];
    }
    Vec::new()
}

pub fn check_perforce_depots(config: &TypedConfig, _: &[AuthProvider]) -> Vec<String> {
    let TypedConfig::Perforce(c) = config else {
        return Vec::new();
    };
    if c.depots.is_none() {
        return vec!["depots must be set".to_string()];
    }
    Vec::new()
}

/// The ticket parser splits `p4 login -p` output on ':'.
pub fn check_perforce_password(config: &TypedConfig, _: &[AuthProvider]) -> Vec<String> {
    let TypedConfig::Perforce(c) = config else {
        return Vec::new();
    };
    if c.p4_passwd.as_deref().is_some_and(|p| p.contains(':')) {
        return vec!["p4.passwd must not contain a colon character".to_string()];
    }
    Vec::new()
}

pub fn check_other_repo_schemes(config: &TypedConfig, _: &[AuthProvider]) -> Vec<String> {
    let TypedConfig::Other(c) = config else {
        return Vec::new();
    };
    let base = c.url.as_deref().and_then(|u| Url::parse(u).ok());

    let mut errs = Vec::new();
    for (i, repo) in c.repos.iter().enumerate() {
        let parsed = match &base {
            Some(base) => base.join(repo),
            None => Url::parse(repo),
        };
        match parsed {
            Ok(clone_url) => match clone_url.scheme() {
                "git" | "http" | "https" | "ssh" => {}
                scheme => errs.push(format!(
                    "repos.{}: scheme {:?} not one of git, http, https or ssh",
                    i, scheme
                )),
            },
            Err(err) => errs.push(format!("repos.{}: {}", i, err)),
        }
    }
    errs
}
