//! Code host identity and rate limit derivation.
//!
//! Two connections share a code host row when their kind-specific base URLs
//! normalize to the same string.

use url::Url;

use super::ConnectionKind;
use super::typed::TypedConfig;

const GITHUB_DOT_COM: &str = "https://github.com/";
const GITLAB_DOT_COM: &str = "https://gitlab.com/";
const BITBUCKET_ORG: &str = "https://bitbucket.org/";
const SECONDS_PER_HOUR: i32 = 3600;

/// Lowercase scheme and host, drop query, fragment and credentials, force a trailing slash.
pub fn normalize_base_url(raw: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(raw.trim())?;
    url.set_query(None);
    url.set_fragment(None);
    // Only fails for cannot-be-a-base URLs, which keep their credentials empty anyway.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url.to_string())
}

fn opaque_identifier(scheme: &str, value: &str) -> Result<String, String> {
    let value = value.trim().trim_end_matches('/');
    if value.is_empty() {
        return Err(format!("unable to determine {} code host address", scheme));
    }
    Ok(format!("{}://{}/", scheme, value.to_ascii_lowercase()))
}

fn normalized_or_default(url: &str, default: &str) -> Result<String, String> {
    if url.trim().is_empty() {
        return Ok(default.to_string());
    }
    normalize_base_url(url).map_err(|e| format!("parse base URL {:?}: {}", url, e))
}

/// Stable identifier of the physical code host a config points at.
pub fn code_host_url(config: &TypedConfig) -> Result<String, String> {
    match config {
        TypedConfig::GitHub(c) => normalized_or_default(&c.url, GITHUB_DOT_COM),
        TypedConfig::GitLab(c) => normalized_or_default(&c.url, GITLAB_DOT_COM),
        TypedConfig::BitbucketCloud(c) => normalized_or_default(&c.url, BITBUCKET_ORG),
        TypedConfig::BitbucketServer(c) => {
            normalize_base_url(&c.url).map_err(|e| format!("parse base URL {:?}: {}", c.url, e))
        }
        TypedConfig::AwsCodeCommit(c) => {
            if c.region.trim().is_empty() {
                return Err("unable to determine AWS CodeCommit region".to_string());
            }
            Ok(format!(
                "https://git-codecommit.{}.amazonaws.com/",
                c.region.trim().to_ascii_lowercase()
            ))
        }
        TypedConfig::Gitolite(c) => opaque_identifier("gitolite", &c.host),
        TypedConfig::Perforce(c) => {
            let port = c.p4_port.trim();
            let port = port.strip_prefix("ssl:").unwrap_or(port);
            opaque_identifier("perforce", port)
        }
        TypedConfig::Other(c) => match c.url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => normalize_base_url(url).map_err(|e| format!("parse base URL {:?}: {}", url, e)),
            None => {
                let first = c
                    .repos
                    .first()
                    .ok_or_else(|| "unable to determine code host from empty repos".to_string())?;
                let parsed =
                    Url::parse(first).map_err(|e| format!("parse repo URL {:?}: {}", first, e))?;
                let origin = format!(
                    "{}://{}/",
                    parsed.scheme(),
                    parsed.host_str().unwrap_or_default()
                );
                normalize_base_url(&origin).map_err(|e| e.to_string())
            }
        },
    }
}

/// API rate limit declared by a config, compared against the kind's built-in default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApiRateLimit {
    /// True when the config does not override the kind's default.
    pub is_default: bool,
    /// `None` means unlimited.
    pub requests_per_hour: Option<f64>,
}

pub fn api_rate_limit(config: &TypedConfig) -> ApiRateLimit {
    let default = config.kind().spec().default_requests_per_hour;
    match config.rate_limit() {
        None => ApiRateLimit {
            is_default: true,
            requests_per_hour: default,
        },
        Some(limit) if !limit.enabled => ApiRateLimit {
            is_default: false,
            requests_per_hour: None,
        },
        Some(limit) => ApiRateLimit {
            is_default: default == Some(limit.requests_per_hour),
            requests_per_hour: Some(limit.requests_per_hour),
        },
    }
}

/// Row values for a code host derived from one connection config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeHostSpec {
    pub kind: ConnectionKind,
    pub url: String,
    pub api_rate_limit_quota: Option<i32>,
    pub api_rate_limit_interval_seconds: Option<i32>,
    pub git_rate_limit_quota: Option<i32>,
    pub git_rate_limit_interval_seconds: Option<i32>,
}

impl CodeHostSpec {
    /// Default API limits are left unset so the platform default keeps applying.
    pub fn derive(config: &TypedConfig, git_requests_per_second: Option<i32>) -> Result<Self, String> {
        let url = code_host_url(config)?;
        let api = api_rate_limit(config);

        let (api_quota, api_interval) = match api {
            ApiRateLimit {
                is_default: false,
                requests_per_hour: Some(per_hour),
            } => (Some(per_hour.round() as i32), Some(SECONDS_PER_HOUR)),
            _ => (None, None),
        };

        let (git_quota, git_interval) = match git_requests_per_second {
            Some(per_second) => (Some(per_second), Some(1)),
            None => (None, None),
        };

        Ok(Self {
            kind: config.kind(),
            url,
            api_rate_limit_quota: api_quota,
            api_rate_limit_interval_seconds: api_interval,
            git_rate_limit_quota: git_quota,
            git_rate_limit_interval_seconds: git_interval,
        })
    }
}
