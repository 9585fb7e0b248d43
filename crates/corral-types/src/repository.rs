use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stable, immutable-within-one-run record of a remote repository,
/// keyed by `full_name` (§3 "Repository descriptor").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub owner: String,

    pub clone_url_https: String,
    pub clone_url_ssh: String,
    pub default_branch: String,

    pub private: bool,
    pub archived: bool,
    pub fork: bool,
    pub language: Option<String>,
    pub topics: Vec<String>,
    pub stars: u64,
    pub updated_at: DateTime<Utc>,

    /// Free-form platform-specific fields that don't merit a first-class
    /// column (mirrors `provider_data` in §3).
    #[serde(default)]
    pub provider_data: BTreeMap<String, Value>,
}

impl Repository {
    pub fn clone_url(&self, protocol: Protocol) -> &str {
        match protocol {
            Protocol::Https => &self.clone_url_https,
            Protocol::Ssh => &self.clone_url_ssh,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Https,
    Ssh,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    All,
    Public,
    Private,
}

/// How the engine treats a target directory that is already a git
/// checkout (§4.3 "Strategy sub-decision").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Reset,
    Pull,
    Fetch,
}

/// Tri-state filter: unset means "no preference", `Some(true/false)`
/// means "must match". Mirrors the spec's "archived/fork tri-state
/// (`nil` = no filter)" wording for `ListOptions` (§4.1).
pub type TriState = Option<bool>;

/// Options accepted by `Provider::list_repositories` (§4.1). `page`/
/// `per_page` are 1-indexed the way every REST provider in this space
/// expects.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub org: String,
    pub visibility: Visibility,
    pub archived: TriState,
    pub fork: TriState,
    pub language: Option<String>,
    pub topic: Option<String>,
    pub min_stars: Option<u64>,
    pub max_stars: Option<u64>,
    pub updated_since: Option<DateTime<Utc>>,
    pub sort: ListSort,
    pub direction: SortDirection,
    pub page: u32,
    pub per_page: u32,
}

impl ListOptions {
    pub fn for_org(org: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            page: 1,
            per_page: 100,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListSort {
    #[default]
    FullName,
    Updated,
    Stars,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One page of a provider's repository listing, plus whether more pages
/// remain. Adapters follow pagination until `has_more` is false (§4.1).
#[derive(Debug, Clone, Default)]
pub struct RepositoryList {
    pub repositories: Vec<Repository>,
    pub has_more: bool,
}

/// Credentials handed to `Provider::authenticate` (§4.1).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub kind: CredentialKind,
    pub secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Token,
    Basic,
    ApiKey,
    OAuth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub valid: bool,
    pub scopes: Vec<String>,
    pub user: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rate_limit: Option<RateLimit>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub used: u32,
    pub resource: RateLimitResource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitResource {
    Core,
    Search,
    GraphQl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub latency: std::time::Duration,
    pub last_checked: DateTime<Utc>,
    pub message: Option<String>,
}

/// Named feature a provider may or may not implement (§4.1
/// "Capabilities"). Missing capability surfaces as `NotSupported`,
/// never as a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Repositories,
    Webhooks,
    Events,
    Issues,
    PullRequests,
    MergeRequests,
    Wiki,
    Projects,
    Releases,
    Organizations,
    Users,
    Teams,
    Permissions,
    BranchProtection,
}

/// A release as returned by `list/get_release` (§4.1 "Release ops").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub id: String,
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub draft: bool,
    pub prerelease: bool,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// The fields a caller controls when creating or updating a release; the
/// rest (`id`, timestamps, assets) are server-assigned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseDraft {
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub draft: bool,
    pub prerelease: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub download_url: String,
    pub content_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_url_selects_protocol() {
        let repo = Repository {
            id: "1".into(),
            name: "widgets".into(),
            full_name: "acme/widgets".into(),
            owner: "acme".into(),
            clone_url_https: "https://example.com/acme/widgets.git".into(),
            clone_url_ssh: "git@example.com:acme/widgets.git".into(),
            default_branch: "main".into(),
            private: false,
            archived: false,
            fork: false,
            language: None,
            topics: vec![],
            stars: 0,
            updated_at: Utc::now(),
            provider_data: BTreeMap::new(),
        };
        assert_eq!(repo.clone_url(Protocol::Https), repo.clone_url_https);
        assert_eq!(repo.clone_url(Protocol::Ssh), repo.clone_url_ssh);
    }

    #[test]
    fn list_options_for_org_defaults_to_page_one() {
        let opts = ListOptions::for_org("acme");
        assert_eq!(opts.org, "acme");
        assert_eq!(opts.page, 1);
        assert_eq!(opts.per_page, 100);
    }
}
