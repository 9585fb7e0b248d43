//! GitHub adapter (§4.1, §5 "GitHub"). A thin `reqwest::blocking::Client`
//! wrapper over the REST v3 API.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use corral_core::Provider;
use corral_types::{
    Capability, Credentials, CorralError, ErrorContext, HealthState, HealthStatus, ListOptions,
    RateLimit, RateLimitResource, Release, ReleaseAsset, ReleaseDraft, Repository, RepositoryList,
    TokenInfo, Visibility,
};
use serde::Deserialize;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("corral/", env!("CARGO_PKG_VERSION"));

/// GitHub REST adapter. One `Arc<dyn Provider>` is shared across every
/// worker thread, so the inner client must be `Send + Sync`;
/// `reqwest::blocking::Client` already is.
pub struct GithubProvider {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl GithubProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    /// For GitHub Enterprise Server, whose REST API lives at
    /// `https://<host>/api/v3`.
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        }
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &str,
    ) -> reqwest::blocking::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn send(
        &self,
        builder: reqwest::blocking::RequestBuilder,
        operation: &'static str,
        resource: &str,
    ) -> Result<reqwest::blocking::Response, CorralError> {
        let ctx = ErrorContext::new(operation).with_resource(resource);
        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                CorralError::Timeout {
                    ctx: ctx.clone(),
                    message: e.to_string(),
                }
            } else {
                CorralError::Network {
                    ctx: ctx.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Err(CorralError::from_http_status(ctx, status, body))
    }

    fn rate_limit_from_headers(response: &reqwest::blocking::Response) -> Option<RateLimit> {
        let headers = response.headers();
        let get = |name: &str| headers.get(name)?.to_str().ok()?.parse::<i64>().ok();
        let limit = get("x-ratelimit-limit")? as u32;
        let remaining = get("x-ratelimit-remaining")? as u32;
        let reset = get("x-ratelimit-reset")?;
        Some(RateLimit {
            limit,
            remaining,
            reset_at: DateTime::from_timestamp(reset, 0).unwrap_or_else(Utc::now),
            used: limit.saturating_sub(remaining),
            resource: RateLimitResource::Core,
        })
    }
}

impl Provider for GithubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn capabilities(&self) -> &[Capability] {
        &[
            Capability::Repositories,
            Capability::Organizations,
            Capability::Releases,
            Capability::Issues,
            Capability::PullRequests,
            Capability::Webhooks,
            Capability::Wiki,
            Capability::Teams,
            Capability::BranchProtection,
        ]
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<TokenInfo, CorralError> {
        let response = self.send(
            self.request(reqwest::Method::GET, "/user", &credentials.secret),
            "authenticate",
            "github:/user",
        )?;
        let rate_limit = Self::rate_limit_from_headers(&response);
        let user: GithubUser = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("authenticate"),
            message: format!("failed to parse /user response: {e}"),
        })?;
        Ok(TokenInfo {
            valid: true,
            scopes: Vec::new(),
            user: Some(user.login),
            expires_at: None,
            rate_limit,
        })
    }

    fn list_repositories(&self, options: &ListOptions) -> Result<RepositoryList, CorralError> {
        let path = format!(
            "/orgs/{}/repos?type={}&page={}&per_page={}",
            options.org,
            visibility_param(options.visibility),
            options.page,
            options.per_page,
        );
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "list_repositories",
            &options.org,
        )?;
        let link_header = response
            .headers()
            .get("link")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let repos: Vec<GithubRepo> = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("list_repositories").with_resource(&options.org),
            message: format!("failed to parse repository list: {e}"),
        })?;

        let repositories = repos
            .into_iter()
            .map(GithubRepo::into_repository)
            .filter(|r| passes_filters(r, options))
            .collect();

        Ok(RepositoryList {
            repositories,
            has_more: link_header.is_some_and(|l| l.contains("rel=\"next\"")),
        })
    }

    fn get_repository(&self, full_name: &str) -> Result<Repository, CorralError> {
        let path = format!("/repos/{full_name}");
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "get_repository",
            full_name,
        )?;
        let repo: GithubRepo = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("get_repository").with_resource(full_name),
            message: format!("failed to parse repository: {e}"),
        })?;
        Ok(repo.into_repository())
    }

    fn rate_limit(&self) -> Result<RateLimit, CorralError> {
        let response = self.send(
            self.request(reqwest::Method::GET, "/rate_limit", &self.token),
            "rate_limit",
            "github:/rate_limit",
        )?;
        let body: GithubRateLimitResponse = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("rate_limit"),
            message: format!("failed to parse rate_limit response: {e}"),
        })?;
        let core = body.resources.core;
        Ok(RateLimit {
            limit: core.limit,
            remaining: core.remaining,
            reset_at: DateTime::from_timestamp(core.reset, 0).unwrap_or_else(Utc::now),
            used: core.used,
            resource: RateLimitResource::Core,
        })
    }

    fn health_check(&self) -> Result<HealthStatus, CorralError> {
        let started = Instant::now();
        let result = self.send(
            self.request(reqwest::Method::GET, "/rate_limit", &self.token),
            "health_check",
            "github:/rate_limit",
        );
        let latency = started.elapsed();
        match result {
            Ok(_) => Ok(HealthStatus {
                status: HealthState::Healthy,
                latency,
                last_checked: Utc::now(),
                message: None,
            }),
            Err(e) if e.retryable() => Ok(HealthStatus {
                status: HealthState::Degraded,
                latency,
                last_checked: Utc::now(),
                message: Some(e.to_string()),
            }),
            Err(e) => Ok(HealthStatus {
                status: HealthState::Unhealthy,
                latency,
                last_checked: Utc::now(),
                message: Some(e.to_string()),
            }),
        }
    }

    fn list_releases(&self, full_name: &str) -> Result<Vec<Release>, CorralError> {
        let path = format!("/repos/{full_name}/releases");
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "list_releases",
            full_name,
        )?;
        let releases: Vec<GithubRelease> = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("list_releases").with_resource(full_name),
            message: format!("failed to parse release list: {e}"),
        })?;
        Ok(releases.into_iter().map(GithubRelease::into_release).collect())
    }

    fn get_release(&self, full_name: &str, tag_name: &str) -> Result<Release, CorralError> {
        let path = format!("/repos/{full_name}/releases/tags/{tag_name}");
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "get_release",
            full_name,
        )?;
        let release: GithubRelease = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("get_release").with_resource(full_name),
            message: format!("failed to parse release: {e}"),
        })?;
        Ok(release.into_release())
    }

    fn create_release(&self, full_name: &str, draft: &ReleaseDraft) -> Result<Release, CorralError> {
        let path = format!("/repos/{full_name}/releases");
        let body = serde_json::json!({
            "tag_name": draft.tag_name,
            "name": draft.name,
            "body": draft.body,
            "draft": draft.draft,
            "prerelease": draft.prerelease,
        });
        let response = self.send(
            self.request(reqwest::Method::POST, &path, &self.token)
                .json(&body),
            "create_release",
            full_name,
        )?;
        let release: GithubRelease = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("create_release").with_resource(full_name),
            message: format!("failed to parse created release: {e}"),
        })?;
        Ok(release.into_release())
    }

    fn update_release(
        &self,
        full_name: &str,
        release_id: &str,
        draft: &ReleaseDraft,
    ) -> Result<Release, CorralError> {
        let path = format!("/repos/{full_name}/releases/{release_id}");
        let body = serde_json::json!({
            "tag_name": draft.tag_name,
            "name": draft.name,
            "body": draft.body,
            "draft": draft.draft,
            "prerelease": draft.prerelease,
        });
        let response = self.send(
            self.request(reqwest::Method::PATCH, &path, &self.token)
                .json(&body),
            "update_release",
            full_name,
        )?;
        let release: GithubRelease = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("update_release").with_resource(full_name),
            message: format!("failed to parse updated release: {e}"),
        })?;
        Ok(release.into_release())
    }

    fn delete_release(&self, full_name: &str, release_id: &str) -> Result<(), CorralError> {
        let path = format!("/repos/{full_name}/releases/{release_id}");
        self.send(
            self.request(reqwest::Method::DELETE, &path, &self.token),
            "delete_release",
            full_name,
        )?;
        Ok(())
    }

    fn list_release_assets(
        &self,
        full_name: &str,
        release_id: &str,
    ) -> Result<Vec<ReleaseAsset>, CorralError> {
        let path = format!("/repos/{full_name}/releases/{release_id}/assets");
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "list_release_assets",
            full_name,
        )?;
        let assets: Vec<GithubAsset> = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("list_release_assets").with_resource(full_name),
            message: format!("failed to parse asset list: {e}"),
        })?;
        Ok(assets.into_iter().map(GithubAsset::into_asset).collect())
    }

    fn upload_release_asset(
        &self,
        full_name: &str,
        release_id: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<ReleaseAsset, CorralError> {
        let upload_base = self.base_url.replace("api.github.com", "uploads.github.com");
        let path = format!(
            "/repos/{full_name}/releases/{release_id}/assets?name={file_name}"
        );
        let url = format!("{upload_base}{path}");
        let ctx = ErrorContext::new("upload_release_asset").with_resource(full_name);
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", content_type)
            .body(data.to_vec())
            .send()
            .map_err(|e| CorralError::Network {
                ctx: ctx.clone(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(CorralError::from_http_status(ctx, status, body));
        }
        let asset: GithubAsset = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("upload_release_asset").with_resource(full_name),
            message: format!("failed to parse uploaded asset: {e}"),
        })?;
        Ok(asset.into_asset())
    }

    fn download_release_asset(&self, asset: &ReleaseAsset) -> Result<Vec<u8>, CorralError> {
        let ctx = ErrorContext::new("download_release_asset").with_resource(&asset.name);
        let response = self
            .client
            .get(&asset.download_url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/octet-stream")
            .send()
            .map_err(|e| CorralError::Network {
                ctx: ctx.clone(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(CorralError::from_http_status(ctx, status, body));
        }
        response.bytes().map(|b| b.to_vec()).map_err(|e| CorralError::Internal {
            ctx,
            message: format!("failed to read asset body: {e}"),
        })
    }

    fn delete_release_asset(&self, full_name: &str, asset_id: &str) -> Result<(), CorralError> {
        let path = format!("/repos/{full_name}/releases/assets/{asset_id}");
        self.send(
            self.request(reqwest::Method::DELETE, &path, &self.token),
            "delete_release_asset",
            full_name,
        )?;
        Ok(())
    }
}

fn visibility_param(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::All => "all",
        Visibility::Public => "public",
        Visibility::Private => "private",
    }
}

fn passes_filters(repo: &Repository, options: &ListOptions) -> bool {
    if let Some(archived) = options.archived
        && repo.archived != archived
    {
        return false;
    }
    if let Some(fork) = options.fork
        && repo.fork != fork
    {
        return false;
    }
    true
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubRepo {
    id: u64,
    name: String,
    full_name: String,
    owner: GithubOwner,
    clone_url: String,
    ssh_url: String,
    default_branch: String,
    private: bool,
    archived: bool,
    fork: bool,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    stargazers_count: u64,
    updated_at: DateTime<Utc>,
}

impl GithubRepo {
    fn into_repository(self) -> Repository {
        Repository {
            id: self.id.to_string(),
            name: self.name,
            full_name: self.full_name,
            owner: self.owner.login,
            clone_url_https: self.clone_url,
            clone_url_ssh: self.ssh_url,
            default_branch: self.default_branch,
            private: self.private,
            archived: self.archived,
            fork: self.fork,
            language: self.language,
            topics: self.topics,
            stars: self.stargazers_count,
            updated_at: self.updated_at,
            provider_data: Default::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubRateLimitResponse {
    resources: GithubRateLimitResources,
}

#[derive(Debug, Deserialize)]
struct GithubRateLimitResources {
    core: GithubRateLimitCore,
}

#[derive(Debug, Deserialize)]
struct GithubRateLimitCore {
    limit: u32,
    remaining: u32,
    reset: i64,
    used: u32,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    id: u64,
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    draft: bool,
    prerelease: bool,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

impl GithubRelease {
    fn into_release(self) -> Release {
        Release {
            id: self.id.to_string(),
            tag_name: self.tag_name,
            name: self.name,
            body: self.body,
            draft: self.draft,
            prerelease: self.prerelease,
            created_at: self.created_at,
            published_at: self.published_at,
            assets: self.assets.into_iter().map(GithubAsset::into_asset).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    id: u64,
    name: String,
    size: u64,
    browser_download_url: String,
    content_type: Option<String>,
}

impl GithubAsset {
    fn into_asset(self) -> ReleaseAsset {
        ReleaseAsset {
            id: self.id.to_string(),
            name: self.name,
            size: self.size,
            download_url: self.browser_download_url,
            content_type: self.content_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_param_maps_each_variant() {
        assert_eq!(visibility_param(Visibility::All), "all");
        assert_eq!(visibility_param(Visibility::Public), "public");
        assert_eq!(visibility_param(Visibility::Private), "private");
    }

    #[test]
    fn capabilities_include_repositories_and_releases() {
        let provider = GithubProvider::new("token");
        assert!(provider.supports(Capability::Repositories));
        assert!(provider.supports(Capability::Releases));
        assert!(!provider.supports(Capability::MergeRequests));
    }

    #[test]
    fn github_repo_maps_into_domain_repository() {
        let repo = GithubRepo {
            id: 42,
            name: "widgets".into(),
            full_name: "acme/widgets".into(),
            owner: GithubOwner { login: "acme".into() },
            clone_url: "https://github.com/acme/widgets.git".into(),
            ssh_url: "git@github.com:acme/widgets.git".into(),
            default_branch: "main".into(),
            private: false,
            archived: false,
            fork: false,
            language: Some("Rust".into()),
            topics: vec!["cli".into()],
            stargazers_count: 7,
            updated_at: Utc::now(),
        };
        let domain = repo.into_repository();
        assert_eq!(domain.id, "42");
        assert_eq!(domain.full_name, "acme/widgets");
        assert_eq!(domain.stars, 7);
    }

    #[test]
    fn passes_filters_respects_archived_tristate() {
        let base = GithubRepo {
            id: 1,
            name: "a".into(),
            full_name: "acme/a".into(),
            owner: GithubOwner { login: "acme".into() },
            clone_url: "https://github.com/acme/a.git".into(),
            ssh_url: "git@github.com:acme/a.git".into(),
            default_branch: "main".into(),
            private: false,
            archived: true,
            fork: false,
            language: None,
            topics: vec![],
            stargazers_count: 0,
            updated_at: Utc::now(),
        }
        .into_repository();

        let mut options = ListOptions::for_org("acme");
        options.archived = Some(false);
        assert!(!passes_filters(&base, &options));

        options.archived = Some(true);
        assert!(passes_filters(&base, &options));
    }
}
