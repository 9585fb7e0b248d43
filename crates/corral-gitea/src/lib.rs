//! Gitea adapter (§4.1, §5 "Gitea"). Gitea's REST v1 API mirrors
//! GitHub's shape closely enough that this adapter reuses the same
//! blocking-client idiom with Gitea's token header and endpoints.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use corral_core::Provider;
use corral_types::{
    Capability, Credentials, CorralError, ErrorContext, HealthState, HealthStatus, ListOptions,
    RateLimit, RateLimitResource, Release, ReleaseAsset, ReleaseDraft, Repository, RepositoryList,
    TokenInfo, Visibility,
};
use serde::Deserialize;

pub const DEFAULT_API_BASE: &str = "https://gitea.com/api/v1";
const USER_AGENT: &str = concat!("corral/", env!("CARGO_PKG_VERSION"));

/// Gitea REST adapter, also compatible with Forgejo instances that keep
/// the same `/api/v1` surface.
pub struct GiteaProvider {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl GiteaProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    /// For a self-hosted instance, whose API lives at `https://<host>/api/v1`.
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
            .header("Authorization", format!("token {token}"))
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
}

impl Provider for GiteaProvider {
    fn name(&self) -> &str {
        "gitea"
    }

    fn capabilities(&self) -> &[Capability] {
        &[
            Capability::Repositories,
            Capability::Organizations,
            Capability::Releases,
            Capability::Issues,
            Capability::PullRequests,
            Capability::Wiki,
            Capability::Webhooks,
        ]
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<TokenInfo, CorralError> {
        let response = self.send(
            self.request(reqwest::Method::GET, "/user", &credentials.secret),
            "authenticate",
            "gitea:/user",
        )?;
        let user: GiteaUser = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("authenticate"),
            message: format!("failed to parse /user response: {e}"),
        })?;
        Ok(TokenInfo {
            valid: true,
            scopes: Vec::new(),
            user: Some(user.login),
            expires_at: None,
            rate_limit: None,
        })
    }

    fn list_repositories(&self, options: &ListOptions) -> Result<RepositoryList, CorralError> {
        let path = format!(
            "/orgs/{}/repos?page={}&limit={}",
            options.org, options.page, options.per_page,
        );
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "list_repositories",
            &options.org,
        )?;
        let repos: Vec<GiteaRepo> = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("list_repositories").with_resource(&options.org),
            message: format!("failed to parse repository list: {e}"),
        })?;

        let has_more = repos.len() as u32 >= options.per_page;
        let repositories = repos
            .into_iter()
            .map(GiteaRepo::into_repository)
            .filter(|r| passes_filters(r, options))
            .collect();

        Ok(RepositoryList {
            repositories,
            has_more,
        })
    }

    fn get_repository(&self, full_name: &str) -> Result<Repository, CorralError> {
        let path = format!("/repos/{full_name}");
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "get_repository",
            full_name,
        )?;
        let repo: GiteaRepo = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("get_repository").with_resource(full_name),
            message: format!("failed to parse repository: {e}"),
        })?;
        Ok(repo.into_repository())
    }

    /// Gitea does not expose a rate-limit endpoint by default; this
    /// reports a synthetic "not currently constrained" value rather than
    /// `NotSupported`, since the engine's rate limiter needs a number to
    /// throttle against (§4.4 "optimizer composition").
    fn rate_limit(&self) -> Result<RateLimit, CorralError> {
        Ok(RateLimit {
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_at: Utc::now(),
            used: 0,
            resource: RateLimitResource::Core,
        })
    }

    fn health_check(&self) -> Result<HealthStatus, CorralError> {
        let started = Instant::now();
        let result = self.send(
            self.request(reqwest::Method::GET, "/version", &self.token),
            "health_check",
            "gitea:/version",
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
        let releases: Vec<GiteaRelease> = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("list_releases").with_resource(full_name),
            message: format!("failed to parse release list: {e}"),
        })?;
        Ok(releases.into_iter().map(GiteaRelease::into_release).collect())
    }

    fn get_release(&self, full_name: &str, tag_name: &str) -> Result<Release, CorralError> {
        let path = format!("/repos/{full_name}/releases/tags/{tag_name}");
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "get_release",
            full_name,
        )?;
        let release: GiteaRelease = response.json().map_err(|e| CorralError::Internal {
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
        let release: GiteaRelease = response.json().map_err(|e| CorralError::Internal {
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
        let release: GiteaRelease = response.json().map_err(|e| CorralError::Internal {
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
        let assets: Vec<GiteaAsset> = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("list_release_assets").with_resource(full_name),
            message: format!("failed to parse asset list: {e}"),
        })?;
        Ok(assets.into_iter().map(GiteaAsset::into_asset).collect())
    }

    fn upload_release_asset(
        &self,
        full_name: &str,
        release_id: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<ReleaseAsset, CorralError> {
        let ctx = ErrorContext::new("upload_release_asset").with_resource(full_name);
        let path = format!("/repos/{full_name}/releases/{release_id}/assets?name={file_name}");
        let url = format!("{}{}", self.base_url, path);
        let part = reqwest::blocking::multipart::Part::bytes(data.to_vec())
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| CorralError::Internal {
                ctx: ctx.clone(),
                message: format!("invalid content type: {e}"),
            })?;
        let form = reqwest::blocking::multipart::Form::new().part("attachment", part);
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("token {}", self.token))
            .multipart(form)
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
        let asset: GiteaAsset = response.json().map_err(|e| CorralError::Internal {
            ctx,
            message: format!("failed to parse uploaded asset: {e}"),
        })?;
        Ok(asset.into_asset())
    }

    fn download_release_asset(&self, asset: &ReleaseAsset) -> Result<Vec<u8>, CorralError> {
        let ctx = ErrorContext::new("download_release_asset").with_resource(&asset.name);
        let response = self
            .client
            .get(&asset.download_url)
            .header("Authorization", format!("token {}", self.token))
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
    if options.visibility == Visibility::Private && !repo.private {
        return false;
    }
    if options.visibility == Visibility::Public && repo.private {
        return false;
    }
    true
}

#[derive(Debug, Deserialize)]
struct GiteaUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GiteaRepo {
    id: u64,
    name: String,
    full_name: String,
    owner: GiteaOwner,
    clone_url: String,
    ssh_url: String,
    default_branch: String,
    private: bool,
    archived: bool,
    fork: bool,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    stars_count: u64,
    updated_at: DateTime<Utc>,
}

impl GiteaRepo {
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
            stars: self.stars_count,
            updated_at: self.updated_at,
            provider_data: Default::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GiteaOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GiteaRelease {
    id: u64,
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    draft: bool,
    prerelease: bool,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GiteaAsset>,
}

impl GiteaRelease {
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
            assets: self.assets.into_iter().map(GiteaAsset::into_asset).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GiteaAsset {
    id: u64,
    name: String,
    size: u64,
    browser_download_url: String,
    #[serde(default)]
    content_type: Option<String>,
}

impl GiteaAsset {
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
    fn capabilities_exclude_merge_requests() {
        let provider = GiteaProvider::new("token");
        assert!(provider.supports(Capability::PullRequests));
        assert!(!provider.supports(Capability::MergeRequests));
    }

    #[test]
    fn passes_filters_respects_visibility() {
        let repo = GiteaRepo {
            id: 1,
            name: "a".into(),
            full_name: "acme/a".into(),
            owner: GiteaOwner { login: "acme".into() },
            clone_url: "https://gitea.example/acme/a.git".into(),
            ssh_url: "git@gitea.example:acme/a.git".into(),
            default_branch: "main".into(),
            private: true,
            archived: false,
            fork: false,
            language: None,
            topics: vec![],
            stars_count: 0,
            updated_at: Utc::now(),
        }
        .into_repository();

        let mut options = ListOptions::for_org("acme");
        options.visibility = Visibility::Public;
        assert!(!passes_filters(&repo, &options));

        options.visibility = Visibility::Private;
        assert!(passes_filters(&repo, &options));
    }

    #[test]
    fn rate_limit_reports_unconstrained_synthetic_value() {
        let provider = GiteaProvider::new("token");
        let limit = provider.rate_limit().expect("synthetic rate limit");
        assert_eq!(limit.remaining, u32::MAX);
    }
}
