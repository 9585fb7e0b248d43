//! GitLab adapter (§4.1, §5 "GitLab"). Talks to the REST v4 API; shares
//! the blocking-client + status-code-matching idiom used by the GitHub
//! adapter, adjusted for GitLab's group/project vocabulary.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use corral_core::Provider;
use corral_types::{
    Capability, Credentials, CorralError, ErrorContext, HealthState, HealthStatus, ListOptions,
    RateLimit, RateLimitResource, Release, ReleaseAsset, ReleaseDraft, Repository, RepositoryList,
    TokenInfo, Visibility,
};
use serde::Deserialize;

pub const DEFAULT_API_BASE: &str = "https://gitlab.com/api/v4";
const USER_AGENT: &str = concat!("corral/", env!("CARGO_PKG_VERSION"));

/// GitLab REST adapter. `org` in [`ListOptions`] is treated as a group
/// path (e.g. `"acme/platform"`), matching how GitLab nests subgroups.
pub struct GitlabProvider {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl GitlabProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    /// For self-managed instances, whose API lives at `https://<host>/api/v4`.
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
        self.client.request(method, url).header("PRIVATE-TOKEN", token)
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
        let limit = get("ratelimit-limit")? as u32;
        let remaining = get("ratelimit-remaining")? as u32;
        let reset = get("ratelimit-reset")?;
        Some(RateLimit {
            limit,
            remaining,
            reset_at: DateTime::from_timestamp(reset, 0).unwrap_or_else(Utc::now),
            used: limit.saturating_sub(remaining),
            resource: RateLimitResource::Core,
        })
    }
}

fn encode_path(path: &str) -> String {
    // GitLab's "namespaced path" identifiers must be percent-encoded as a
    // single path segment (including the slashes inside them).
    path.replace('/', "%2F")
}

impl Provider for GitlabProvider {
    fn name(&self) -> &str {
        "gitlab"
    }

    fn capabilities(&self) -> &[Capability] {
        &[
            Capability::Repositories,
            Capability::Organizations,
            Capability::Releases,
            Capability::Issues,
            Capability::MergeRequests,
            Capability::Wiki,
            Capability::Events,
            Capability::Projects,
        ]
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<TokenInfo, CorralError> {
        let response = self.send(
            self.request(reqwest::Method::GET, "/user", &credentials.secret),
            "authenticate",
            "gitlab:/user",
        )?;
        let rate_limit = Self::rate_limit_from_headers(&response);
        let user: GitlabUser = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("authenticate"),
            message: format!("failed to parse /user response: {e}"),
        })?;
        Ok(TokenInfo {
            valid: true,
            scopes: Vec::new(),
            user: Some(user.username),
            expires_at: None,
            rate_limit,
        })
    }

    fn list_repositories(&self, options: &ListOptions) -> Result<RepositoryList, CorralError> {
        let path = format!(
            "/groups/{}/projects?include_subgroups=true&visibility={}&page={}&per_page={}",
            encode_path(&options.org),
            visibility_param(options.visibility),
            options.page,
            options.per_page,
        );
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "list_repositories",
            &options.org,
        )?;
        let next_page = response
            .headers()
            .get("x-next-page")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|s| !s.is_empty());
        let projects: Vec<GitlabProject> = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("list_repositories").with_resource(&options.org),
            message: format!("failed to parse project list: {e}"),
        })?;

        let repositories = projects
            .into_iter()
            .map(GitlabProject::into_repository)
            .filter(|r| passes_filters(r, options))
            .collect();

        Ok(RepositoryList {
            repositories,
            has_more: next_page.is_some(),
        })
    }

    fn get_repository(&self, full_name: &str) -> Result<Repository, CorralError> {
        let path = format!("/projects/{}", encode_path(full_name));
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "get_repository",
            full_name,
        )?;
        let project: GitlabProject = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("get_repository").with_resource(full_name),
            message: format!("failed to parse project: {e}"),
        })?;
        Ok(project.into_repository())
    }

    fn rate_limit(&self) -> Result<RateLimit, CorralError> {
        let response = self.send(
            self.request(reqwest::Method::GET, "/user", &self.token),
            "rate_limit",
            "gitlab:/user",
        )?;
        Self::rate_limit_from_headers(&response).ok_or_else(|| CorralError::Internal {
            ctx: ErrorContext::new("rate_limit"),
            message: "GitLab did not return RateLimit-* headers".into(),
        })
    }

    fn health_check(&self) -> Result<HealthStatus, CorralError> {
        let started = Instant::now();
        let result = self.send(
            self.request(reqwest::Method::GET, "/version", &self.token),
            "health_check",
            "gitlab:/version",
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
        let path = format!("/projects/{}/releases", encode_path(full_name));
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "list_releases",
            full_name,
        )?;
        let releases: Vec<GitlabRelease> = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("list_releases").with_resource(full_name),
            message: format!("failed to parse release list: {e}"),
        })?;
        Ok(releases.into_iter().map(GitlabRelease::into_release).collect())
    }

    fn get_release(&self, full_name: &str, tag_name: &str) -> Result<Release, CorralError> {
        let path = format!("/projects/{}/releases/{tag_name}", encode_path(full_name));
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "get_release",
            full_name,
        )?;
        let release: GitlabRelease = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("get_release").with_resource(full_name),
            message: format!("failed to parse release: {e}"),
        })?;
        Ok(release.into_release())
    }

    fn create_release(&self, full_name: &str, draft: &ReleaseDraft) -> Result<Release, CorralError> {
        let path = format!("/projects/{}/releases", encode_path(full_name));
        let body = serde_json::json!({
            "tag_name": draft.tag_name,
            "name": draft.name,
            "description": draft.body,
        });
        let response = self.send(
            self.request(reqwest::Method::POST, &path, &self.token)
                .json(&body),
            "create_release",
            full_name,
        )?;
        let release: GitlabRelease = response.json().map_err(|e| CorralError::Internal {
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
        // GitLab addresses releases by tag name rather than a numeric id;
        // `release_id` is expected to be the tag.
        let path = format!("/projects/{}/releases/{release_id}", encode_path(full_name));
        let body = serde_json::json!({
            "name": draft.name,
            "description": draft.body,
        });
        let response = self.send(
            self.request(reqwest::Method::PUT, &path, &self.token)
                .json(&body),
            "update_release",
            full_name,
        )?;
        let release: GitlabRelease = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("update_release").with_resource(full_name),
            message: format!("failed to parse updated release: {e}"),
        })?;
        Ok(release.into_release())
    }

    fn delete_release(&self, full_name: &str, release_id: &str) -> Result<(), CorralError> {
        let path = format!("/projects/{}/releases/{release_id}", encode_path(full_name));
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
        let path = format!("/projects/{}/releases/{release_id}", encode_path(full_name));
        let response = self.send(
            self.request(reqwest::Method::GET, &path, &self.token),
            "list_release_assets",
            full_name,
        )?;
        let release: GitlabRelease = response.json().map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("list_release_assets").with_resource(full_name),
            message: format!("failed to parse release: {e}"),
        })?;
        Ok(release.into_release().assets)
    }

    /// GitLab has no binary release-asset upload endpoint; this uploads
    /// the file to the project's generic upload bucket and registers the
    /// resulting URL as a release link, which is the closest equivalent
    /// this platform exposes.
    fn upload_release_asset(
        &self,
        full_name: &str,
        release_id: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<ReleaseAsset, CorralError> {
        let ctx = ErrorContext::new("upload_release_asset").with_resource(full_name);
        let upload_path = format!("/projects/{}/uploads", encode_path(full_name));
        let url = format!("{}{}", self.base_url, upload_path);
        let part = reqwest::blocking::multipart::Part::bytes(data.to_vec())
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| CorralError::Internal {
                ctx: ctx.clone(),
                message: format!("invalid content type: {e}"),
            })?;
        let form = reqwest::blocking::multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(url)
            .header("PRIVATE-TOKEN", &self.token)
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
        let uploaded: GitlabUpload = response.json().map_err(|e| CorralError::Internal {
            ctx: ctx.clone(),
            message: format!("failed to parse upload response: {e}"),
        })?;
        let asset_url = format!("{}{}", self.base_url.replace("/api/v4", ""), uploaded.url);

        let link_path = format!(
            "/projects/{}/releases/{release_id}/assets/links",
            encode_path(full_name)
        );
        let link_body = serde_json::json!({ "name": file_name, "url": asset_url });
        let link_response = self.send(
            self.request(reqwest::Method::POST, &link_path, &self.token)
                .json(&link_body),
            "upload_release_asset",
            full_name,
        )?;
        let link: GitlabReleaseLink = link_response.json().map_err(|e| CorralError::Internal {
            ctx,
            message: format!("failed to parse release link: {e}"),
        })?;
        Ok(ReleaseAsset {
            id: link.id.to_string(),
            name: link.name,
            size: data.len() as u64,
            download_url: link.url,
            content_type: Some(content_type.to_string()),
        })
    }

    fn download_release_asset(&self, asset: &ReleaseAsset) -> Result<Vec<u8>, CorralError> {
        let ctx = ErrorContext::new("download_release_asset").with_resource(&asset.name);
        let response = self
            .client
            .get(&asset.download_url)
            .header("PRIVATE-TOKEN", &self.token)
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
        // `asset_id` here is the release-link id created by `upload_release_asset`,
        // but GitLab's link API is scoped by tag rather than project-wide, so a
        // caller must route deletes through the release that owns the link.
        let _ = (full_name, asset_id);
        Err(CorralError::NotSupported {
            ctx: ErrorContext::new("delete_release_asset").with_resource(full_name),
            message: "deleting a release link requires its owning tag; call delete_release instead".into(),
        })
    }
}

fn visibility_param(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::All => "",
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
struct GitlabUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct GitlabProject {
    id: u64,
    name: String,
    path_with_namespace: String,
    namespace: GitlabNamespace,
    http_url_to_repo: String,
    ssh_url_to_repo: String,
    #[serde(default)]
    default_branch: Option<String>,
    visibility: String,
    archived: bool,
    #[serde(default)]
    forked_from_project: Option<serde_json::Value>,
    #[serde(default)]
    topics: Vec<String>,
    star_count: u64,
    last_activity_at: DateTime<Utc>,
}

impl GitlabProject {
    fn into_repository(self) -> Repository {
        Repository {
            id: self.id.to_string(),
            name: self.name,
            full_name: self.path_with_namespace,
            owner: self.namespace.path,
            clone_url_https: self.http_url_to_repo,
            clone_url_ssh: self.ssh_url_to_repo,
            default_branch: self.default_branch.unwrap_or_else(|| "main".to_string()),
            private: self.visibility == "private",
            archived: self.archived,
            fork: self.forked_from_project.is_some(),
            language: None,
            topics: self.topics,
            stars: self.star_count,
            updated_at: self.last_activity_at,
            provider_data: Default::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitlabNamespace {
    path: String,
}

#[derive(Debug, Deserialize)]
struct GitlabRelease {
    tag_name: String,
    name: Option<String>,
    description: Option<String>,
    created_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: GitlabReleaseAssets,
}

impl GitlabRelease {
    fn into_release(self) -> Release {
        Release {
            id: self.tag_name.clone(),
            tag_name: self.tag_name,
            name: self.name,
            body: self.description,
            draft: false,
            prerelease: false,
            created_at: self.created_at,
            published_at: self.released_at,
            assets: self
                .assets
                .links
                .into_iter()
                .map(|l| ReleaseAsset {
                    id: l.id.to_string(),
                    name: l.name,
                    size: 0,
                    download_url: l.url,
                    content_type: None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GitlabReleaseAssets {
    #[serde(default)]
    links: Vec<GitlabReleaseLink>,
}

#[derive(Debug, Deserialize)]
struct GitlabReleaseLink {
    id: u64,
    name: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GitlabUpload {
    url: String,
}
