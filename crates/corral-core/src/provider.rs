//! Provider abstraction (§4.1). Every forge (GitHub, GitLab, Gitea, ...)
//! implements this trait behind its own adapter crate; the engine only
//! ever talks to `dyn Provider`, never a concrete HTTP client.

use corral_types::{
    Capability, Credentials, CorralError, ErrorContext, HealthStatus, ListOptions, RateLimit,
    Release, ReleaseAsset, ReleaseDraft, Repository, RepositoryList, TokenInfo,
};

fn not_supported(operation: &'static str) -> CorralError {
    CorralError::NotSupported {
        ctx: ErrorContext::new(operation),
        message: format!("{operation} is not implemented by this provider"),
    }
}

/// A forge adapter. Implementations are expected to be cheap to clone
/// (an `Arc<reqwest::blocking::Client>` internally) since the engine
/// hands out one `Arc<dyn Provider>` per worker thread.
///
/// Release operations have default bodies that return `NotSupported`
/// rather than being required: `capabilities()` is the single source of
/// truth for what a given adapter can do (§4.1), and most adapters will
/// only override the subset their platform actually exposes.
pub trait Provider: Send + Sync {
    /// Stable identifier used in config files and error context, e.g.
    /// `"github"`.
    fn name(&self) -> &str;

    /// The capability set this adapter actually implements (§4.1
    /// "Capabilities"). The engine consults this before attempting an
    /// operation and fails fast with `NotSupported` rather than letting
    /// the call hit the wire and guess.
    fn capabilities(&self) -> &[Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<TokenInfo, CorralError>;

    /// Cheaper than `authenticate` when the caller only needs to know the
    /// token is live (§4.1 "preflight").
    fn validate_token(&self, credentials: &Credentials) -> Result<TokenInfo, CorralError> {
        self.authenticate(credentials)
    }

    fn list_repositories(&self, options: &ListOptions) -> Result<RepositoryList, CorralError>;

    fn get_repository(&self, full_name: &str) -> Result<Repository, CorralError> {
        let _ = full_name;
        Err(not_supported("get_repository"))
    }

    fn rate_limit(&self) -> Result<RateLimit, CorralError>;

    fn health_check(&self) -> Result<HealthStatus, CorralError>;

    // -- Release ops (§4.1, §4.6 release sync) --------------------------

    fn list_releases(&self, full_name: &str) -> Result<Vec<Release>, CorralError> {
        let _ = full_name;
        Err(not_supported("list_releases"))
    }

    fn get_release(&self, full_name: &str, tag_name: &str) -> Result<Release, CorralError> {
        let _ = (full_name, tag_name);
        Err(not_supported("get_release"))
    }

    fn create_release(&self, full_name: &str, draft: &ReleaseDraft) -> Result<Release, CorralError> {
        let _ = (full_name, draft);
        Err(not_supported("create_release"))
    }

    fn update_release(
        &self,
        full_name: &str,
        release_id: &str,
        draft: &ReleaseDraft,
    ) -> Result<Release, CorralError> {
        let _ = (full_name, release_id, draft);
        Err(not_supported("update_release"))
    }

    fn delete_release(&self, full_name: &str, release_id: &str) -> Result<(), CorralError> {
        let _ = (full_name, release_id);
        Err(not_supported("delete_release"))
    }

    fn list_release_assets(
        &self,
        full_name: &str,
        release_id: &str,
    ) -> Result<Vec<ReleaseAsset>, CorralError> {
        let _ = (full_name, release_id);
        Err(not_supported("list_release_assets"))
    }

    fn upload_release_asset(
        &self,
        full_name: &str,
        release_id: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<ReleaseAsset, CorralError> {
        let _ = (full_name, release_id, file_name, content_type, data);
        Err(not_supported("upload_release_asset"))
    }

    fn download_release_asset(&self, asset: &ReleaseAsset) -> Result<Vec<u8>, CorralError> {
        let _ = asset;
        Err(not_supported("download_release_asset"))
    }

    fn delete_release_asset(&self, full_name: &str, asset_id: &str) -> Result<(), CorralError> {
        let _ = (full_name, asset_id);
        Err(not_supported("delete_release_asset"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_types::{HealthState, RateLimitResource};
    use std::time::Duration;

    struct StubProvider {
        caps: Vec<Capability>,
    }

    impl Provider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn capabilities(&self) -> &[Capability] {
            &self.caps
        }

        fn authenticate(&self, _credentials: &Credentials) -> Result<TokenInfo, CorralError> {
            unimplemented!()
        }

        fn list_repositories(&self, _options: &ListOptions) -> Result<RepositoryList, CorralError> {
            Ok(RepositoryList::default())
        }

        fn rate_limit(&self) -> Result<RateLimit, CorralError> {
            Ok(RateLimit {
                limit: 5000,
                remaining: 4999,
                reset_at: chrono::Utc::now(),
                used: 1,
                resource: RateLimitResource::Core,
            })
        }

        fn health_check(&self) -> Result<HealthStatus, CorralError> {
            Ok(HealthStatus {
                status: HealthState::Healthy,
                latency: Duration::from_millis(10),
                last_checked: chrono::Utc::now(),
                message: None,
            })
        }
    }

    #[test]
    fn supports_reflects_capability_list() {
        let provider = StubProvider {
            caps: vec![Capability::Repositories, Capability::Releases],
        };
        assert!(provider.supports(Capability::Repositories));
        assert!(!provider.supports(Capability::Wiki));
    }

    #[test]
    fn default_release_ops_report_not_supported() {
        let provider = StubProvider {
            caps: vec![Capability::Repositories],
        };
        let err = provider.get_repository("acme/widgets").unwrap_err();
        assert!(matches!(err, CorralError::NotSupported { .. }));
        let err = provider.list_releases("acme/widgets").unwrap_err();
        assert!(matches!(err, CorralError::NotSupported { .. }));
    }
}
