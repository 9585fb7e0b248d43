//! Deduplicating provider decorator (§4.5: "every outbound platform API
//! call flows through a shared per-service optimizer"). Wraps any
//! `Arc<dyn Provider>` so that repeated `get_repository` lookups for the
//! same `full_name` collapse through one in-flight call the way §8
//! Scenario F requires for `get_default_branch`-shaped lookups (this
//! provider contract exposes that through `get_repository` rather than a
//! dedicated endpoint, since no adapter implements a narrower one).
//! List/release/mutating operations pass straight through: they are
//! either paginated (no stable per-call key) or intentionally
//! non-idempotent, so deduplicating them would be incorrect rather than
//! an optimization.

use std::sync::Arc;
use std::time::Duration;

use corral_types::{
    Capability, Credentials, CorralError, ErrorContext, HealthStatus, ListOptions, RateLimit,
    Release, ReleaseAsset, ReleaseDraft, Repository, RepositoryList, TokenInfo,
};

use crate::optimizer::{ApiOptimizer, ApiOptimizerMetrics};
use crate::provider::Provider;

/// Matches the deduplicator's documented default TTL (§4.5 "cached for a
/// TTL (default 5 minutes)").
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(300);

type CachedRepoResult = Result<Repository, String>;

/// A `Provider` that deduplicates concurrent `get_repository` calls for
/// the same key behind the shared [`ApiOptimizer`] (rate limit wait,
/// then dedup, per §4.5 "Execution order").
pub struct CachingProvider {
    inner: Arc<dyn Provider>,
    optimizer: ApiOptimizer<CachedRepoResult>,
}

impl CachingProvider {
    pub fn new(inner: Arc<dyn Provider>, rate_limit: u32) -> Self {
        Self::with_ttl(inner, rate_limit, DEFAULT_DEDUP_TTL)
    }

    pub fn with_ttl(inner: Arc<dyn Provider>, rate_limit: u32, ttl: Duration) -> Self {
        Self {
            inner,
            optimizer: ApiOptimizer::new(rate_limit, ttl),
        }
    }

    fn key(&self, full_name: &str) -> String {
        format!("{}:get_repository:{full_name}", self.inner.name())
    }

    /// Observed dedup/rate-limit counters, surfaced by the CLI's `doctor`
    /// and `json`-format summaries (§4.5 metrics: `total_requests`,
    /// `deduplicated_calls`, `cache_hits`, `cache_misses`, `time_saved`).
    pub fn metrics(&self) -> ApiOptimizerMetrics {
        self.optimizer.metrics()
    }

    /// Bypass the cache for one key, forcing the next lookup to hit the
    /// wire (§4.5 "`forget(key)` removes both the cache entry and the
    /// in-flight marker").
    pub fn forget(&self, full_name: &str) {
        self.optimizer.forget(&self.key(full_name));
    }

    /// Globally disable rate-limit wait + dedup (§4.5 "can be globally
    /// disabled for debugging"), used by the CLI's `--no-optimizer` flag.
    pub fn set_optimizer_enabled(&self, enabled: bool) {
        self.optimizer.set_enabled(enabled);
    }

    pub fn observe_rate_limit(&self, snapshot: &RateLimit) {
        self.optimizer.rate_limiter.observe(snapshot);
    }
}

impl Provider for CachingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> &[Capability] {
        self.inner.capabilities()
    }

    fn authenticate(&self, credentials: &Credentials) -> Result<TokenInfo, CorralError> {
        self.inner.authenticate(credentials)
    }

    fn validate_token(&self, credentials: &Credentials) -> Result<TokenInfo, CorralError> {
        self.inner.validate_token(credentials)
    }

    fn list_repositories(&self, options: &ListOptions) -> Result<RepositoryList, CorralError> {
        self.inner.list_repositories(options)
    }

    fn get_repository(&self, full_name: &str) -> Result<Repository, CorralError> {
        let key = self.key(full_name);
        let inner = Arc::clone(&self.inner);
        let full_name_owned = full_name.to_string();
        let result = self
            .optimizer
            .execute(&key, move || inner.get_repository(&full_name_owned).map_err(|e| e.to_string()));
        result.map_err(|message| CorralError::Unknown {
            ctx: ErrorContext::new("get_repository")
                .with_provider(self.inner.name())
                .with_resource(full_name),
            message,
        })
    }

    fn rate_limit(&self) -> Result<RateLimit, CorralError> {
        let snapshot = self.inner.rate_limit()?;
        self.observe_rate_limit(&snapshot);
        Ok(snapshot)
    }

    fn health_check(&self) -> Result<HealthStatus, CorralError> {
        self.inner.health_check()
    }

    fn list_releases(&self, full_name: &str) -> Result<Vec<Release>, CorralError> {
        self.inner.list_releases(full_name)
    }

    fn get_release(&self, full_name: &str, tag_name: &str) -> Result<Release, CorralError> {
        self.inner.get_release(full_name, tag_name)
    }

    fn create_release(&self, full_name: &str, draft: &ReleaseDraft) -> Result<Release, CorralError> {
        self.inner.create_release(full_name, draft)
    }

    fn update_release(
        &self,
        full_name: &str,
        release_id: &str,
        draft: &ReleaseDraft,
    ) -> Result<Release, CorralError> {
        self.inner.update_release(full_name, release_id, draft)
    }

    fn delete_release(&self, full_name: &str, release_id: &str) -> Result<(), CorralError> {
        self.inner.delete_release(full_name, release_id)
    }

    fn list_release_assets(
        &self,
        full_name: &str,
        release_id: &str,
    ) -> Result<Vec<ReleaseAsset>, CorralError> {
        self.inner.list_release_assets(full_name, release_id)
    }

    fn upload_release_asset(
        &self,
        full_name: &str,
        release_id: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<ReleaseAsset, CorralError> {
        self.inner
            .upload_release_asset(full_name, release_id, file_name, content_type, data)
    }

    fn download_release_asset(&self, asset: &ReleaseAsset) -> Result<Vec<u8>, CorralError> {
        self.inner.download_release_asset(asset)
    }

    fn delete_release_asset(&self, full_name: &str, asset_id: &str) -> Result<(), CorralError> {
        self.inner.delete_release_asset(full_name, asset_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_types::{HealthState, RateLimitResource};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;
    use std::time::Duration as StdDuration;

    struct CountingProvider {
        calls: AtomicU32,
    }

    impl Provider for CountingProvider {
        fn name(&self) -> &str {
            "stub"
        }
        fn capabilities(&self) -> &[Capability] {
            &[Capability::Repositories]
        }
        fn authenticate(&self, _credentials: &Credentials) -> Result<TokenInfo, CorralError> {
            unimplemented!()
        }
        fn list_repositories(&self, _options: &ListOptions) -> Result<RepositoryList, CorralError> {
            Ok(RepositoryList::default())
        }
        fn get_repository(&self, full_name: &str) -> Result<Repository, CorralError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(StdDuration::from_millis(20));
            Ok(Repository {
                id: full_name.to_string(),
                name: full_name.to_string(),
                full_name: full_name.to_string(),
                owner: "acme".into(),
                clone_url_https: String::new(),
                clone_url_ssh: String::new(),
                default_branch: "main".into(),
                private: false,
                archived: false,
                fork: false,
                language: None,
                topics: vec![],
                stars: 0,
                updated_at: chrono::Utc::now(),
                provider_data: Default::default(),
            })
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
                latency: StdDuration::from_millis(1),
                last_checked: chrono::Utc::now(),
                message: None,
            })
        }
    }

    /// §8 property 5 / Scenario F: N concurrent callers requesting the
    /// same repository collapse into one underlying call and all observe
    /// the same result.
    #[test]
    fn concurrent_get_repository_calls_collapse_to_one_invocation() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
        });
        let caching = Arc::new(CachingProvider::new(inner.clone(), 1000));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let caching = Arc::clone(&caching);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    caching.get_repository("acme/widgets").unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|r| r.full_name == "acme/widgets"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        let metrics = caching.metrics();
        assert!(metrics.deduplicated_calls >= 1);
    }

    #[test]
    fn forget_forces_a_fresh_call() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
        });
        let caching = CachingProvider::new(inner.clone(), 1000);

        caching.get_repository("acme/widgets").unwrap();
        caching.forget("acme/widgets");
        caching.get_repository("acme/widgets").unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disabling_the_optimizer_bypasses_dedup() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
        });
        let caching = CachingProvider::new(inner.clone(), 1000);
        caching.set_optimizer_enabled(false);

        caching.get_repository("acme/widgets").unwrap();
        caching.get_repository("acme/widgets").unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
