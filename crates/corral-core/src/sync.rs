//! Sync Engine (§4.6). One-way mirroring of selected facets of a
//! repository from a `source_provider:source_target` pair to a
//! `destination_provider:destination_target` pair.
//!
//! Structured the same way the filter & plan builder is: a pure
//! `build_plan` that decides, per enabled feature, whether the run will
//! `create`/`update`/`skip` it (or — for facets with no specified wire
//! contract upstream — mark it `Unsupported`), followed by a separate
//! `SyncEngine::execute` that carries out only the `Create`/`Update`
//! items. Planning never touches the network; only `execute` does.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use corral_types::{CorralError, ErrorContext, ReleaseDraft, SyncFeature, SyncOptions};

use crate::cancel::CancellationToken;
use crate::git;
use crate::provider::Provider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Create,
    Update,
    Skip { reason: String },
    /// Issue/wiki/pull-request/settings sync has no specified wire
    /// contract upstream (§9 Open Question #1); planning always resolves
    /// these to `Unsupported` rather than silently dropping the feature.
    Unsupported { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub feature: SyncFeature,
    pub action: SyncAction,
}

#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub items: Vec<SyncItem>,
}

impl SyncPlan {
    pub fn actionable(&self) -> impl Iterator<Item = &SyncItem> {
        self.items
            .iter()
            .filter(|item| matches!(item.action, SyncAction::Create | SyncAction::Update))
    }
}

/// Decide the `{create, update, skip, unsupported}` action for each
/// feature enabled in `options` (§4.6). `destination_exists` says whether
/// the destination repository already has commits the engine should
/// incrementally update rather than mirror-create from scratch.
/// `source_release_tags`/`existing_release_tags` drive the releases
/// decision: new-only, no-overwrite (§4.6 "release sync").
pub fn build_plan(
    options: &SyncOptions,
    destination_exists: bool,
    source_release_tags: &[String],
    existing_release_tags: &[String],
) -> SyncPlan {
    let items = options
        .features
        .iter()
        .map(|feature| {
            let action = match feature {
                SyncFeature::Code => {
                    if destination_exists {
                        SyncAction::Update
                    } else {
                        SyncAction::Create
                    }
                }
                SyncFeature::Releases => {
                    let has_new_tag = source_release_tags
                        .iter()
                        .any(|tag| !existing_release_tags.contains(tag));
                    if has_new_tag {
                        SyncAction::Create
                    } else {
                        SyncAction::Skip {
                            reason: "no new release tags to copy".into(),
                        }
                    }
                }
                SyncFeature::Issues | SyncFeature::Wiki | SyncFeature::PullRequests | SyncFeature::Settings => {
                    SyncAction::Unsupported {
                        reason: format!(
                            "{feature:?} sync has no specified wire contract; left unimplemented"
                        ),
                    }
                }
            };
            SyncItem {
                feature: *feature,
                action,
            }
        })
        .collect();
    SyncPlan { items }
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub completed: Vec<SyncFeature>,
    pub skipped: Vec<(SyncFeature, String)>,
    pub failed: Vec<(SyncFeature, String)>,
}

/// Carries out the `Create`/`Update` items of a [`SyncPlan`] between a
/// source and a destination provider, which may be different platforms
/// (GitHub -> Gitea, etc.) — the whole point of a forge-agnostic sync.
pub struct SyncEngine {
    source: Arc<dyn Provider>,
    destination: Arc<dyn Provider>,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn Provider>, destination: Arc<dyn Provider>) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn execute(
        &self,
        options: &SyncOptions,
        plan: &SyncPlan,
        workdir: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        for item in &plan.items {
            if cancel.is_cancelled() {
                break;
            }
            match &item.action {
                SyncAction::Skip { reason } => {
                    report.skipped.push((item.feature, reason.clone()));
                    continue;
                }
                SyncAction::Unsupported { reason } => {
                    report.skipped.push((item.feature, reason.clone()));
                    continue;
                }
                SyncAction::Create | SyncAction::Update => {}
            }

            let outcome = match item.feature {
                SyncFeature::Code => self.sync_code(options, workdir, timeout, cancel),
                SyncFeature::Releases => self.sync_releases(options, cancel),
                SyncFeature::Issues
                | SyncFeature::Wiki
                | SyncFeature::PullRequests
                | SyncFeature::Settings => unreachable!(
                    "build_plan never marks {:?} as Create/Update",
                    item.feature
                ),
            };

            match outcome {
                Ok(()) => {
                    tracing::debug!(feature = ?item.feature, "sync feature completed");
                    report.completed.push(item.feature);
                }
                Err(e) => {
                    tracing::warn!(feature = ?item.feature, error = %e, "sync feature failed");
                    report.failed.push((item.feature, e.to_string()));
                }
            }
        }

        report
    }

    /// Mirror-clone the source repository, then push every ref to the
    /// destination (§4.6 "code sync"). If the destination is non-empty
    /// and the first push is rejected as non-fast-forward, retry once
    /// with `--force` — the documented one-shot recovery for a
    /// destination the engine itself provisioned moments earlier.
    fn sync_code(
        &self,
        options: &SyncOptions,
        workdir: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), CorralError> {
        if options.dry_run {
            return Ok(());
        }

        let source_repo = self.source.get_repository(&options.source_target)?;
        let dest_repo = self.destination.get_repository(&options.destination_target)?;

        let source_url = source_repo.clone_url(corral_types::Protocol::Https).to_string();
        let dest_url = dest_repo.clone_url(corral_types::Protocol::Https).to_string();

        let mirror_name = options.source_target.replace('/', "__");
        let mirror_dir = workdir.join(format!("{mirror_name}.git"));

        git::clone_mirror(&source_url, &mirror_dir, timeout, cancel)?;

        let push_result = git::push_mirror(&mirror_dir, &dest_url, false, timeout, cancel);
        let result = match push_result {
            Ok(_) => Ok(()),
            Err(CorralError::GitCommand { message, .. }) if git::is_empty_push_rejection(&message) => {
                git::push_mirror(&mirror_dir, &dest_url, true, timeout, cancel).map(|_| ())
            }
            Err(e) => Err(e),
        };

        let _ = std::fs::remove_dir_all(&mirror_dir);
        result
    }

    /// Copy every source release tag the destination doesn't already
    /// have, new-only with no overwrite, including assets (§4.6 "release
    /// sync"). A release whose underlying tag push already failed is
    /// reported as a failure for this feature too, since there would be
    /// nothing for the release to attach to.
    fn sync_releases(&self, options: &SyncOptions, cancel: &CancellationToken) -> Result<(), CorralError> {
        if options.dry_run {
            return Ok(());
        }

        let source_releases = self.source.list_releases(&options.source_target)?;
        let existing = self
            .destination
            .list_releases(&options.destination_target)?;
        let existing_tags: std::collections::HashSet<_> =
            existing.iter().map(|r| r.tag_name.clone()).collect();

        for release in source_releases.iter().filter(|r| !existing_tags.contains(&r.tag_name)) {
            if cancel.is_cancelled() {
                return Err(CorralError::cancelled(ErrorContext::new("sync_releases")));
            }
            let draft = ReleaseDraft {
                tag_name: release.tag_name.clone(),
                name: release.name.clone(),
                body: release.body.clone(),
                draft: release.draft,
                prerelease: release.prerelease,
            };
            let created = self
                .destination
                .create_release(&options.destination_target, &draft)?;

            for asset in &release.assets {
                let bytes = self.source.download_release_asset(asset)?;
                self.destination.upload_release_asset(
                    &options.destination_target,
                    &created.id,
                    &asset.name,
                    asset.content_type.as_deref().unwrap_or("application/octet-stream"),
                    &bytes,
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_types::{Capability, Credentials, HealthState, HealthStatus, ListOptions, RateLimit, RateLimitResource, Release, Repository, RepositoryList, TokenInfo};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn options(features: Vec<SyncFeature>) -> SyncOptions {
        SyncOptions {
            source_provider: "github".into(),
            source_target: "acme/widgets".into(),
            destination_provider: "gitea".into(),
            destination_target: "mirror/widgets".into(),
            features,
            dry_run: false,
        }
    }

    #[test]
    fn build_plan_marks_issues_and_wiki_unsupported() {
        let opts = options(vec![SyncFeature::Code, SyncFeature::Issues, SyncFeature::Wiki]);
        let plan = build_plan(&opts, false, &[], &[]);
        let issues = plan
            .items
            .iter()
            .find(|i| i.feature == SyncFeature::Issues)
            .unwrap();
        assert!(matches!(issues.action, SyncAction::Unsupported { .. }));
        let wiki = plan
            .items
            .iter()
            .find(|i| i.feature == SyncFeature::Wiki)
            .unwrap();
        assert!(matches!(wiki.action, SyncAction::Unsupported { .. }));
    }

    #[test]
    fn build_plan_code_create_vs_update() {
        let opts = options(vec![SyncFeature::Code]);
        let fresh = build_plan(&opts, false, &[], &[]);
        assert_eq!(fresh.items[0].action, SyncAction::Create);
        let existing = build_plan(&opts, true, &[], &[]);
        assert_eq!(existing.items[0].action, SyncAction::Update);
    }

    #[test]
    fn build_plan_releases_skips_when_no_new_tags() {
        let opts = options(vec![SyncFeature::Releases]);
        let tags = vec!["v1.0.0".to_string()];
        let plan = build_plan(&opts, true, &tags, &tags);
        assert!(matches!(plan.items[0].action, SyncAction::Skip { .. }));
    }

    #[test]
    fn build_plan_releases_creates_when_new_tag_present() {
        let opts = options(vec![SyncFeature::Releases]);
        let source_tags = vec!["v1.0.0".to_string(), "v2.0.0".to_string()];
        let existing_tags = vec!["v1.0.0".to_string()];
        let plan = build_plan(&opts, true, &source_tags, &existing_tags);
        assert_eq!(plan.items[0].action, SyncAction::Create);
    }

    #[test]
    fn actionable_filters_out_skipped_and_unsupported() {
        let opts = options(vec![SyncFeature::Code, SyncFeature::Wiki, SyncFeature::Releases]);
        let plan = build_plan(&opts, false, &[], &["v1".to_string()]);
        let actionable: Vec<_> = plan.actionable().map(|i| i.feature).collect();
        assert_eq!(actionable, vec![SyncFeature::Code]);
    }

    struct FakeProvider {
        name: &'static str,
        repo: Repository,
        releases: Mutex<Vec<Release>>,
    }

    fn fake_repo(full_name: &str) -> Repository {
        Repository {
            id: full_name.into(),
            name: full_name.split('/').next_back().unwrap().into(),
            full_name: full_name.into(),
            owner: full_name.split('/').next().unwrap().into(),
            clone_url_https: format!("https://example.com/{full_name}.git"),
            clone_url_ssh: format!("git@example.com:{full_name}.git"),
            default_branch: "main".into(),
            private: false,
            archived: false,
            fork: false,
            language: None,
            topics: vec![],
            stars: 0,
            updated_at: chrono::Utc::now(),
            provider_data: BTreeMap::new(),
        }
    }

    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> &[Capability] {
            &[Capability::Repositories, Capability::Releases]
        }

        fn authenticate(&self, _credentials: &Credentials) -> Result<TokenInfo, CorralError> {
            unimplemented!()
        }

        fn list_repositories(&self, _options: &ListOptions) -> Result<RepositoryList, CorralError> {
            Ok(RepositoryList::default())
        }

        fn get_repository(&self, full_name: &str) -> Result<Repository, CorralError> {
            let _ = full_name;
            Ok(self.repo.clone())
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
                latency: Duration::from_millis(5),
                last_checked: chrono::Utc::now(),
                message: None,
            })
        }

        fn list_releases(&self, _full_name: &str) -> Result<Vec<Release>, CorralError> {
            Ok(self.releases.lock().unwrap().clone())
        }

        fn create_release(
            &self,
            _full_name: &str,
            draft: &ReleaseDraft,
        ) -> Result<Release, CorralError> {
            let release = Release {
                id: format!("id-{}", draft.tag_name),
                tag_name: draft.tag_name.clone(),
                name: draft.name.clone(),
                body: draft.body.clone(),
                draft: draft.draft,
                prerelease: draft.prerelease,
                created_at: chrono::Utc::now(),
                published_at: None,
                assets: vec![],
            };
            self.releases.lock().unwrap().push(release.clone());
            Ok(release)
        }
    }

    #[test]
    fn sync_releases_copies_only_missing_tags() {
        let source = Arc::new(FakeProvider {
            name: "github",
            repo: fake_repo("acme/widgets"),
            releases: Mutex::new(vec![Release {
                id: "1".into(),
                tag_name: "v1.0.0".into(),
                name: Some("v1.0.0".into()),
                body: None,
                draft: false,
                prerelease: false,
                created_at: chrono::Utc::now(),
                published_at: None,
                assets: vec![],
            }]),
        });
        let destination = Arc::new(FakeProvider {
            name: "gitea",
            repo: fake_repo("mirror/widgets"),
            releases: Mutex::new(vec![]),
        });
        let engine = SyncEngine::new(source.clone(), destination.clone());
        let cancel = CancellationToken::new();
        engine
            .sync_releases(&options(vec![SyncFeature::Releases]), &cancel)
            .expect("release sync ok");
        assert_eq!(destination.releases.lock().unwrap().len(), 1);
        assert_eq!(destination.releases.lock().unwrap()[0].tag_name, "v1.0.0");
    }
}
