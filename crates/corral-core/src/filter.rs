//! Filter & Plan Builder (§4.2). Applies the frozen [`CloneOptions`]
//! filters to a raw repository list and produces a stably-ordered plan:
//! select candidates, apply exclusion rules, emit a deterministic order.

use corral_types::{CloneOptions, Repository};

/// One repository the engine will act on, paired with the local path it
/// will be cloned into.
#[derive(Debug, Clone)]
pub struct PlannedRepository {
    pub repository: Repository,
    pub target_path: std::path::PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub repositories: Vec<PlannedRepository>,
    pub skipped: Vec<SkippedRepository>,
}

#[derive(Debug, Clone)]
pub struct SkippedRepository {
    pub full_name: String,
    pub reason: String,
}

/// Build a plan from a raw repository listing and the validated options.
/// Filtering order follows §4.2: visibility/archived/fork first (cheap
/// boolean checks), then language/topics/stars/updated_since, then the
/// match/exclude regexes last since they're the most expensive check.
/// The surviving set is sorted by `full_name` for a stable, reproducible
/// plan (§8 "stable ordering").
pub fn build_plan(repositories: Vec<Repository>, options: &CloneOptions) -> Plan {
    let mut plan = Plan::default();

    for repo in repositories {
        if let Some(reason) = exclusion_reason(&repo, options) {
            plan.skipped.push(SkippedRepository {
                full_name: repo.full_name,
                reason,
            });
            continue;
        }

        let target_path = options.target_root.join(&repo.name);
        plan.repositories.push(PlannedRepository {
            repository: repo,
            target_path,
        });
    }

    plan.repositories
        .sort_by(|a, b| a.repository.full_name.cmp(&b.repository.full_name));
    plan.skipped.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    plan
}

fn exclusion_reason(repo: &Repository, options: &CloneOptions) -> Option<String> {
    use corral_types::Visibility;

    match options.visibility {
        Visibility::Public if repo.private => return Some("visibility=public, repo is private".into()),
        Visibility::Private if !repo.private => {
            return Some("visibility=private, repo is public".into());
        }
        _ => {}
    }

    if repo.archived && !options.include_archived {
        return Some("archived and include_archived is false".into());
    }
    if repo.fork && !options.include_forks {
        return Some("fork and include_forks is false".into());
    }

    if let Some(lang) = &options.language
        && repo.language.as_deref() != Some(lang.as_str())
    {
        return Some(format!("language != {lang}"));
    }

    if !options.topics.is_empty() && !options.topics.iter().any(|t| repo.topics.contains(t)) {
        return Some("shares no topic with the configured topic set".into());
    }

    if let Some(min) = options.min_stars
        && repo.stars < min
    {
        return Some(format!("stars {} < min_stars {min}", repo.stars));
    }
    if let Some(max) = options.max_stars
        && repo.stars > max
    {
        return Some(format!("stars {} > max_stars {max}", repo.stars));
    }

    if let Some(since) = options.updated_since
        && repo.updated_at < since
    {
        return Some("updated before updated_since".into());
    }

    if let Some(re) = &options.filter_match
        && !re.is_match(&repo.name)
        && !re.is_match(&repo.full_name)
    {
        return Some("did not match filter regex".into());
    }
    if let Some(re) = &options.filter_exclude
        && (re.is_match(&repo.name) || re.is_match(&repo.full_name))
    {
        return Some("matched exclude regex".into());
    }

    None
}
