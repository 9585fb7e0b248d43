use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CorralError, ErrorContext};
use crate::repository::{Protocol, Strategy, Visibility};

/// The raw, caller-supplied options before regex compilation and default
/// filling. `CloneOptionsBuilder::validate()` turns this into a frozen
/// [`CloneOptions`] (§3: "On validation the options value compiles its
/// regexps and fills defaults; callers must treat it as frozen
/// thereafter").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneOptionsBuilder {
    pub provider: String,
    pub org: String,
    pub target_root: PathBuf,

    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub single_branch: bool,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(
        default = "default_timeout",
        deserialize_with = "corral_duration::deserialize_duration",
        serialize_with = "corral_duration::serialize_duration"
    )]
    pub timeout: Duration,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "corral_duration::deserialize_duration",
        serialize_with = "corral_duration::serialize_duration"
    )]
    pub retry_delay: Duration,

    #[serde(default)]
    pub filter_match: Option<String>,
    #[serde(default)]
    pub filter_exclude: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default)]
    pub include_forks: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub min_stars: Option<u64>,
    #[serde(default)]
    pub max_stars: Option<u64>,
    #[serde(default)]
    pub updated_since: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub create_marker_file: bool,
    #[serde(default)]
    pub cleanup_orphans: bool,
}

fn default_parallel() -> usize {
    5
}
fn default_timeout() -> Duration {
    Duration::from_secs(300)
}
fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

impl Default for CloneOptionsBuilder {
    fn default() -> Self {
        Self {
            provider: String::new(),
            org: String::new(),
            target_root: PathBuf::new(),
            parallel: default_parallel(),
            strategy: Strategy::default(),
            protocol: Protocol::default(),
            depth: 0,
            single_branch: false,
            branch: None,
            timeout: default_timeout(),
            max_retries: 0,
            retry_delay: default_retry_delay(),
            filter_match: None,
            filter_exclude: None,
            visibility: Visibility::default(),
            include_archived: false,
            include_forks: false,
            language: None,
            topics: Vec::new(),
            min_stars: None,
            max_stars: None,
            updated_since: None,
            format: OutputFormat::default(),
            dry_run: false,
            create_marker_file: false,
            cleanup_orphans: false,
        }
    }
}

impl CloneOptionsBuilder {
    /// Compile regexes and freeze into a [`CloneOptions`]. Per the §9
    /// Open Question resolution, `cleanup_orphans = true` is rejected
    /// here rather than silently ignored at engine time.
    pub fn validate(self) -> Result<CloneOptions, CorralError> {
        let ctx = || ErrorContext::new("validate_clone_options");

        if self.provider.trim().is_empty() {
            return Err(CorralError::Validation {
                ctx: ctx(),
                message: "provider is required".into(),
            });
        }
        if self.org.trim().is_empty() {
            return Err(CorralError::Validation {
                ctx: ctx(),
                message: "org is required".into(),
            });
        }
        if self.target_root.as_os_str().is_empty() {
            return Err(CorralError::Validation {
                ctx: ctx(),
                message: "target_root is required".into(),
            });
        }
        if !(1..=50).contains(&self.parallel) {
            return Err(CorralError::Validation {
                ctx: ctx(),
                message: format!("parallel must be in [1,50], got {}", self.parallel),
            });
        }
        if self.retry_delay.is_zero() {
            return Err(CorralError::Validation {
                ctx: ctx(),
                message: "retry_delay must be > 0".into(),
            });
        }
        if let (Some(min), Some(max)) = (self.min_stars, self.max_stars)
            && min > max
        {
            return Err(CorralError::Validation {
                ctx: ctx(),
                message: format!("min_stars ({min}) must be <= max_stars ({max})"),
            });
        }
        if self.cleanup_orphans {
            return Err(CorralError::Validation {
                ctx: ctx(),
                message: "cleanup_orphans is not implemented: its candidate-selection and \
                          recursion semantics are unspecified upstream (see DESIGN.md Open \
                          Question #2); leave it unset"
                    .into(),
            });
        }

        let match_re = self
            .filter_match
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| CorralError::Validation {
                ctx: ctx(),
                message: format!("invalid match regex: {e}"),
            })?;
        let exclude_re = self
            .filter_exclude
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| CorralError::Validation {
                ctx: ctx(),
                message: format!("invalid exclude regex: {e}"),
            })?;

        Ok(CloneOptions {
            provider: self.provider,
            org: self.org,
            target_root: self.target_root,
            parallel: self.parallel,
            strategy: self.strategy,
            protocol: self.protocol,
            depth: self.depth,
            single_branch: self.single_branch,
            branch: self.branch,
            timeout: self.timeout,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            filter_match: match_re,
            filter_exclude: exclude_re,
            visibility: self.visibility,
            include_archived: self.include_archived,
            include_forks: self.include_forks,
            language: self.language,
            topics: self.topics,
            min_stars: self.min_stars,
            max_stars: self.max_stars,
            updated_since: self.updated_since,
            format: self.format,
            dry_run: self.dry_run,
            create_marker_file: self.create_marker_file,
            cleanup_orphans: self.cleanup_orphans,
        })
    }
}

/// The validated, frozen form of clone options (§3 "Clone options").
/// `Clone` is cheap (compiled `Regex` is reference-counted internally).
#[derive(Debug, Clone)]
pub struct CloneOptions {
    pub provider: String,
    pub org: String,
    pub target_root: PathBuf,
    pub parallel: usize,
    pub strategy: Strategy,
    pub protocol: Protocol,
    pub depth: u32,
    pub single_branch: bool,
    pub branch: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub filter_match: Option<Regex>,
    pub filter_exclude: Option<Regex>,
    pub visibility: Visibility,
    pub include_archived: bool,
    pub include_forks: bool,
    pub language: Option<String>,
    pub topics: Vec<String>,
    pub min_stars: Option<u64>,
    pub max_stars: Option<u64>,
    pub updated_since: Option<chrono::DateTime<chrono::Utc>>,
    pub format: OutputFormat,
    pub dry_run: bool,
    pub create_marker_file: bool,
    pub cleanup_orphans: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Progress,
    Json,
    Table,
    Quiet,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> CloneOptionsBuilder {
        CloneOptionsBuilder {
            provider: "github".into(),
            org: "acme".into(),
            target_root: PathBuf::from("/tmp/acme"),
            ..Default::default()
        }
    }

    #[test]
    fn validate_fills_defaults() {
        let opts = builder().validate().expect("valid");
        assert_eq!(opts.parallel, 5);
        assert_eq!(opts.strategy, Strategy::Reset);
        assert!(opts.filter_match.is_none());
    }

    #[test]
    fn validate_rejects_out_of_range_parallel() {
        let mut b = builder();
        b.parallel = 0;
        assert!(b.validate().is_err());

        let mut b = builder();
        b.parallel = 51;
        assert!(b.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_required_fields() {
        let mut b = builder();
        b.provider = String::new();
        assert!(b.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_star_range() {
        let mut b = builder();
        b.min_stars = Some(100);
        b.max_stars = Some(10);
        assert!(b.validate().is_err());
    }

    #[test]
    fn validate_rejects_cleanup_orphans() {
        let mut b = builder();
        b.cleanup_orphans = true;
        let err = b.validate().unwrap_err();
        assert!(err.to_string().contains("cleanup_orphans"));
    }

    #[test]
    fn validate_compiles_regexes() {
        let mut b = builder();
        b.filter_match = Some("^svc-.*".into());
        b.filter_exclude = Some(".*-archive$".into());
        let opts = b.validate().expect("valid");
        assert!(opts.filter_match.unwrap().is_match("svc-api"));
        assert!(opts.filter_exclude.unwrap().is_match("svc-old-archive"));
    }

    #[test]
    fn validate_rejects_invalid_regex() {
        let mut b = builder();
        b.filter_match = Some("(unclosed".into());
        assert!(b.validate().is_err());
    }
}
