use serde::{Deserialize, Serialize};

use crate::error::{CorralError, ErrorContext};

/// Raw sync options before validation (§4.6 "Sync Engine"). A sync run
/// mirrors state from a source provider:target pair to a destination
/// provider:target pair, one feature at a time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncOptionsBuilder {
    pub source_provider: String,
    pub source_target: String,
    pub destination_provider: String,
    pub destination_target: String,

    #[serde(default = "default_true")]
    pub sync_code: bool,
    #[serde(default)]
    pub sync_issues: bool,
    #[serde(default)]
    pub sync_pull_requests: bool,
    #[serde(default)]
    pub sync_wiki: bool,
    #[serde(default = "default_true")]
    pub sync_releases: bool,
    #[serde(default)]
    pub sync_settings: bool,

    #[serde(default)]
    pub dry_run: bool,
}

fn default_true() -> bool {
    true
}

impl SyncOptionsBuilder {
    pub fn validate(self) -> Result<SyncOptions, CorralError> {
        let ctx = || ErrorContext::new("validate_sync_options");

        if self.source_provider.trim().is_empty() || self.source_target.trim().is_empty() {
            return Err(CorralError::Validation {
                ctx: ctx(),
                message: "source_provider and source_target are required".into(),
            });
        }
        if self.destination_provider.trim().is_empty() || self.destination_target.trim().is_empty()
        {
            return Err(CorralError::Validation {
                ctx: ctx(),
                message: "destination_provider and destination_target are required".into(),
            });
        }

        let mut features = Vec::new();
        if self.sync_code {
            features.push(SyncFeature::Code);
        }
        if self.sync_issues {
            features.push(SyncFeature::Issues);
        }
        if self.sync_pull_requests {
            features.push(SyncFeature::PullRequests);
        }
        if self.sync_wiki {
            features.push(SyncFeature::Wiki);
        }
        if self.sync_releases {
            features.push(SyncFeature::Releases);
        }
        if self.sync_settings {
            features.push(SyncFeature::Settings);
        }
        if features.is_empty() {
            return Err(CorralError::Validation {
                ctx: ctx(),
                message: "at least one sync feature must be enabled".into(),
            });
        }

        Ok(SyncOptions {
            source_provider: self.source_provider,
            source_target: self.source_target,
            destination_provider: self.destination_provider,
            destination_target: self.destination_target,
            features,
            dry_run: self.dry_run,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub source_provider: String,
    pub source_target: String,
    pub destination_provider: String,
    pub destination_target: String,
    pub features: Vec<SyncFeature>,
    pub dry_run: bool,
}

/// A mirrorable facet of a repository. `Issues` and `Wiki` are planned
/// (§4.6 Open Question) to always resolve to `SyncAction::Unsupported`
/// rather than being silently dropped from this enum, so config files
/// that enable them still validate and still surface per-repo why-not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFeature {
    Code,
    Issues,
    PullRequests,
    Wiki,
    Releases,
    Settings,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> SyncOptionsBuilder {
        SyncOptionsBuilder {
            source_provider: "github".into(),
            source_target: "acme/widgets".into(),
            destination_provider: "gitea".into(),
            destination_target: "mirror/widgets".into(),
            ..Default::default()
        }
    }

    #[test]
    fn validate_defaults_to_code_and_releases() {
        let opts = builder().validate().expect("valid");
        assert!(opts.features.contains(&SyncFeature::Code));
        assert!(opts.features.contains(&SyncFeature::Releases));
        assert!(!opts.features.contains(&SyncFeature::Issues));
    }

    #[test]
    fn validate_rejects_missing_source() {
        let mut b = builder();
        b.source_target = String::new();
        assert!(b.validate().is_err());
    }

    #[test]
    fn validate_rejects_no_features_enabled() {
        let mut b = builder();
        b.sync_code = false;
        b.sync_releases = false;
        assert!(b.validate().is_err());
    }
}
