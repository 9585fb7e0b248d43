//! Config file loading and validation (§6 "Configuration file"): parse
//! permissively, then run an eager validation pass that returns every
//! problem at once rather than failing on the first one.
//!
//! Two YAML shapes are accepted on load. `providers`-style is canonical
//! (§9 Open Question #3); `repo_roots`-style is transformed into it via
//! [`RepoRootsConfig::into_canonical`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use corral_types::{CorralError, ErrorContext, Protocol, Strategy, Visibility};
use serde::{Deserialize, Serialize};

/// The canonical, `providers`-style config (§6 "A parallel unified schema").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorralConfig {
    pub version: String,
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub orgs: Vec<OrgConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgConfig {
    pub name: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub r#match: Option<String>,
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(default)]
    pub clone_dir: Option<String>,
}

/// The legacy `repo_roots`-style schema (§6 "a `repo_roots` list").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRootsConfig {
    pub version: String,
    #[serde(default)]
    pub default: DefaultSection,
    #[serde(default)]
    pub repo_roots: Vec<RepoRootEntry>,
    #[serde(default)]
    pub ignore_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultSection {
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRootEntry {
    pub root_path: String,
    pub provider: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub org_name: String,
}

impl RepoRootsConfig {
    /// Fold each `repo_roots` entry into a single-org `ProviderConfig`
    /// under the canonical schema. `ignore_names` entries are merged as
    /// an `exclude` regex alternation applied to every org from this file,
    /// since the legacy schema has no per-org exclude field.
    pub fn into_canonical(self) -> CorralConfig {
        let exclude = if self.ignore_names.is_empty() {
            None
        } else {
            Some(self.ignore_names.join("|"))
        };

        let mut providers: BTreeMap<String, ProviderConfig> = BTreeMap::new();
        for entry in self.repo_roots {
            let org = OrgConfig {
                name: entry.org_name,
                visibility: Visibility::All,
                strategy: Strategy::Reset,
                r#match: None,
                exclude: exclude.clone(),
                clone_dir: Some(entry.root_path),
            };
            providers
                .entry(entry.provider)
                .or_insert_with(|| ProviderConfig {
                    token: None,
                    orgs: Vec::new(),
                })
                .orgs
                .push(org);
        }

        CorralConfig {
            version: self.version,
            providers,
        }
    }
}

const KNOWN_PROVIDERS: &[&str] = &["github", "gitlab", "gitea"];

impl CorralConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, CorralError> {
        let ctx = || ErrorContext::new("load_config").with_resource(path.to_string_lossy());
        let content = fs::read_to_string(path).map_err(|e| CorralError::Validation {
            ctx: ctx(),
            message: format!("failed to read config file: {e}"),
        })?;
        Self::load_from_str(&content)
    }

    /// Try the canonical schema first; if `providers` is absent, fall
    /// back to the legacy `repo_roots` schema.
    pub fn load_from_str(content: &str) -> Result<Self, CorralError> {
        let ctx = || ErrorContext::new("parse_config");

        let raw: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
            CorralError::Validation {
                ctx: ctx(),
                message: format!("invalid YAML: {e}"),
            }
        })?;

        let config = if raw.get("providers").is_some() {
            serde_yaml::from_value::<CorralConfig>(raw).map_err(|e| CorralError::Validation {
                ctx: ctx(),
                message: format!("invalid providers-style config: {e}"),
            })?
        } else {
            let legacy: RepoRootsConfig =
                serde_yaml::from_value(raw).map_err(|e| CorralError::Validation {
                    ctx: ctx(),
                    message: format!("invalid repo_roots-style config: {e}"),
                })?;
            legacy.into_canonical()
        };

        config.validate()?;
        Ok(config)
    }

    /// Eager validation: collects every problem before returning instead
    /// of short-circuiting on the first bad field.
    pub fn validate(&self) -> Result<(), CorralError> {
        let ctx = || ErrorContext::new("validate_config");
        let mut problems = Vec::new();

        if !is_dotted_numeric_version(&self.version) {
            problems.push(format!(
                "version {:?} must be three dot-separated numbers",
                self.version
            ));
        }

        for (provider, cfg) in &self.providers {
            if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
                problems.push(format!("unknown provider {provider:?}"));
            }
            for org in &cfg.orgs {
                if let Some(pattern) = &org.r#match
                    && let Err(e) = regex::Regex::new(pattern)
                {
                    problems.push(format!(
                        "provider {provider:?} org {:?}: invalid match regex: {e}",
                        org.name
                    ));
                }
                if let Some(pattern) = &org.exclude
                    && let Err(e) = regex::Regex::new(pattern)
                {
                    problems.push(format!(
                        "provider {provider:?} org {:?}: invalid exclude regex: {e}",
                        org.name
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CorralError::Validation {
                ctx: ctx(),
                message: problems.join("; "),
            })
        }
    }

    /// Non-fatal warnings (§6 "Warnings (non-fatal)"): short tokens,
    /// tokens with an implausible shape, `clone_dir` escaping upward.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (provider, cfg) in &self.providers {
            if let Some(token) = &cfg.token {
                if token.len() < 8 {
                    warnings.push(format!("{provider}: token looks too short"));
                }
                if provider == "github" && !token.starts_with("ghp_") && !token.starts_with("github_pat_")
                {
                    warnings.push(format!(
                        "{provider}: token does not look like a GitHub token"
                    ));
                }
            }
            for org in &cfg.orgs {
                if let Some(dir) = &org.clone_dir
                    && dir.starts_with("../")
                {
                    warnings.push(format!(
                        "{provider}/{}: clone_dir {dir:?} starts with ../",
                        org.name
                    ));
                }
            }
        }
        warnings
    }
}

fn is_dotted_numeric_version(version: &str) -> bool {
    let parts: Vec<_> = version.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| p.parse::<u64>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_providers_style() {
        let yaml = r#"
version: "1.0.0"
providers:
  github:
    token: "ghp_abcdefghijklmnop"
    orgs:
      - name: acme
        visibility: all
        strategy: reset
"#;
        let config = CorralConfig::load_from_str(yaml).expect("valid config");
        assert_eq!(config.providers["github"].orgs[0].name, "acme");
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn parses_and_canonicalizes_repo_roots_style() {
        let yaml = r#"
version: "1.0.0"
default:
  protocol: https
repo_roots:
  - root_path: /home/me/src
    provider: github
    protocol: https
    org_name: acme
ignore_names:
  - ".*-archive$"
"#;
        let config = CorralConfig::load_from_str(yaml).expect("valid config");
        let github = &config.providers["github"];
        assert_eq!(github.orgs[0].name, "acme");
        assert_eq!(github.orgs[0].exclude.as_deref(), Some(".*-archive$"));
    }

    #[test]
    fn rejects_malformed_version() {
        let yaml = r#"
version: "1.0"
providers: {}
"#;
        let err = CorralConfig::load_from_str(yaml).unwrap_err();
        assert!(matches!(err, CorralError::Validation { .. }));
    }

    #[test]
    fn rejects_invalid_regex() {
        let yaml = r#"
version: "1.0.0"
providers:
  github:
    orgs:
      - name: acme
        match: "(unclosed"
"#;
        let err = CorralConfig::load_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("invalid match regex"));
    }

    #[test]
    fn warns_on_short_token() {
        let yaml = r#"
version: "1.0.0"
providers:
  github:
    token: "abc"
    orgs: []
"#;
        let config = CorralConfig::load_from_str(yaml).expect("valid (warnings don't fail)");
        assert!(config.warnings().iter().any(|w| w.contains("too short")));
    }

    #[test]
    fn clone_dir_escaping_upward_warns_but_validates() {
        let yaml = r#"
version: "1.0.0"
providers:
  github:
    orgs:
      - name: acme
        clone_dir: "../outside"
"#;
        let config = CorralConfig::load_from_str(yaml).expect("clone_dir ../ is a warning, not an error");
        assert!(config.warnings().iter().any(|w| w.contains("../")));
    }
}
