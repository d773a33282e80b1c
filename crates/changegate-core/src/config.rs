//! Submission policy configuration.
//!
//! Loaded from a TOML file, then overridden by environment variables:
//!
//! | Variable | Effect |
//! |---|---|
//! | `CHANGEGATE_SUBMIT_WHOLE_TOPIC` | `true`/`false`, whole-topic submission |
//! | `CHANGEGATE_STRATEGY` | default strategy, e.g. `merge-if-necessary` |
//! | `CHANGEGATE_SERVER_NAME` | committer name of synthesized merges |
//! | `CHANGEGATE_SERVER_EMAIL` | committer email of synthesized merges |

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use changegate_state::{PersonIdent, ProjectName};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How changes are integrated into their destination branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitStrategy {
    /// Refuse anything that is not a fast-forward.
    FastForwardOnly,
    /// Fast-forward when possible, otherwise create a merge commit.
    #[default]
    MergeIfNecessary,
    /// Always create a merge commit.
    MergeAlways,
}

impl fmt::Display for SubmitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmitStrategy::FastForwardOnly => "fast-forward-only",
            SubmitStrategy::MergeIfNecessary => "merge-if-necessary",
            SubmitStrategy::MergeAlways => "merge-always",
        };
        f.write_str(s)
    }
}

impl FromStr for SubmitStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fast-forward-only" => Ok(SubmitStrategy::FastForwardOnly),
            "merge-if-necessary" => Ok(SubmitStrategy::MergeIfNecessary),
            "merge-always" => Ok(SubmitStrategy::MergeAlways),
            _ => Err(ConfigError::InvalidValue {
                key: "strategy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Engine-wide submission policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    /// Pull every open change sharing a topic into one atomic batch.
    pub submit_whole_topic: bool,
    /// Strategy for projects without an explicit entry.
    pub default_strategy: SubmitStrategy,
    /// Per-project strategy overrides.
    pub project_strategies: BTreeMap<String, SubmitStrategy>,
    /// Committer identity of synthesized merge commits.
    pub server_ident: PersonIdent,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            submit_whole_topic: false,
            default_strategy: SubmitStrategy::MergeIfNecessary,
            project_strategies: BTreeMap::new(),
            server_ident: PersonIdent::new("changegate", "changegate@localhost"),
        }
    }
}

impl SubmitConfig {
    pub fn with_whole_topic(mut self, enabled: bool) -> Self {
        self.submit_whole_topic = enabled;
        self
    }

    pub fn with_project_strategy(mut self, project: &str, strategy: SubmitStrategy) -> Self {
        self.project_strategies.insert(project.to_string(), strategy);
        self
    }

    /// Strategy governing `project`.
    pub fn strategy_for(&self, project: &ProjectName) -> SubmitStrategy {
        self.project_strategies
            .get(project.as_str())
            .copied()
            .unwrap_or(self.default_strategy)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `CHANGEGATE_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHANGEGATE_SUBMIT_WHOLE_TOPIC") {
            self.submit_whole_topic = match v.to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "CHANGEGATE_SUBMIT_WHOLE_TOPIC".to_string(),
                        value: v,
                    })
                }
            };
        }
        if let Some(v) = lookup("CHANGEGATE_STRATEGY") {
            self.default_strategy = v.parse()?;
        }
        if let Some(v) = lookup("CHANGEGATE_SERVER_NAME") {
            self.server_ident.name = v;
        }
        if let Some(v) = lookup("CHANGEGATE_SERVER_EMAIL") {
            self.server_ident.email = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_to_merge_if_necessary_without_topics() {
        let config = SubmitConfig::default();
        assert!(!config.submit_whole_topic);
        assert_eq!(
            config.strategy_for(&ProjectName::new("any")),
            SubmitStrategy::MergeIfNecessary
        );
    }

    #[test]
    fn parses_toml_with_project_overrides() {
        let config = SubmitConfig::from_toml_str(
            r#"
            submit_whole_topic = true
            default_strategy = "merge-always"

            [project_strategies]
            "platform/build" = "fast-forward-only"

            [server_ident]
            name = "Review Bot"
            email = "bot@example.com"
            "#,
        )
        .unwrap();
        assert!(config.submit_whole_topic);
        assert_eq!(
            config.strategy_for(&ProjectName::new("platform/build")),
            SubmitStrategy::FastForwardOnly
        );
        assert_eq!(
            config.strategy_for(&ProjectName::new("other")),
            SubmitStrategy::MergeAlways
        );
        assert_eq!(config.server_ident.name, "Review Bot");
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("CHANGEGATE_SUBMIT_WHOLE_TOPIC", "yes"),
            ("CHANGEGATE_STRATEGY", "FAST_FORWARD_ONLY"),
            ("CHANGEGATE_SERVER_EMAIL", "gate@example.com"),
        ]
        .into_iter()
        .collect();
        let mut config = SubmitConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert!(config.submit_whole_topic);
        assert_eq!(config.default_strategy, SubmitStrategy::FastForwardOnly);
        assert_eq!(config.server_ident.email, "gate@example.com");
        assert_eq!(config.server_ident.name, "changegate");
    }

    #[test]
    fn rejects_bad_boolean() {
        let mut config = SubmitConfig::default();
        let err = config
            .apply_overrides(|k| (k == "CHANGEGATE_SUBMIT_WHOLE_TOPIC").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!("rebase-always".parse::<SubmitStrategy>().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changegate.toml");
        std::fs::write(&path, "default_strategy = \"merge-always\"\n").unwrap();
        let config = SubmitConfig::load(&path).unwrap();
        assert_eq!(config.default_strategy, SubmitStrategy::MergeAlways);
    }
}
