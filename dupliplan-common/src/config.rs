//! Plan file model
//!
//! These types mirror the TOML document exactly as written by an operator.
//! Almost every field is optional here so that a missing value surfaces as a
//! specific [`CompileError`](crate::CompileError) from the validator instead
//! of a generic deserialization failure.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::settings::PlanSettings;

/// Top-level plan document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Repositories to compile; every declared repository when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<Vec<String>>,

    /// Overrides for the built-in settings
    #[serde(default)]
    pub settings: PlanSettings,

    /// Declared repositories keyed by snapshot id
    #[serde(default)]
    pub repositories: BTreeMap<String, RawRepository>,
}

impl PlanConfig {
    /// Parse a plan from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: PlanConfig = toml::from_str(content).context("Failed to parse plan file")?;
        Ok(config)
    }

    /// Load a plan from a TOML file
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Names of the repositories to compile, in declaration order of the
    /// selection list (or name order when compiling everything)
    pub fn selection(&self) -> Vec<String> {
        match &self.selected {
            Some(names) => names.clone(),
            None => self.repositories.keys().cloned().collect(),
        }
    }
}

/// One repository as declared in the plan file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRepository {
    /// Directory that gets backed up
    pub repo_path: PathBuf,

    /// Owner of the generated files; falls back to the settings default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default)]
    pub storage_targets: BTreeMap<String, RawStorageTarget>,

    /// Ordered include/exclude rules; first match wins
    #[serde(default)]
    pub filter_rules: Vec<String>,

    #[serde(default)]
    pub backup_schedules: BTreeMap<String, RawBackupSchedule>,

    #[serde(default)]
    pub prune_schedules: BTreeMap<String, RawPruneSchedule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStorageTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RawTarget>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<RawEncryption>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_parameters: Option<RawChunkParameters>,
}

/// Backend location plus whatever backend-specific parameters came with it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Credential fields such as `b2_id`; each backend picks its own
    #[serde(flatten)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEncryption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<ScalarValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawChunkParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
}

/// Cron fields in the same shape a crontab resource takes them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCronEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<ScalarValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<ScalarValue>,

    #[serde(default, alias = "day", skip_serializing_if = "Option::is_none")]
    pub monthday: Option<ScalarValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<ScalarValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<ScalarValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawKeepRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBackupSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_entry: Option<RawCronEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,

    /// Upload limit in kB/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Re-hash every file instead of trusting timestamps
    #[serde(default)]
    pub hash: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_recipient: Option<String>,
}

/// Either a single prune schedule or a set of schedules sharing one script
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPruneSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_entry: Option<RawCronEntry>,

    /// Present only in the multi-schedule form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedules: Option<BTreeMap<String, RawPruneEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_ranges: Option<Vec<RawKeepRange>>,

    #[serde(default, alias = "backup_tags")]
    pub tags: Vec<String>,

    #[serde(default)]
    pub exhaustive: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_recipient: Option<String>,
}

/// One trigger of a multi-schedule prune
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPruneEntry {
    /// Snapshot id to prune; the owning repository when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_entry: Option<RawCronEntry>,
}

/// A TOML value that may be written either as a number or as a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Integer(i64),
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Integer(value) => write!(f, "{value}"),
            ScalarValue::Text(value) => f.write_str(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
[repositories.my-repo]
repo_path = "/my/backup/dir"
filter_rules = ["+foo/baz/*", "-*"]

[repositories.my-repo.storage_targets.default]
target = { url = "b2://my-bucket", b2_id = "my-id", b2_app_key = "my-key" }
encryption = { password = "batman", iterations = "32768" }

[repositories.my-repo.backup_schedules.daily-0130]
cron_entry = { hour = 1, minute = "30" }
threads = 8

[repositories.my-repo.prune_schedules.sweep]
keep_ranges = [{ interval = 0, min_age = 30 }]
backup_tags = ["daily"]

[repositories.my-repo.prune_schedules.sweep.schedules.main]
storage_name = "default"
cron_entry = { day = 1 }
"#;

    #[test]
    fn test_parse_plan() {
        let config = PlanConfig::from_toml_str(PLAN).unwrap();
        let repo = &config.repositories["my-repo"];

        assert_eq!(repo.repo_path, PathBuf::from("/my/backup/dir"));
        assert_eq!(repo.user, None);
        assert_eq!(repo.filter_rules, vec!["+foo/baz/*", "-*"]);

        let target = repo.storage_targets["default"].target.as_ref().unwrap();
        assert_eq!(target.url.as_deref(), Some("b2://my-bucket"));
        assert_eq!(target.params["b2_app_key"], "my-key");

        let encryption = repo.storage_targets["default"].encryption.as_ref().unwrap();
        assert_eq!(
            encryption.iterations,
            Some(ScalarValue::Text("32768".to_string()))
        );
    }

    #[test]
    fn test_cron_values_accept_numbers_and_strings() {
        let config = PlanConfig::from_toml_str(PLAN).unwrap();
        let schedule = &config.repositories["my-repo"].backup_schedules["daily-0130"];
        let cron = schedule.cron_entry.as_ref().unwrap();

        assert_eq!(cron.hour.as_ref().unwrap().to_string(), "1");
        assert_eq!(cron.minute.as_ref().unwrap().to_string(), "30");
        assert!(cron.weekday.is_none());
    }

    #[test]
    fn test_multi_prune_aliases() {
        let config = PlanConfig::from_toml_str(PLAN).unwrap();
        let prune = &config.repositories["my-repo"].prune_schedules["sweep"];

        assert_eq!(prune.tags, vec!["daily"]);
        let entries = prune.schedules.as_ref().unwrap();
        let cron = entries["main"].cron_entry.as_ref().unwrap();
        assert_eq!(cron.monthday, Some(ScalarValue::Integer(1)));
    }

    #[test]
    fn test_selection_defaults_to_all_repositories() {
        let mut config = PlanConfig::from_toml_str(PLAN).unwrap();
        assert_eq!(config.selection(), vec!["my-repo"]);

        config.selected = Some(vec!["missing".into(), "my-repo".into()]);
        assert_eq!(config.selection(), vec!["missing", "my-repo"]);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        assert!(PlanConfig::from_toml_str("[repositories.x").is_err());
    }
}
