// Centralized settings for dupliplan

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CompileError, Result};
use crate::validation::{ensure_shell_safe, validate_snapshot_id};

/// Default location of the plan file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dupliplan/plan.toml";

/// Tool-level settings with support for environment variable overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanSettings {
    /// Backup tool invoked by generated commands and scripts (default: duplicacy)
    pub tool_binary: String,

    /// Mail client that receives the status line on stdin (default: mutt)
    pub mail_command: String,

    /// PATH exported by scripts and exec commands
    pub search_path: String,

    /// Name of the managed directory under `<repo>/.duplicacy`
    pub work_dir_name: String,

    /// Age after which run logs are tidied (default: 4w)
    pub log_retention: String,

    /// Owner used when a repository does not name one
    pub default_user: String,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            tool_binary: "duplicacy".to_string(),
            mail_command: "mutt".to_string(),
            search_path: "/usr/local/bin:/usr/bin:/bin".to_string(),
            work_dir_name: "dupliplan".to_string(),
            log_retention: "4w".to_string(),
            default_user: "root".to_string(),
        }
    }
}

impl PlanSettings {
    /// Apply environment variable overrides on top of these settings
    ///
    /// Supported environment variables:
    /// - DUPLIPLAN_TOOL: Override the backup tool binary
    /// - DUPLIPLAN_MAIL_COMMAND: Override the mail client
    /// - DUPLIPLAN_SEARCH_PATH: Override the PATH used by generated artifacts
    /// - DUPLIPLAN_WORK_DIR: Override the managed directory name
    /// - DUPLIPLAN_LOG_RETENTION: Override the log tidy age
    /// - DUPLIPLAN_DEFAULT_USER: Override the default repository owner
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment or otherwise)
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tool) = lookup("DUPLIPLAN_TOOL") {
            self.tool_binary = tool;
        }

        if let Some(mail) = lookup("DUPLIPLAN_MAIL_COMMAND") {
            self.mail_command = mail;
        }

        if let Some(path) = lookup("DUPLIPLAN_SEARCH_PATH") {
            self.search_path = path;
        }

        if let Some(dir) = lookup("DUPLIPLAN_WORK_DIR") {
            self.work_dir_name = dir;
        }

        if let Some(age) = lookup("DUPLIPLAN_LOG_RETENTION") {
            self.log_retention = age;
        }

        if let Some(user) = lookup("DUPLIPLAN_DEFAULT_USER") {
            self.default_user = user;
        }

        self
    }

    /// Check that every setting can be interpolated into generated scripts
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("tool_binary", &self.tool_binary),
            ("mail_command", &self.mail_command),
            ("search_path", &self.search_path),
        ] {
            if value.is_empty() || value.contains(char::is_whitespace) {
                return Err(CompileError::InvalidSetting {
                    field,
                    reason: format!("'{value}' must be a single non-empty word"),
                });
            }
            ensure_shell_safe(field, "settings", value)?;
        }

        validate_snapshot_id(&self.work_dir_name).map_err(|_| CompileError::InvalidSetting {
            field: "work_dir_name",
            reason: format!("'{}' is not a plain directory name", self.work_dir_name),
        })?;

        let retention_ok = self
            .log_retention
            .strip_suffix(['s', 'm', 'h', 'd', 'w'])
            .is_some_and(|count| !count.is_empty() && count.chars().all(|c| c.is_ascii_digit()));
        if !retention_ok {
            return Err(CompileError::InvalidSetting {
                field: "log_retention",
                reason: format!("'{}' must look like 4w, 30d or 12h", self.log_retention),
            });
        }

        Ok(())
    }
}

/// Plan file path, honouring DUPLIPLAN_CONFIG
pub fn default_config_path() -> PathBuf {
    std::env::var("DUPLIPLAN_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}
