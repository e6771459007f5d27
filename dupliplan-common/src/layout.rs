// On-disk layout of the managed files of one repository

use std::path::{Path, PathBuf};

use crate::schedules::JobKind;

/// Directory the backup tool keeps its preferences in
pub const PREFERENCES_DIR: &str = ".duplicacy";

pub const SCRIPTS_DIR: &str = "scripts";
pub const LOGS_DIR: &str = "logs";
pub const LOCKS_DIR: &str = "locks";

/// Paths derived from a repository path
///
/// ```text
/// <repo>/.duplicacy/             preferences, filters
/// <repo>/.duplicacy/<work>/      managed root
///     scripts/                   generated scripts and env files
///     logs/                      one log per run
///     locks/                     one lock per storage
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLayout {
    pub repo_dir: PathBuf,
    pub pref_dir: PathBuf,
    pub work_dir: PathBuf,
    pub script_dir: PathBuf,
    pub log_dir: PathBuf,
    pub lock_dir: PathBuf,
}

impl RepositoryLayout {
    pub fn new(repo_dir: &Path, work_dir_name: &str) -> Self {
        let pref_dir = repo_dir.join(PREFERENCES_DIR);
        let work_dir = pref_dir.join(work_dir_name);

        Self {
            repo_dir: repo_dir.to_path_buf(),
            script_dir: work_dir.join(SCRIPTS_DIR),
            log_dir: work_dir.join(LOGS_DIR),
            lock_dir: work_dir.join(LOCKS_DIR),
            pref_dir,
            work_dir,
        }
    }

    /// Managed directories paired with their parent, parents first
    ///
    /// The repository directory itself belongs to the operator and is not
    /// part of the skeleton.
    pub fn skeleton(&self) -> Vec<(&Path, Option<&Path>)> {
        vec![
            (self.pref_dir.as_path(), None),
            (self.work_dir.as_path(), Some(self.pref_dir.as_path())),
            (self.script_dir.as_path(), Some(self.work_dir.as_path())),
            (self.log_dir.as_path(), Some(self.work_dir.as_path())),
            (self.lock_dir.as_path(), Some(self.work_dir.as_path())),
        ]
    }

    pub fn preferences_file(&self) -> PathBuf {
        self.pref_dir.join("preferences")
    }

    pub fn filters_file(&self) -> PathBuf {
        self.pref_dir.join("filters")
    }

    /// Environment file sourced by scripts targeting `storage`
    pub fn env_file(&self, storage: &str) -> PathBuf {
        self.script_dir.join(format!("{storage}.env"))
    }

    pub fn script_file(&self, kind: JobKind, job: &str) -> PathBuf {
        self.script_dir.join(format!("{}_{job}.sh", kind.as_str()))
    }
}
