// Backup and prune schedules: one generated script plus its cron triggers

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::{RawBackupSchedule, RawPruneEntry, RawPruneSchedule};
use crate::error::{CompileError, Result};
use crate::graph::{Artifact, ArtifactKey, CronSpec, DependencyGraph, FileSpec};
use crate::layout::RepositoryLayout;
use crate::retention::ensure_descending_ages;
use crate::script::{Notification, ScriptParams, render_script};
use crate::settings::PlanSettings;
use crate::storage::DEFAULT_STORAGE;
use crate::validation::{
    validate_cron_entry, validate_keep_ranges, validate_optional_email, validate_snapshot_id,
    validate_tags, validate_threads,
};

/// Scripts are executable by their owner only
pub const SCRIPT_MODE: u32 = 0o700;

/// Cron fields; `None` means wildcard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CronTrigger {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthday: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday: Option<String>,
}

impl CronTrigger {
    pub fn is_empty(&self) -> bool {
        self.fields().into_iter().all(Option::is_none)
    }

    /// The five crontab time fields
    ///
    /// # Examples
    /// ```
    /// use dupliplan_common::schedules::CronTrigger;
    /// let trigger = CronTrigger {
    ///     minute: Some("30".into()),
    ///     hour: Some("1".into()),
    ///     ..Default::default()
    /// };
    /// assert_eq!(trigger.expression(), "30 1 * * *");
    /// ```
    pub fn expression(&self) -> String {
        self.fields()
            .iter()
            .map(|field| field.as_deref().unwrap_or("*"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn fields(&self) -> [&Option<String>; 5] {
        [
            &self.minute,
            &self.hour,
            &self.monthday,
            &self.month,
            &self.weekday,
        ]
    }
}

/// Operation a generated script runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobKind {
    Backup,
    Prune,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Backup => "backup",
            JobKind::Prune => "prune",
        }
    }

    /// Capitalized form used in notification subjects
    pub fn title(&self) -> &'static str {
        match self {
            JobKind::Backup => "Backup",
            JobKind::Prune => "Prune",
        }
    }
}

/// How a script learns which storage it works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBinding {
    /// Written into the script as a constant
    Fixed(String),
    /// Passed by each cron trigger as `-i <repo id> -s <storage>`
    Runtime,
}

/// One cron entry starting a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Artifact name of the cron entry
    pub name: String,
    pub schedule: CronTrigger,
    pub storage: String,
    /// Snapshot id and storage handed to a runtime-bound script
    pub arguments: Option<(String, String)>,
}

impl Trigger {
    pub fn command(&self, script: &Path) -> String {
        match &self.arguments {
            Some((repo_id, storage)) => format!("{} -i {repo_id} -s {storage}", script.display()),
            None => script.display().to_string(),
        }
    }
}

/// A schedule normalized into one script and its triggers
///
/// Backups, single prunes and multi-schedule prunes all end up here; they
/// only differ in their binding and in how many triggers they carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    pub kind: JobKind,
    pub name: String,
    pub binding: StorageBinding,
    /// Tool arguments, one option (with its value) per entry
    pub flags: Vec<String>,
    pub notify: Option<String>,
    pub triggers: Vec<Trigger>,
}

fn resolve_storage(
    job: &str,
    repository: &str,
    declared: &BTreeSet<String>,
    name: Option<&str>,
) -> Result<String> {
    let storage = name.unwrap_or(DEFAULT_STORAGE);
    if !declared.contains(storage) {
        return Err(CompileError::UndeclaredStorage {
            job: job.to_string(),
            storage: storage.to_string(),
            repository: repository.to_string(),
        });
    }
    Ok(storage.to_string())
}

impl JobPlan {
    /// Normalize a backup schedule
    ///
    /// Flags come out in a fixed order: hash, rate limit, storage (unless
    /// default), tag, threads.
    pub fn backup(
        repository: &str,
        schedule: &str,
        raw: &RawBackupSchedule,
        declared: &BTreeSet<String>,
    ) -> Result<Self> {
        validate_snapshot_id(schedule)?;
        let notify = validate_optional_email(raw.email_recipient.as_deref())?;
        let requested = raw.storage_name.as_deref().unwrap_or(DEFAULT_STORAGE);
        let name = format!("{repository}_{requested}_{schedule}");
        let storage = resolve_storage(&name, repository, declared, Some(requested))?;

        let cron = validate_cron_entry(raw.cron_entry.as_ref())?;
        let threads = validate_threads(&name, raw.threads)?;

        let mut flags = Vec::new();
        if raw.hash {
            flags.push("-hash".to_string());
        }
        if let Some(limit) = raw.rate_limit {
            if limit == 0 {
                return Err(CompileError::InvalidRateLimit { job: name });
            }
            flags.push(format!("-limit-rate {limit}"));
        }
        if storage != DEFAULT_STORAGE {
            flags.push(format!("-storage {storage}"));
        }
        if let Some(tag) = &raw.tag {
            validate_tags(&name, std::slice::from_ref(tag))?;
            flags.push(format!("-t {tag}"));
        }
        flags.push(format!("-threads {threads}"));

        Ok(Self {
            kind: JobKind::Backup,
            triggers: vec![Trigger {
                name: format!("backup-cron_{name}"),
                schedule: cron,
                storage: storage.clone(),
                arguments: None,
            }],
            binding: StorageBinding::Fixed(storage),
            name,
            flags,
            notify,
        })
    }

    /// Normalize a prune schedule in either of its two forms
    pub fn prune(
        repository: &str,
        schedule: &str,
        raw: &RawPruneSchedule,
        declared: &BTreeSet<String>,
    ) -> Result<Self> {
        validate_snapshot_id(schedule)?;

        match &raw.schedules {
            None => Self::single_prune(repository, schedule, raw, declared),
            Some(entries) => {
                let name = format!("{repository}_{schedule}");
                if raw.storage_name.is_some() || raw.cron_entry.is_some() {
                    return Err(CompileError::MixedPruneForms { job: name });
                }
                Self::multi_prune(repository, name, raw, entries, declared)
            }
        }
    }

    fn single_prune(
        repository: &str,
        schedule: &str,
        raw: &RawPruneSchedule,
        declared: &BTreeSet<String>,
    ) -> Result<Self> {
        let notify = validate_optional_email(raw.email_recipient.as_deref())?;
        let requested = raw.storage_name.as_deref().unwrap_or(DEFAULT_STORAGE);
        let name = format!("{repository}_{requested}_{schedule}");
        let storage = resolve_storage(&name, repository, declared, Some(requested))?;
        let cron = validate_cron_entry(raw.cron_entry.as_ref())?;

        let storage_flags = if storage == DEFAULT_STORAGE {
            Vec::new()
        } else {
            vec![format!("-storage {storage}")]
        };
        let flags = Self::prune_options(&name, raw, storage_flags)?;

        Ok(Self {
            kind: JobKind::Prune,
            triggers: vec![Trigger {
                name: format!("prune-cron_{name}"),
                schedule: cron,
                storage: storage.clone(),
                arguments: None,
            }],
            binding: StorageBinding::Fixed(storage),
            name,
            flags,
            notify,
        })
    }

    fn multi_prune(
        repository: &str,
        name: String,
        raw: &RawPruneSchedule,
        entries: &BTreeMap<String, RawPruneEntry>,
        declared: &BTreeSet<String>,
    ) -> Result<Self> {
        let notify = validate_optional_email(raw.email_recipient.as_deref())?;
        if entries.is_empty() {
            return Err(CompileError::MissingCronEntry);
        }

        let storage_flags = vec![
            "-id \"${REPO_ID}\"".to_string(),
            "-storage \"${STORAGE_NAME}\"".to_string(),
        ];
        let flags = Self::prune_options(&name, raw, storage_flags)?;

        let mut triggers = Vec::with_capacity(entries.len());
        for (entry_name, entry) in entries {
            validate_snapshot_id(entry_name)?;
            let repo_id = entry.repo_id.as_deref().unwrap_or(repository);
            validate_snapshot_id(repo_id)?;
            let storage = resolve_storage(&name, repository, declared, entry.storage_name.as_deref())?;

            triggers.push(Trigger {
                name: format!("prune-cron_{name}_{entry_name}"),
                schedule: validate_cron_entry(entry.cron_entry.as_ref())?,
                arguments: Some((repo_id.to_string(), storage.clone())),
                storage,
            });
        }

        Ok(Self {
            kind: JobKind::Prune,
            name,
            binding: StorageBinding::Runtime,
            flags,
            notify,
            triggers,
        })
    }

    /// Flags shared by both prune forms: keep ranges, storage selection,
    /// tags, exhaustive, threads
    fn prune_options(
        job: &str,
        raw: &RawPruneSchedule,
        storage_flags: Vec<String>,
    ) -> Result<Vec<String>> {
        let ranges = validate_keep_ranges(job, raw.keep_ranges.as_deref())?;
        ensure_descending_ages(job, &ranges)?;
        validate_tags(job, &raw.tags)?;
        let threads = validate_threads(job, raw.threads)?;

        let mut flags: Vec<String> = ranges.iter().map(|range| range.flag()).collect();
        flags.extend(storage_flags);
        flags.extend(raw.tags.iter().map(|tag| format!("-t {tag}")));
        if raw.exhaustive {
            flags.push("-exhaustive".to_string());
        }
        flags.push(format!("-threads {threads}"));

        Ok(flags)
    }

    /// Artifact name of the generated script
    pub fn script_name(&self) -> String {
        format!("{}-script_{}", self.kind.as_str(), self.name)
    }

    /// Storages any trigger of this job works on
    pub fn storages(&self) -> BTreeSet<&str> {
        self.triggers.iter().map(|trigger| trigger.storage.as_str()).collect()
    }
}

/// Keys produced for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleArtifacts {
    pub script: ArtifactKey,
    pub crons: Vec<ArtifactKey>,
}

/// Emits the script and cron entries of a job
pub struct ScheduleCompiler<'a> {
    pub user: &'a str,
    pub layout: &'a RepositoryLayout,
    pub settings: &'a PlanSettings,
}

impl ScheduleCompiler<'_> {
    /// Generated script text for `job`
    pub fn script(&self, job: &JobPlan) -> String {
        render_script(&ScriptParams {
            kind: job.kind,
            job_name: &job.name,
            binding: &job.binding,
            tool: &self.settings.tool_binary,
            search_path: &self.settings.search_path,
            repo_dir: &self.layout.repo_dir,
            work_dir: &self.layout.work_dir,
            flags: &job.flags,
            notification: job.notify.as_deref().map(|recipient| Notification {
                mail_command: &self.settings.mail_command,
                recipient,
            }),
        })
    }

    /// Emit the script, which requires everything in `requires`, and one
    /// cron entry per trigger requiring the script
    pub fn compile(
        &self,
        graph: &mut DependencyGraph,
        job: &JobPlan,
        requires: &[ArtifactKey],
    ) -> Result<ScheduleArtifacts> {
        let path = self.layout.script_file(job.kind, &job.name);
        let script = graph.insert(
            job.script_name(),
            Artifact::File(FileSpec {
                path: path.clone(),
                owner: self.user.to_string(),
                group: self.user.to_string(),
                mode: SCRIPT_MODE,
                content: Some(self.script(job)),
            }),
        )?;
        graph.require_all(&script, requires)?;

        let mut crons = Vec::with_capacity(job.triggers.len());
        for trigger in &job.triggers {
            let cron = graph.insert(
                trigger.name.clone(),
                Artifact::CronEntry(CronSpec {
                    command: trigger.command(&path),
                    user: self.user.to_string(),
                    schedule: trigger.schedule.clone(),
                }),
            )?;
            graph.require(&cron, &script)?;
            crons.push(cron);
        }

        log::debug!(
            "{}: {} job with {} trigger(s)",
            job.name,
            job.kind.as_str(),
            crons.len()
        );

        Ok(ScheduleArtifacts { script, crons })
    }
}
