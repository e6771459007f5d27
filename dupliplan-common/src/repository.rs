//! Repository compilation
//!
//! A repository is validated completely before anything is emitted, and its
//! artifacts are built in a scratch graph that is merged only once every
//! part compiled. A failing repository therefore never leaves a partial
//! artifact set behind.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::{PlanConfig, RawRepository};
use crate::error::{CompileError, Result};
use crate::filter::FilterRuleSet;
use crate::format::format_counts;
use crate::graph::{
    Artifact, ArtifactKey, ArtifactKind, DependencyGraph, DirectorySpec, TidySpec,
};
use crate::layout::RepositoryLayout;
use crate::schedules::{JobPlan, ScheduleCompiler};
use crate::settings::PlanSettings;
use crate::storage::{StorageArtifacts, StorageCompiler, StorageTarget};
use crate::validation::{
    validate_filter_rules, validate_repository_path, validate_snapshot_id, validate_storage_names,
    validate_user,
};

/// Mode of every skeleton directory
pub const DIRECTORY_MODE: u32 = 0o700;

/// A fully validated repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: String,
    pub user: String,
    pub layout: RepositoryLayout,
    /// `default` first, then the others by name
    pub storages: Vec<StorageTarget>,
    pub filters: Option<FilterRuleSet>,
    /// Backups first, then prunes, each by schedule name
    pub jobs: Vec<JobPlan>,
}

impl Repository {
    pub fn from_raw(id: &str, raw: &RawRepository, settings: &PlanSettings) -> Result<Self> {
        validate_snapshot_id(id)?;
        validate_repository_path(&raw.repo_path)?;

        let user = raw
            .user
            .clone()
            .unwrap_or_else(|| settings.default_user.clone());
        validate_user(&user)?;

        validate_storage_names(&raw.storage_targets)?;
        let mut storages = raw
            .storage_targets
            .iter()
            .map(|(name, target)| StorageTarget::from_raw(name, target))
            .collect::<Result<Vec<_>>>()?;
        storages.sort_by_key(|target| !target.is_default());

        // An absent rule list means no filters file at all
        let filters = if raw.filter_rules.is_empty() {
            None
        } else {
            Some(validate_filter_rules(&raw.filter_rules)?)
        };

        let declared: BTreeSet<String> = raw.storage_targets.keys().cloned().collect();
        let mut jobs = Vec::new();
        for (name, schedule) in &raw.backup_schedules {
            jobs.push(JobPlan::backup(id, name, schedule, &declared)?);
        }
        for (name, schedule) in &raw.prune_schedules {
            jobs.push(JobPlan::prune(id, name, schedule, &declared)?);
        }

        Ok(Self {
            id: id.to_string(),
            layout: RepositoryLayout::new(&raw.repo_path, &settings.work_dir_name),
            user,
            storages,
            filters,
            jobs,
        })
    }
}

/// Emits the artifacts of whole repositories
pub struct RepositoryCompiler<'a> {
    settings: &'a PlanSettings,
}

impl<'a> RepositoryCompiler<'a> {
    pub fn new(settings: &'a PlanSettings) -> Self {
        Self { settings }
    }

    /// Compile one repository into `graph`
    ///
    /// Order: directory skeleton, `default` storage, other storages,
    /// filters, schedules. Each stage is edged to what it needs from the
    /// earlier ones.
    pub fn compile(&self, repository: &Repository, graph: &mut DependencyGraph) -> Result<()> {
        let mut local = DependencyGraph::new();
        let layout = &repository.layout;
        let user = repository.user.as_str();

        let directory = |path: &Path| ArtifactKey::new(ArtifactKind::Directory, path.display().to_string());

        for (path, parent) in layout.skeleton() {
            let key = local.insert(
                path.display().to_string(),
                Artifact::Directory(DirectorySpec {
                    path: path.to_path_buf(),
                    owner: user.to_string(),
                    group: user.to_string(),
                    mode: DIRECTORY_MODE,
                }),
            )?;
            if let Some(parent) = parent {
                local.require(&key, &directory(parent))?;
            }
        }

        let pref_dir = directory(&layout.pref_dir);
        let script_dir = directory(&layout.script_dir);
        let log_dir = directory(&layout.log_dir);
        let lock_dir = directory(&layout.lock_dir);

        let tidy = local.insert(
            layout.log_dir.display().to_string(),
            Artifact::TidyPolicy(TidySpec {
                path: layout.log_dir.clone(),
                age: self.settings.log_retention.clone(),
                matches: vec!["*.log".to_string()],
                recurse: false,
            }),
        )?;
        local.require(&tidy, &log_dir)?;

        let storage_compiler = StorageCompiler {
            repository: &repository.id,
            user,
            layout,
            settings: self.settings,
        };
        let mut storages: BTreeMap<&str, StorageArtifacts> = BTreeMap::new();
        let mut default: Option<StorageArtifacts> = None;
        for target in &repository.storages {
            let artifacts = storage_compiler.compile(&mut local, target, &script_dir, default.as_ref())?;
            if target.is_default() {
                default = Some(artifacts.clone());
            }
            storages.insert(target.name.as_str(), artifacts);
        }

        if let (Some(filters), Some(default)) = (&repository.filters, &default) {
            filters.compile(
                &mut local,
                &repository.id,
                user,
                layout,
                &[pref_dir, default.command.clone()],
            )?;
        }

        let schedule_compiler = ScheduleCompiler {
            user,
            layout,
            settings: self.settings,
        };
        for job in &repository.jobs {
            let mut requires = vec![script_dir.clone(), log_dir.clone(), lock_dir.clone()];
            for storage in job.storages() {
                if let Some(artifacts) = storages.get(storage) {
                    requires.extend(artifacts.keys());
                }
            }
            schedule_compiler.compile(&mut local, job, &requires)?;
        }

        let counts: Vec<(&str, usize)> = ArtifactKind::ALL
            .iter()
            .map(|kind| (kind.as_str(), local.count(*kind)))
            .collect();
        log::info!("Compiled repository '{}': {}", repository.id, format_counts(&counts));

        graph.merge(local)
    }
}

/// Result of compiling a whole plan
#[derive(Debug, Clone, Default)]
pub struct CompileOutcome {
    pub graph: DependencyGraph,
    pub compiled: Vec<String>,
    /// Selected names with no matching repository
    pub skipped: Vec<String>,
}

/// Compile every selected repository of a plan
///
/// Undeclared names in the selection are skipped with a warning. Any other
/// problem aborts the whole compilation, including two repositories sharing
/// one `repo_path`.
///
/// # Examples
/// ```
/// use dupliplan_common::{PlanConfig, PlanSettings, compile_plan};
///
/// let plan = PlanConfig::from_toml_str(r#"
/// selected = ["photos", "missing"]
///
/// [repositories.photos]
/// repo_path = "/srv/photos"
///
/// [repositories.photos.storage_targets.default]
/// target = { url = "b2://photo-bucket", b2_id = "id", b2_app_key = "key" }
/// "#).unwrap();
///
/// let outcome = compile_plan(&plan, &PlanSettings::default()).unwrap();
/// assert_eq!(outcome.compiled, vec!["photos"]);
/// assert_eq!(outcome.skipped, vec!["missing"]);
/// ```
pub fn compile_plan(config: &PlanConfig, settings: &PlanSettings) -> Result<CompileOutcome> {
    settings.validate()?;
    let compiler = RepositoryCompiler::new(settings);
    let mut outcome = CompileOutcome::default();
    let mut paths: BTreeMap<&Path, String> = BTreeMap::new();

    for name in config.selection() {
        if outcome.compiled.contains(&name) {
            log::debug!("Repository '{name}' selected twice");
            continue;
        }

        let Some(raw) = config.repositories.get(&name) else {
            log::warn!("Repository '{name}' is not declared, skipping");
            outcome.skipped.push(name);
            continue;
        };

        if let Some(first) = paths.get(raw.repo_path.as_path()) {
            return Err(CompileError::DuplicateRepositoryPath {
                path: raw.repo_path.display().to_string(),
                first: first.clone(),
                second: name,
            });
        }
        paths.insert(&raw.repo_path, name.clone());

        let repository = Repository::from_raw(&name, raw, settings)?;
        compiler.compile(&repository, &mut outcome.graph)?;
        outcome.compiled.push(name);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CronSpec;

    const MY_REPO: &str = r#"
[repositories.my-repo]
repo_path = "/my/backup/dir"
filter_rules = ["+foo/baz/*", "-*"]

[repositories.my-repo.storage_targets.default]
target = { url = "b2://my-bucket", b2_id = "my-id", b2_app_key = "my-key" }
encryption = { password = "batman" }

[repositories.my-repo.backup_schedules.daily]
cron_entry = { hour = 1, minute = 30 }
threads = 8
email_recipient = "me@example.com"
"#;

    const TWO_STORAGES: &str = r#"
[repositories.xen_files]
repo_path = "/srv/xen"
user = "backup"
filter_rules = ["-*.iso"]

[repositories.xen_files.storage_targets.default]
target = { url = "b2://xen-main", b2_id = "id", b2_app_key = "key" }

[repositories.xen_files.storage_targets.offsite]
target = { url = "b2://xen-offsite", b2_id = "id2", b2_app_key = "key2" }
encryption = { password = "robin", iterations = 16384 }

[repositories.xen_files.prune_schedules.weekly]
storage_name = "offsite"
cron_entry = { weekday = 0, hour = 3 }
keep_ranges = [{ interval = 0, min_age = 90 }, { interval = 7, min_age = 30 }]
"#;

    fn compile(plan: &str) -> Result<CompileOutcome> {
        let config = PlanConfig::from_toml_str(plan).unwrap();
        compile_plan(&config, &PlanSettings::default())
    }

    fn key(kind: ArtifactKind, name: &str) -> ArtifactKey {
        ArtifactKey::new(kind, name)
    }

    #[test]
    fn test_end_to_end_single_repository() {
        let graph = compile(MY_REPO).unwrap().graph;

        assert_eq!(graph.count(ArtifactKind::Directory), 5);
        assert_eq!(graph.count(ArtifactKind::TidyPolicy), 1);
        assert_eq!(graph.count(ArtifactKind::ExecCommand), 1);
        // env file, filters file, backup script
        assert_eq!(graph.count(ArtifactKind::File), 3);
        assert_eq!(graph.count(ArtifactKind::FileLine), 2);
        assert_eq!(graph.count(ArtifactKind::CronEntry), 1);

        let script_key = key(ArtifactKind::File, "backup-script_my-repo_default_daily");
        let script = match graph.get(&script_key) {
            Some(Artifact::File(spec)) => spec.content.clone().unwrap(),
            other => panic!("unexpected {other:?}"),
        };
        assert!(script.contains("  -threads 8 >\"${LOG_FILE}\" 2>&1\n"));
        assert!(!script.contains("-hash"));
        assert!(!script.contains("-limit-rate"));
        assert!(script.contains("# Notify someone about what happened"));

        let cron_key = key(ArtifactKind::CronEntry, "backup-cron_my-repo_default_daily");
        match graph.get(&cron_key) {
            Some(Artifact::CronEntry(CronSpec { schedule, user, .. })) => {
                assert_eq!(schedule.expression(), "30 1 * * *");
                assert_eq!(user, "root");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(graph.requirements(&cron_key), vec![&script_key]);

        let init = key(ArtifactKind::ExecCommand, "init_my-repo");
        assert!(graph.requirements(&script_key).contains(&&init));
    }

    #[test]
    fn test_application_order() {
        let graph = compile(MY_REPO).unwrap().graph;
        let order = graph.topological_order().unwrap();
        let position = |kind, name: &str| {
            let wanted = key(kind, name);
            order.iter().position(|k| **k == wanted).unwrap()
        };

        let work_dir = position(ArtifactKind::Directory, "/my/backup/dir/.duplicacy/dupliplan");
        let env = position(ArtifactKind::File, "env_my-repo_default");
        let init = position(ArtifactKind::ExecCommand, "init_my-repo");
        let filters = position(ArtifactKind::File, "filters_my-repo");
        let script = position(ArtifactKind::File, "backup-script_my-repo_default_daily");
        let cron = position(ArtifactKind::CronEntry, "backup-cron_my-repo_default_daily");

        assert!(work_dir < env);
        assert!(env < init);
        assert!(init < filters);
        assert!(init < script);
        assert!(script < cron);
    }

    #[test]
    fn test_additional_storage_depends_on_default() {
        let graph = compile(TWO_STORAGES).unwrap().graph;

        let init = key(ArtifactKind::ExecCommand, "init_xen_files");
        let add = key(ArtifactKind::ExecCommand, "add_xen_files_offsite");
        assert!(graph.requirements(&add).contains(&&init));

        match graph.get(&add) {
            Some(Artifact::ExecCommand(spec)) => {
                assert_eq!(
                    spec.command,
                    "duplicacy add -e -iterations 16384 offsite xen_files b2://xen-offsite"
                );
                assert_eq!(spec.onlyif.len(), 2);
                assert_eq!(spec.user, "backup");
            }
            other => panic!("unexpected {other:?}"),
        }

        let filters = key(ArtifactKind::File, "filters_xen_files");
        assert!(graph.requirements(&filters).contains(&&init));

        let script = key(ArtifactKind::File, "prune-script_xen_files_offsite_weekly");
        let requirements = graph.requirements(&script);
        assert!(requirements.contains(&&add));
        assert!(requirements.contains(&&key(ArtifactKind::File, "env_xen_files_offsite")));
        assert!(!requirements.contains(&&key(ArtifactKind::File, "env_xen_files_default")));
    }

    #[test]
    fn test_no_filters_file_without_rules() {
        let plan = MY_REPO.replace("filter_rules = [\"+foo/baz/*\", \"-*\"]\n", "");
        let graph = compile(&plan).unwrap().graph;
        assert_eq!(graph.count(ArtifactKind::FileLine), 0);
        assert!(graph.find(ArtifactKind::File, "filters_my-repo").is_none());
    }

    #[test]
    fn test_storage_set_errors() {
        let no_targets = r#"
[repositories.r]
repo_path = "/srv/r"
"#;
        assert_eq!(
            compile(no_targets).unwrap_err().to_string(),
            "At least one target must be specified!"
        );

        let no_default = r#"
[repositories.r]
repo_path = "/srv/r"
[repositories.r.storage_targets.storage1]
target = { url = "b2://a", b2_id = "id", b2_app_key = "key" }
"#;
        assert!(compile(no_default).unwrap_err().to_string().contains("'default'"));
    }

    #[test]
    fn test_failing_repository_aborts_compilation() {
        let plan = format!(
            "{MY_REPO}\n[repositories.my-repo.prune_schedules.broken]\ncron_entry = {{ hour = 0 }}\n"
        );
        assert_eq!(compile(&plan).unwrap_err(), CompileError::MissingKeepRanges);
    }

    #[test]
    fn test_selection_skips_undeclared_repositories() {
        let plan = format!("selected = [\"ghost\", \"my-repo\", \"my-repo\"]\n{MY_REPO}");
        let outcome = compile(&plan).unwrap();

        assert_eq!(outcome.compiled, vec!["my-repo"]);
        assert_eq!(outcome.skipped, vec!["ghost"]);
        assert_eq!(outcome.graph.count(ArtifactKind::ExecCommand), 1);
    }

    #[test]
    fn test_shared_repository_path_is_rejected() {
        let shared = r#"
[repositories.alpha]
repo_path = "/srv/shared"
[repositories.alpha.storage_targets.default]
target = { url = "b2://alpha", b2_id = "alpha-id", b2_app_key = "key" }

[repositories.beta]
repo_path = "/srv/shared/"
[repositories.beta.storage_targets.default]
target = { url = "b2://beta", b2_id = "beta-id", b2_app_key = "key" }
"#;
        assert_eq!(
            compile(shared).unwrap_err(),
            CompileError::DuplicateRepositoryPath {
                path: "/srv/shared/".into(),
                first: "alpha".into(),
                second: "beta".into(),
            }
        );

        // Selecting only one of them is fine
        let outcome = compile(&format!("selected = [\"beta\"]\n{shared}")).unwrap();
        assert_eq!(outcome.graph.count(ArtifactKind::ExecCommand), 1);
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let plan = format!("{MY_REPO}\n{TWO_STORAGES}");

        let first = compile(&plan).unwrap().graph;
        let second = compile(&plan).unwrap().graph;
        assert_eq!(first, second);

        let first_json = first.plan().unwrap().to_json().unwrap();
        let second_json = second.plan().unwrap().to_json().unwrap();
        assert_eq!(first_json, second_json);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let config = PlanConfig::from_toml_str(MY_REPO).unwrap();
        let settings = PlanSettings {
            tool_binary: "duplicacy --debug".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            compile_plan(&config, &settings),
            Err(CompileError::InvalidSetting { .. })
        ));
    }
}
