//! Artifact registry and dependency graph
//!
//! Every compiler stage emits into one [`DependencyGraph`]. Artifacts are
//! keyed by kind and name; inserting the same key twice is accepted only when
//! the payloads are identical. Edges point from a consumer to the producers it
//! requires, and the external materializer applies artifacts in
//! [`DependencyGraph::topological_order`].

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use crate::error::{CompileError, Result};
use crate::schedules::CronTrigger;

/// Kind of artifact the materializer must realize
///
/// Declaration order doubles as the tie-break when several artifacts are
/// ready at once, so directories come out before files and cron entries
/// last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ArtifactKind {
    #[serde(rename = "directory")]
    Directory,
    #[serde(rename = "tidy")]
    TidyPolicy,
    #[serde(rename = "file")]
    File,
    #[serde(rename = "file_line")]
    FileLine,
    #[serde(rename = "exec")]
    ExecCommand,
    #[serde(rename = "cron")]
    CronEntry,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::Directory,
        ArtifactKind::TidyPolicy,
        ArtifactKind::File,
        ArtifactKind::FileLine,
        ArtifactKind::ExecCommand,
        ArtifactKind::CronEntry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Directory => "directory",
            ArtifactKind::TidyPolicy => "tidy",
            ArtifactKind::File => "file",
            ArtifactKind::FileLine => "file_line",
            ArtifactKind::ExecCommand => "exec",
            ArtifactKind::CronEntry => "cron",
        }
    }
}

/// Unique identity of an artifact, rendered as `kind[name]`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    pub kind: ArtifactKind,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(kind: ArtifactKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind.as_str(), self.name)
    }
}

impl Serialize for ArtifactKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn serialize_mode<S: Serializer>(mode: &u32, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{mode:04o}"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectorySpec {
    pub path: PathBuf,
    pub owner: String,
    pub group: String,
    #[serde(serialize_with = "serialize_mode")]
    pub mode: u32,
}

/// A managed file; `content` is `None` when lines are managed separately
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSpec {
    pub path: PathBuf,
    pub owner: String,
    pub group: String,
    #[serde(serialize_with = "serialize_mode")]
    pub mode: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One line that must be present in a managed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLineSpec {
    pub path: PathBuf,
    pub line: String,
}

/// A command run once by the materializer
///
/// When `onlyif` is non-empty, every listed shell test must succeed before
/// `command` runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecSpec {
    pub command: String,
    pub cwd: PathBuf,
    pub search_path: String,
    pub user: String,
    pub environment: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub onlyif: Vec<String>,
}

/// A crontab line; unset fields are wildcards
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CronSpec {
    pub command: String,
    pub user: String,
    #[serde(flatten)]
    pub schedule: CronTrigger,
}

impl CronSpec {
    /// Full crontab line including the user column
    pub fn crontab_line(&self) -> String {
        format!("{} {} {}", self.schedule.expression(), self.user, self.command)
    }
}

/// Periodic cleanup of old files under a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TidySpec {
    pub path: PathBuf,
    pub age: String,
    pub matches: Vec<String>,
    pub recurse: bool,
}

/// Descriptor handed to the external materializer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum Artifact {
    #[serde(rename = "directory")]
    Directory(DirectorySpec),
    #[serde(rename = "tidy")]
    TidyPolicy(TidySpec),
    #[serde(rename = "file")]
    File(FileSpec),
    #[serde(rename = "file_line")]
    FileLine(FileLineSpec),
    #[serde(rename = "exec")]
    ExecCommand(ExecSpec),
    #[serde(rename = "cron")]
    CronEntry(CronSpec),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Directory(_) => ArtifactKind::Directory,
            Artifact::TidyPolicy(_) => ArtifactKind::TidyPolicy,
            Artifact::File(_) => ArtifactKind::File,
            Artifact::FileLine(_) => ArtifactKind::FileLine,
            Artifact::ExecCommand(_) => ArtifactKind::ExecCommand,
            Artifact::CronEntry(_) => ArtifactKind::CronEntry,
        }
    }
}

/// Artifacts plus directed "requires" edges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    artifacts: BTreeMap<ArtifactKey, Artifact>,
    requires: BTreeMap<ArtifactKey, BTreeSet<ArtifactKey>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact and return its key
    ///
    /// Re-inserting an identical artifact is a no-op; a different payload
    /// under an existing key is rejected.
    pub fn insert(&mut self, name: impl Into<String>, artifact: Artifact) -> Result<ArtifactKey> {
        let key = ArtifactKey::new(artifact.kind(), name);

        match self.artifacts.get(&key) {
            Some(existing) if *existing == artifact => {
                log::debug!("Artifact {key} already declared, skipping");
            }
            Some(_) => return Err(CompileError::DuplicateArtifact(key.to_string())),
            None => {
                self.ensure_path_free(&key, &artifact)?;
                log::debug!("Emitting {key}");
                self.artifacts.insert(key.clone(), artifact);
            }
        }

        Ok(key)
    }

    /// Reject a file artifact whose path another file artifact already writes
    fn ensure_path_free(&self, key: &ArtifactKey, artifact: &Artifact) -> Result<()> {
        let Artifact::File(spec) = artifact else {
            return Ok(());
        };

        let owner = self.artifacts.iter().find(|(existing, other)| {
            *existing != key && matches!(other, Artifact::File(other) if other.path == spec.path)
        });

        match owner {
            Some((owner, _)) => Err(CompileError::ConflictingPath {
                artifact: key.to_string(),
                path: spec.path.display().to_string(),
                owner: owner.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Record that `consumer` must be applied after `producer`
    pub fn require(&mut self, consumer: &ArtifactKey, producer: &ArtifactKey) -> Result<()> {
        for key in [consumer, producer] {
            if !self.artifacts.contains_key(key) {
                return Err(CompileError::UnknownDependency {
                    consumer: consumer.to_string(),
                    producer: producer.to_string(),
                });
            }
        }

        if consumer == producer {
            return Err(CompileError::DependencyCycle(consumer.to_string()));
        }

        self.requires
            .entry(consumer.clone())
            .or_default()
            .insert(producer.clone());
        Ok(())
    }

    /// Record that `consumer` requires every key in `producers`
    pub fn require_all(&mut self, consumer: &ArtifactKey, producers: &[ArtifactKey]) -> Result<()> {
        for producer in producers {
            self.require(consumer, producer)?;
        }
        Ok(())
    }

    /// Fold another graph into this one
    ///
    /// Either everything is merged or, on a conflicting artifact, nothing is.
    pub fn merge(&mut self, other: DependencyGraph) -> Result<()> {
        for (key, artifact) in &other.artifacts {
            match self.artifacts.get(key) {
                Some(existing) if existing != artifact => {
                    return Err(CompileError::DuplicateArtifact(key.to_string()));
                }
                Some(_) => {}
                None => self.ensure_path_free(key, artifact)?,
            }
        }

        self.artifacts.extend(other.artifacts);
        for (consumer, producers) in other.requires {
            self.requires.entry(consumer).or_default().extend(producers);
        }
        Ok(())
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<&Artifact> {
        self.artifacts.get(key)
    }

    /// Look up an artifact by kind and name
    pub fn find(&self, kind: ArtifactKind, name: &str) -> Option<&Artifact> {
        self.artifacts.get(&ArtifactKey::new(kind, name))
    }

    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.artifacts.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// All artifacts in key order
    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactKey, &Artifact)> {
        self.artifacts.iter()
    }

    /// Number of artifacts of one kind
    pub fn count(&self, kind: ArtifactKind) -> usize {
        self.artifacts.keys().filter(|key| key.kind == kind).count()
    }

    /// Direct requirements of an artifact, in key order
    pub fn requirements(&self, key: &ArtifactKey) -> Vec<&ArtifactKey> {
        self.requires
            .get(key)
            .map(|producers| producers.iter().collect())
            .unwrap_or_default()
    }

    /// Deterministic application order consistent with every edge
    ///
    /// Among artifacts that are ready at the same time, lower kinds
    /// (directories first) and then lower names go first.
    pub fn topological_order(&self) -> Result<Vec<&ArtifactKey>> {
        let mut pending: BTreeMap<&ArtifactKey, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&ArtifactKey, Vec<&ArtifactKey>> = BTreeMap::new();

        for key in self.artifacts.keys() {
            let producers = self.requires.get(key);
            pending.insert(key, producers.map_or(0, BTreeSet::len));
            for producer in producers.into_iter().flatten() {
                dependents.entry(producer).or_default().push(key);
            }
        }

        let mut ready: BTreeSet<&ArtifactKey> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| *key)
            .collect();
        let mut order = Vec::with_capacity(self.artifacts.len());

        while let Some(key) = ready.pop_first() {
            order.push(key);
            for dependent in dependents.get(key).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != self.artifacts.len() {
            let stuck = pending
                .iter()
                .find(|(_, count)| **count > 0)
                .map(|(key, _)| key.to_string())
                .unwrap_or_default();
            return Err(CompileError::DependencyCycle(stuck));
        }

        Ok(order)
    }

    /// Ordered, serializable view for the materializer
    pub fn plan(&self) -> Result<Plan<'_>> {
        let steps = self
            .topological_order()?
            .into_iter()
            .map(|key| PlanStep {
                key,
                requires: self.requirements(key),
                artifact: &self.artifacts[key],
            })
            .collect();
        Ok(Plan { steps })
    }
}

/// Artifacts in application order
#[derive(Debug, Serialize)]
pub struct Plan<'a> {
    pub steps: Vec<PlanStep<'a>>,
}

#[derive(Debug, Serialize)]
pub struct PlanStep<'a> {
    pub key: &'a ArtifactKey,
    pub requires: Vec<&'a ArtifactKey>,
    pub artifact: &'a Artifact,
}

impl Plan<'_> {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
