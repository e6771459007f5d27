// Include/exclude rules written to the repository's filters file

use crate::error::{CompileError, Result};
use crate::graph::{Artifact, ArtifactKey, DependencyGraph, FileLineSpec, FileSpec};
use crate::layout::RepositoryLayout;

pub const FILTER_FILE_MODE: u32 = 0o644;

/// Ordered filter rules; the first matching rule wins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRuleSet {
    rules: Vec<String>,
}

/// Keys produced for a filter set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterArtifacts {
    pub file: ArtifactKey,
    pub lines: Vec<ArtifactKey>,
}

impl FilterRuleSet {
    pub fn new(rules: Vec<String>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    /// Emit the filters file and one line artifact per rule
    ///
    /// Line `i` requires the file and line `i - 1`, so the materializer
    /// appends rules in declaration order. Only the file carries
    /// `requires`; the lines inherit them through the chain.
    pub fn compile(
        &self,
        graph: &mut DependencyGraph,
        repository: &str,
        user: &str,
        layout: &RepositoryLayout,
        requires: &[ArtifactKey],
    ) -> Result<FilterArtifacts> {
        if self.rules.is_empty() {
            return Err(CompileError::EmptyFilterRules);
        }

        let path = layout.filters_file();
        let file = graph.insert(
            format!("filters_{repository}"),
            Artifact::File(FileSpec {
                path: path.clone(),
                owner: user.to_string(),
                group: user.to_string(),
                mode: FILTER_FILE_MODE,
                content: None,
            }),
        )?;
        graph.require_all(&file, requires)?;

        let mut lines: Vec<ArtifactKey> = Vec::with_capacity(self.rules.len());
        for (index, rule) in self.rules.iter().enumerate() {
            let line = graph.insert(
                format!("{repository}_filters_rule_{index}"),
                Artifact::FileLine(FileLineSpec {
                    path: path.clone(),
                    line: rule.clone(),
                }),
            )?;
            graph.require(&line, &file)?;
            if let Some(previous) = lines.last() {
                graph.require(&line, previous)?;
            }
            lines.push(line);
        }

        log::debug!("{repository}: {} filter rules", lines.len());

        Ok(FilterArtifacts { file, lines })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ArtifactKind;
    use std::path::{Path, PathBuf};

    fn layout() -> RepositoryLayout {
        RepositoryLayout::new(Path::new("/my/backup/dir"), "dupliplan")
    }

    #[test]
    fn test_rule_chain() {
        let rules = FilterRuleSet::new(vec!["+foo/bar/*".into(), "-*".into()]);
        let mut graph = DependencyGraph::new();

        let artifacts = rules
            .compile(&mut graph, "my-repo", "root", &layout(), &[])
            .unwrap();

        assert_eq!(graph.count(ArtifactKind::File), 1);
        assert_eq!(graph.count(ArtifactKind::FileLine), 2);
        assert_eq!(artifacts.lines[0].name, "my-repo_filters_rule_0");

        assert_eq!(graph.requirements(&artifacts.lines[0]), vec![&artifacts.file]);
        let second = graph.requirements(&artifacts.lines[1]);
        assert_eq!(second.len(), 2);
        assert!(second.contains(&&artifacts.file));
        assert!(second.contains(&&artifacts.lines[0]));

        match graph.get(&artifacts.lines[1]) {
            Some(Artifact::FileLine(spec)) => {
                assert_eq!(spec.line, "-*");
                assert_eq!(spec.path, PathBuf::from("/my/backup/dir/.duplicacy/filters"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_file_spec() {
        let rules = FilterRuleSet::new(vec!["-*.tmp".into()]);
        let mut graph = DependencyGraph::new();
        let artifacts = rules
            .compile(&mut graph, "my-repo", "backup", &layout(), &[])
            .unwrap();

        match graph.get(&artifacts.file) {
            Some(Artifact::File(spec)) => {
                assert_eq!(spec.owner, "backup");
                assert_eq!(spec.mode, 0o644);
                assert!(spec.content.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_rule_set() {
        let mut graph = DependencyGraph::new();
        let err = FilterRuleSet::new(Vec::new())
            .compile(&mut graph, "my-repo", "root", &layout(), &[])
            .unwrap_err();
        assert_eq!(err.to_string(), "At least one filter entry must be provided!");
        assert!(graph.is_empty());
    }
}
