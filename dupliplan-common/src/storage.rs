//! Storage targets
//!
//! Each target of a repository becomes an environment file plus one tool
//! invocation. The `default` target is initialized with `init` and creates
//! the preferences store; every other target is registered with `add`,
//! guarded so it only runs while the preferences do not list it yet.

use crate::backend::{Backend, EnvVar, env_var_name};
use crate::chunk::ChunkParameters;
use crate::config::RawStorageTarget;
use crate::error::Result;
use crate::graph::{Artifact, ArtifactKey, DependencyGraph, ExecSpec, FileSpec};
use crate::layout::RepositoryLayout;
use crate::settings::PlanSettings;
use crate::validation::validate_encryption;

/// Name of the storage every repository must declare
pub const DEFAULT_STORAGE: &str = "default";

/// Environment files hold credentials and are readable by the owner only
pub const ENV_FILE_MODE: u32 = 0o600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encryption {
    pub password: String,
    pub iterations: Option<u32>,
}

impl Encryption {
    pub fn flags(&self) -> Vec<String> {
        let mut flags = vec!["-e".to_string()];
        if let Some(iterations) = self.iterations {
            flags.push("-iterations".to_string());
            flags.push(iterations.to_string());
        }
        flags
    }
}

/// A validated storage target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTarget {
    pub name: String,
    pub backend: Backend,
    pub encryption: Option<Encryption>,
    pub chunks: Option<ChunkParameters>,
}

impl StorageTarget {
    pub fn from_raw(name: &str, raw: &RawStorageTarget) -> Result<Self> {
        let backend = Backend::from_raw(name, raw.target.as_ref())?;
        let encryption = validate_encryption(name, raw.encryption.as_ref())?;
        let chunks = raw
            .chunk_parameters
            .as_ref()
            .map(|chunks| ChunkParameters::from_raw(name, chunks))
            .transpose()?;

        Ok(Self {
            name: name.to_string(),
            backend,
            encryption,
            chunks,
        })
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_STORAGE
    }

    /// Password variable scoped to this storage, if encrypted
    pub fn password_var(&self) -> Option<EnvVar> {
        self.encryption
            .as_ref()
            .map(|encryption| EnvVar::new(env_var_name(&self.name, "PASSWORD"), &encryption.password))
    }

    /// `init` for the default target, `add` for the others
    pub fn command(&self, tool: &str, repository: &str) -> String {
        let capabilities = self.backend.capabilities();
        let mut parts = vec![tool.to_string()];

        if self.is_default() {
            parts.push("init".to_string());
        } else {
            parts.push("add".to_string());
        }

        if let Some(encryption) = &self.encryption {
            parts.extend(encryption.flags());
        }
        if let Some(chunks) = &self.chunks {
            parts.extend(chunks.flags());
        }
        parts.extend(capabilities.cli_flags());

        if !self.is_default() {
            parts.push(self.name.clone());
        }
        parts.push(repository.to_string());
        parts.push(capabilities.url().to_string());

        parts.join(" ")
    }

    /// Assignments the init/add command runs with
    ///
    /// The default target lists the password first; additional targets list
    /// their credentials first and their scoped password last.
    pub fn exec_environment(&self) -> Vec<String> {
        let credentials = self.backend.capabilities().env_exports(&self.name);
        let password = self.password_var();

        let ordered: Vec<EnvVar> = if self.is_default() {
            password.into_iter().chain(credentials).collect()
        } else {
            credentials.into_iter().chain(password).collect()
        };

        ordered.iter().map(EnvVar::assignment).collect()
    }

    /// Body of the environment file sourced by schedule scripts
    pub fn env_file_content(&self) -> String {
        let capabilities = self.backend.capabilities();
        let mut lines = vec!["#!/bin/sh".to_string()];

        if capabilities.requires_credentials() {
            lines.push(capabilities.export_comment().to_string());
            lines.extend(
                capabilities
                    .env_exports(&self.name)
                    .iter()
                    .map(EnvVar::export_line),
            );
        }

        // Only the default password is exported; scoped passwords stay in
        // the add command's environment.
        if let Some(password) = self.password_var().filter(|_| self.is_default()) {
            lines.push("# Export Encryption Password".to_string());
            lines.push(password.export_line());
        }

        let mut content = lines.join("\n");
        content.push('\n');
        content
    }

    /// Shell tests that must all pass before `add` runs
    pub fn add_guard(&self, layout: &RepositoryLayout) -> Vec<String> {
        let preferences = layout.preferences_file();
        vec![
            format!("test -f {}", preferences.display()),
            format!(
                "test 0 -eq $(sed -e 's/[\",]//g' {} | awk '$1 == \"name:\" {{print $2}}' | grep -x {} | wc -l)",
                preferences.display(),
                self.name
            ),
        ]
    }
}

/// Keys produced for one storage target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageArtifacts {
    pub env_file: ArtifactKey,
    pub command: ArtifactKey,
}

impl StorageArtifacts {
    pub fn keys(&self) -> [ArtifactKey; 2] {
        [self.env_file.clone(), self.command.clone()]
    }
}

/// Emits the artifacts of the storage targets of one repository
pub struct StorageCompiler<'a> {
    pub repository: &'a str,
    pub user: &'a str,
    pub layout: &'a RepositoryLayout,
    pub settings: &'a PlanSettings,
}

impl StorageCompiler<'_> {
    /// Emit the env file and init/add command of `target`
    ///
    /// `script_dir` is the directory artifact the env file lives in.
    /// Additional targets pass the artifacts of `default`, which both of
    /// their artifacts then require.
    pub fn compile(
        &self,
        graph: &mut DependencyGraph,
        target: &StorageTarget,
        script_dir: &ArtifactKey,
        default: Option<&StorageArtifacts>,
    ) -> Result<StorageArtifacts> {
        let env_file = graph.insert(
            format!("env_{}_{}", self.repository, target.name),
            Artifact::File(FileSpec {
                path: self.layout.env_file(&target.name),
                owner: self.user.to_string(),
                group: self.user.to_string(),
                mode: ENV_FILE_MODE,
                content: Some(target.env_file_content()),
            }),
        )?;
        graph.require(&env_file, script_dir)?;

        let (name, onlyif) = if target.is_default() {
            (format!("init_{}", self.repository), Vec::new())
        } else {
            (
                format!("add_{}_{}", self.repository, target.name),
                target.add_guard(self.layout),
            )
        };

        let command = graph.insert(
            name,
            Artifact::ExecCommand(ExecSpec {
                command: target.command(&self.settings.tool_binary, self.repository),
                cwd: self.layout.repo_dir.clone(),
                search_path: self.settings.search_path.clone(),
                user: self.user.to_string(),
                environment: target.exec_environment(),
                onlyif,
            }),
        )?;
        graph.require(&command, &env_file)?;

        if let Some(default) = default {
            graph.require(&env_file, &default.command)?;
            graph.require(&command, &default.command)?;
        }

        log::debug!("{}: compiled storage '{}'", self.repository, target.name);

        Ok(StorageArtifacts { env_file, command })
    }
}
