//! Compile errors
//!
//! Every configuration problem is fatal and maps to one variant here. The
//! rendered messages are stable so failures can be traced back to the exact
//! offending field.

use thiserror::Error;

/// A fatal problem found while validating or compiling a plan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("A schedule entry must be specified in cron resource format!")]
    MissingCronEntry,

    #[error("Invalid cron field {field}: '{value}'")]
    InvalidCronField { field: &'static str, value: String },

    #[error("At least one keep range must be specified!")]
    MissingKeepRanges,

    #[error("{job}: keep range entry missing '{field}'!")]
    KeepRangeMissingField { job: String, field: &'static str },

    #[error("{job}: keep ranges must be ordered by decreasing min_age ({previous} before {next})")]
    KeepRangeOrder {
        job: String,
        previous: String,
        next: String,
    },

    #[error("At least one filter entry must be provided!")]
    EmptyFilterRules,

    #[error("Invalid filter rule '{0}': rules must begin with '+', '-', 'i:' or 'e:'")]
    InvalidFilterRule(String),

    #[error("At least one target must be specified!")]
    NoStorageTargets,

    #[error("A storage target named 'default' must be defined!")]
    MissingDefaultStorage,

    #[error("$target is mandatory! (storage '{storage}')")]
    MissingTarget { storage: String },

    #[error("Unrecognized url: {0}")]
    UnrecognizedUrl(String),

    #[error("${field} is mandatory for {storage}")]
    MissingCredential { field: &'static str, storage: String },

    #[error("Password mandatory when encryption is enabled! (storage '{storage}')")]
    MissingPassword { storage: String },

    #[error("Unsafe character {character:?} in {field} of {owner}")]
    UnsafeValue {
        field: &'static str,
        owner: String,
        character: char,
    },

    #[error("Invalid iteration count for {storage}: '{value}'")]
    InvalidIterations { storage: String, value: String },

    #[error("Invalid chunk parameters for {storage}: {reason}")]
    InvalidChunkParameters { storage: String, reason: String },

    #[error("Invalid snapshot id: '{0}'")]
    InvalidSnapshotId(String),

    #[error("Storage names '{first}' and '{second}' map to the same environment variables")]
    EnvNameCollision { first: String, second: String },

    #[error("Invalid repository path '{path}': {reason}")]
    InvalidRepositoryPath { path: String, reason: String },

    #[error("Invalid user name: '{0}'")]
    InvalidUser(String),

    #[error("{job}: thread count must be at least 1")]
    InvalidThreads { job: String },

    #[error("{job}: rate limit must be greater than 0")]
    InvalidRateLimit { job: String },

    #[error("{job}: invalid tag '{tag}'")]
    InvalidTag { job: String, tag: String },

    #[error("{job}: storage '{storage}' is not declared in repository '{repository}'")]
    UndeclaredStorage {
        job: String,
        storage: String,
        repository: String,
    },

    #[error("{job}: a prune schedule cannot mix the single and multi-schedule forms!")]
    MixedPruneForms { job: String },

    #[error("Invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("Duplicate artifact {0} with conflicting content")]
    DuplicateArtifact(String),

    #[error("{artifact} writes {path}, which {owner} already manages")]
    ConflictingPath {
        artifact: String,
        path: String,
        owner: String,
    },

    #[error("Repository path {path} is shared by '{first}' and '{second}'")]
    DuplicateRepositoryPath {
        path: String,
        first: String,
        second: String,
    },

    #[error("Artifact {consumer} requires unknown artifact {producer}")]
    UnknownDependency { consumer: String, producer: String },

    #[error("Dependency cycle detected involving {0}")]
    DependencyCycle(String),
}

/// Result alias used throughout the compiler
pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_keep_stable_prefixes() {
        assert!(
            CompileError::InvalidEmail("batman".into())
                .to_string()
                .starts_with("Invalid email address:")
        );
        assert_eq!(
            CompileError::MissingCredential {
                field: "b2_id",
                storage: "other_bucket".into()
            }
            .to_string(),
            "$b2_id is mandatory for other_bucket"
        );
        assert_eq!(
            CompileError::KeepRangeMissingField {
                job: "my-repo_default_daily-0000".into(),
                field: "min_age"
            }
            .to_string(),
            "my-repo_default_daily-0000: keep range entry missing 'min_age'!"
        );
        assert!(
            CompileError::MissingTarget {
                storage: "x".into()
            }
            .to_string()
            .starts_with("$target is mandatory!")
        );
    }
}
