// Backup plan compiler shared by the dupliplan front ends

pub mod backend;
pub mod chunk;
pub mod config;
pub mod error;
pub mod filter;
pub mod format;
pub mod graph;
pub mod layout;
pub mod repository;
pub mod retention;
pub mod schedules;
pub mod script;
pub mod settings;
pub mod storage;
pub mod validation;

pub use backend::{Backend, BackendCapabilities, EnvVar};
pub use chunk::ChunkParameters;
pub use config::PlanConfig;
pub use error::{CompileError, Result};
pub use filter::FilterRuleSet;
pub use format::format_bytes;
pub use graph::{Artifact, ArtifactKey, ArtifactKind, DependencyGraph, Plan};
pub use layout::RepositoryLayout;
pub use repository::{CompileOutcome, Repository, RepositoryCompiler, compile_plan};
pub use retention::KeepRange;
pub use schedules::{CronTrigger, JobKind, JobPlan};
pub use script::render_script;
pub use settings::{PlanSettings, default_config_path};
pub use storage::{DEFAULT_STORAGE, StorageTarget};
pub use validation::validate_snapshot_id;
