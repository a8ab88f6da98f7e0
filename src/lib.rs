//! Managed dbt CLI execution for workflow orchestrators.
//!
//! The orchestrator hands this crate a [`TaskConfig`] plus a [`DbtCommand`]
//! and gets back one subprocess invocation of the dbt CLI, executed against
//! a writable mirror of the project directory and classified into
//! success / skipped / failed.
//!
//! The interesting part lives in [`mirror`]: a lock-guarded, differential
//! copy of the project into shared temporary storage so that concurrent
//! task instances (possibly from different workflow runs on the same
//! project) do not corrupt each other's working copy.
//!
//! [`parser`] builds a project's resource inventory (models, snapshots,
//! seeds, with upstream dependencies and selector configuration) without
//! invoking dbt, for orchestrators that fan a project out into one task
//! per resource.

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod mirror;
pub mod parser;
pub mod profile;
pub mod runner;

pub use command::DbtCommand;
pub use config::{Settings, TaskConfig};
pub use context::ExecutionContext;
pub use error::TaskError;
pub use mirror::ProjectMirror;
pub use parser::{DbtProject, DbtResource, ResourceConfig, ResourceKind};
pub use profile::{Connection, ProfileResolver, ResolvedProfile, WarehouseProfiles};
pub use runner::{DbtTaskRunner, ExecutionResult, TaskOutcome};
