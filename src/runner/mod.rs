mod hook;
mod run;
pub mod types;

pub use hook::SubprocessHook;
pub use run::DbtTaskRunner;
pub use types::{ExecutionResult, TaskOutcome};
