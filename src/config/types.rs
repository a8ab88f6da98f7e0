use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-level knobs threaded into the mirror and the runner at
/// construction time. Tests redirect `tmp_root`/`profiles_dir` to a
/// scratch directory instead of touching shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root under which writable project mirrors are kept.
    #[serde(default = "default_tmp_root")]
    pub tmp_root: PathBuf,

    /// Directory dbt reads its profiles.yml from. Forced onto the
    /// subprocess via DBT_PROFILES_DIR so user config cannot override it.
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,

    /// How long a sync call waits for the mirror lock before proceeding
    /// unsynchronized.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// A lock file older than this is considered abandoned and reclaimed,
    /// but only when the holder's liveness cannot be determined; a lock
    /// held by a known-live process is never reclaimed.
    #[serde(default = "default_lock_stale_after_secs")]
    pub lock_stale_after_secs: u64,
}

fn default_tmp_root() -> PathBuf {
    PathBuf::from("/tmp/dbt")
}

fn default_profiles_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".dbt")
}

fn default_lock_timeout_secs() -> u64 {
    15
}

fn default_lock_stale_after_secs() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tmp_root: default_tmp_root(),
            profiles_dir: default_profiles_dir(),
            lock_timeout_secs: default_lock_timeout_secs(),
            lock_stale_after_secs: default_lock_stale_after_secs(),
        }
    }
}

impl Settings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }
}

/// Per-invocation task configuration. Built once at task-definition time
/// and read-only afterwards; the sub-command itself is a separate
/// [`crate::DbtCommand`] value handed to the runner.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Directory holding the dbt_project.yml. May be read-only or shared;
    /// execution happens against a writable mirror of it.
    pub project_dir: PathBuf,

    /// Connection identifier resolved by the profile resolver.
    pub conn_id: String,

    /// dbt node selection (`--select`).
    pub select: Option<String>,
    /// dbt node exclusion (`--exclude`).
    pub exclude: Option<String>,
    /// Named selector from selectors.yml (`--selector`).
    pub selector: Option<String>,
    /// Project variable overrides, rendered as a YAML string for `--vars`.
    pub vars: Option<serde_yaml_ng::Value>,
    /// dbt node selection, legacy spelling (`--models`).
    pub models: Option<String>,

    pub cache_selected_only: bool,
    pub no_version_check: bool,
    pub fail_fast: bool,
    pub quiet: bool,
    pub warn_error: bool,

    /// Override the target database instead of the one on the connection.
    pub db_name: Option<String>,
    /// Override the target schema instead of the one on the connection.
    pub schema: Option<String>,

    /// Explicit environment for the subprocess. When `append_env` is set
    /// these are merged over the current process environment; otherwise
    /// they replace it entirely.
    pub env: Option<HashMap<String, String>>,
    pub append_env: bool,

    /// Exit code reinterpreted as an orchestrator-level skip. `None`
    /// treats every non-zero exit as a failure.
    pub skip_exit_code: Option<i32>,

    /// If true, a kill sends SIGINT to the whole process group so dbt can
    /// cancel in-flight warehouse queries; otherwise SIGTERM to the child.
    pub cancel_query_on_kill: bool,

    /// Path to the dbt executable. `None` discovers `dbt-ol` (the
    /// OpenLineage wrapper) on PATH and falls back to `dbt`.
    pub dbt_executable_path: Option<PathBuf>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::new(),
            conn_id: String::new(),
            select: None,
            exclude: None,
            selector: None,
            vars: None,
            models: None,
            cache_selected_only: false,
            no_version_check: false,
            fail_fast: false,
            quiet: false,
            warn_error: false,
            db_name: None,
            schema: None,
            env: None,
            append_env: false,
            skip_exit_code: Some(99),
            cancel_query_on_kill: true,
            dbt_executable_path: None,
        }
    }
}

impl TaskConfig {
    pub fn new(project_dir: impl Into<PathBuf>, conn_id: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            conn_id: conn_id.into(),
            ..Self::default()
        }
    }
}
