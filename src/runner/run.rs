use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::command::DbtCommand;
use crate::config::{Settings, TaskConfig};
use crate::context::ExecutionContext;
use crate::error::TaskError;
use crate::mirror::ProjectMirror;
use crate::profile::{create_default_profiles, ProfileResolver};

use super::hook::SubprocessHook;
use super::types::{ExecutionResult, TaskOutcome};

/// Environment variable dbt reads its profiles directory from. Forced on
/// every invocation so an end user's own configuration cannot redirect
/// where profile data is read from.
const DBT_PROFILES_DIR_VAR: &str = "DBT_PROFILES_DIR";

/// Turns one [`TaskConfig`] plus a [`DbtCommand`] into one dbt subprocess
/// invocation and classifies its exit code.
pub struct DbtTaskRunner {
    command: DbtCommand,
    config: TaskConfig,
    settings: Settings,
    resolver: Arc<dyn ProfileResolver>,
    mirror: ProjectMirror,
    hook: SubprocessHook,
}

impl DbtTaskRunner {
    pub fn new(command: DbtCommand, config: TaskConfig, resolver: Arc<dyn ProfileResolver>) -> Self {
        Self::with_settings(command, config, resolver, Settings::default())
    }

    pub fn with_settings(
        command: DbtCommand,
        config: TaskConfig,
        resolver: Arc<dyn ProfileResolver>,
        settings: Settings,
    ) -> Self {
        let mirror = ProjectMirror::new(&settings);
        Self {
            command,
            config,
            settings,
            resolver,
            mirror,
            hook: SubprocessHook::new(),
        }
    }

    /// Run the task: resolve the connection profile, synchronize the
    /// project mirror, build the argument vector and environment, execute
    /// dbt against the mirror, and classify the exit code.
    pub async fn execute(&self, context: &ExecutionContext) -> Result<TaskOutcome, TaskError> {
        create_default_profiles(&self.settings.profiles_dir)
            .map_err(|e| TaskError::Config(format!("cannot prepare profiles.yml: {e}")))?;
        let profile = self
            .resolver
            .resolve(
                &self.config.conn_id,
                self.config.db_name.as_deref(),
                self.config.schema.as_deref(),
            )
            .map_err(|e| TaskError::Config(e.to_string()))?;

        let mirror = self.mirror.clone();
        let source = self.config.project_dir.clone();
        let mirror_path = tokio::task::spawn_blocking(move || mirror.sync(&source))
            .await
            .map_err(|e| TaskError::Spawn(format!("mirror sync task failed: {e}")))??;

        let mut argv = vec![self.executable().to_string_lossy().into_owned()];
        argv.extend(self.command.base_cmd());
        argv.extend(self.global_flags(&mirror_path)?);
        argv.extend(self.command.cmd_flags()?);
        argv.push("--profile".to_string());
        argv.push(profile.name.clone());

        let mut env = self.build_env(context, &profile.env);
        env.insert(
            DBT_PROFILES_DIR_VAR.to_string(),
            self.settings.profiles_dir.display().to_string(),
        );

        let result = self.hook.run_command(&argv, &env, &mirror_path).await?;
        self.classify(result)
    }

    /// React to an out-of-band kill. With `cancel_query_on_kill`, the
    /// whole process group gets SIGINT so dbt can cancel in-flight
    /// warehouse queries; otherwise the subprocess alone gets SIGTERM.
    /// Safe to call from any thread, including when nothing is running.
    pub fn on_kill(&self) {
        if self.config.cancel_query_on_kill {
            self.hook.interrupt_group();
        } else {
            self.hook.send_sigterm();
        }
    }

    fn executable(&self) -> PathBuf {
        if let Some(path) = &self.config.dbt_executable_path {
            return path.clone();
        }
        // dbt-ol is the OpenLineage wrapper for dbt; it emits lineage
        // data to a configured backend and otherwise behaves like dbt.
        which::which("dbt-ol").unwrap_or_else(|_| PathBuf::from("dbt"))
    }

    /// Flags shared by every sub-command: value flags in a fixed order,
    /// then boolean flags in a fixed order. The project directory is
    /// rewritten to point at the writable mirror, never the source.
    fn global_flags(&self, mirror_path: &Path) -> Result<Vec<String>, TaskError> {
        let mut flags = vec![
            "--project-dir".to_string(),
            mirror_path.display().to_string(),
        ];

        let value_flags = [
            ("--select", &self.config.select),
            ("--exclude", &self.config.exclude),
            ("--selector", &self.config.selector),
        ];
        for (name, value) in value_flags {
            if let Some(value) = value {
                flags.push(name.to_string());
                flags.push(value.clone());
            }
        }
        if let Some(vars) = &self.config.vars {
            flags.push("--vars".to_string());
            flags.push(serde_yaml_ng::to_string(vars)?);
        }
        if let Some(models) = &self.config.models {
            flags.push("--models".to_string());
            flags.push(models.clone());
        }

        let boolean_flags = [
            ("--no-version-check", self.config.no_version_check),
            ("--cache-selected-only", self.config.cache_selected_only),
            ("--fail-fast", self.config.fail_fast),
            ("--quiet", self.config.quiet),
            ("--warn-error", self.config.warn_error),
        ];
        for (name, enabled) in boolean_flags {
            if enabled {
                flags.push(name.to_string());
            }
        }
        Ok(flags)
    }

    /// Environment for the subprocess, later entries overwriting earlier
    /// on key collision:
    /// 1. the current process environment, or the task's `env` override
    ///    (merged over the process environment when `append_env`);
    /// 2. the execution context, in env-var form;
    /// 3. the resolved profile's variables, which always win: wrong
    ///    credentials silently write to the wrong warehouse.
    fn build_env(
        &self,
        context: &ExecutionContext,
        profile_env: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        // Dropping non-UTF-8 entries here mirrors dropping whatever the
        // exec boundary would reject.
        let system_env: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();

        let mut env = match &self.config.env {
            None => system_env,
            Some(overrides) if self.config.append_env => {
                let mut merged = system_env;
                merged.extend(overrides.clone());
                merged
            }
            Some(overrides) => overrides.clone(),
        };

        let context_vars = context.to_env_vars();
        if !context_vars.is_empty() {
            debug!(
                "exporting context env vars: {}",
                context_vars
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        env.extend(context_vars);
        env.extend(profile_env.clone());

        // NUL in a key or value would fail the exec call outright.
        env.retain(|k, v| !k.contains('\0') && !v.contains('\0'));
        env
    }

    fn classify(&self, result: ExecutionResult) -> Result<TaskOutcome, TaskError> {
        match self.config.skip_exit_code {
            Some(skip) if result.exit_code == skip => {
                info!(exit_code = skip, "dbt returned the skip exit code; skipping task");
                Ok(TaskOutcome::Skipped { exit_code: skip })
            }
            _ if result.exit_code != 0 => Err(TaskError::ToolFailed {
                exit_code: result.exit_code,
            }),
            _ => Ok(TaskOutcome::Success {
                output: result.output,
            }),
        }
    }
}
