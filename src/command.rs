use crate::error::TaskError;

/// The dbt sub-command a task runs.
///
/// A closed set: each variant carries the tokens it contributes to the
/// front of the argument vector plus any sub-command-specific flags, so a
/// runner is fully configured at construction and there is no partially
/// built state.
#[derive(Debug, Clone, PartialEq)]
pub enum DbtCommand {
    Ls,
    Seed {
        /// Treat incremental models as table models (`--full-refresh`).
        full_refresh: bool,
    },
    Snapshot,
    Run,
    Test,
    RunOperation {
        /// Macro to execute; becomes a positional token after
        /// `run-operation`.
        macro_name: String,
        /// Keyword arguments for the macro, passed as `--args <yaml>`.
        args: Option<serde_yaml_ng::Value>,
    },
    Deps,
}

impl DbtCommand {
    /// Tokens placed directly after the executable.
    pub fn base_cmd(&self) -> Vec<String> {
        match self {
            DbtCommand::Ls => vec!["ls".into()],
            DbtCommand::Seed { .. } => vec!["seed".into()],
            DbtCommand::Snapshot => vec!["snapshot".into()],
            DbtCommand::Run => vec!["run".into()],
            DbtCommand::Test => vec!["test".into()],
            DbtCommand::RunOperation { macro_name, .. } => {
                vec!["run-operation".into(), macro_name.clone()]
            }
            DbtCommand::Deps => vec!["deps".into()],
        }
    }

    /// Sub-command-specific flags, appended after the global flags.
    pub fn cmd_flags(&self) -> Result<Vec<String>, TaskError> {
        let mut flags = Vec::new();
        match self {
            DbtCommand::Seed { full_refresh } => {
                if *full_refresh {
                    flags.push("--full-refresh".to_string());
                }
            }
            DbtCommand::RunOperation { args, .. } => {
                if let Some(args) = args {
                    flags.push("--args".to_string());
                    flags.push(serde_yaml_ng::to_string(args)?);
                }
            }
            _ => {}
        }
        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_operation_carries_macro_name_positionally() {
        let cmd = DbtCommand::RunOperation {
            macro_name: "grant_select".to_string(),
            args: None,
        };
        assert_eq!(cmd.base_cmd(), vec!["run-operation", "grant_select"]);
        assert!(cmd.cmd_flags().unwrap().is_empty());
    }

    #[test]
    fn run_operation_args_serialize_as_yaml() {
        let mut args = serde_yaml_ng::Mapping::new();
        args.insert("role".into(), "reporter".into());
        let cmd = DbtCommand::RunOperation {
            macro_name: "grant_select".to_string(),
            args: Some(serde_yaml_ng::Value::Mapping(args)),
        };
        let flags = cmd.cmd_flags().unwrap();
        assert_eq!(flags[0], "--args");
        assert!(flags[1].contains("role: reporter"));
    }

    #[test]
    fn seed_full_refresh_flag() {
        let cmd = DbtCommand::Seed { full_refresh: true };
        assert_eq!(cmd.cmd_flags().unwrap(), vec!["--full-refresh"]);
        let cmd = DbtCommand::Seed {
            full_refresh: false,
        };
        assert!(cmd.cmd_flags().unwrap().is_empty());
    }

    #[test]
    fn plain_subcommands_add_no_flags() {
        for cmd in [
            DbtCommand::Ls,
            DbtCommand::Snapshot,
            DbtCommand::Run,
            DbtCommand::Test,
            DbtCommand::Deps,
        ] {
            assert_eq!(cmd.base_cmd().len(), 1);
            assert!(cmd.cmd_flags().unwrap().is_empty());
        }
    }
}
