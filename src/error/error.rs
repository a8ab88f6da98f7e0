use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    /// Bad task parameters: missing project directory, unknown connection,
    /// malformed credential data. Raised before any subprocess is spawned.
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to spawn dbt: {0}")]
    Spawn(String),
    /// Non-zero, non-skip exit code from the dbt subprocess.
    #[error("dbt command failed with a non-zero exit code {exit_code}")]
    ToolFailed { exit_code: i32 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}
