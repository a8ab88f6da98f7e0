use std::collections::BTreeMap;

/// Prefix for execution-context values exported into the subprocess
/// environment.
pub const CONTEXT_ENV_PREFIX: &str = "TASK_CTX_";

/// The orchestrator's execution context, reduced to a flat ordered map of
/// string key/value pairs. The runner exports these to the subprocess as
/// upper-cased, prefixed environment variables.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: BTreeMap<String, String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Environment-variable form: `run_id` → `TASK_CTX_RUN_ID`.
    pub fn to_env_vars(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| {
                let key = format!("{}{}", CONTEXT_ENV_PREFIX, k.to_uppercase());
                (key, v.clone())
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ExecutionContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Self::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}
