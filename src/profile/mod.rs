//! Connection profiles for the dbt subprocess.
//!
//! dbt reads warehouse credentials from a named profile in profiles.yml;
//! the profile bodies shipped here pull every credential from environment
//! variables, and the per-warehouse builders map an orchestrator
//! connection onto exactly those variables. The runner injects them with
//! highest precedence so user-supplied environment can never redirect a
//! task at the wrong warehouse.

mod bigquery;
mod databricks;
mod postgres;
mod redshift;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// File name dbt expects under DBT_PROFILES_DIR.
pub const PROFILES_FILE_NAME: &str = "profiles.yml";

/// A stored connection: type tag plus the usual credential fields and a
/// free-form JSON extra blob for warehouse-specific settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connection {
    pub conn_type: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub schema: Option<String>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

impl Connection {
    pub(crate) fn extra_str(&self, key: &str) -> Option<String> {
        self.extra
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// Output of profile resolution: the profile name passed as `--profile`
/// and the environment variables its body reads credentials from.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub env: HashMap<String, String>,
}

/// Seam for per-destination credential construction. The runner only
/// needs "given a connection identifier and optional overrides, produce a
/// profile name and an environment mapping".
pub trait ProfileResolver: Send + Sync {
    fn resolve(
        &self,
        conn_id: &str,
        database_override: Option<&str>,
        schema_override: Option<&str>,
    ) -> anyhow::Result<ResolvedProfile>;
}

/// Built-in resolver over an in-memory connection registry, dispatching
/// on the connection type to the warehouse-specific builders.
#[derive(Debug, Clone, Default)]
pub struct WarehouseProfiles {
    connections: HashMap<String, Connection>,
}

impl WarehouseProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(mut self, conn_id: impl Into<String>, conn: Connection) -> Self {
        self.connections.insert(conn_id.into(), conn);
        self
    }

    pub fn insert(&mut self, conn_id: impl Into<String>, conn: Connection) {
        self.connections.insert(conn_id.into(), conn);
    }
}

impl ProfileResolver for WarehouseProfiles {
    fn resolve(
        &self,
        conn_id: &str,
        database_override: Option<&str>,
        schema_override: Option<&str>,
    ) -> anyhow::Result<ResolvedProfile> {
        let conn = self
            .connections
            .get(conn_id)
            .ok_or_else(|| anyhow!("unknown connection id: {conn_id}"))?;

        let (name, env) = match conn.conn_type.as_str() {
            "postgres" => (
                postgres::PROFILE_NAME,
                postgres::profile_vars(conn, database_override, schema_override)?,
            ),
            "redshift" => (
                redshift::PROFILE_NAME,
                redshift::profile_vars(conn, database_override, schema_override)?,
            ),
            "google_cloud_platform" => (
                bigquery::PROFILE_NAME,
                bigquery::profile_vars(conn, database_override, schema_override)?,
            ),
            "databricks" => (
                databricks::PROFILE_NAME,
                databricks::profile_vars(conn, database_override, schema_override)?,
            ),
            other => {
                return Err(anyhow!(
                    "connection {conn_id} has unsupported type {other}"
                ))
            }
        };
        debug!(conn_id, profile = name, "resolved connection profile");
        Ok(ResolvedProfile {
            name: name.to_string(),
            env,
        })
    }
}

/// Write the default profiles.yml (all supported warehouse profiles,
/// credentials via env_var lookups) under `profiles_dir`. Skips the write
/// when the file already carries the expected content, so concurrent
/// tasks do not rewrite it on every run.
pub fn create_default_profiles(profiles_dir: &Path) -> anyhow::Result<()> {
    let body = default_profiles_yaml();
    let path = profiles_dir.join(PROFILES_FILE_NAME);
    if let Ok(existing) = fs::read_to_string(&path) {
        if existing == body {
            return Ok(());
        }
    }
    fs::create_dir_all(profiles_dir)
        .with_context(|| format!("creating profiles dir {}", profiles_dir.display()))?;
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn default_profiles_yaml() -> String {
    [
        postgres::PROFILE_YAML,
        redshift::PROFILE_YAML,
        bigquery::PROFILE_YAML,
        databricks::PROFILE_YAML,
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_profiles_are_valid_yaml_with_all_profiles() {
        let body = default_profiles_yaml();
        let doc: serde_yaml_ng::Value = serde_yaml_ng::from_str(&body).unwrap();
        for name in [
            "postgres_profile",
            "redshift_profile",
            "bigquery_profile",
            "databricks_profile",
        ] {
            assert!(doc.get(name).is_some(), "missing {name}");
            assert_eq!(
                doc[name]["target"],
                serde_yaml_ng::Value::from("dev"),
                "{name} should target dev"
            );
        }
    }

    #[test]
    fn create_default_profiles_writes_once() {
        let dir = tempdir().unwrap();
        create_default_profiles(dir.path()).unwrap();
        let path = dir.path().join(PROFILES_FILE_NAME);
        let first = fs::metadata(&path).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));
        create_default_profiles(dir.path()).unwrap();
        let second = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_connection_id_is_an_error() {
        let profiles = WarehouseProfiles::new();
        let err = profiles.resolve("missing", None, None).unwrap_err();
        assert!(err.to_string().contains("unknown connection id"));
    }

    #[test]
    fn unsupported_connection_type_is_an_error() {
        let profiles = WarehouseProfiles::new().with_connection(
            "oracle_db",
            Connection {
                conn_type: "oracle".to_string(),
                ..Connection::default()
            },
        );
        let err = profiles.resolve("oracle_db", None, None).unwrap_err();
        assert!(err.to_string().contains("unsupported type"));
    }
}
