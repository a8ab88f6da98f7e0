use std::collections::HashMap;

use anyhow::anyhow;

use super::Connection;

pub(crate) const PROFILE_NAME: &str = "postgres_profile";

pub(crate) const PROFILE_YAML: &str = r#"postgres_profile:
  target: dev
  outputs:
    dev:
      type: postgres
      host: "{{ env_var('POSTGRES_HOST') }}"
      port: "{{ env_var('POSTGRES_PORT') | as_number }}"
      user: "{{ env_var('POSTGRES_USER') }}"
      pass: "{{ env_var('POSTGRES_PASSWORD') }}"
      dbname: "{{ env_var('POSTGRES_DATABASE') }}"
      schema: "{{ env_var('POSTGRES_SCHEMA') }}"
"#;

pub(crate) fn profile_vars(
    conn: &Connection,
    database_override: Option<&str>,
    schema_override: Option<&str>,
) -> anyhow::Result<HashMap<String, String>> {
    let schema = schema_override
        .ok_or_else(|| anyhow!("a postgres schema must be provided via the `schema` parameter"))?;
    let host = conn
        .host
        .clone()
        .ok_or_else(|| anyhow!("postgres connection is missing a host"))?;
    let port = conn
        .port
        .ok_or_else(|| anyhow!("postgres connection is missing a port"))?;
    let login = conn
        .login
        .clone()
        .ok_or_else(|| anyhow!("postgres connection is missing a login"))?;
    let password = conn
        .password
        .clone()
        .ok_or_else(|| anyhow!("postgres connection is missing a password"))?;
    // The orchestrator stores the database in the connection's schema field.
    let database = database_override
        .map(str::to_string)
        .or_else(|| conn.schema.clone())
        .ok_or_else(|| anyhow!("postgres connection is missing a database"))?;

    Ok(HashMap::from([
        ("POSTGRES_HOST".to_string(), host),
        ("POSTGRES_USER".to_string(), login),
        ("POSTGRES_PASSWORD".to_string(), password),
        ("POSTGRES_DATABASE".to_string(), database),
        ("POSTGRES_PORT".to_string(), port.to_string()),
        ("POSTGRES_SCHEMA".to_string(), schema.to_string()),
    ]))
}
