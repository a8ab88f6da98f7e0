use std::collections::HashMap;

use anyhow::anyhow;

use super::Connection;

pub(crate) const PROFILE_NAME: &str = "redshift_profile";

pub(crate) const PROFILE_YAML: &str = r#"redshift_profile:
  target: dev
  outputs:
    dev:
      type: redshift
      host: "{{ env_var('REDSHIFT_HOST') }}"
      port: "{{ env_var('REDSHIFT_PORT') | as_number }}"
      user: "{{ env_var('REDSHIFT_USER') }}"
      password: "{{ env_var('REDSHIFT_PASSWORD') }}"
      dbname: "{{ env_var('REDSHIFT_DATABASE') }}"
      schema: "{{ env_var('REDSHIFT_SCHEMA') }}"
      ra3_node: true
"#;

pub(crate) fn profile_vars(
    conn: &Connection,
    database_override: Option<&str>,
    schema_override: Option<&str>,
) -> anyhow::Result<HashMap<String, String>> {
    // First of: schema override, database override, connection schema.
    let database = schema_override
        .map(str::to_string)
        .or_else(|| database_override.map(str::to_string))
        .or_else(|| conn.schema.clone())
        .ok_or_else(|| {
            anyhow!(
                "a schema must be provided as either `db_name`, `schema` \
                 or in the schema field of the connection"
            )
        })?;
    let schema = schema_override
        .map(str::to_string)
        .or_else(|| conn.schema.clone())
        .unwrap_or_default();
    let host = conn
        .host
        .clone()
        .ok_or_else(|| anyhow!("redshift connection is missing a host"))?;
    let port = conn
        .port
        .ok_or_else(|| anyhow!("redshift connection is missing a port"))?;
    let login = conn
        .login
        .clone()
        .ok_or_else(|| anyhow!("redshift connection is missing a login"))?;
    let password = conn
        .password
        .clone()
        .ok_or_else(|| anyhow!("redshift connection is missing a password"))?;

    Ok(HashMap::from([
        ("REDSHIFT_HOST".to_string(), host),
        ("REDSHIFT_PORT".to_string(), port.to_string()),
        ("REDSHIFT_USER".to_string(), login),
        ("REDSHIFT_PASSWORD".to_string(), password),
        ("REDSHIFT_DATABASE".to_string(), database),
        ("REDSHIFT_SCHEMA".to_string(), schema),
    ]))
}
