use std::collections::HashMap;

use anyhow::anyhow;

use super::Connection;

pub(crate) const PROFILE_NAME: &str = "databricks_profile";

pub(crate) const PROFILE_YAML: &str = r#"databricks_profile:
  target: dev
  outputs:
    dev:
      type: databricks
      host: "{{ env_var('DATABRICKS_HOST') }}"
      catalog: "{{ env_var('DATABRICKS_CATALOG') }}"
      schema: "{{ env_var('DATABRICKS_SCHEMA') }}"
      http_path: "{{ env_var('DATABRICKS_HTTP_PATH') }}"
      token: "{{ env_var('DATABRICKS_TOKEN') }}"
"#;

/// The database override names a Unity Catalog (dbt-databricks >= 1.1.1);
/// the token is taken from the password field first, the extra blob
/// second. A scheme on the host is stripped.
pub(crate) fn profile_vars(
    conn: &Connection,
    database_override: Option<&str>,
    schema_override: Option<&str>,
) -> anyhow::Result<HashMap<String, String>> {
    let token = conn
        .password
        .clone()
        .or_else(|| conn.extra_str("token"))
        .ok_or_else(|| anyhow!("databricks connection is missing a token"))?;
    let host = conn
        .host
        .clone()
        .ok_or_else(|| anyhow!("databricks connection is missing a host"))?
        .replace("https://", "");
    let http_path = conn
        .extra_str("http_path")
        .ok_or_else(|| anyhow!("databricks connection extra is missing `http_path`"))?;
    let schema = schema_override
        .map(str::to_string)
        .or_else(|| conn.schema.clone())
        .ok_or_else(|| anyhow!("databricks connection is missing a schema"))?;

    Ok(HashMap::from([
        ("DATABRICKS_HOST".to_string(), host),
        (
            "DATABRICKS_CATALOG".to_string(),
            database_override.unwrap_or_default().to_string(),
        ),
        ("DATABRICKS_SCHEMA".to_string(), schema),
        ("DATABRICKS_HTTP_PATH".to_string(), http_path),
        ("DATABRICKS_TOKEN".to_string(), token),
    ]))
}
