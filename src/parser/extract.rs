//! Extraction from templated dbt sql.
//!
//! dbt models are sql with jinja templating. The surface this crate needs
//! is small: the arguments of `ref(...)`/`source(...)` calls (upstream
//! dependencies), the `materialized`/`schema`/`tags` keyword arguments of
//! a `config(...)` call, and the name of a `{% snapshot ... %}` block.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// Config keys that form selectors, rendered as `key:value`.
pub(crate) const SELECTOR_KEYS: [&str; 3] = ["materialized", "schema", "tags"];

fn dependency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\b(?:ref|source)\s*\(\s*['"]([^'"]+)['"]"#).unwrap())
}

fn config_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)\bconfig\s*\((.*?)\)\s*\}\}"#).unwrap())
}

fn scalar_kwarg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\b(materialized|schema|tags)\s*=\s*['"]([^'"]+)['"]"#).unwrap()
    })
}

fn list_kwarg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\b(materialized|schema|tags)\s*=\s*\[([^\]]*)\]"#).unwrap()
    })
}

fn quoted_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"]([^'"]+)['"]"#).unwrap())
}

fn snapshot_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\{%\s*snapshot\s+([\w.]+)\s*%\}"#).unwrap())
}

/// Names passed to `ref(...)` / `source(...)` calls anywhere in the sql.
pub(crate) fn upstream_dependencies(sql: &str) -> BTreeSet<String> {
    dependency_re()
        .captures_iter(sql)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// `key:value` selectors from the keyword arguments of `config(...)`
/// calls. A list-valued kwarg (`tags=['a', 'b']`) yields one selector per
/// item.
pub(crate) fn config_selectors(sql: &str) -> BTreeSet<String> {
    let mut selectors = BTreeSet::new();
    for block in config_block_re().captures_iter(sql) {
        let body = &block[1];
        for caps in scalar_kwarg_re().captures_iter(body) {
            selectors.insert(format!("{}:{}", &caps[1], &caps[2]));
        }
        for caps in list_kwarg_re().captures_iter(body) {
            let key = caps[1].to_string();
            for item in quoted_item_re().captures_iter(&caps[2]) {
                selectors.insert(format!("{key}:{}", &item[1]));
            }
        }
    }
    selectors
}

/// The name declared by a `{% snapshot <name> %}` block and the block
/// body up to the closing tag. Snapshots are named by the block, not the
/// file.
pub(crate) fn snapshot_block(sql: &str) -> Option<(String, &str)> {
    let caps = snapshot_name_re().captures(sql)?;
    let name = caps[1].to_string();
    let after = &sql[caps.get(0)?.end()..];
    let body = after.split("{%").next().unwrap_or(after);
    Some((name, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_and_sources_are_collected() {
        let sql = "select * from {{ ref('stg_orders') }} \
                   join {{ ref(\"stg_customers\") }} \
                   left join {{ source('raw_payments') }}";
        let deps = upstream_dependencies(sql);
        assert_eq!(
            deps,
            BTreeSet::from([
                "stg_orders".to_string(),
                "stg_customers".to_string(),
                "raw_payments".to_string(),
            ])
        );
    }

    #[test]
    fn multi_line_config_with_tag_list() {
        let sql = "
        {{
            config(
                materialized='incremental',
                partition_by='organisation',
                schema='jaffle_shop',
                tags=['finance', 'daily', 'confidential']
            )
        }}
        SELECT * FROM {{ ref('my_upstream_model') }}
        ";
        let selectors = config_selectors(sql);
        assert_eq!(
            selectors,
            BTreeSet::from([
                "materialized:incremental".to_string(),
                "schema:jaffle_shop".to_string(),
                "tags:finance".to_string(),
                "tags:daily".to_string(),
                "tags:confidential".to_string(),
            ])
        );
    }

    #[test]
    fn single_string_tag() {
        let sql = "{{ config(materialized='incremental', tags='daily') }} select 1";
        let selectors = config_selectors(sql);
        assert!(selectors.contains("tags:daily"));
        assert!(selectors.contains("materialized:incremental"));
        // Non-selector kwargs never leak through.
        assert_eq!(selectors.len(), 2);
    }

    #[test]
    fn no_config_call_means_no_selectors() {
        assert!(config_selectors("select * from {{ ref('a') }}").is_empty());
    }

    #[test]
    fn snapshot_name_comes_from_the_block() {
        let sql = "
        {% snapshot orders_snapshot %}
        {{ config(unique_key='id') }}
        select * from {{ ref('stg_orders') }}
        {% endsnapshot %}
        ";
        let (name, body) = snapshot_block(sql).unwrap();
        assert_eq!(name, "orders_snapshot");
        assert!(body.contains("stg_orders"));
        assert!(!body.contains("endsnapshot"));
    }

    #[test]
    fn plain_sql_is_not_a_snapshot() {
        assert!(snapshot_block("select 1").is_none());
    }
}
