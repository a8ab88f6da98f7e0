//! dbt project discovery.
//!
//! Walks a project tree and builds the resource inventory dbt itself
//! would: models, snapshots, and seeds, each with its upstream
//! dependencies and the selector-forming configuration (`materialized`,
//! `schema`, `tags`) gathered from the sql, from schema yml files, and
//! from dbt_project.yml. Sources are merged most specific first, so a
//! value set in the sql wins over the schema file, which wins over the
//! project file; tags accumulate from every level.

mod extract;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::TaskError;

/// Kind of dbt resource a file defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Model,
    Snapshot,
    Seed,
}

/// Selector configuration and upstream dependencies of one resource.
///
/// Selectors are `key:value` strings (`materialized:view`, `tags:daily`)
/// matching the shapes dbt accepts in `--select` expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceConfig {
    pub selectors: BTreeSet<String>,
    pub upstream: BTreeSet<String>,
}

impl ResourceConfig {
    /// Merge a less specific configuration into this one.
    ///
    /// `materialized` and `schema` are single-valued: a value already
    /// present, coming from a more specific source, is kept. Tags and
    /// upstream sets accumulate.
    pub fn absorb(&mut self, less_specific: ResourceConfig) {
        for selector in less_specific.selectors {
            let key = selector.split(':').next().unwrap_or_default();
            if key == "tags" || !self.has_selector_key(key) {
                self.selectors.insert(selector);
            }
        }
        self.upstream.extend(less_specific.upstream);
    }

    fn has_selector_key(&self, key: &str) -> bool {
        let prefix = format!("{key}:");
        self.selectors.iter().any(|s| s.starts_with(&prefix))
    }
}

/// One discovered model, snapshot, or seed.
#[derive(Debug, Clone)]
pub struct DbtResource {
    pub name: String,
    pub kind: ResourceKind,
    pub path: PathBuf,
    pub config: ResourceConfig,
}

/// A parsed dbt project: the resource inventory keyed by resource name.
#[derive(Debug, Clone)]
pub struct DbtProject {
    pub name: String,
    pub project_dir: PathBuf,
    pub models: BTreeMap<String, DbtResource>,
    pub snapshots: BTreeMap<String, DbtResource>,
    pub seeds: BTreeMap<String, DbtResource>,
}

impl DbtProject {
    /// Parse the project rooted at `project_dir`.
    ///
    /// Configuration precedence per model, most specific first:
    /// 1. `config(...)` in the model's sql;
    /// 2. schema yml files, deepest directory first;
    /// 3. dbt_project.yml model settings, deepest path first;
    /// 4. `materialized:view` filled in for models that still have none,
    ///    matching dbt's default materialization.
    pub fn parse(project_dir: &Path) -> Result<Self, TaskError> {
        let manifest_path = project_dir.join("dbt_project.yml");
        let manifest_text = fs::read_to_string(&manifest_path).map_err(|e| {
            TaskError::Config(format!("cannot read {}: {e}", manifest_path.display()))
        })?;
        let manifest: serde_yaml_ng::Value = serde_yaml_ng::from_str(&manifest_text)?;
        let name = manifest
            .get("name")
            .and_then(serde_yaml_ng::Value::as_str)
            .ok_or_else(|| {
                TaskError::Config(format!(
                    "{} does not declare a project name",
                    manifest_path.display()
                ))
            })?
            .to_string();

        let mut project = Self {
            name,
            project_dir: project_dir.to_path_buf(),
            models: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            seeds: BTreeMap::new(),
        };
        project.collect_models()?;
        project.collect_snapshots()?;
        project.collect_seeds()?;
        project.apply_schema_files()?;
        project.apply_project_config(&manifest);
        project.fill_default_materialization();
        Ok(project)
    }

    fn models_dir(&self) -> PathBuf {
        self.project_dir.join("models")
    }

    fn collect_models(&mut self) -> Result<(), TaskError> {
        for path in files_with_extension(&self.models_dir(), "sql")? {
            let sql = fs::read_to_string(&path)?;
            let name = file_stem(&path);
            let config = ResourceConfig {
                selectors: extract::config_selectors(&sql),
                upstream: extract::upstream_dependencies(&sql),
            };
            self.models.insert(
                name.clone(),
                DbtResource {
                    name,
                    kind: ResourceKind::Model,
                    path,
                    config,
                },
            );
        }
        Ok(())
    }

    fn collect_snapshots(&mut self) -> Result<(), TaskError> {
        for path in files_with_extension(&self.project_dir.join("snapshots"), "sql")? {
            let sql = fs::read_to_string(&path)?;
            let Some((name, body)) = extract::snapshot_block(&sql) else {
                warn!(path = %path.display(), "sql file without a snapshot block; skipping");
                continue;
            };
            let config = ResourceConfig {
                selectors: extract::config_selectors(body),
                upstream: extract::upstream_dependencies(body),
            };
            self.snapshots.insert(
                name.clone(),
                DbtResource {
                    name,
                    kind: ResourceKind::Snapshot,
                    path,
                    config,
                },
            );
        }
        Ok(())
    }

    fn collect_seeds(&mut self) -> Result<(), TaskError> {
        for path in files_with_extension(&self.project_dir.join("seeds"), "csv")? {
            let name = file_stem(&path);
            self.seeds.insert(
                name.clone(),
                DbtResource {
                    name,
                    kind: ResourceKind::Seed,
                    path,
                    config: ResourceConfig::default(),
                },
            );
        }
        Ok(())
    }

    /// Schema files (`*.yml` under models/): per-model `config` entries.
    /// Deeper files are more specific and merged first.
    fn apply_schema_files(&mut self) -> Result<(), TaskError> {
        let mut files = files_with_extension(&self.models_dir(), "yml")?;
        files.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        for path in files {
            let doc: serde_yaml_ng::Value =
                serde_yaml_ng::from_str(&fs::read_to_string(&path)?)?;
            let Some(entries) = doc.get("models").and_then(serde_yaml_ng::Value::as_sequence)
            else {
                continue;
            };
            for entry in entries {
                let Some(model_name) =
                    entry.get("name").and_then(serde_yaml_ng::Value::as_str)
                else {
                    continue;
                };
                let Some(model) = self.models.get_mut(model_name) else {
                    continue;
                };
                let mut selectors = BTreeSet::new();
                if let Some(config) = entry.get("config") {
                    for key in extract::SELECTOR_KEYS {
                        append_selectors(&mut selectors, key, config.get(key));
                    }
                }
                model.config.absorb(ResourceConfig {
                    selectors,
                    upstream: BTreeSet::new(),
                });
            }
        }
        Ok(())
    }

    /// dbt_project.yml model settings: `+materialized`/`+schema`/`+tags`
    /// keys scoped to model directories, deeper directories more specific.
    fn apply_project_config(&mut self, manifest: &serde_yaml_ng::Value) {
        let Some(subtree) = manifest
            .get("models")
            .and_then(|models| models.get(self.name.as_str()))
        else {
            return;
        };
        let models_dir = self.models_dir();
        self.apply_project_level(subtree, &models_dir);
    }

    fn apply_project_level(&mut self, level: &serde_yaml_ng::Value, dir: &Path) {
        let Some(map) = level.as_mapping() else {
            return;
        };
        // Children first, so their single-valued keys win.
        for (key, value) in map {
            if let Some(key) = key.as_str() {
                if !key.starts_with('+') && value.is_mapping() {
                    self.apply_project_level(value, &dir.join(key));
                }
            }
        }
        let mut selectors = BTreeSet::new();
        for key in extract::SELECTOR_KEYS {
            let scoped = format!("+{key}");
            append_selectors(&mut selectors, key, level.get(scoped.as_str()));
        }
        if selectors.is_empty() {
            return;
        }
        let addition = ResourceConfig {
            selectors,
            upstream: BTreeSet::new(),
        };
        for model in self.models.values_mut() {
            if model.path.starts_with(dir) {
                model.config.absorb(addition.clone());
            }
        }
    }

    /// dbt materializes any unconfigured model as a view; the inventory
    /// reflects that so `materialized:view` selection matches.
    fn fill_default_materialization(&mut self) {
        for model in self.models.values_mut() {
            if !model.config.has_selector_key("materialized") {
                model
                    .config
                    .selectors
                    .insert("materialized:view".to_string());
            }
        }
    }
}

fn files_with_extension(root: &Path, ext: &str) -> Result<Vec<PathBuf>, TaskError> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.into_path();
        if path.extension().and_then(|e| e.to_str()) == Some(ext) {
            files.push(path);
        }
    }
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn append_selectors(
    into: &mut BTreeSet<String>,
    key: &str,
    value: Option<&serde_yaml_ng::Value>,
) {
    match value {
        Some(serde_yaml_ng::Value::String(s)) => {
            into.insert(format!("{key}:{s}"));
        }
        Some(serde_yaml_ng::Value::Sequence(items)) => {
            for item in items {
                if let Some(s) = item.as_str() {
                    into.insert(format!("{key}:{s}"));
                }
            }
        }
        _ => {}
    }
}
