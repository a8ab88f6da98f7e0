//! Recursive comparison and copy between a source project and its mirror.
//!
//! Comparison and copy share one exclusion predicate so that "no
//! differences" and "nothing to copy" agree: otherwise an excluded-by-copy
//! entry would register as a difference on every pass and force a refresh
//! each time.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use super::lock::LOCK_FILE_NAME;

/// Mirror-local directories the external tool writes into; never compared
/// against the source and never clobbered by a refresh.
pub(crate) const PRESERVED_DIRS: [&str; 2] = ["logs", "target"];

/// Entries excluded from both comparison and copy: tool output dirs, the
/// lock file, and hidden directories (VCS metadata, virtualenvs). Hidden
/// files are ordinary project content and stay included.
fn is_excluded(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if PRESERVED_DIRS.contains(&name.as_ref()) || name == LOCK_FILE_NAME {
        return true;
    }
    entry.file_type().is_dir() && name.starts_with('.')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EntryKind {
    Dir,
    File,
}

/// Relative paths of every non-excluded entry under `root`.
fn collect_entries(root: &Path) -> io::Result<BTreeMap<PathBuf, EntryKind>> {
    let mut entries = BTreeMap::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_excluded(e))
    {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .to_path_buf();
        let kind = if entry.file_type().is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        entries.insert(rel, kind);
    }
    Ok(entries)
}

/// Whether `source` and `mirror` differ anywhere in their (non-excluded)
/// trees: entries present on only one side, entries that changed kind, or
/// same-named files with differing contents.
pub(crate) fn has_differences(source: &Path, mirror: &Path) -> io::Result<bool> {
    let source_entries = collect_entries(source)?;
    let mirror_entries = collect_entries(mirror)?;

    if source_entries.len() != mirror_entries.len() {
        return Ok(true);
    }
    for (rel, kind) in &source_entries {
        match mirror_entries.get(rel) {
            Some(other) if other == kind => {}
            _ => return Ok(true),
        }
        if *kind == EntryKind::File && !files_equal(&source.join(rel), &mirror.join(rel))? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn files_equal(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}

/// Destructive refresh: clear the mirror's top level (keeping the
/// preserved directories and the lock file), then merge-copy the source
/// tree in.
pub(crate) fn refresh_mirror(source: &Path, mirror: &Path) -> io::Result<()> {
    for entry in fs::read_dir(mirror)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if entry.file_type()?.is_dir() {
            if !PRESERVED_DIRS.contains(&name.as_ref()) {
                fs::remove_dir_all(entry.path())?;
            }
        } else if name != LOCK_FILE_NAME {
            fs::remove_file(entry.path())?;
        }
    }
    copy_tree(source, mirror)
}

/// Recursive copy of `source` onto `dest`, merging into existing
/// directories and overwriting existing files, skipping excluded entries.
pub(crate) fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_excluded(e))
    {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn identical_trees_have_no_differences() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        for root in [a.path(), b.path()] {
            write(root, "dbt_project.yml", "name: jaffle");
            write(root, "models/orders.sql", "select 1");
        }
        assert!(!has_differences(a.path(), b.path()).unwrap());
    }

    #[test]
    fn content_change_is_a_difference() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        write(a.path(), "models/orders.sql", "select 1");
        write(b.path(), "models/orders.sql", "select 2");
        assert!(has_differences(a.path(), b.path()).unwrap());
    }

    #[test]
    fn one_sided_nested_entry_is_a_difference() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        write(a.path(), "models/orders.sql", "select 1");
        write(b.path(), "models/orders.sql", "select 1");
        write(a.path(), "models/staging/stg.sql", "select 3");
        assert!(has_differences(a.path(), b.path()).unwrap());
    }

    #[test]
    fn excluded_entries_do_not_count() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        write(a.path(), "models/orders.sql", "select 1");
        write(b.path(), "models/orders.sql", "select 1");
        write(b.path(), "logs/dbt.log", "old run");
        write(b.path(), "target/manifest.json", "{}");
        write(b.path(), ".lock", "1234");
        write(a.path(), ".git/HEAD", "ref: main");
        assert!(!has_differences(a.path(), b.path()).unwrap());
    }

    #[test]
    fn hidden_files_still_count() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        write(a.path(), ".sqlfluff", "rules: all");
        assert!(has_differences(a.path(), b.path()).unwrap());
    }

    #[test]
    fn copy_tree_skips_excluded_and_merges() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(src.path(), "dbt_project.yml", "name: jaffle");
        write(src.path(), "models/orders.sql", "select 1");
        write(src.path(), "logs/dbt.log", "noise");
        write(src.path(), ".git/HEAD", "ref: main");
        write(dst.path(), "target/manifest.json", "{}");

        copy_tree(src.path(), dst.path()).unwrap();

        assert!(dst.path().join("dbt_project.yml").exists());
        assert!(dst.path().join("models/orders.sql").exists());
        assert!(!dst.path().join("logs").exists());
        assert!(!dst.path().join(".git").exists());
        assert!(dst.path().join("target/manifest.json").exists());
    }

    #[test]
    fn refresh_clears_everything_except_preserved() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        write(src.path(), "models/orders.sql", "select 1");
        write(dst.path(), "models/old.sql", "select 0");
        write(dst.path(), "stray.yml", "gone: soon");
        write(dst.path(), "logs/dbt.log", "kept");
        write(dst.path(), "target/manifest.json", "kept");
        write(dst.path(), ".lock", "1234");

        refresh_mirror(src.path(), dst.path()).unwrap();

        assert!(dst.path().join("models/orders.sql").exists());
        assert!(!dst.path().join("models/old.sql").exists());
        assert!(!dst.path().join("stray.yml").exists());
        assert!(dst.path().join("logs/dbt.log").exists());
        assert!(dst.path().join("target/manifest.json").exists());
        assert!(dst.path().join(".lock").exists());
    }
}
