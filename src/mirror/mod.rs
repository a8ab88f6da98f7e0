//! Writable project mirrors for concurrent task execution.
//!
//! dbt needs a writable project directory (it writes state and build
//! artifacts into subdirectories of the project), but the configured
//! source directory may be read-only, shared between tasks, or must not
//! be mutated. [`ProjectMirror::sync`] maintains a copy of the source
//! under a shared temporary root, refreshing it only when the trees
//! actually differ, serialized by a lock file at the mirror's top level.

mod diff;
mod lock;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Settings;
use crate::error::TaskError;

pub use lock::MirrorLock;

#[derive(Debug, Clone)]
pub struct ProjectMirror {
    tmp_root: PathBuf,
    lock_timeout: Duration,
    lock_stale_after: Duration,
}

impl ProjectMirror {
    pub fn new(settings: &Settings) -> Self {
        Self {
            tmp_root: settings.tmp_root.clone(),
            lock_timeout: settings.lock_timeout(),
            lock_stale_after: settings.lock_stale_after(),
        }
    }

    /// Synchronize `source` into its mirror and return the mirror path.
    ///
    /// The order of events:
    /// 1. Check that the source exists and is a directory.
    /// 2. Create `<tmp_root>/<basename(source)>` if missing.
    /// 3. Acquire the mirror lock with a bounded wait.
    /// 4. Compare the trees, ignoring tool output dirs and the lock file.
    /// 5. On differences, destructively refresh the mirror from the source.
    /// 6. Release the lock (on every path out).
    ///
    /// A lock timeout is not an error: the task proceeds against whatever
    /// mirror state currently exists. Blocking here could deadlock sibling
    /// tasks mid-copy, so availability wins over consistency and the call
    /// may observe a stale mirror.
    ///
    /// Filesystem errors during comparison, delete, or copy propagate and
    /// fail the invocation; the next sync simply re-runs the full
    /// comparison-and-copy.
    pub fn sync(&self, source: &Path) -> Result<PathBuf, TaskError> {
        if !source.exists() {
            return Err(TaskError::Config(format!(
                "cannot find the project_dir: {}",
                source.display()
            )));
        }
        if !source.is_dir() {
            return Err(TaskError::Config(format!(
                "the project_dir {} must be a directory",
                source.display()
            )));
        }

        let mirror = self.mirror_path(source)?;
        fs::create_dir_all(&mirror)?;

        let lock_path = mirror.join(lock::LOCK_FILE_NAME);
        let guard = MirrorLock::acquire(&lock_path, self.lock_timeout, self.lock_stale_after)?;
        let Some(_guard) = guard else {
            warn!(
                mirror = %mirror.display(),
                timeout_secs = self.lock_timeout.as_secs(),
                "mirror lock not acquired in time; proceeding with existing mirror state"
            );
            return Ok(mirror);
        };

        if diff::has_differences(source, &mirror)? {
            info!(
                source = %source.display(),
                mirror = %mirror.display(),
                "changes detected - refreshing mirror"
            );
            diff::refresh_mirror(source, &mirror)?;
        } else {
            info!(
                source = %source.display(),
                mirror = %mirror.display(),
                "no differences detected"
            );
        }

        Ok(mirror)
    }

    /// `<tmp_root>/<basename(source)>`.
    pub fn mirror_path(&self, source: &Path) -> Result<PathBuf, TaskError> {
        let basename = source.file_name().ok_or_else(|| {
            TaskError::Config(format!(
                "the project_dir {} has no final path component",
                source.display()
            ))
        })?;
        Ok(self.tmp_root.join(basename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_mirror(tmp_root: &Path) -> ProjectMirror {
        ProjectMirror {
            tmp_root: tmp_root.to_path_buf(),
            lock_timeout: Duration::from_millis(300),
            lock_stale_after: Duration::from_secs(10),
        }
    }

    fn make_project(root: &Path) -> PathBuf {
        let project = root.join("jaffle_shop");
        fs::create_dir_all(project.join("models")).unwrap();
        fs::write(project.join("dbt_project.yml"), "name: jaffle_shop").unwrap();
        fs::write(project.join("models/orders.sql"), "select 1").unwrap();
        project
    }

    #[test]
    fn sync_rejects_missing_source() {
        let tmp = tempdir().unwrap();
        let mirror = test_mirror(tmp.path());
        let err = mirror.sync(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, TaskError::Config(_)));
        assert!(err.to_string().contains("cannot find the project_dir"));
    }

    #[test]
    fn sync_rejects_file_source() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("dbt_project.yml");
        fs::write(&file, "name: x").unwrap();
        let mirror = test_mirror(tmp.path());
        let err = mirror.sync(&file).unwrap_err();
        assert!(matches!(err, TaskError::Config(_)));
        assert!(err.to_string().contains("must be a directory"));
    }

    #[test]
    fn sync_copies_project_under_tmp_root() {
        let src_root = tempdir().unwrap();
        let tmp_root = tempdir().unwrap();
        let project = make_project(src_root.path());

        let mirror = test_mirror(tmp_root.path());
        let path = mirror.sync(&project).unwrap();

        assert_eq!(path, tmp_root.path().join("jaffle_shop"));
        assert_eq!(
            fs::read_to_string(path.join("models/orders.sql")).unwrap(),
            "select 1"
        );
    }

    #[test]
    fn repeated_sync_without_changes_does_not_rewrite() {
        let src_root = tempdir().unwrap();
        let tmp_root = tempdir().unwrap();
        let project = make_project(src_root.path());
        let mirror = test_mirror(tmp_root.path());

        let path = mirror.sync(&project).unwrap();
        let before = fs::metadata(path.join("models/orders.sql"))
            .unwrap()
            .modified()
            .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        mirror.sync(&project).unwrap();
        let after = fs::metadata(path.join("models/orders.sql"))
            .unwrap()
            .modified()
            .unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn sync_refreshes_mirror_on_source_change() {
        let src_root = tempdir().unwrap();
        let tmp_root = tempdir().unwrap();
        let project = make_project(src_root.path());
        let mirror = test_mirror(tmp_root.path());
        let path = mirror.sync(&project).unwrap();

        fs::write(project.join("models/orders.sql"), "select 2").unwrap();
        fs::write(project.join("models/customers.sql"), "select 3").unwrap();
        mirror.sync(&project).unwrap();

        assert_eq!(
            fs::read_to_string(path.join("models/orders.sql")).unwrap(),
            "select 2"
        );
        assert!(path.join("models/customers.sql").exists());

        fs::remove_file(project.join("models/customers.sql")).unwrap();
        mirror.sync(&project).unwrap();
        assert!(!path.join("models/customers.sql").exists());
    }

    #[test]
    fn logs_and_target_survive_a_refresh() {
        let src_root = tempdir().unwrap();
        let tmp_root = tempdir().unwrap();
        let project = make_project(src_root.path());
        let mirror = test_mirror(tmp_root.path());
        let path = mirror.sync(&project).unwrap();

        fs::create_dir_all(path.join("logs")).unwrap();
        fs::write(path.join("logs/dbt.log"), "previous run").unwrap();
        fs::create_dir_all(path.join("target")).unwrap();
        fs::write(path.join("target/manifest.json"), "{}").unwrap();

        fs::write(project.join("models/orders.sql"), "select 42").unwrap();
        mirror.sync(&project).unwrap();

        assert_eq!(
            fs::read_to_string(path.join("logs/dbt.log")).unwrap(),
            "previous run"
        );
        assert!(path.join("target/manifest.json").exists());
    }

    #[test]
    fn lock_timeout_skips_sync_without_raising() {
        let src_root = tempdir().unwrap();
        let tmp_root = tempdir().unwrap();
        let project = make_project(src_root.path());
        let mirror = test_mirror(tmp_root.path());
        let path = mirror.sync(&project).unwrap();

        // A sibling task holds the lock for the duration of the call.
        let lock_path = path.join(".lock");
        let held = MirrorLock::acquire(&lock_path, Duration::from_millis(100), Duration::MAX)
            .unwrap()
            .unwrap();
        assert!(MirrorLock::is_held(&lock_path));

        fs::write(project.join("models/orders.sql"), "select 99").unwrap();
        let returned = mirror.sync(&project).unwrap();

        // Returned the mirror as-is: stale content, no error.
        assert_eq!(returned, path);
        assert_eq!(
            fs::read_to_string(path.join("models/orders.sql")).unwrap(),
            "select 1"
        );

        drop(held);
        mirror.sync(&project).unwrap();
        assert_eq!(
            fs::read_to_string(path.join("models/orders.sql")).unwrap(),
            "select 99"
        );
    }
}
