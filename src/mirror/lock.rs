//! Mirror lock to serialize synchronization passes.
//!
//! PID-based lock file at the top level of the mirror directory. A lock
//! whose owner is no longer running is reclaimed; the age-based staleness
//! window applies only when the owner's liveness cannot be determined. A
//! holder known to be alive keeps the lock for as long as its pass takes.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

pub(crate) const LOCK_FILE_NAME: &str = ".lock";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Held for the duration of one synchronization pass. Dropping the guard
/// releases the lock on every path out of the pass.
pub struct MirrorLock {
    path: PathBuf,
}

impl MirrorLock {
    /// Try to acquire the lock at `path`, polling until `timeout` elapses.
    ///
    /// Returns `Ok(None)` on timeout; the caller proceeds against whatever
    /// mirror state currently exists rather than failing or blocking
    /// indefinitely.
    pub fn acquire(
        path: &Path,
        timeout: Duration,
        stale_after: Duration,
    ) -> io::Result<Option<Self>> {
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id())?;
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                    }));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(path, stale_after) {
                        // Abandoned by a dead or wedged holder.
                        let _ = fs::remove_file(path);
                        continue;
                    }
                }
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Whether a live holder currently owns the lock at `path`.
    pub fn is_held(path: &Path) -> bool {
        path.exists() && !lock_is_stale(path, Duration::MAX)
    }
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_is_stale(path: &Path, stale_after: Duration) -> bool {
    match fs::read_to_string(path) {
        Ok(contents) => {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                // A holder known to be alive is never stale, no matter how
                // long the pass takes; only crash-abandoned files and
                // holders whose liveness cannot be determined fall through
                // to the age cutoff.
                match process_liveness(pid) {
                    Some(alive) => return !alive,
                    None => {}
                }
            }
        }
        // Racing against a release; let the acquire loop retry.
        Err(_) => return false,
    }
    match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => match SystemTime::now().duration_since(modified) {
            Ok(age) => age > stale_after,
            Err(_) => false,
        },
        Err(_) => false,
    }
}

/// `Some(alive)` where the platform can answer, `None` where it cannot.
fn process_liveness(pid: u32) -> Option<bool> {
    #[cfg(target_os = "linux")]
    {
        Some(Path::new(&format!("/proc/{}", pid)).exists())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ps")
            .args(["-p", &pid.to_string()])
            .output()
            .map(|output| output.status.success())
            .ok()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = pid;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SHORT: Duration = Duration::from_millis(200);
    const STALE: Duration = Duration::from_secs(10);

    #[test]
    fn acquire_and_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);

        let lock = MirrorLock::acquire(&path, SHORT, STALE).unwrap();
        assert!(lock.is_some());
        assert!(path.exists());
        assert!(MirrorLock::is_held(&path));

        drop(lock);
        assert!(!path.exists());
        assert!(!MirrorLock::is_held(&path));
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);

        let _held = MirrorLock::acquire(&path, SHORT, STALE).unwrap().unwrap();
        let second = MirrorLock::acquire(&path, SHORT, STALE).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn stale_lock_from_dead_process_is_reclaimed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        std::fs::write(&path, "999999999").unwrap();

        let lock = MirrorLock::acquire(&path, SHORT, STALE).unwrap();
        assert!(lock.is_some());
    }

    #[test]
    fn live_holder_keeps_the_lock_past_the_stale_window() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        let stale = Duration::from_millis(50);

        let held = MirrorLock::acquire(&path, SHORT, stale).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(150));

        // Well past the age window, but the holder is alive: no steal.
        let second = MirrorLock::acquire(&path, Duration::from_millis(300), stale).unwrap();
        assert!(second.is_none());
        assert!(MirrorLock::is_held(&path));

        drop(held);
        let third = MirrorLock::acquire(&path, SHORT, stale).unwrap();
        assert!(third.is_some());
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn liveness_answers_for_known_pids() {
        assert_eq!(process_liveness(std::process::id()), Some(true));
        assert_eq!(process_liveness(999999999), Some(false));
    }
}
