//! Exclusive lock file guarding a mirror.
//!
//! The lock file holds the holder's pid. A lock left behind by a process
//! that no longer exists is removed and taken over; on platforms where the
//! pid cannot be checked, a lock older than [`ABANDONED_AFTER`] is.

use std::fs::OpenOptions;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{MirrorError, Result};

pub const LOCK_FILE: &str = "depotsync.lock";

/// Age after which a lock whose holder cannot be checked counts as
/// abandoned.
pub const ABANDONED_AFTER: Duration = Duration::from_secs(60 * 60);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Held lock; the file is removed on drop.
#[derive(Debug)]
pub struct MirrorLock {
    path: PathBuf,
}

impl MirrorLock {
    /// Creates the lock file exclusively, polling until `timeout` while
    /// another live holder has it.
    pub fn acquire(git_dir: &Path, timeout: Duration) -> Result<Self> {
        let path = git_dir.join(LOCK_FILE);
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!(path = %path.display(), "mirror lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    if let Some(holder) = stale_holder(&path) {
                        warn!(path = %path.display(), %holder, "removing stale mirror lock");
                        remove_if_unchanged(&path, &holder)?;
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        warn!(path = %path.display(), "mirror lock timed out");
                        return Err(MirrorError::Locked(path));
                    }
                    std::thread::sleep(POLL_INTERVAL.min(timeout));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove mirror lock");
        }
    }
}

/// Returns the lock's contents if its holder is gone.
fn stale_holder(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let alive = contents
        .trim()
        .parse::<u32>()
        .ok()
        .and_then(process_alive);
    let stale = match alive {
        Some(alive) => !alive,
        // Empty while the holder is still writing its pid, or unknown
        // platform; only age can tell.
        None => older_than(path, ABANDONED_AFTER),
    };
    stale.then(|| contents.trim().to_string())
}

/// Removes the lock unless another waiter already replaced it.
fn remove_if_unchanged(path: &Path, holder: &str) -> Result<()> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim() != holder => Ok(()),
        Ok(_) => match std::fs::remove_file(path) {
            Err(e) if e.kind() != IoErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        },
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> Option<bool> {
    Some(Path::new("/proc").join(pid.to_string()).exists())
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> Option<bool> {
    None
}

fn older_than(path: &Path, age: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|elapsed| elapsed > age)
}
