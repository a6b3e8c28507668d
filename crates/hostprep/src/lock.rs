//! Single-instance guard.
//!
//! The lock is a file holding the owner's PID, created with create-new
//! semantics. A restart kills the owner without removing the file, so a lock
//! whose PID does not belong to a live process of this program is stale and
//! gets reclaimed.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::error::ProvisionError;

/// Held provisioning lock. Removed on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock at `path`, reclaiming it if its owner is gone.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Lock`] if a live instance holds the lock,
    /// or [`ProvisionError::LockFile`] if the file cannot be managed.
    pub fn acquire(path: &Path) -> Result<Self, ProvisionError> {
        let io_err = |source| ProvisionError::LockFile {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        // Second attempt only after removing a stale lock.
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id()).map_err(io_err)?;
                    file.sync_all().map_err(io_err)?;
                    debug!(path = %path.display(), "Acquired instance lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let owner = read_owner(path);
                    if let Some(pid) = owner.filter(|pid| is_live_instance(*pid)) {
                        return Err(ProvisionError::Lock {
                            pid,
                            path: path.to_path_buf(),
                        });
                    }
                    warn!(path = %path.display(), owner = ?owner, "Reclaiming stale lock");
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(io_err(e)),
                    }
                }
                Err(e) => return Err(io_err(e)),
            }
        }

        Err(ProvisionError::LockFile {
            path: path.to_path_buf(),
            source: std::io::Error::new(ErrorKind::AlreadyExists, "lock recreated concurrently"),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether `pid` is another live process running this same program.
fn is_live_instance(pid: u32) -> bool {
    let own = std::process::id();
    if pid == own {
        return false;
    }

    let (theirs, ours) = (Pid::from_u32(pid), Pid::from_u32(own));
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[theirs, ours]), true);

    match (sys.process(theirs), sys.process(ours)) {
        (Some(other), Some(me)) => other.name() == me.name(),
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_pid_and_drop_removes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("hostprep.lock");

        let lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path);
        assert_eq!(read_owner(&path), Some(std::process::id()));

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostprep.lock");
        // Beyond any real pid_max.
        fs::write(&path, "4294967290").unwrap();

        let lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(read_owner(lock.path()), Some(std::process::id()));
    }

    #[test]
    fn test_garbage_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostprep.lock");
        fs::write(&path, "not a pid").unwrap();

        assert!(InstanceLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_own_pid_is_not_a_live_instance() {
        assert!(!is_live_instance(std::process::id()));
    }
}
