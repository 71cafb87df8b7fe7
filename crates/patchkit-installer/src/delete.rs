use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use patchkit_core::DeletePolicy;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed { attempts: u32 },
    Missing,
    /// The tree could not be fully removed. Never raised as an error.
    Residue { attempts: u32, reason: String },
}

impl DeleteOutcome {
    pub fn is_clean(&self) -> bool {
        !matches!(self, Self::Residue { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveKind {
    File,
    Directory,
}

pub fn delete_dir_robust(path: &Path, policy: &DeletePolicy) -> DeleteOutcome {
    delete_dir_robust_with_hooks(
        path,
        policy,
        |target, kind| match kind {
            RemoveKind::File => fs::remove_file(target),
            RemoveKind::Directory => fs::remove_dir(target),
        },
        thread::sleep,
    )
}

/// Removes `path` bottom-up, retrying the whole walk while failures look like
/// a transient lock. `remove` performs each single removal and `sleep` waits
/// between attempts.
pub fn delete_dir_robust_with_hooks<R, S>(
    path: &Path,
    policy: &DeletePolicy,
    mut remove: R,
    mut sleep: S,
) -> DeleteOutcome
where
    R: FnMut(&Path, RemoveKind) -> io::Result<()>,
    S: FnMut(Duration),
{
    match fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return DeleteOutcome::Missing,
        Err(err) => {
            let outcome = DeleteOutcome::Residue {
                attempts: 0,
                reason: err.to_string(),
            };
            warn!(path = %path.display(), error = %err, "cannot inspect directory for removal");
            return outcome;
        }
    }

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match remove_tree(path, &mut remove) {
            Ok(()) => return DeleteOutcome::Removed { attempts: attempt },
            Err(err) if is_lock_class(&err) && attempt < max_attempts => {
                debug!(
                    path = %path.display(),
                    attempt,
                    error = %err,
                    "directory removal blocked, retrying"
                );
                sleep(policy.delay);
                attempt += 1;
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    attempts = attempt,
                    error = %err,
                    "left residue behind while removing directory"
                );
                return DeleteOutcome::Residue {
                    attempts: attempt,
                    reason: err.to_string(),
                };
            }
        }
    }
}

fn remove_tree(
    path: &Path,
    remove: &mut dyn FnMut(&Path, RemoveKind) -> io::Result<()>,
) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !metadata.is_dir() {
        return ignore_not_found(remove(path, RemoveKind::File));
    }

    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        let child = entry.path();
        if entry.file_type()?.is_dir() {
            remove_tree(&child, remove)?;
        } else {
            ignore_not_found(remove(&child, RemoveKind::File))?;
        }
    }
    ignore_not_found(remove(path, RemoveKind::Directory))
}

fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Failures another process holding a handle typically produces.
fn is_lock_class(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    match err.raw_os_error() {
        // EBUSY
        #[cfg(unix)]
        Some(16) => true,
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION, ERROR_DIR_NOT_EMPTY
        #[cfg(windows)]
        Some(32 | 33 | 145) => true,
        _ => false,
    }
}
