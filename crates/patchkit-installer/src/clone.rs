use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use patchkit_core::{ProvisionError, Result};
use tracing::{debug, info};

use crate::fs_utils::{create_unique_dir, is_within, same_path_ignore_case, set_file_modified};

/// Age stamped onto every cloned file so incremental build checks see the
/// clone as already up to date.
pub const CLONED_FILE_AGE: Duration = Duration::from_secs(2 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneStats {
    pub directories: usize,
    pub files: usize,
}

/// Mirrors `source_root` into a new directory under `temp_base` and returns
/// the new root. A partial clone is left in place on failure.
pub fn clone_tree(source_root: &Path, temp_base: &Path) -> Result<PathBuf> {
    if is_within(source_root, temp_base) || same_path_ignore_case(source_root, temp_base) {
        return Err(ProvisionError::Clone {
            from: source_root.to_path_buf(),
            to: temp_base.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "clone destination must not live inside the source installation",
            ),
        });
    }

    let destination =
        create_unique_dir(temp_base, "patchkit").map_err(|source| ProvisionError::Clone {
            from: source_root.to_path_buf(),
            to: temp_base.to_path_buf(),
            source,
        })?;

    let backdated = SystemTime::now()
        .checked_sub(CLONED_FILE_AGE)
        .unwrap_or(UNIX_EPOCH);
    let stats = mirror_tree(source_root, &destination, backdated)?;
    info!(
        source = %source_root.display(),
        destination = %destination.display(),
        directories = stats.directories,
        files = stats.files,
        "cloned tool installation"
    );
    Ok(destination)
}

/// Recreates every directory of `source_root` under `destination_root`, then
/// copies every file, stamping each copy with `modified`.
pub fn mirror_tree(
    source_root: &Path,
    destination_root: &Path,
    modified: SystemTime,
) -> Result<CloneStats> {
    let clone_error = |from: &Path, to: &Path, source: io::Error| ProvisionError::Clone {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    let (directories, files) = collect_tree(source_root)
        .map_err(|source| clone_error(source_root, destination_root, source))?;

    fs::create_dir_all(destination_root)
        .map_err(|source| clone_error(source_root, destination_root, source))?;
    for relative in &directories {
        let target = destination_root.join(relative);
        fs::create_dir_all(&target)
            .map_err(|source| clone_error(&source_root.join(relative), &target, source))?;
    }

    for relative in &files {
        let from = source_root.join(relative);
        let to = destination_root.join(relative);
        fs::copy(&from, &to).map_err(|source| clone_error(&from, &to, source))?;
        set_file_modified(&to, modified).map_err(|source| clone_error(&from, &to, source))?;
    }

    Ok(CloneStats {
        directories: directories.len(),
        files: files.len(),
    })
}

/// Relative directory and file paths under `root`, parents before children.
/// Symlinked directories are recorded as neither.
fn collect_tree(root: &Path) -> io::Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut directories = Vec::new();
    let mut files = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(root.to_path_buf());

    while let Some(dir) = queue.pop_front() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?
                .to_path_buf();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                directories.push(relative);
                queue.push_back(path);
            } else if file_type.is_file() {
                files.push(relative);
            } else if file_type.is_symlink() {
                match fs::metadata(&path) {
                    Ok(metadata) if metadata.is_file() => files.push(relative),
                    _ => debug!(path = %path.display(), "not following symlink while cloning"),
                }
            }
        }
    }

    Ok((directories, files))
}
