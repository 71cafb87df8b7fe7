use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns `Ok(false)` when there was nothing to remove.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Read-only files are reopened for reading, which is enough for the owner
/// to change timestamps on unix.
pub fn set_file_modified(path: &Path, modified: SystemTime) -> io::Result<()> {
    let file = match fs::OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => fs::File::open(path)?,
        Err(err) => return Err(err),
    };
    file.set_modified(modified)
}

/// Resolves `.` and `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) && normalized.pop();
                if !popped {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// True when `candidate` names something strictly below `root`, comparing
/// components case-insensitively after lexical normalization.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    let root = normalize_lexically(root);
    let candidate = normalize_lexically(candidate);
    let mut root_components = root.components();
    let mut candidate_components = candidate.components();
    loop {
        match (root_components.next(), candidate_components.next()) {
            (None, Some(Component::Normal(_))) => return true,
            (None, _) => return false,
            (Some(_), None) => return false,
            (Some(expected), Some(actual)) => {
                if !component_eq_ignore_case(expected, actual) {
                    return false;
                }
            }
        }
    }
}

/// Case-insensitive path equality after lexical normalization.
pub fn same_path_ignore_case(left: &Path, right: &Path) -> bool {
    let left = normalize_lexically(left);
    let right = normalize_lexically(right);
    let mut left_components = left.components();
    let mut right_components = right.components();
    loop {
        match (left_components.next(), right_components.next()) {
            (None, None) => return true,
            (Some(a), Some(b)) if component_eq_ignore_case(a, b) => {}
            _ => return false,
        }
    }
}

fn component_eq_ignore_case(left: Component<'_>, right: Component<'_>) -> bool {
    left.as_os_str().to_string_lossy().to_lowercase()
        == right.as_os_str().to_string_lossy().to_lowercase()
}

/// Creates a fresh directory `<prefix>-<pid>-<nanos>-<n>` under `base`.
pub fn create_unique_dir(base: &Path, prefix: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(base)?;
    for attempt in 0..16_u32 {
        let candidate = base.join(format!(
            "{prefix}-{}-{}-{attempt}",
            std::process::id(),
            unique_suffix()
        ));
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("could not allocate a unique directory under {}", base.display()),
    ))
}

pub(crate) fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
