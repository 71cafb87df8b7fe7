use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};

use patchkit_core::{normalize_entry_name, EntrySelector};
use tracing::{debug, warn};

use crate::archive::PackageArchive;
use crate::fs_utils::{is_within, remove_file_if_exists};

pub fn select_entries(archive: &dyn PackageArchive, selector: &EntrySelector) -> Vec<String> {
    selector.select(archive.entry_names())
}

/// Host file name for a flattened entry: the final segment of the entry
/// path, percent-decoded, with any decoded slash turned into the host
/// separator.
pub fn flat_entry_file_name(entry_name: &str) -> String {
    let normalized = normalize_entry_name(entry_name);
    let trimmed = normalized.strip_prefix('/').unwrap_or(&normalized);
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    decode_segment(last).replace('/', MAIN_SEPARATOR_STR)
}

/// Relative host path for an entry whose internal structure is kept.
pub fn tree_entry_path(entry_name: &str) -> PathBuf {
    let normalized = normalize_entry_name(entry_name);
    let trimmed = normalized.strip_prefix('/').unwrap_or(&normalized);
    trimmed
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| decode_segment(segment).replace('/', MAIN_SEPARATOR_STR))
        .collect()
}

fn decode_segment(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

/// Writes each entry directly into `dest_dir` under its final name. Returns
/// the paths written; entries that would land outside `dest_dir` or fail to
/// extract are skipped.
pub fn extract_flat(
    archive: &mut dyn PackageArchive,
    dest_dir: &Path,
    entries: &[String],
) -> Vec<PathBuf> {
    extract_entries(archive, dest_dir, entries, |name| {
        dest_dir.join(flat_entry_file_name(name))
    })
}

/// Like [`extract_flat`] but keeps the entry's directory structure.
pub fn extract_tree(
    archive: &mut dyn PackageArchive,
    dest_dir: &Path,
    entries: &[String],
) -> Vec<PathBuf> {
    extract_entries(archive, dest_dir, entries, |name| {
        dest_dir.join(tree_entry_path(name))
    })
}

fn extract_entries(
    archive: &mut dyn PackageArchive,
    dest_dir: &Path,
    entries: &[String],
    target_for: impl Fn(&str) -> PathBuf,
) -> Vec<PathBuf> {
    let mut written = Vec::with_capacity(entries.len());
    for name in entries {
        let target = target_for(name);
        if !is_within(dest_dir, &target) {
            warn!(
                entry = %name,
                destination = %dest_dir.display(),
                "skipping archive entry that escapes the destination"
            );
            continue;
        }

        match extract_entry(archive, name, &target) {
            Ok(()) => {
                debug!(entry = %name, target = %target.display(), "extracted");
                written.push(target);
            }
            Err(err) => warn!(
                entry = %name,
                target = %target.display(),
                error = %err,
                "failed to extract archive entry"
            ),
        }
    }
    written
}

fn extract_entry(archive: &mut dyn PackageArchive, name: &str, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    // `File::create` truncates, so a target that survives this removal still
    // ends up with exactly the entry's bytes.
    if let Err(err) = remove_file_if_exists(target) {
        debug!(target = %target.display(), error = %err, "could not remove existing file");
    }

    let mut entry = archive.open_entry(name)?;
    let mut file = File::create(target)?;
    io::copy(&mut entry.reader, &mut file)?;
    if let Some(modified) = entry.modified {
        file.set_modified(modified)?;
    }
    Ok(())
}
