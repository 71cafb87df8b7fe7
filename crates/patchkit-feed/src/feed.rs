use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use patchkit_core::{ProvisionError, Result};
use semver::Version;
use tracing::debug;

use crate::identity::{is_package_file, is_symbols_package, parse_package_file_name};
use crate::nuspec::read_nuspec_identity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub id: String,
    pub version: Version,
    pub path: PathBuf,
    pub last_write_time: SystemTime,
    pub symbols: bool,
}

/// A flat directory of `.nupkg` files, the layout a local build drops its
/// packages into.
#[derive(Debug, Clone)]
pub struct PackageFeed {
    root: PathBuf,
}

impl PackageFeed {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists every package file directly under the feed root, sorted by id and
    /// then version. Identity comes from each package's nuspec, falling back
    /// to the file name; packages with neither are skipped.
    pub fn list_packages(&self) -> Result<Vec<PackageInfo>> {
        let feed_error = |source| ProvisionError::FeedRead {
            feed: self.root.clone(),
            source,
        };

        let mut packages = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(feed_error)? {
            let entry = entry.map_err(feed_error)?;
            if !entry.file_type().map_err(feed_error)?.is_file() {
                continue;
            }

            let path = entry.path();
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !is_package_file(file_name) {
                continue;
            }
            let Some((id, version)) = package_identity(&path, file_name) else {
                debug!(path = %path.display(), "skipping package without a readable identity");
                continue;
            };

            let last_write_time = entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .map_err(feed_error)?;

            packages.push(PackageInfo {
                id,
                version,
                path,
                last_write_time,
                symbols: is_symbols_package(file_name),
            });
        }

        packages.sort_by(|a, b| {
            a.id.to_ascii_lowercase()
                .cmp(&b.id.to_ascii_lowercase())
                .then_with(|| a.version.cmp(&b.version))
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(packages)
    }

    /// The most recently written non-symbols package for `id`.
    pub fn find_most_recent(&self, id: &str) -> Result<PackageInfo> {
        let packages = self.list_packages()?;
        most_recent_package(&packages, id)
            .cloned()
            .ok_or_else(|| ProvisionError::ArtifactNotFound {
                package_id: id.to_string(),
                feed: self.root.clone(),
            })
    }
}

/// Picks the package for `id` (ASCII case-insensitive) with the latest write
/// time. Symbols packages never qualify, whatever their timestamp.
pub fn most_recent_package<'a>(packages: &'a [PackageInfo], id: &str) -> Option<&'a PackageInfo> {
    packages
        .iter()
        .filter(|package| package.id.eq_ignore_ascii_case(id))
        .filter(|package| !package.symbols)
        .max_by_key(|package| package.last_write_time)
}

fn package_identity(path: &Path, file_name: &str) -> Option<(String, Version)> {
    match read_nuspec_identity(path) {
        Ok(identity) => Some((identity.id, identity.version)),
        Err(err) => {
            debug!(
                path = %path.display(),
                error = %err,
                "nuspec unreadable, taking identity from the file name"
            );
            parse_package_file_name(file_name).map(|parsed| (parsed.id, parsed.version))
        }
    }
}
