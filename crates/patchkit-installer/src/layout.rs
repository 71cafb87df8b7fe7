use std::fs;
use std::path::{Path, PathBuf};

use patchkit_core::{ProvisionError, Result};

/// Paths inside a cloned tool installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentLayout {
    root: PathBuf,
    executable: String,
}

impl EnvironmentLayout {
    pub fn new(root: impl Into<PathBuf>, executable: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            executable: executable.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tool_path(&self) -> PathBuf {
        self.root.join(&self.executable)
    }

    pub fn sdk_root(&self) -> PathBuf {
        self.root.join("sdk")
    }

    /// SDK version directories, sorted by name.
    pub fn sdk_dirs(&self) -> Result<Vec<PathBuf>> {
        let sdk_root = self.sdk_root();
        let mut dirs = Vec::new();
        let entries = fs::read_dir(&sdk_root).map_err(|source| {
            ProvisionError::io(
                format!("failed to read SDK directory {}", sdk_root.display()),
                source,
            )
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| {
                ProvisionError::io(
                    format!("failed to read SDK directory {}", sdk_root.display()),
                    source,
                )
            })?;
            if entry.file_type().is_ok_and(|file_type| file_type.is_dir()) {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// First SDK directory (by name) whose name starts with `prefix`, or the
    /// first SDK directory when no prefix is given.
    pub fn select_sdk_dir(&self, prefix: Option<&str>) -> Result<PathBuf> {
        let prefix = prefix.unwrap_or_default();
        self.sdk_dirs()?
            .into_iter()
            .find(|dir| {
                dir.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(prefix))
            })
            .ok_or_else(|| ProvisionError::SdkNotFound {
                sdk_root: self.sdk_root(),
                prefix: prefix.to_string(),
            })
    }
}

pub fn msbuild_sdks_dir(sdk_dir: &Path) -> PathBuf {
    sdk_dir.join("Sdks")
}
