use std::fs;
use std::path::{Path, PathBuf};

use patchkit_core::{ArtifactSpec, DeletePolicy, ExtractionMode, ProvisionError, Result};
use patchkit_feed::{most_recent_package, PackageFeed, PackageInfo};
use tracing::{info, warn};

use crate::archive::{PackageArchive, ZipPackageArchive};
use crate::delete::{delete_dir_robust, DeleteOutcome};
use crate::extract::{extract_flat, extract_tree, select_entries};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedArtifact {
    pub package_id: String,
    pub archive: PathBuf,
    pub written: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionReport {
    pub artifacts: Vec<InjectedArtifact>,
}

impl InjectionReport {
    pub fn find(&self, package_id: &str) -> Option<&InjectedArtifact> {
        self.artifacts
            .iter()
            .find(|artifact| artifact.package_id.eq_ignore_ascii_case(package_id))
    }

    pub fn written_files(&self) -> usize {
        self.artifacts
            .iter()
            .map(|artifact| artifact.written.len())
            .sum()
    }
}

/// Copies locally built package content into an SDK directory.
pub struct ArtifactInjector<'a> {
    feed: &'a PackageFeed,
    sdk_dir: &'a Path,
    delete_policy: DeletePolicy,
}

impl<'a> ArtifactInjector<'a> {
    pub fn new(feed: &'a PackageFeed, sdk_dir: &'a Path, delete_policy: DeletePolicy) -> Self {
        Self {
            feed,
            sdk_dir,
            delete_policy,
        }
    }

    /// Resolves every package before touching the SDK directory, so a missing
    /// package fails the run without a half-injected tree.
    pub fn inject_all(&self, specs: &[ArtifactSpec]) -> Result<InjectionReport> {
        let packages = self.feed.list_packages()?;
        let resolved = specs
            .iter()
            .map(|spec| {
                most_recent_package(&packages, spec.package_id())
                    .map(|package| (spec, package))
                    .ok_or_else(|| ProvisionError::ArtifactNotFound {
                        package_id: spec.package_id().to_string(),
                        feed: self.feed.root().to_path_buf(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut report = InjectionReport::default();
        for (spec, package) in resolved {
            report.artifacts.push(self.inject(spec, package)?);
        }
        info!(
            artifacts = report.artifacts.len(),
            files = report.written_files(),
            sdk_dir = %self.sdk_dir.display(),
            "injected local artifacts"
        );
        Ok(report)
    }

    pub fn inject(&self, spec: &ArtifactSpec, package: &PackageInfo) -> Result<InjectedArtifact> {
        let mut archive = ZipPackageArchive::open(&package.path)?;
        let destination = if spec.destination().as_os_str().is_empty() {
            self.sdk_dir.to_path_buf()
        } else {
            self.sdk_dir.join(spec.destination())
        };
        let entries = planned_entries(&archive, spec);

        let written = match spec.mode() {
            ExtractionMode::Structured => {
                if let outcome @ DeleteOutcome::Residue { .. } =
                    delete_dir_robust(&destination, &self.delete_policy)
                {
                    warn!(
                        destination = %destination.display(),
                        ?outcome,
                        "previous build task content was not fully removed"
                    );
                }
                fs::create_dir_all(&destination).map_err(|source| {
                    ProvisionError::io(
                        format!("failed to create {}", destination.display()),
                        source,
                    )
                })?;
                extract_tree(&mut archive, &destination, &entries)
            }
            ExtractionMode::Flat => {
                if entries.is_empty() {
                    warn!(
                        package = %package.path.display(),
                        "package has no entries for any configured framework"
                    );
                }
                extract_flat(&mut archive, &destination, &entries)
            }
        };

        info!(
            package_id = %spec.package_id(),
            version = %package.version,
            mode = spec.mode().as_str(),
            files = written.len(),
            "injected package"
        );
        Ok(InjectedArtifact {
            package_id: spec.package_id().to_string(),
            archive: package.path.clone(),
            written,
        })
    }
}

/// Names of the entries `spec` would extract from `archive`: the first
/// selector in its selection order that matches anything.
pub fn planned_entries(archive: &dyn PackageArchive, spec: &ArtifactSpec) -> Vec<String> {
    spec.selection_order()
        .map(|selector| select_entries(archive, selector))
        .find(|entries| !entries.is_empty())
        .unwrap_or_default()
}
