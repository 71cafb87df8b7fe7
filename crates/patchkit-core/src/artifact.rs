use std::iter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::EntrySelector;

/// Archive prefixes carried by the build-task package.
pub const BUILD_TASK_PREFIXES: [&str; 4] = ["Desktop", "CoreCLR", "build", "buildCrossTargeting"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMode {
    /// Replace the destination subtree, keeping archive directory structure.
    Structured,
    /// Copy matched entries into the destination by file name only.
    Flat,
}

impl ExtractionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Flat => "flat",
        }
    }
}

/// One package to inject into the cloned SDK.
///
/// `destination` is relative to the selected SDK directory; an empty path means
/// the SDK directory itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    package_id: String,
    selector: EntrySelector,
    fallback: Option<EntrySelector>,
    destination: PathBuf,
    mode: ExtractionMode,
}

impl ArtifactSpec {
    pub fn structured<I, S>(
        package_id: impl Into<String>,
        prefixes: I,
        destination: impl Into<PathBuf>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            package_id: package_id.into(),
            selector: EntrySelector::from_prefixes(prefixes),
            fallback: None,
            destination: destination.into(),
            mode: ExtractionMode::Structured,
        }
    }

    pub fn flat(
        package_id: impl Into<String>,
        selector: EntrySelector,
        fallback: Option<EntrySelector>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            package_id: package_id.into(),
            selector,
            fallback,
            destination: destination.into(),
            mode: ExtractionMode::Flat,
        }
    }

    /// Flat-copied library package: `lib/<preferred>` plus the targets file,
    /// falling back to `lib/<fallback>` plus the targets file.
    pub fn library(
        package_id: impl Into<String>,
        preferred_frameworks: &[String],
        fallback_frameworks: &[String],
        targets_file: Option<&str>,
    ) -> Self {
        let fallback = if fallback_frameworks.is_empty() {
            None
        } else {
            Some(framework_selector(fallback_frameworks, targets_file))
        };
        Self::flat(
            package_id,
            framework_selector(preferred_frameworks, targets_file),
            fallback,
            PathBuf::new(),
        )
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    pub fn selector(&self) -> &EntrySelector {
        &self.selector
    }

    pub fn fallback(&self) -> Option<&EntrySelector> {
        self.fallback.as_ref()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn mode(&self) -> ExtractionMode {
        self.mode
    }

    /// Selectors in the order they should be tried; the first one that matches
    /// anything wins.
    pub fn selection_order(&self) -> impl Iterator<Item = &EntrySelector> {
        iter::once(&self.selector).chain(self.fallback.iter())
    }
}

pub fn framework_selector(frameworks: &[String], targets_file: Option<&str>) -> EntrySelector {
    let selector = EntrySelector::from_prefixes(
        frameworks
            .iter()
            .map(|framework| format!("lib/{}/", framework.trim_matches('/'))),
    );
    match targets_file {
        Some(file_name) if !file_name.trim().is_empty() => selector.with_file_name(file_name),
        _ => selector,
    }
}
