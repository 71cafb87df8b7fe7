use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ArtifactSpec, ManifestTarget, ProvisionError, Result, BUILD_TASK_PREFIXES};

/// Everything needed to provision one disposable environment.
///
/// Every section falls back to the stock dotnet/NuGet layout, so an empty TOML
/// document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub tool: ToolConfig,
    pub feed: FeedConfig,
    pub artifacts: ArtifactsConfig,
    pub manifest_patch: ManifestPatchConfig,
    pub lifecycle: LifecycleConfig,
    pub warmup: WarmupConfig,
    /// Extra variables layered over the fixed overlay.
    pub overlay: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Installation to clone. Defaults to the directory holding `executable`
    /// on `PATH`.
    pub install_root: Option<PathBuf>,
    pub executable: String,
    /// Leading characters of the SDK version directory to patch, e.g. `5.`.
    pub sdk_version_prefix: Option<String>,
    /// Parent of the temporary clone. Defaults to the OS temp directory.
    pub temp_base: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Package whose `build*`/`Desktop`/`CoreCLR` content replaces an SDK
    /// subtree wholesale.
    pub build_task: Option<String>,
    pub build_task_destination: PathBuf,
    pub build_task_prefixes: Vec<String>,
    /// Packages flat-copied into the SDK directory.
    pub libraries: Vec<String>,
    pub preferred_frameworks: Vec<String>,
    pub fallback_frameworks: Vec<String>,
    pub targets_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestPatchConfig {
    pub enabled: bool,
    /// Manifest file names, relative to the SDK directory.
    pub manifests: Vec<String>,
    pub framework_key: String,
    pub package_key: String,
    pub runtime_prefix: String,
    /// Side-loaded assemblies registered in every manifest and copied into
    /// the SDK directory.
    pub assemblies: Vec<String>,
    /// Where the side-loaded assemblies live. Defaults to the working
    /// directory.
    pub assemblies_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub invocation_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub shutdown_args: Vec<String>,
    pub delete_max_attempts: u32,
    pub delete_retry_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    pub timeout_secs: u64,
    pub projects: Vec<WarmupProject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupProject {
    pub name: String,
    pub template: String,
}

/// Bounded retry for deleting directories that may be briefly locked by
/// another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletePolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            delay: Duration::from_millis(100),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            install_root: None,
            executable: default_executable().to_string(),
            sdk_version_prefix: Some("5.".to_string()),
            temp_base: None,
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            build_task: Some("NuGet.Build.Tasks.Pack".to_string()),
            build_task_destination: PathBuf::from("Sdks").join("NuGet.Build.Tasks.Pack"),
            build_task_prefixes: BUILD_TASK_PREFIXES.iter().map(|p| p.to_string()).collect(),
            libraries: [
                "NuGet.Build.Tasks",
                "NuGet.Versioning",
                "NuGet.Protocol",
                "NuGet.ProjectModel",
                "NuGet.Packaging",
                "NuGet.LibraryModel",
                "NuGet.Frameworks",
                "NuGet.DependencyResolver.Core",
                "NuGet.Configuration",
                "NuGet.Common",
                "NuGet.Commands",
                "NuGet.CommandLine.XPlat",
                "NuGet.Credentials",
            ]
            .iter()
            .map(|id| id.to_string())
            .collect(),
            preferred_frameworks: vec!["netstandard2.1".to_string(), "netcoreapp5.0".to_string()],
            fallback_frameworks: vec!["netstandard2.0".to_string()],
            targets_file: Some("NuGet.targets".to_string()),
        }
    }
}

impl Default for ManifestPatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            manifests: vec![
                "dotnet.deps.json".to_string(),
                "MSBuild.deps.json".to_string(),
                "NuGet.CommandLine.XPlat.deps.json".to_string(),
            ],
            framework_key: ".NETCoreApp,Version=v5.0".to_string(),
            package_key: "NuGet.Build.Tasks/5.3.0-rtm.6251".to_string(),
            runtime_prefix: "lib/netstandard2.1/".to_string(),
            assemblies: vec!["System.Security.Cryptography.Pkcs.dll".to_string()],
            assemblies_dir: None,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        let delete = DeletePolicy::default();
        Self {
            invocation_timeout_secs: 600,
            shutdown_timeout_secs: 60,
            shutdown_args: vec!["build-server".to_string(), "shutdown".to_string()],
            delete_max_attempts: delete.max_attempts,
            delete_retry_delay_ms: delete.delay.as_millis() as u64,
        }
    }
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            projects: vec![
                WarmupProject {
                    name: "ClassLibrary1".to_string(),
                    template: "classlib".to_string(),
                },
                WarmupProject {
                    name: "ConsoleApp1".to_string(),
                    template: "console".to_string(),
                },
            ],
        }
    }
}

fn default_executable() -> &'static str {
    if cfg!(windows) {
        "dotnet.exe"
    } else {
        "dotnet"
    }
}

impl EnvironmentConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| {
            ProvisionError::io(
                format!("failed to read environment config {}", path.display()),
                source,
            )
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|err| ProvisionError::Config(format!("failed to render config: {err}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool.executable.trim().is_empty() {
            return Err(ProvisionError::Config(
                "tool.executable must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for id in self.artifacts.build_task.iter().chain(&self.artifacts.libraries) {
            if id.trim().is_empty() {
                return Err(ProvisionError::Config(
                    "artifact package ids must not be empty".to_string(),
                ));
            }
            if !seen.insert(id.to_ascii_lowercase()) {
                return Err(ProvisionError::Config(format!(
                    "artifact '{id}' is declared more than once"
                )));
            }
        }

        if self.artifacts.build_task.is_some()
            && self
                .artifacts
                .build_task_prefixes
                .iter()
                .all(|prefix| prefix.is_empty())
        {
            return Err(ProvisionError::Config(
                "artifacts.build_task_prefixes must name at least one non-empty prefix"
                    .to_string(),
            ));
        }
        if !self.artifacts.libraries.is_empty()
            && self
                .artifacts
                .preferred_frameworks
                .iter()
                .any(|framework| framework.trim_matches('/').is_empty())
        {
            return Err(ProvisionError::Config(
                "artifacts.preferred_frameworks must not contain empty entries".to_string(),
            ));
        }
        if self.artifacts.build_task_destination.is_absolute() {
            return Err(ProvisionError::Config(
                "artifacts.build_task_destination must be relative to the SDK directory"
                    .to_string(),
            ));
        }

        if self.manifest_patch.enabled {
            let patch = &self.manifest_patch;
            if patch.framework_key.is_empty() || patch.package_key.is_empty() {
                return Err(ProvisionError::Config(
                    "manifest_patch.framework_key and package_key must be set".to_string(),
                ));
            }
        }

        if self.lifecycle.invocation_timeout_secs == 0 {
            return Err(ProvisionError::Config(
                "lifecycle.invocation_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// The build-task artifact first, then the library artifacts in declared
    /// order.
    pub fn artifact_specs(&self) -> Vec<ArtifactSpec> {
        let artifacts = &self.artifacts;
        let mut specs = Vec::new();
        if let Some(build_task) = &artifacts.build_task {
            specs.push(ArtifactSpec::structured(
                build_task.clone(),
                artifacts
                    .build_task_prefixes
                    .iter()
                    .filter(|prefix| !prefix.is_empty())
                    .cloned(),
                artifacts.build_task_destination.clone(),
            ));
        }
        for id in &artifacts.libraries {
            specs.push(ArtifactSpec::library(
                id.clone(),
                &artifacts.preferred_frameworks,
                &artifacts.fallback_frameworks,
                artifacts.targets_file.as_deref(),
            ));
        }
        specs
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy {
            max_attempts: self.lifecycle.delete_max_attempts.max(1),
            delay: Duration::from_millis(self.lifecycle.delete_retry_delay_ms),
        }
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle.invocation_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle.shutdown_timeout_secs.max(1))
    }

    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_secs(self.warmup.timeout_secs.max(1))
    }

    pub fn resolve_install_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.tool.install_root {
            return Ok(root.clone());
        }

        let executable = which::which(&self.tool.executable).map_err(|err| {
            ProvisionError::Config(format!(
                "tool.install_root is not set and '{}' was not found on PATH: {err}",
                self.tool.executable
            ))
        })?;
        let executable = fs::canonicalize(&executable).unwrap_or(executable);
        executable
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                ProvisionError::Config(format!(
                    "cannot derive install root from {}",
                    executable.display()
                ))
            })
    }

    pub fn resolve_temp_base(&self) -> PathBuf {
        self.tool
            .temp_base
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn resolve_feed_dir(&self) -> Result<PathBuf> {
        self.feed.directory.clone().ok_or_else(|| {
            ProvisionError::Config("feed.directory must be set to inject artifacts".to_string())
        })
    }

    pub fn resolve_assemblies_dir(&self) -> Result<PathBuf> {
        match &self.manifest_patch.assemblies_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().map_err(|source| {
                ProvisionError::io("failed to resolve the current directory", source)
            }),
        }
    }

    pub fn manifest_targets(&self, sdk_dir: &Path) -> Vec<ManifestTarget> {
        let patch = &self.manifest_patch;
        patch
            .manifests
            .iter()
            .map(|file_name| {
                ManifestTarget::new(
                    sdk_dir.join(file_name),
                    patch.framework_key.clone(),
                    patch.package_key.clone(),
                )
            })
            .collect()
    }

    pub fn has_artifacts(&self) -> bool {
        self.artifacts.build_task.is_some() || !self.artifacts.libraries.is_empty()
    }
}
