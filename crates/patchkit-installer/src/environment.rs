use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use patchkit_core::{
    DeletePolicy, EnvOverlay, EnvironmentConfig, ProvisionError, Result, TeardownStep,
    TeardownWarning,
};
use patchkit_feed::PackageFeed;
use serde::Serialize;
use tracing::{info, warn};

use crate::clone::clone_tree;
use crate::delete::{delete_dir_robust, DeleteOutcome};
use crate::deps_json::{
    copy_side_loaded_assemblies, describe_side_loaded_assemblies, ManifestPatcher,
};
use crate::fs_utils::create_unique_dir;
use crate::inject::{ArtifactInjector, InjectionReport};
use crate::layout::{msbuild_sdks_dir, EnvironmentLayout};
use crate::process::{
    run, terminate_environment_processes, CommandOutput, Invocation, ProcessTable,
    SystemProcessTable,
};
use crate::project::{render_tool_project, PackageReference};
use crate::version_probe::{PeVersionProbe, VersionProbe};

/// What a caller needs to drive the provisioned tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentDescriptor {
    pub root: PathBuf,
    pub source_root: PathBuf,
    pub tool_path: PathBuf,
    pub sdk_dir: PathBuf,
    pub msbuild_sdks_dir: PathBuf,
    pub overlay: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Falls back to the environment's invocation timeout.
    pub timeout: Option<Duration>,
    pub ignore_exit_code: bool,
    pub require_clean_stderr: bool,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            ignore_exit_code: false,
            require_clean_stderr: true,
        }
    }
}

impl InvokeOptions {
    /// Returns the output whatever the exit code or error stream.
    pub fn unchecked() -> Self {
        Self {
            timeout: None,
            ignore_exit_code: true,
            require_clean_stderr: false,
        }
    }

    fn checked(validate: bool) -> Self {
        if validate {
            Self::default()
        } else {
            Self::unchecked()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub root: PathBuf,
    pub removal: Option<DeleteOutcome>,
    pub warnings: Vec<TeardownWarning>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A private, patched copy of the tool installation.
///
/// The copy is removed when the environment is torn down, either through
/// [`TestEnvironment::teardown`] or on drop.
pub struct TestEnvironment {
    layout: EnvironmentLayout,
    source_root: PathBuf,
    sdk_dir: PathBuf,
    overlay: EnvOverlay,
    invocation_timeout: Duration,
    shutdown_timeout: Duration,
    shutdown_args: Vec<String>,
    delete_policy: DeletePolicy,
    process_table: Box<dyn ProcessTable + Send + Sync>,
    injection: InjectionReport,
    disposed: bool,
}

impl std::fmt::Debug for TestEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestEnvironment")
            .field("root", &self.layout.root())
            .field("sdk_dir", &self.sdk_dir)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl TestEnvironment {
    pub fn provision(config: &EnvironmentConfig) -> Result<Self> {
        Self::provision_with(config, &PeVersionProbe, Box::new(SystemProcessTable))
    }

    /// Clones the tool, injects local artifacts, patches manifests and warms
    /// the tool up. Any failure after the clone disposes what was built.
    pub fn provision_with(
        config: &EnvironmentConfig,
        probe: &dyn VersionProbe,
        process_table: Box<dyn ProcessTable + Send + Sync>,
    ) -> Result<Self> {
        config.validate()?;
        let source_root = config.resolve_install_root()?;
        let feed_dir = if config.has_artifacts() {
            Some(config.resolve_feed_dir()?)
        } else {
            None
        };
        let delete_policy = config.delete_policy();

        let root = clone_tree(&source_root, &config.resolve_temp_base())?;
        let layout = EnvironmentLayout::new(root, config.tool.executable.clone());
        let sdk_dir = match layout.select_sdk_dir(config.tool.sdk_version_prefix.as_deref()) {
            Ok(sdk_dir) => sdk_dir,
            Err(err) => {
                delete_dir_robust(layout.root(), &delete_policy);
                return Err(err);
            }
        };
        let overlay = EnvOverlay::for_sdk(&msbuild_sdks_dir(&sdk_dir), &config.overlay);

        let mut environment = Self {
            layout,
            source_root,
            sdk_dir,
            overlay,
            invocation_timeout: config.invocation_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            shutdown_args: config.lifecycle.shutdown_args.clone(),
            delete_policy,
            process_table,
            injection: InjectionReport::default(),
            disposed: false,
        };

        if let Some(feed_dir) = feed_dir {
            let feed = PackageFeed::open(feed_dir);
            environment.injection =
                ArtifactInjector::new(&feed, &environment.sdk_dir, environment.delete_policy)
                    .inject_all(&config.artifact_specs())?;
        }

        let patch = &config.manifest_patch;
        if patch.enabled && !patch.assemblies.is_empty() {
            let from_dir = config.resolve_assemblies_dir()?;
            let descriptors = describe_side_loaded_assemblies(&patch.assemblies, &from_dir, probe)?;
            ManifestPatcher::new(patch.runtime_prefix.clone()).patch_runtime_entries(
                &config.manifest_targets(&environment.sdk_dir),
                &descriptors,
            )?;
            copy_side_loaded_assemblies(&patch.assemblies, &from_dir, &environment.sdk_dir)?;
        }

        environment.warm_up(config)?;

        info!(
            root = %environment.layout.root().display(),
            sdk_dir = %environment.sdk_dir.display(),
            "provisioned test environment"
        );
        Ok(environment)
    }

    fn warm_up(&self, config: &EnvironmentConfig) -> Result<()> {
        if config.warmup.projects.is_empty() {
            return Ok(());
        }
        let temp_base = config.resolve_temp_base();
        for project in &config.warmup.projects {
            let scratch = create_unique_dir(&temp_base, "patchkit-warmup").map_err(|source| {
                ProvisionError::io(
                    format!("failed to create warm-up directory under {}", temp_base.display()),
                    source,
                )
            })?;
            let created = self.create_new_project(
                &scratch,
                &project.name,
                &project.template,
                config.warmup_timeout(),
            );
            delete_dir_robust(&scratch, &self.delete_policy);
            created?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn tool_path(&self) -> PathBuf {
        self.layout.tool_path()
    }

    pub fn sdk_dir(&self) -> &Path {
        &self.sdk_dir
    }

    pub fn msbuild_sdks_dir(&self) -> PathBuf {
        msbuild_sdks_dir(&self.sdk_dir)
    }

    pub fn overlay(&self) -> &EnvOverlay {
        &self.overlay
    }

    pub fn injection(&self) -> &InjectionReport {
        &self.injection
    }

    pub fn descriptor(&self) -> EnvironmentDescriptor {
        EnvironmentDescriptor {
            root: self.layout.root().to_path_buf(),
            source_root: self.source_root.clone(),
            tool_path: self.tool_path(),
            sdk_dir: self.sdk_dir.clone(),
            msbuild_sdks_dir: self.msbuild_sdks_dir(),
            overlay: self
                .overlay
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    /// Runs the tool with the environment's overlay.
    pub fn invoke(
        &self,
        working_dir: &Path,
        args: &[&str],
        options: InvokeOptions,
    ) -> Result<CommandOutput> {
        let invocation = Invocation::new(self.tool_path(), working_dir)
            .args(args.iter().copied())
            .overlay(self.overlay.clone())
            .timeout(options.timeout.unwrap_or(self.invocation_timeout));
        let output = run(&invocation)?;
        ensure_success(&invocation, &output, options)?;
        Ok(output)
    }

    pub fn restore_project(&self, working_dir: &Path, project: &str, args: &[&str]) -> Result<()> {
        self.restore_file(working_dir, &format!("{project}.csproj"), args)
    }

    pub fn restore_solution(&self, working_dir: &Path, solution: &str, args: &[&str]) -> Result<()> {
        self.restore_file(working_dir, &format!("{solution}.sln"), args)
    }

    fn restore_file(&self, working_dir: &Path, file: &str, args: &[&str]) -> Result<()> {
        let mut full = vec!["restore", file];
        full.extend_from_slice(args);
        self.invoke(working_dir, &full, InvokeOptions::default())
            .map(|_| ())
    }

    /// Tool restores report failures through their output, so the result is
    /// returned unchecked.
    pub fn restore_tool_project(
        &self,
        working_dir: &Path,
        project: &str,
        args: &[&str],
    ) -> Result<CommandOutput> {
        let file = format!("{project}.csproj");
        let mut full = vec!["restore", file.as_str()];
        full.extend_from_slice(args);
        self.invoke(working_dir, &full, InvokeOptions::unchecked())
    }

    pub fn pack_project(
        &self,
        working_dir: &Path,
        project: &str,
        args: &[&str],
        nuspec_output_path: &str,
        validate: bool,
    ) -> Result<CommandOutput> {
        self.pack_file(
            working_dir,
            &format!("{project}.csproj"),
            args,
            nuspec_output_path,
            validate,
        )
    }

    pub fn pack_solution(
        &self,
        working_dir: &Path,
        solution: &str,
        args: &[&str],
        nuspec_output_path: &str,
        validate: bool,
    ) -> Result<CommandOutput> {
        self.pack_file(
            working_dir,
            &format!("{solution}.sln"),
            args,
            nuspec_output_path,
            validate,
        )
    }

    fn pack_file(
        &self,
        working_dir: &Path,
        file: &str,
        args: &[&str],
        nuspec_output_path: &str,
        validate: bool,
    ) -> Result<CommandOutput> {
        let nuspec = format!("/p:NuspecOutputPath={nuspec_output_path}");
        let mut full = vec!["pack", file];
        full.extend_from_slice(args);
        full.push(&nuspec);
        self.invoke(working_dir, &full, InvokeOptions::checked(validate))
    }

    pub fn build_project(&self, working_dir: &Path, project: &str, args: &[&str]) -> Result<()> {
        let file = format!("{project}.csproj");
        let mut full = vec!["msbuild", file.as_str()];
        full.extend_from_slice(args);
        full.push("/p:AppendRuntimeIdentifierToOutputPath=false");
        self.invoke(working_dir, &full, InvokeOptions::default())
            .map(|_| ())
    }

    /// Runs `new <template>` in `<root>/<name>` and returns that directory.
    pub fn create_new_project(
        &self,
        root: &Path,
        name: &str,
        template: &str,
        timeout: Duration,
    ) -> Result<PathBuf> {
        let project_dir = ensure_project_dir(root, name)?;
        let mut args = vec!["new"];
        args.extend(template.split_whitespace());
        self.invoke(
            &project_dir,
            &args,
            InvokeOptions {
                timeout: Some(timeout),
                ..InvokeOptions::default()
            },
        )?;
        Ok(project_dir)
    }

    /// Writes `<root>/<name>/<name>.csproj` as a tool-reference project and
    /// returns the project file path.
    pub fn create_tool_project(
        &self,
        root: &Path,
        name: &str,
        framework: &str,
        rid: &str,
        source: &str,
        packages: &[PackageReference],
    ) -> Result<PathBuf> {
        let project_dir = ensure_project_dir(root, name)?;
        let project_file = project_dir.join(format!("{name}.csproj"));
        let contents = render_tool_project(&project_dir, framework, rid, source, packages);
        fs::write(&project_file, contents).map_err(|source| {
            ProvisionError::io(
                format!("failed to write {}", project_file.display()),
                source,
            )
        })?;
        Ok(project_file)
    }

    /// Leaves the environment on disk and returns its descriptor.
    pub fn keep(mut self) -> EnvironmentDescriptor {
        self.disposed = true;
        self.descriptor()
    }

    pub fn teardown(mut self) -> TeardownReport {
        self.dispose()
    }

    fn dispose(&mut self) -> TeardownReport {
        self.disposed = true;
        let root = self.layout.root().to_path_buf();
        let mut warnings = Vec::new();

        if !self.shutdown_args.is_empty() {
            let shutdown = Invocation::new(self.tool_path(), &root)
                .args(self.shutdown_args.iter().cloned())
                .overlay(self.overlay.clone())
                .timeout(self.shutdown_timeout);
            if let Err(err) = run(&shutdown) {
                warnings.push(TeardownWarning::new(
                    TeardownStep::GracefulShutdown,
                    err.to_string(),
                ));
            }
        }

        warnings.extend(terminate_environment_processes(
            self.process_table.as_ref(),
            &self.tool_path(),
            &root,
        ));

        let removal = delete_dir_robust(&root, &self.delete_policy);
        if let DeleteOutcome::Residue { attempts, reason } = &removal {
            warnings.push(TeardownWarning::new(
                TeardownStep::DirectoryRemoval,
                format!(
                    "{} not fully removed after {attempts} attempt(s): {reason}",
                    root.display()
                ),
            ));
        }

        for warning in &warnings {
            warn!(root = %root.display(), %warning, "teardown step failed");
        }
        info!(root = %root.display(), warnings = warnings.len(), "tore down test environment");

        TeardownReport {
            root,
            removal: Some(removal),
            warnings,
        }
    }
}

impl Drop for TestEnvironment {
    fn drop(&mut self) {
        if !self.disposed {
            self.dispose();
        }
    }
}

fn ensure_project_dir(root: &Path, name: &str) -> Result<PathBuf> {
    let project_dir = root.join(name);
    fs::create_dir_all(&project_dir).map_err(|source| {
        ProvisionError::io(
            format!("failed to create project directory {}", project_dir.display()),
            source,
        )
    })?;
    Ok(project_dir)
}

/// Validated invocations fail on a nonzero exit or any non-blank error
/// output, carrying everything the tool printed.
pub fn ensure_success(
    invocation: &Invocation,
    output: &CommandOutput,
    options: InvokeOptions,
) -> Result<()> {
    let exit_ok = options.ignore_exit_code || output.success();
    let stderr_ok = !options.require_clean_stderr || output.stderr.trim().is_empty();
    if exit_ok && stderr_ok {
        return Ok(());
    }
    Err(ProvisionError::CommandFailed {
        command: invocation.display_command(),
        exit_code: output.exit_code,
        output: output.all_output(),
    })
}
