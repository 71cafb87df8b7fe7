use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use patchkit_core::EnvironmentConfig;
use patchkit_feed::PackageFeed;
use patchkit_installer::{
    describe_side_loaded_assemblies, InvokeOptions, ManifestPatcher, PeVersionProbe,
    TestEnvironment,
};

use crate::render::{
    current_output_style, format_descriptor_lines, format_package_lines, format_teardown_lines,
    print_status, OutputStyle,
};
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let style = current_output_style();

    match cli.command {
        Commands::Provision { config, keep, json } => {
            let config = load_config(config.as_deref())?;
            let environment =
                TestEnvironment::provision(&config).context("failed to provision environment")?;
            let descriptor = environment.descriptor();

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&descriptor)
                        .context("failed to render environment descriptor")?
                );
            } else {
                for line in format_descriptor_lines(&descriptor) {
                    println!("{line}");
                }
            }

            if keep {
                let kept = environment.keep();
                print_status(
                    style,
                    "ok",
                    &format!("kept environment at {}", kept.root.display()),
                );
            } else {
                print_teardown(style, environment);
            }
        }
        Commands::Exec {
            config,
            working_dir,
            timeout_secs,
            keep,
            args,
        } => {
            let config = load_config(config.as_deref())?;
            let environment =
                TestEnvironment::provision(&config).context("failed to provision environment")?;
            let options = InvokeOptions {
                timeout: timeout_secs.map(Duration::from_secs),
                ..InvokeOptions::unchecked()
            };
            let args = args.iter().map(String::as_str).collect::<Vec<_>>();
            let result = environment.invoke(&working_dir, &args, options);
            if let Ok(output) = &result {
                print!("{}", output.stdout);
                eprint!("{}", output.stderr);
            }

            if keep {
                let kept = environment.keep();
                print_status(
                    style,
                    "ok",
                    &format!("kept environment at {}", kept.root.display()),
                );
            } else {
                print_teardown(style, environment);
            }

            let output = result.context("tool invocation failed")?;
            if !output.success() {
                return Err(anyhow!(
                    "tool exited with {}",
                    output
                        .exit_code
                        .map(|code| format!("code {code}"))
                        .unwrap_or_else(|| "no exit code".to_string())
                ));
            }
        }
        Commands::Feed { dir, id } => {
            let feed = PackageFeed::open(&dir);
            match id {
                Some(id) => {
                    let package = feed.find_most_recent(&id).with_context(|| {
                        format!("failed to resolve '{id}' in {}", dir.display())
                    })?;
                    println!("{}", package.path.display());
                }
                None => {
                    let packages = feed
                        .list_packages()
                        .with_context(|| format!("failed to list {}", dir.display()))?;
                    if packages.is_empty() {
                        println!("No packages found in {}", dir.display());
                    }
                    for line in format_package_lines(&packages) {
                        println!("{line}");
                    }
                }
            }
        }
        Commands::PatchManifest { config, sdk_dir } => {
            let config = load_config(config.as_deref())?;
            let patch = &config.manifest_patch;
            if !patch.enabled {
                print_status(style, "warn", "manifest patching is disabled in config");
                return Ok(());
            }
            let from_dir = config.resolve_assemblies_dir()?;
            let descriptors =
                describe_side_loaded_assemblies(&patch.assemblies, &from_dir, &PeVersionProbe)?;
            let targets = config.manifest_targets(&sdk_dir);
            ManifestPatcher::new(patch.runtime_prefix.clone())
                .patch_runtime_entries(&targets, &descriptors)
                .with_context(|| format!("failed to patch manifests in {}", sdk_dir.display()))?;
            print_status(
                style,
                "ok",
                &format!(
                    "patched {} manifest(s) with {} runtime entr{}",
                    targets.len(),
                    descriptors.len(),
                    if descriptors.len() == 1 { "y" } else { "ies" }
                ),
            );
        }
        Commands::ConfigTemplate => {
            print!("{}", EnvironmentConfig::default().to_toml_string()?);
        }
    }

    Ok(())
}

pub(crate) fn load_config(path: Option<&Path>) -> Result<EnvironmentConfig> {
    match path {
        Some(path) => EnvironmentConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EnvironmentConfig::default()),
    }
}

fn print_teardown(style: OutputStyle, environment: TestEnvironment) {
    let report = environment.teardown();
    for (status, line) in format_teardown_lines(&report) {
        print_status(style, status, &line);
    }
}
