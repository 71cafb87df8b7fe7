use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::error::ErrorKind;
use clap::Parser;
use patchkit_core::{TeardownStep, TeardownWarning};
use patchkit_feed::PackageInfo;
use patchkit_installer::{DeleteOutcome, EnvironmentDescriptor, TeardownReport};
use semver::Version;

use crate::dispatch::load_config;
use crate::render::{
    format_descriptor_lines, format_package_lines, format_teardown_lines, render_status_line,
    resolve_output_style, OutputStyle,
};
use crate::{Cli, Commands};

#[test]
fn exec_collects_trailing_tool_arguments() {
    let cli = Cli::try_parse_from([
        "patchkit",
        "exec",
        "--config",
        "env.toml",
        "--timeout-secs",
        "90",
        "--",
        "restore",
        "App.csproj",
        "--verbosity",
        "minimal",
    ])
    .expect("exec must parse");

    match cli.command {
        Commands::Exec {
            config,
            working_dir,
            timeout_secs,
            keep,
            args,
        } => {
            assert_eq!(config, Some(PathBuf::from("env.toml")));
            assert_eq!(working_dir, PathBuf::from("."));
            assert_eq!(timeout_secs, Some(90));
            assert!(!keep);
            assert_eq!(args, vec!["restore", "App.csproj", "--verbosity", "minimal"]);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn exec_requires_tool_arguments() {
    let err = Cli::try_parse_from(["patchkit", "exec"]).expect_err("args are required");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
}

#[test]
fn provision_flags_parse() {
    let cli = Cli::try_parse_from(["patchkit", "provision", "--keep", "--json"])
        .expect("provision must parse");
    match cli.command {
        Commands::Provision { config, keep, json } => {
            assert!(config.is_none());
            assert!(keep);
            assert!(json);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn feed_and_patch_manifest_parse() {
    let cli = Cli::try_parse_from(["patchkit", "feed", "/feeds/local", "--id", "NuGet.Common"])
        .expect("feed must parse");
    assert!(matches!(
        cli.command,
        Commands::Feed { ref dir, id: Some(ref id) } if dir == &PathBuf::from("/feeds/local") && id == "NuGet.Common"
    ));

    let cli = Cli::try_parse_from(["patchkit", "patch-manifest", "--sdk-dir", "/env/sdk/5.0.100"])
        .expect("patch-manifest must parse");
    assert!(matches!(cli.command, Commands::PatchManifest { config: None, .. }));

    let err = Cli::try_parse_from(["patchkit", "patch-manifest"])
        .expect_err("sdk dir is required");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
}

#[test]
fn config_template_parses() {
    let cli = Cli::try_parse_from(["patchkit", "config-template"]).expect("must parse");
    assert!(matches!(cli.command, Commands::ConfigTemplate));
}

#[test]
fn resolve_output_style_follows_stdout() {
    assert_eq!(resolve_output_style(true), OutputStyle::Rich);
    assert_eq!(resolve_output_style(false), OutputStyle::Plain);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "removed /tmp/patchkit-1"),
        "removed /tmp/patchkit-1"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "removed /tmp/patchkit-1"),
        "[OK] removed /tmp/patchkit-1"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "residue left"),
        "[WARN] residue left"
    );
}

#[test]
fn descriptor_lines_list_paths_then_overlay() {
    let mut overlay = BTreeMap::new();
    overlay.insert("DOTNET_MULTILEVEL_LOOKUP".to_string(), "0".to_string());
    let descriptor = EnvironmentDescriptor {
        root: PathBuf::from("/tmp/patchkit-1"),
        source_root: PathBuf::from("/usr/share/dotnet"),
        tool_path: PathBuf::from("/tmp/patchkit-1/dotnet"),
        sdk_dir: PathBuf::from("/tmp/patchkit-1/sdk/5.0.100"),
        msbuild_sdks_dir: PathBuf::from("/tmp/patchkit-1/sdk/5.0.100/Sdks"),
        overlay,
    };

    let lines = format_descriptor_lines(&descriptor);
    assert_eq!(lines[0], "root: /tmp/patchkit-1");
    assert_eq!(lines[2], "tool: /tmp/patchkit-1/dotnet");
    assert_eq!(lines.last().map(String::as_str), Some("env DOTNET_MULTILEVEL_LOOKUP=0"));
}

#[test]
fn package_lines_flag_symbols_packages() {
    let stamp = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let packages = vec![
        PackageInfo {
            id: "Foo".to_string(),
            version: Version::new(1, 0, 0),
            path: PathBuf::from("/feed/Foo.1.0.0.nupkg"),
            last_write_time: stamp,
            symbols: false,
        },
        PackageInfo {
            id: "Foo".to_string(),
            version: Version::new(1, 0, 0),
            path: PathBuf::from("/feed/Foo.1.0.0.symbols.nupkg"),
            last_write_time: stamp,
            symbols: true,
        },
    ];
    assert_eq!(
        format_package_lines(&packages),
        vec![
            "Foo 1.0.0 (1700000000)".to_string(),
            "Foo 1.0.0 (1700000000) [symbols]".to_string(),
        ]
    );
}

#[test]
fn teardown_lines_report_warnings_or_success() {
    let clean = TeardownReport {
        root: PathBuf::from("/tmp/patchkit-1"),
        removal: Some(DeleteOutcome::Removed { attempts: 1 }),
        warnings: Vec::new(),
    };
    assert_eq!(
        format_teardown_lines(&clean),
        vec![("ok", "removed /tmp/patchkit-1".to_string())]
    );

    let dirty = TeardownReport {
        warnings: vec![TeardownWarning::new(
            TeardownStep::DirectoryRemoval,
            "residue left",
        )],
        ..clean
    };
    assert_eq!(
        format_teardown_lines(&dirty),
        vec![("warn", "directory-removal: residue left".to_string())]
    );
}

#[test]
fn load_config_defaults_without_path_and_reads_files() {
    let defaults = load_config(None).expect("defaults must load");
    assert_eq!(defaults, patchkit_core::EnvironmentConfig::default());

    let root = test_root();
    let path = root.join("env.toml");
    fs::write(&path, "[tool]\nsdk_version_prefix = \"8.\"\n").expect("must write config");
    let config = load_config(Some(&path)).expect("config must load");
    assert_eq!(config.tool.sdk_version_prefix.as_deref(), Some("8."));

    let err = load_config(Some(&root.join("absent.toml"))).expect_err("missing file must fail");
    assert!(err.to_string().contains("failed to load config"));

    let _ = fs::remove_dir_all(&root);
}

fn test_root() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "patchkit-cli-tests-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}
