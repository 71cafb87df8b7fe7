mod archive;
mod clone;
mod delete;
mod deps_json;
mod environment;
mod extract;
mod fs_utils;
mod inject;
mod layout;
mod process;
mod project;
mod version_probe;

pub use archive::{ArchiveEntry, PackageArchive, ZipPackageArchive};
pub use clone::{clone_tree, mirror_tree, CloneStats, CLONED_FILE_AGE};
pub use delete::{delete_dir_robust, delete_dir_robust_with_hooks, DeleteOutcome, RemoveKind};
pub use deps_json::{
    copy_side_loaded_assemblies, describe_side_loaded_assemblies, write_atomically,
    ManifestPatcher,
};
pub use environment::{
    ensure_success, EnvironmentDescriptor, InvokeOptions, TeardownReport, TestEnvironment,
};
pub use extract::{
    extract_flat, extract_tree, flat_entry_file_name, select_entries, tree_entry_path,
};
pub use fs_utils::{is_within, normalize_lexically};
pub use inject::{planned_entries, ArtifactInjector, InjectedArtifact, InjectionReport};
pub use layout::{msbuild_sdks_dir, EnvironmentLayout};
pub use process::{
    run, terminate_environment_processes, CommandOutput, Invocation, ProcessRecord, ProcessTable,
    SystemProcessTable, DEFAULT_INVOCATION_TIMEOUT,
};
pub use project::{render_tool_project, PackageReference};
pub use version_probe::{parse_version_resource, AssemblyVersions, PeVersionProbe, VersionProbe};
