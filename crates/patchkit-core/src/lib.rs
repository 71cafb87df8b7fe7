mod artifact;
mod config;
mod error;
mod overlay;
mod runtime;
mod selector;

pub use artifact::{framework_selector, ArtifactSpec, ExtractionMode, BUILD_TASK_PREFIXES};
pub use config::{
    ArtifactsConfig, DeletePolicy, EnvironmentConfig, FeedConfig, LifecycleConfig,
    ManifestPatchConfig, ToolConfig, WarmupConfig, WarmupProject,
};
pub use error::{ManifestPatchCause, ProvisionError, Result, TeardownStep, TeardownWarning};
pub use overlay::{
    EnvOverlay, DOTNET_MULTILEVEL_LOOKUP, MSBUILD_DISABLE_NODE_REUSE, MSBUILD_SDKS_PATH,
    USE_SHARED_COMPILATION,
};
pub use runtime::{ManifestTarget, RuntimeFileDescriptor};
pub use selector::{normalize_entry_name, EntrySelector};
