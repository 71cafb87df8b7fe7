use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

/// Failures of provisioning and of tool invocations.
///
/// Clone, feed, archive and manifest errors leave the environment unusable;
/// callers abort the run. `Timeout` and `CommandFailed` belong to a single
/// invocation.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to clone tool installation {} into {}", .from.display(), .to.display())]
    Clone {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no package '{package_id}' found in feed {}", .feed.display())]
    ArtifactNotFound { package_id: String, feed: PathBuf },
    #[error("failed to read package feed {}", .feed.display())]
    FeedRead {
        feed: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open archive {}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to patch manifest {}", .path.display())]
    ManifestPatch {
        path: PathBuf,
        #[source]
        cause: ManifestPatchCause,
    },
    #[error("no SDK directory matching '{prefix}' under {}", .sdk_root.display())]
    SdkNotFound { sdk_root: PathBuf, prefix: String },
    #[error("{program} did not exit within {timeout:?} and was killed")]
    Timeout { program: String, timeout: Duration },
    #[error("failed to start {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` failed (exit code {}):\n{output}", display_exit_code(.exit_code))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },
    #[error("invalid environment config: {0}")]
    Config(String),
    #[error("failed to parse environment config")]
    ConfigParse(#[from] toml::de::Error),
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

fn display_exit_code(exit_code: &Option<i32>) -> String {
    exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "none".to_string())
}

#[derive(Debug, Error)]
pub enum ManifestPatchCause {
    #[error("failed to read manifest")]
    Read(#[source] io::Error),
    #[error("manifest is not valid JSON")]
    Parse(#[source] serde_json::Error),
    #[error("manifest has no value at {key_path}")]
    MissingKey { key_path: String },
    #[error("manifest value at {key_path} is not an object")]
    NotAnObject { key_path: String },
    #[error("failed to read version metadata from {}: {reason}", .assembly.display())]
    VersionProbe { assembly: PathBuf, reason: String },
    #[error("failed to serialize manifest")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to replace manifest")]
    Write(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    GracefulShutdown,
    ProcessEnumeration,
    ProcessTermination,
    DirectoryRemoval,
}

impl TeardownStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GracefulShutdown => "graceful-shutdown",
            Self::ProcessEnumeration => "process-enumeration",
            Self::ProcessTermination => "process-termination",
            Self::DirectoryRemoval => "directory-removal",
        }
    }
}

/// A cleanup step that failed during disposal. Collected and logged, never
/// raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownWarning {
    pub step: TeardownStep,
    pub message: String,
}

impl TeardownWarning {
    pub fn new(step: TeardownStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }
}

impl fmt::Display for TeardownWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step.as_str(), self.message)
    }
}
