use std::path::PathBuf;

/// Locates the `runtime` section a patch registers into:
/// `targets[framework_key][package_key]["runtime"]` of the manifest at `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTarget {
    pub path: PathBuf,
    pub framework_key: String,
    pub package_key: String,
}

impl ManifestTarget {
    pub fn new(
        path: impl Into<PathBuf>,
        framework_key: impl Into<String>,
        package_key: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            framework_key: framework_key.into(),
            package_key: package_key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFileDescriptor {
    pub relative_path: String,
    pub assembly_version: String,
    pub file_version: String,
}

impl RuntimeFileDescriptor {
    pub fn new(
        relative_path: impl Into<String>,
        assembly_version: impl Into<String>,
        file_version: impl Into<String>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            assembly_version: assembly_version.into(),
            file_version: file_version.into(),
        }
    }

    /// Key of this file inside a `runtime` section, e.g.
    /// `lib/netstandard2.1/System.Security.Cryptography.Pkcs.dll`.
    pub fn runtime_key(&self, prefix: &str) -> String {
        let relative = self.relative_path.replace('\\', "/");
        let relative = relative.trim_start_matches('/');
        if prefix.is_empty() || prefix.ends_with('/') {
            format!("{prefix}{relative}")
        } else {
            format!("{prefix}/{relative}")
        }
    }
}
