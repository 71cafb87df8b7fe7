use std::collections::BTreeMap;
use std::path::Path;

pub const MSBUILD_SDKS_PATH: &str = "MSBuildSDKsPath";
pub const USE_SHARED_COMPILATION: &str = "UseSharedCompilation";
pub const DOTNET_MULTILEVEL_LOOKUP: &str = "DOTNET_MULTILEVEL_LOOKUP";
pub const MSBUILD_DISABLE_NODE_REUSE: &str = "MSBUILDDISABLENODEREUSE";

/// Environment variables merged over the inherited environment of every tool
/// invocation. Values are fixed once the environment is provisioned; derive a
/// new overlay with [`EnvOverlay::with_var`] instead of mutating a shared one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvOverlay {
    /// The fixed overlay for a patched SDK: no shared compilation server, no
    /// multilevel lookup, no MSBuild node reuse, SDK resolution pinned to
    /// `msbuild_sdks_dir`. Entries in `extra` are applied last.
    pub fn for_sdk(msbuild_sdks_dir: &Path, extra: &BTreeMap<String, String>) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(
            MSBUILD_SDKS_PATH.to_string(),
            msbuild_sdks_dir.display().to_string(),
        );
        vars.insert(USE_SHARED_COMPILATION.to_string(), "false".to_string());
        vars.insert(DOTNET_MULTILEVEL_LOOKUP.to_string(), "0".to_string());
        vars.insert(MSBUILD_DISABLE_NODE_REUSE.to_string(), "true".to_string());
        for (key, value) in extra {
            vars.insert(key.trim().to_string(), value.clone());
        }
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn with_var(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(key.into(), value.into());
        Self { vars }
    }
}
