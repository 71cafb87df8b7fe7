use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    pub id: String,
    pub version: String,
}

impl PackageReference {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

/// Project file for a `DotnetToolReference` restore, isolated to
/// `project_dir` for packages, extensions and sources.
pub fn render_tool_project(
    project_dir: &Path,
    framework: &str,
    rid: &str,
    source: &str,
    packages: &[PackageReference],
) -> String {
    let dir = xml_escape(&project_dir.display().to_string());
    let packages_path = xml_escape(&project_dir.join("tools").join("packages").display().to_string());

    let mut references = String::new();
    for package in packages {
        let _ = writeln!(
            references,
            "    <PackageReference Include=\"{}\" Version=\"{}\" />",
            xml_escape(&package.id),
            xml_escape(&package.version)
        );
    }

    format!(
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <RestoreProjectStyle>DotnetToolReference</RestoreProjectStyle>
    <OutputType>Exe</OutputType>
    <TargetFramework>{framework}</TargetFramework>
    <RuntimeIdentifier>{rid}</RuntimeIdentifier>
    <RestorePackagesPath>{packages_path}</RestorePackagesPath>
    <RestoreSolutionDirectory>{dir}</RestoreSolutionDirectory>
    <MSBuildProjectExtensionsPath>{dir}</MSBuildProjectExtensionsPath>
    <RestoreSources>{source}</RestoreSources>
    <DisableImplicitFrameworkReferences>true</DisableImplicitFrameworkReferences>
    <RestoreFallbackFolders>clear</RestoreFallbackFolders>
    <RestoreAdditionalProjectSources></RestoreAdditionalProjectSources>
    <RestoreAdditionalProjectFallbackFolders></RestoreAdditionalProjectFallbackFolders>
    <RestoreAdditionalProjectFallbackFoldersExcludes></RestoreAdditionalProjectFallbackFoldersExcludes>
  </PropertyGroup>
  <ItemGroup>
{references}  </ItemGroup>
</Project>
"#,
        framework = xml_escape(framework.trim()),
        rid = xml_escape(rid.trim()),
        source = xml_escape(source),
    )
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}
