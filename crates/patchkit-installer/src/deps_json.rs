use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use patchkit_core::{
    ManifestPatchCause, ManifestTarget, ProvisionError, Result, RuntimeFileDescriptor,
};
use serde::Serialize;
use serde_json::value::RawValue;
use serde_json::Value;
use tracing::{debug, info};

use crate::version_probe::VersionProbe;

const UTF8_BOM: char = '\u{feff}';
const DEFAULT_INDENT_UNIT: &str = "  ";

/// Value stored under a `runtime` key of a `.deps.json` package entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeEntry<'a> {
    assembly_version: &'a str,
    file_version: &'a str,
}

/// Members of one JSON object, each value borrowed from the manifest text.
type RawObject<'a> = HashMap<String, &'a RawValue>;

type CauseResult<T> = std::result::Result<T, ManifestPatchCause>;

/// Rewrites `targets[<framework>][<package>].runtime` in dependency
/// manifests so the host loads side-loaded assemblies.
///
/// Only the text of the `runtime` object changes. Every other byte of the
/// manifest, escapes and layout included, is written back as read.
#[derive(Debug, Clone)]
pub struct ManifestPatcher {
    runtime_prefix: String,
}

impl ManifestPatcher {
    pub fn new(runtime_prefix: impl Into<String>) -> Self {
        Self {
            runtime_prefix: runtime_prefix.into(),
        }
    }

    pub fn patch_runtime_entries(
        &self,
        targets: &[ManifestTarget],
        descriptors: &[RuntimeFileDescriptor],
    ) -> Result<()> {
        for target in targets {
            self.patch_manifest(target, descriptors)?;
        }
        Ok(())
    }

    /// Applying the same descriptors twice leaves the file byte-identical to
    /// the first result.
    pub fn patch_manifest(
        &self,
        target: &ManifestTarget,
        descriptors: &[RuntimeFileDescriptor],
    ) -> Result<()> {
        let patch_error = |cause: ManifestPatchCause| ProvisionError::ManifestPatch {
            path: target.path.clone(),
            cause,
        };

        let raw = fs::read_to_string(&target.path)
            .map_err(|source| patch_error(ManifestPatchCause::Read(source)))?;
        let (bom, body) = match raw.strip_prefix(UTF8_BOM) {
            Some(body) => (true, body),
            None => (false, raw.as_str()),
        };
        serde_json::from_str::<Value>(body)
            .map_err(|source| patch_error(ManifestPatchCause::Parse(source)))?;
        runtime_section(body, &target.framework_key, &target.package_key)
            .map_err(patch_error)?;

        let mut patched = body.to_string();
        for descriptor in descriptors {
            let key = descriptor.runtime_key(&self.runtime_prefix);
            let entry = RuntimeEntry {
                assembly_version: &descriptor.assembly_version,
                file_version: &descriptor.file_version,
            };
            debug!(manifest = %target.path.display(), key = %key, "setting runtime entry");
            patched = set_runtime_entry(
                &patched,
                &target.framework_key,
                &target.package_key,
                &key,
                &entry,
            )
            .map_err(patch_error)?;
        }

        if patched == body {
            debug!(manifest = %target.path.display(), "runtime entries already current");
            return Ok(());
        }

        let mut rendered = String::with_capacity(patched.len() + UTF8_BOM.len_utf8());
        if bom {
            rendered.push(UTF8_BOM);
        }
        rendered.push_str(&patched);

        write_atomically(&target.path, rendered.as_bytes())
            .map_err(|source| patch_error(ManifestPatchCause::Write(source)))?;
        info!(
            manifest = %target.path.display(),
            entries = descriptors.len(),
            "patched runtime manifest"
        );
        Ok(())
    }
}

/// Walks `targets[framework][package].runtime` and returns the text of the
/// runtime object, reporting the first missing or non-object step in
/// JSONPath bracket notation.
fn runtime_section<'a>(
    body: &'a str,
    framework_key: &str,
    package_key: &str,
) -> CauseResult<&'a str> {
    let mut key_path = String::from("$");
    let mut current = body.trim();
    for key in ["targets", framework_key, package_key, "runtime"] {
        let parent_path = key_path.clone();
        key_path.push_str(&format!("[{key:?}]"));
        let object = parse_object(current, parent_path)?;
        let value = object
            .get(key)
            .copied()
            .ok_or_else(|| ManifestPatchCause::MissingKey {
                key_path: key_path.clone(),
            })?;
        current = value.get();
    }
    if !current.starts_with('{') {
        return Err(ManifestPatchCause::NotAnObject { key_path });
    }
    Ok(current)
}

fn parse_object(text: &str, key_path: String) -> CauseResult<RawObject<'_>> {
    if !text.starts_with('{') {
        return Err(ManifestPatchCause::NotAnObject { key_path });
    }
    serde_json::from_str(text).map_err(ManifestPatchCause::Parse)
}

/// Sets one runtime entry, replacing an existing value in place or appending
/// a member after the last one.
fn set_runtime_entry(
    body: &str,
    framework_key: &str,
    package_key: &str,
    key: &str,
    entry: &RuntimeEntry<'_>,
) -> CauseResult<String> {
    let runtime = runtime_section(body, framework_key, package_key)?;
    let runtime_start = offset_in(body, runtime);
    let runtime_end = runtime_start + runtime.len();
    let members: RawObject<'_> = serde_json::from_str(runtime).map_err(ManifestPatchCause::Parse)?;
    let layout = ObjectLayout::detect(body, runtime_start, runtime_end, &members);
    let value = layout.render_entry(entry)?;

    if let Some(existing) = members.get(key) {
        let start = offset_in(body, existing.get());
        return Ok(splice(body, start, start + existing.get().len(), &value));
    }

    let key_json = serde_json::to_string(key).map_err(ManifestPatchCause::Serialize)?;
    let last_member_end = members
        .values()
        .map(|member| offset_in(body, member.get()) + member.get().len())
        .max();
    Ok(match last_member_end {
        Some(end) => splice(body, end, end, &layout.render_appended_member(&key_json, &value)),
        None => splice(
            body,
            runtime_start,
            runtime_end,
            &layout.render_single_member_object(&key_json, &value),
        ),
    })
}

/// How members of the runtime object are laid out in the existing text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ObjectLayout {
    Compact,
    Indented {
        newline: &'static str,
        closing_indent: String,
        member_indent: String,
        unit: String,
    },
}

impl ObjectLayout {
    fn detect(body: &str, start: usize, end: usize, members: &RawObject<'_>) -> Self {
        let object = &body[start..end];
        let newline = if body.contains("\r\n") { "\r\n" } else { "\n" };
        let closing_indent = if object.contains('\n') {
            line_indent_at(body, end.saturating_sub(1))
        } else if members.is_empty() && body.contains('\n') {
            line_indent_at(body, start)
        } else {
            return Self::Compact;
        };

        let member_indent = members
            .values()
            .map(|member| offset_in(body, member.get()))
            .min()
            .map(|first| line_indent_at(body, first))
            .unwrap_or_else(|| format!("{closing_indent}{DEFAULT_INDENT_UNIT}"));
        let unit = member_indent
            .strip_prefix(closing_indent.as_str())
            .filter(|unit| !unit.is_empty())
            .unwrap_or(DEFAULT_INDENT_UNIT)
            .to_string();
        Self::Indented {
            newline,
            closing_indent,
            member_indent,
            unit,
        }
    }

    fn render_entry(&self, entry: &RuntimeEntry<'_>) -> CauseResult<String> {
        let Self::Indented {
            newline,
            member_indent,
            unit,
            ..
        } = self
        else {
            return serde_json::to_string(entry).map_err(ManifestPatchCause::Serialize);
        };

        let value = serde_json::to_value(entry).map_err(ManifestPatchCause::Serialize)?;
        let fields = value.as_object().map(|object| object.iter()).into_iter().flatten();
        let mut lines = Vec::new();
        for (name, field) in fields {
            lines.push(format!(
                "{member_indent}{unit}{}: {}",
                serde_json::to_string(name).map_err(ManifestPatchCause::Serialize)?,
                serde_json::to_string(field).map_err(ManifestPatchCause::Serialize)?
            ));
        }
        let separator = format!(",{newline}");
        Ok(format!(
            "{{{newline}{}{newline}{member_indent}}}",
            lines.join(&separator)
        ))
    }

    fn render_appended_member(&self, key_json: &str, value: &str) -> String {
        match self {
            Self::Compact => format!(",{key_json}:{value}"),
            Self::Indented {
                newline,
                member_indent,
                ..
            } => format!(",{newline}{member_indent}{key_json}: {value}"),
        }
    }

    fn render_single_member_object(&self, key_json: &str, value: &str) -> String {
        match self {
            Self::Compact => format!("{{{key_json}:{value}}}"),
            Self::Indented {
                newline,
                closing_indent,
                member_indent,
                ..
            } => format!("{{{newline}{member_indent}{key_json}: {value}{newline}{closing_indent}}}"),
        }
    }
}

/// Byte offset of `part`, a subslice of `text`.
fn offset_in(text: &str, part: &str) -> usize {
    part.as_ptr() as usize - text.as_ptr() as usize
}

/// Leading spaces and tabs of the line containing byte `position`.
fn line_indent_at(text: &str, position: usize) -> String {
    let line_start = text[..position].rfind('\n').map_or(0, |index| index + 1);
    text[line_start..]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect()
}

fn splice(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut spliced = String::with_capacity(text.len() - (end - start) + replacement.len());
    spliced.push_str(&text[..start]);
    spliced.push_str(replacement);
    spliced.push_str(&text[end..]);
    spliced
}

/// Replaces `path` with `contents` through a sibling temp file so readers
/// never observe a partial write. The replaced file's permissions carry over.
pub fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".patchkit-")
        .tempfile_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    if let Ok(metadata) = fs::metadata(path) {
        temp.as_file().set_permissions(metadata.permissions())?;
    }
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Probes each side-loaded assembly in `from_dir` for the versions its
/// runtime entry should carry.
pub fn describe_side_loaded_assemblies(
    names: &[String],
    from_dir: &Path,
    probe: &dyn VersionProbe,
) -> Result<Vec<RuntimeFileDescriptor>> {
    names
        .iter()
        .map(|name| {
            let assembly = from_dir.join(name);
            let versions = probe
                .probe(&assembly)
                .map_err(|reason| ProvisionError::ManifestPatch {
                    path: assembly.clone(),
                    cause: ManifestPatchCause::VersionProbe {
                        assembly: assembly.clone(),
                        reason,
                    },
                })?;
            Ok(RuntimeFileDescriptor::new(
                name.as_str(),
                versions.assembly_version,
                versions.file_version,
            ))
        })
        .collect()
}

/// Copies the side-loaded assemblies next to the patched manifests,
/// overwriting older copies.
pub fn copy_side_loaded_assemblies(
    names: &[String],
    from_dir: &Path,
    to_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut copied = Vec::with_capacity(names.len());
    for name in names {
        let from = from_dir.join(name);
        let to = to_dir.join(name);
        fs::copy(&from, &to).map_err(|source| {
            ProvisionError::io(
                format!(
                    "failed to copy side-loaded assembly {} to {}",
                    from.display(),
                    to.display()
                ),
                source,
            )
        })?;
        copied.push(to);
    }
    Ok(copied)
}
