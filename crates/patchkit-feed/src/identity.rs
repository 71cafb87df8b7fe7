use semver::{BuildMetadata, Prerelease, Version};

pub const PACKAGE_EXTENSION: &str = ".nupkg";
const SYMBOLS_SUFFIX: &str = ".symbols";

/// Identity guessed from a `<id>.<version>[.symbols].nupkg` file name. Ids
/// that end in a numeric segment (`Foo.2`) are ambiguous here; the package's
/// nuspec is authoritative when it can be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFileName {
    pub id: String,
    pub version: Version,
    pub symbols: bool,
}

/// Splits a package file name into id and version.
///
/// The split point is the first `.` after which the remainder parses as a
/// package version, so ids containing dots (`NuGet.Build.Tasks`) and versions
/// with prerelease labels (`5.3.0-rtm.6251`) both survive.
pub fn parse_package_file_name(file_name: &str) -> Option<PackageFileName> {
    if !is_package_file(file_name) {
        return None;
    }
    let stem = &file_name[..file_name.len() - PACKAGE_EXTENSION.len()];

    let symbols = is_symbols_package(file_name);
    let stem = if symbols {
        &stem[..stem.len() - SYMBOLS_SUFFIX.len()]
    } else {
        stem
    };

    for (index, _) in stem.match_indices('.') {
        let id = &stem[..index];
        let remainder = &stem[index + 1..];
        if id.is_empty() || !remainder.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        if let Some(version) = parse_package_version(remainder) {
            return Some(PackageFileName {
                id: id.to_string(),
                version,
                symbols,
            });
        }
    }

    None
}

/// Whether `file_name` names a package file (`*.nupkg`, any case).
pub fn is_package_file(file_name: &str) -> bool {
    file_name.to_ascii_lowercase().ends_with(PACKAGE_EXTENSION)
}

/// Symbols packages share their id with the real package and are told apart
/// by the `.symbols.nupkg` suffix alone.
pub fn is_symbols_package(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    lower
        .strip_suffix(PACKAGE_EXTENSION)
        .is_some_and(|stem| stem.ends_with(SYMBOLS_SUFFIX))
}

/// Parses a package version. Besides strict semver this accepts one to four
/// numeric components; a fourth component is kept as build metadata
/// (`1.2.3.4` becomes `1.2.3+r4`).
pub fn parse_package_version(raw: &str) -> Option<Version> {
    if let Ok(version) = Version::parse(raw) {
        return Some(version);
    }

    let (core_and_pre, build) = match raw.split_once('+') {
        Some((left, right)) => (left, Some(right)),
        None => (raw, None),
    };
    let (core, pre) = match core_and_pre.split_once('-') {
        Some((left, right)) => (left, Some(right)),
        None => (core_and_pre, None),
    };

    let parts = core
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() || parts.len() > 4 {
        return None;
    }

    let mut version = Version::new(
        parts[0],
        parts.get(1).copied().unwrap_or(0),
        parts.get(2).copied().unwrap_or(0),
    );
    if let Some(pre) = pre {
        version.pre = Prerelease::new(pre).ok()?;
    }

    let mut build_parts = Vec::new();
    if let Some(revision) = parts.get(3) {
        build_parts.push(format!("r{revision}"));
    }
    if let Some(build) = build {
        build_parts.push(build.to_string());
    }
    if !build_parts.is_empty() {
        version.build = BuildMetadata::new(&build_parts.join(".")).ok()?;
    }

    Some(version)
}
