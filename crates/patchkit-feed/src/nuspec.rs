use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use semver::Version;

use crate::identity::parse_package_version;

const NUSPEC_EXTENSION: &str = ".nuspec";

/// Identity declared by a package's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NuspecIdentity {
    pub id: String,
    pub version: Version,
}

/// Reads `<id>` and `<version>` from the `.nuspec` at the root of `package`.
pub fn read_nuspec_identity(package: &Path) -> io::Result<NuspecIdentity> {
    let file = File::open(package)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(io::Error::from)?;
    let name = archive
        .file_names()
        .find(|name| {
            !name.contains('/') && name.to_ascii_lowercase().ends_with(NUSPEC_EXTENSION)
        })
        .map(str::to_string)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no .nuspec at package root"))?;

    let mut xml = String::new();
    archive
        .by_name(&name)
        .map_err(io::Error::from)?
        .read_to_string(&mut xml)?;
    parse_nuspec_identity(&xml).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{name} has no usable <id> and <version>"),
        )
    })
}

/// Pulls the identity out of nuspec XML. Only the `<metadata>` children are
/// consulted; `id`/`version` attributes of dependency elements never match.
pub fn parse_nuspec_identity(xml: &str) -> Option<NuspecIdentity> {
    let metadata = element_text(xml, "metadata")?;
    let id = decode_entities(element_text(metadata, "id")?.trim());
    if id.is_empty() {
        return None;
    }
    let version = parse_package_version(&decode_entities(
        element_text(metadata, "version")?.trim(),
    ))?;
    Some(NuspecIdentity { id, version })
}

/// Text between the first `<name ...>` and the following `</name>`.
fn element_text<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let mut search_from = 0;
    while let Some(found) = xml[search_from..].find(&open) {
        let after_name = search_from + found + open.len();
        let rest = &xml[after_name..];
        let next = rest.chars().next()?;
        if next == '>' || next.is_whitespace() {
            let tag_end = after_name + rest.find('>')?;
            if xml[..tag_end].ends_with('/') {
                return Some("");
            }
            let content_start = tag_end + 1;
            let content_end = content_start + xml[content_start..].find(&close)?;
            return Some(&xml[content_start..content_end]);
        }
        search_from = after_name;
    }
    None
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
