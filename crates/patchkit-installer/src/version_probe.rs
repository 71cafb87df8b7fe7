use std::fs;
use std::path::Path;

const FIXED_FILE_INFO_SIGNATURE: [u8; 4] = 0xFEEF_04BD_u32.to_le_bytes();
const ASSEMBLY_VERSION_KEY: &str = "Assembly Version";
const FILE_VERSION_KEY: &str = "FileVersion";
/// `wType` of a string-valued version block.
const TEXT_VALUE: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyVersions {
    pub assembly_version: String,
    pub file_version: String,
}

/// Reads the version metadata written into a runtime manifest entry.
pub trait VersionProbe {
    fn probe(&self, assembly: &Path) -> Result<AssemblyVersions, String>;
}

/// Reads versions from the version resource embedded in a PE image.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeVersionProbe;

impl VersionProbe for PeVersionProbe {
    fn probe(&self, assembly: &Path) -> Result<AssemblyVersions, String> {
        let bytes = fs::read(assembly).map_err(|err| err.to_string())?;
        parse_version_resource(&bytes)
    }
}

/// Extracts `Assembly Version` and `FileVersion` from a version resource,
/// falling back to the fixed file version for whichever string is absent.
pub fn parse_version_resource(bytes: &[u8]) -> Result<AssemblyVersions, String> {
    let fixed = fixed_file_version(bytes);
    let file_version = string_value(bytes, FILE_VERSION_KEY).or_else(|| fixed.clone());
    let assembly_version = string_value(bytes, ASSEMBLY_VERSION_KEY).or(fixed);

    match (assembly_version, file_version) {
        (Some(assembly_version), Some(file_version)) => Ok(AssemblyVersions {
            assembly_version,
            file_version,
        }),
        _ => Err("no version resource found".to_string()),
    }
}

fn fixed_file_version(bytes: &[u8]) -> Option<String> {
    let offset = bytes
        .windows(FIXED_FILE_INFO_SIGNATURE.len())
        .position(|window| window == FIXED_FILE_INFO_SIGNATURE)?;
    let most = read_u32(bytes, offset + 8)?;
    let least = read_u32(bytes, offset + 12)?;
    Some(format!(
        "{}.{}.{}.{}",
        most >> 16,
        most & 0xFFFF,
        least >> 16,
        least & 0xFFFF
    ))
}

/// Finds the `String` block keyed `key` and returns its text value.
///
/// Block layout: `wLength`, `wValueLength` (in UTF-16 units), `wType`, the
/// NUL-terminated UTF-16 key, padding to a 4-byte boundary, then the value.
fn string_value(bytes: &[u8], key: &str) -> Option<String> {
    let needle = key
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect::<Vec<_>>();

    let mut search_from = 0;
    while let Some(found) = find(&bytes[search_from..], &needle) {
        let key_offset = search_from + found;
        search_from = key_offset + 2;

        let Some(header) = key_offset.checked_sub(6) else {
            continue;
        };
        if header % 4 != 0 || read_u16(bytes, header + 4) != Some(TEXT_VALUE) {
            continue;
        }
        let Some(value_units) = read_u16(bytes, header + 2).map(usize::from) else {
            continue;
        };
        if value_units == 0 {
            continue;
        }

        let value_offset = align4(key_offset + needle.len());
        let Some(raw) = bytes.get(value_offset..value_offset + value_units * 2) else {
            continue;
        };
        let units = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|unit| *unit != 0)
            .collect::<Vec<_>>();
        if let Ok(value) = String::from_utf16(&units) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn align4(offset: usize) -> usize {
    (offset + 3) & !3
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}
