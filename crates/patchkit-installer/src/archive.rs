use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::NaiveDate;
use patchkit_core::{ProvisionError, Result};

/// A readable view of one archive entry.
pub struct ArchiveEntry<'a> {
    pub modified: Option<SystemTime>,
    pub reader: Box<dyn Read + 'a>,
}

/// Read access to a package archive. Entry names are archive-internal paths
/// exactly as stored, directories excluded.
pub trait PackageArchive {
    fn entry_names(&self) -> Vec<String>;
    fn open_entry(&mut self, name: &str) -> io::Result<ArchiveEntry<'_>>;
}

pub struct ZipPackageArchive<R = BufReader<File>> {
    path: PathBuf,
    inner: zip::ZipArchive<R>,
}

impl ZipPackageArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let archive_error = |source: io::Error| ProvisionError::Archive {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(archive_error)?;
        Self::from_reader(path, BufReader::new(file)).map_err(archive_error)
    }
}

impl<R: Read + Seek> ZipPackageArchive<R> {
    pub fn from_reader(path: &Path, reader: R) -> io::Result<Self> {
        let inner = zip::ZipArchive::new(reader).map_err(io::Error::from)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: Read + Seek> PackageArchive for ZipPackageArchive<R> {
    fn entry_names(&self) -> Vec<String> {
        let mut names = self
            .inner
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_string)
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    fn open_entry(&mut self, name: &str) -> io::Result<ArchiveEntry<'_>> {
        let entry = self.inner.by_name(name).map_err(io::Error::from)?;
        let modified = zip_time_to_system_time(entry.last_modified());
        Ok(ArchiveEntry {
            modified,
            reader: Box::new(entry),
        })
    }
}

/// Zip timestamps carry no zone; they are read as UTC.
fn zip_time_to_system_time(value: zip::DateTime) -> Option<SystemTime> {
    let naive = NaiveDate::from_ymd_opt(
        i32::from(value.year()),
        u32::from(value.month()),
        u32::from(value.day()),
    )?
    .and_hms_opt(
        u32::from(value.hour()),
        u32::from(value.minute()),
        u32::from(value.second()),
    )?;
    Some(SystemTime::from(naive.and_utc()))
}
