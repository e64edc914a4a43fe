//! Local version markers.
//!
//! Each marker is a plain-text file holding one version string followed by a
//! newline. The aggregate marker lives at the configured version-file path;
//! per-file markers live at `<version-file>.<name>`. A missing marker reads
//! as the empty version.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Read a marker, trimming surrounding whitespace.
///
/// A missing file is not an error and yields `""`.
pub fn read(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().to_string()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// Write a marker, creating parent directories as needed.
pub fn write(path: &Path, value: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, format!("{value}\n"))
}

/// Markers rooted at one aggregate version-file path.
#[derive(Debug, Clone)]
pub struct VersionStore {
    aggregate: PathBuf,
}

impl VersionStore {
    /// Create a store rooted at the aggregate version file.
    pub fn new(aggregate: impl Into<PathBuf>) -> Self {
        Self {
            aggregate: aggregate.into(),
        }
    }

    /// Path of the aggregate marker.
    pub fn aggregate_path(&self) -> &Path {
        &self.aggregate
    }

    /// Path of the marker for one managed file.
    pub fn file_path(&self, name: &str) -> PathBuf {
        let mut path = OsString::from(self.aggregate.as_os_str());
        path.push(".");
        path.push(name);
        PathBuf::from(path)
    }

    /// Read the aggregate version.
    pub fn read_aggregate(&self) -> io::Result<String> {
        read(&self.aggregate)
    }

    /// Record the aggregate version.
    pub fn write_aggregate(&self, version: &str) -> io::Result<()> {
        write(&self.aggregate, version)?;
        debug!(path = %self.aggregate.display(), version, "Aggregate version recorded");
        Ok(())
    }

    /// Read the version of one managed file.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        read(&self.file_path(name))
    }

    /// Record the version of one managed file.
    ///
    /// An empty version removes the marker so it reads as absent again.
    pub fn write_file(&self, name: &str, version: &str) -> io::Result<()> {
        let path = self.file_path(name);
        if version.is_empty() {
            return match fs::remove_file(&path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            };
        }
        write(&path, version)
    }

    /// Make sure the directory holding the markers exists.
    pub fn ensure_dir(&self) -> io::Result<()> {
        match self.aggregate.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }
}
