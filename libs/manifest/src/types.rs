//! Manifest and file entry definitions.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// Maximum length of a manifest version string, in characters.
pub const MAX_VERSION_LEN: usize = 100;

/// Length of a hex-encoded SHA-256 digest.
pub const SHA256_HEX_LEN: usize = 64;

/// Decoded remote manifest for one application.
///
/// Fields default to empty when absent so that a missing field surfaces as a
/// validation error naming the field rather than an opaque decode error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Target version of the application (e.g. "1.2.0").
    #[serde(default)]
    pub version: String,

    /// Files to reconcile, applied in this order.
    #[serde(default)]
    pub files: Vec<FileEntry>,

    /// Command run after each file update and once after the whole pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_cmd: Option<String>,
}

/// A single managed file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Logical name, unique within the manifest.
    #[serde(default)]
    pub name: String,

    /// Download URL (http or https).
    #[serde(default)]
    pub url: String,

    /// Expected SHA-256 of the payload, hex encoded.
    #[serde(default)]
    pub sha256: String,

    /// Filesystem path the payload is installed to.
    #[serde(default)]
    pub target: PathBuf,

    /// Per-file version; falls back to the manifest version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Manifest {
    /// Decode a manifest from its YAML representation.
    ///
    /// Decoding does not validate; call [`Manifest::validate`] before use.
    pub fn from_yaml(input: &str) -> Result<Self, ManifestError> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Encode the manifest as YAML.
    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check every invariant of the manifest.
    ///
    /// The first violation found is returned; nothing in the manifest should
    /// be acted on unless this returns `Ok`.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.version.is_empty() {
            return Err(ManifestError::MissingVersion);
        }
        let len = self.version.chars().count();
        if len > MAX_VERSION_LEN {
            return Err(ManifestError::VersionTooLong {
                len,
                max: MAX_VERSION_LEN,
            });
        }

        if self.files.is_empty() {
            return Err(ManifestError::NoFiles);
        }

        let mut seen = HashSet::with_capacity(self.files.len());
        for (index, file) in self.files.iter().enumerate() {
            file.validate(index)?;
            if !seen.insert(file.name.as_str()) {
                return Err(ManifestError::DuplicateName {
                    index,
                    name: file.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// The version a file entry should be brought to.
    pub fn effective_version<'a>(&'a self, entry: &'a FileEntry) -> &'a str {
        match entry.version.as_deref() {
            Some(v) if !v.is_empty() => v,
            _ => &self.version,
        }
    }

    /// The restart command, if one is set and non-blank.
    pub fn restart_command(&self) -> Option<&str> {
        self.restart_cmd
            .as_deref()
            .map(str::trim)
            .filter(|cmd| !cmd.is_empty())
    }
}

impl FileEntry {
    fn validate(&self, index: usize) -> Result<(), ManifestError> {
        let required = [
            ("name", self.name.is_empty()),
            ("url", self.url.is_empty()),
            ("target", self.target.as_os_str().is_empty()),
            ("sha256", self.sha256.is_empty()),
        ];
        if let Some((field, _)) = required.into_iter().find(|(_, missing)| *missing) {
            return Err(ManifestError::MissingField { index, field });
        }

        if let Err(e) = url::Url::parse(&self.url) {
            return Err(ManifestError::InvalidUrl {
                index,
                reason: e.to_string(),
            });
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ManifestError::InvalidUrl {
                index,
                reason: "must be http:// or https://".to_string(),
            });
        }

        if !is_sha256_hex(&self.sha256) {
            return Err(ManifestError::InvalidChecksum {
                index,
                expected_len: SHA256_HEX_LEN,
            });
        }

        Ok(())
    }

    /// Target path of the file.
    pub fn target_path(&self) -> &Path {
        &self.target
    }

    /// Compare a computed digest against the expected one, ignoring case.
    pub fn checksum_matches(&self, actual: &str) -> bool {
        self.sha256.eq_ignore_ascii_case(actual)
    }
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == SHA256_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}
