//! Error types for manifest decoding and validation.

use thiserror::Error;

/// Errors that make a manifest unusable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// The document could not be decoded.
    #[error("decode manifest: {0}")]
    Decode(String),

    /// The top-level version is empty.
    #[error("version is required")]
    MissingVersion,

    /// The top-level version exceeds the length limit.
    #[error("version too long ({len} chars, max {max})")]
    VersionTooLong { len: usize, max: usize },

    /// The manifest lists no files.
    #[error("files array is required and cannot be empty")]
    NoFiles,

    /// A required field of a file entry is empty.
    #[error("files[{index}].{field} is required")]
    MissingField { index: usize, field: &'static str },

    /// A file entry URL is unparseable or not http(s).
    #[error("files[{index}].url is invalid: {reason}")]
    InvalidUrl { index: usize, reason: String },

    /// A file entry checksum is not 64 hex characters.
    #[error("files[{index}].sha256 must be {expected_len} hex characters")]
    InvalidChecksum { index: usize, expected_len: usize },

    /// Two file entries share a name.
    #[error("files[{index}].name '{name}' is duplicated")]
    DuplicateName { index: usize, name: String },
}

impl ManifestError {
    /// Returns true if the document itself could not be decoded.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, ManifestError::Decode(_))
    }
}

impl From<serde_yaml::Error> for ManifestError {
    fn from(err: serde_yaml::Error) -> Self {
        ManifestError::Decode(err.to_string())
    }
}
