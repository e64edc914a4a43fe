//! Error types for the update agent.

use std::io;
use std::path::PathBuf;

use ota_manifest::ManifestError;
use thiserror::Error;

/// Errors from a reconciliation cycle or a single file update.
///
/// Manifest-level variants abort the whole cycle; the per-file variants are
/// contained to the file they name.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The manifest could not be fetched after all attempts.
    #[error("fetch manifest from {url} failed after {attempts} attempt(s): {reason}")]
    ManifestFetchFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// The manifest was fetched but is malformed or violates an invariant.
    #[error("invalid manifest: {0}")]
    ManifestInvalid(#[from] ManifestError),

    /// The target directory cannot be used.
    #[error(transparent)]
    Permission(#[from] PermissionError),

    /// The payload could not be downloaded.
    #[error("download {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The downloaded payload does not match the declared digest.
    #[error("sha256 mismatch for {name}: got={actual} want={expected}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// The verified payload could not be swapped into place.
    #[error("replace failed: {0}")]
    ReplaceFailed(#[from] ReplaceError),

    /// The restart command failed after the file was replaced.
    #[error("restart failed after {name} update: {reason} (rolled back: {rolled_back})")]
    RestartFailed {
        name: String,
        reason: String,
        rolled_back: bool,
    },

    /// The post-pass restart command failed.
    #[error("global restart failed: {0}")]
    GlobalRestartFailed(String),

    /// Local file I/O error.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl UpdateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        UpdateError::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable reason code for log fields.
    pub fn reason_code(&self) -> &'static str {
        match self {
            UpdateError::ManifestFetchFailed { .. } => "manifest_fetch_failed",
            UpdateError::ManifestInvalid(_) => "manifest_invalid",
            UpdateError::Permission(_) => "permission_error",
            UpdateError::DownloadFailed { .. } => "download_failed",
            UpdateError::ChecksumMismatch { .. } => "checksum_mismatch",
            UpdateError::ReplaceFailed(_) => "replace_failed",
            UpdateError::RestartFailed { .. } => "restart_failed",
            UpdateError::GlobalRestartFailed(_) => "global_restart_failed",
            UpdateError::Io { .. } => "io_error",
        }
    }

    /// Returns true if this error aborts a whole cycle rather than one file.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            UpdateError::ManifestFetchFailed { .. }
                | UpdateError::ManifestInvalid(_)
                | UpdateError::GlobalRestartFailed(_)
        )
    }
}

/// Write-access problems with a target directory.
#[derive(Debug, Error)]
pub enum PermissionError {
    /// The directory did not exist and could not be created.
    #[error("failed to create target directory {dir}: {source}")]
    NotCreatable {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The path exists but is not a directory.
    #[error("target directory {dir} is not a directory")]
    NotADirectory { dir: PathBuf },

    /// The directory exists but cannot be written to.
    #[error("no write permission to {dir}: {source}")]
    NotWritable {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure stages of an atomic replace.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// Moving the new file into the target directory failed.
    ///
    /// Cross-device moves land here; there is no copy fallback.
    #[error("move {from} into {to}: {source}")]
    MoveIntoPlace {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Renaming the current target to its backup failed.
    #[error("backup existing {target}: {source}")]
    Backup {
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The final rename onto the target failed.
    #[error("rename {from} -> {target}: {source}")]
    Swap {
        from: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors from the process supervisor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// `start` was called while the supervisor is running.
    #[error("process already running")]
    AlreadyRunning,

    /// `start` was called on a supervisor that has been stopped or halted.
    #[error("supervisor has terminated; create a new one")]
    Terminated,

    /// The command line has no program.
    #[error("empty command")]
    EmptyCommand,

    /// The process could not be launched.
    #[error("failed to start {program}: {reason}")]
    LaunchFailed { program: String, reason: String },

    /// The restart limit was reached; supervision has ended.
    #[error("max restarts ({max_restarts}) reached")]
    RestartLimitExceeded { max_restarts: u32 },
}
