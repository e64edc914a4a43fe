//! Per-file update pipeline.
//!
//! For one manifest entry:
//! 1. Compare the per-file marker with the effective version
//! 2. Check write access to the target directory
//! 3. Download to a staging file next to the target
//! 4. Verify the SHA-256 of the staging file
//! 5. Atomically swap it onto the target (previous content kept as `.bak`)
//! 6. Record the per-file marker
//! 7. Run the restart command, rolling back to the backup if it fails
//!
//! The target is never touched before verification succeeds.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ota_manifest::FileEntry;
use tracing::{debug, error, info, warn};

use crate::command::{CommandLine, CommandRunner};
use crate::error::UpdateError;
use crate::fetcher::HttpFetcher;
use crate::replace::{self, ReplaceOutcome};
use crate::version_store::VersionStore;

/// Result of a file update that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The marker already matched the effective version.
    AlreadyCurrent,

    /// The file was downloaded, verified, and installed.
    Updated {
        /// Backup of the previous content, if any.
        backup: Option<PathBuf>,
        /// Payload size in bytes.
        bytes: u64,
    },
}

impl FileOutcome {
    /// Returns true if the file on disk changed.
    pub fn is_updated(&self) -> bool {
        matches!(self, FileOutcome::Updated { .. })
    }
}

/// Applies manifest entries to the local filesystem.
pub struct FileUpdater {
    fetcher: HttpFetcher,
    versions: VersionStore,
    runner: Arc<dyn CommandRunner>,
}

impl FileUpdater {
    /// Create a new file updater.
    pub fn new(fetcher: HttpFetcher, versions: VersionStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            fetcher,
            versions,
            runner,
        }
    }

    /// Bring one file to `version`.
    ///
    /// `restart` is run after a successful replace. If it fails the per-file
    /// marker goes back to its previous value, the backup (if any) is
    /// restored and the command is run once more; the file is reported as
    /// [`UpdateError::RestartFailed`] either way.
    pub async fn update_file(
        &self,
        entry: &FileEntry,
        version: &str,
        restart: Option<&CommandLine>,
    ) -> Result<FileOutcome, UpdateError> {
        let name = entry.name.as_str();
        let target = entry.target_path();

        let local = match self.versions.read_file(name) {
            Ok(local) => local,
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to read file version, treating as no version");
                String::new()
            }
        };

        if !version.is_empty() && local == version {
            info!(file = %name, version, "File already at version, skipping");
            return Ok(FileOutcome::AlreadyCurrent);
        }

        info!(
            file = %name,
            target = %target.display(),
            local_version = %local,
            version,
            "Updating file"
        );

        replace::check_writable(target)?;

        let staging = staging_path(target, name);
        info!(file = %name, staging = %staging.display(), "Downloading");
        let bytes = match self.fetcher.download(&entry.url, &staging, name).await {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&staging);
                return Err(e);
            }
        };

        debug!(file = %name, "Verifying checksum");
        let actual = match replace::hash_file(&staging) {
            Ok(actual) => actual,
            Err(e) => {
                discard(&staging);
                return Err(UpdateError::io(&staging, e));
            }
        };
        if !entry.checksum_matches(&actual) {
            discard(&staging);
            return Err(UpdateError::ChecksumMismatch {
                name: name.to_string(),
                expected: entry.sha256.clone(),
                actual,
            });
        }
        info!(file = %name, "Checksum verified");

        let ReplaceOutcome { backup, warnings } = match replace::atomic_replace(&staging, target) {
            Ok(outcome) => outcome,
            Err(e) => {
                discard(&staging);
                return Err(e.into());
            }
        };
        match &backup {
            Some(backup) => info!(
                target = %target.display(),
                backup = %backup.display(),
                "Replaced file"
            ),
            None => info!(target = %target.display(), "Replaced file (no previous version)"),
        }
        for warning in &warnings {
            warn!(file = %name, warning = %warning, "Replace completed with warning");
        }

        if !version.is_empty() {
            if let Err(e) = self.versions.write_file(name, version) {
                warn!(file = %name, error = %e, "Failed to write file version (non-fatal)");
            }
        }

        if let Some(restart) = restart {
            info!(file = %name, command = %restart, "Restarting after update");
            if let Err(e) = self.runner.run(restart).await {
                error!(file = %name, error = %format!("{e:#}"), "Restart failed after update");
                if let Err(e) = self.versions.write_file(name, &local) {
                    warn!(file = %name, error = %e, "Failed to reset file version after restart failure");
                }
                let rolled_back = self
                    .roll_back(name, target, backup.as_deref(), restart)
                    .await;
                return Err(UpdateError::RestartFailed {
                    name: name.to_string(),
                    reason: format!("{e:#}"),
                    rolled_back,
                });
            }
        }

        Ok(FileOutcome::Updated { backup, bytes })
    }

    /// Restore the backup and re-run the restart command against it.
    ///
    /// Returns true if the backup was restored.
    async fn roll_back(
        &self,
        name: &str,
        target: &Path,
        backup: Option<&Path>,
        restart: &CommandLine,
    ) -> bool {
        let Some(backup) = backup else {
            warn!(file = %name, "No backup to roll back to");
            return false;
        };

        info!(file = %name, backup = %backup.display(), "Attempting rollback");
        if let Err(e) = replace::restore_backup(backup, target) {
            error!(file = %name, error = %e, "Rollback failed");
            return false;
        }
        info!(file = %name, "Rollback successful");

        match self.runner.run(restart).await {
            Ok(()) => info!(file = %name, "Restart after rollback succeeded"),
            Err(e) => error!(file = %name, error = %format!("{e:#}"), "Restart after rollback failed"),
        }
        true
    }
}

/// Staging path in the target's own directory: `.tmp-<name>-<unixtime>`.
pub fn staging_path(target: &Path, name: &str) -> PathBuf {
    let safe_name: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    let stamp = chrono::Utc::now().timestamp();
    replace::target_dir(target).join(format!(".tmp-{safe_name}-{stamp}"))
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_is_hidden_next_to_target() {
        let path = staging_path(Path::new("/opt/demo/app"), "app");
        assert_eq!(path.parent(), Some(Path::new("/opt/demo")));
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file.starts_with(".tmp-app-"), "{file}");
    }

    #[test]
    fn test_staging_path_sanitizes_name() {
        let path = staging_path(Path::new("app"), "bin/app");
        assert_eq!(path.parent(), Some(Path::new(".")));
        let file = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file.starts_with(".tmp-bin_app-"), "{file}");
    }

    #[test]
    fn test_outcome_is_updated() {
        assert!(!FileOutcome::AlreadyCurrent.is_updated());
        assert!(FileOutcome::Updated {
            backup: None,
            bytes: 1
        }
        .is_updated());
    }
}
