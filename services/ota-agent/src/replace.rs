//! Checksums and crash-safe file replacement.
//!
//! A target is only ever changed by a `rename(2)` within its own directory,
//! so readers of the target see either the old or the new content in full.
//! The previous content is kept next to the target as `<target>.bak`.

use std::ffi::OsString;
use std::fs::{self, DirBuilder, File};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{PermissionError, ReplaceError};

/// Name of the sentinel file used to probe directory write access.
pub const WRITE_PROBE_NAME: &str = ".ota-agent-write-test";

/// Suffix appended to a target to form its backup path.
pub const BACKUP_SUFFIX: &str = ".bak";

const DIR_MODE: u32 = 0o755;
const TARGET_MODE: u32 = 0o755;

/// Outcome of a successful [`atomic_replace`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Backup of the previous target, if there was one.
    pub backup: Option<PathBuf>,

    /// Non-fatal problems encountered after the swap.
    pub warnings: Vec<String>,
}

/// Stream a file through SHA-256 and return the lowercase hex digest.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Directory a target lives in; `.` for bare relative names.
pub fn target_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Backup path for a target (`<target>.bak`).
pub fn backup_path(target: &Path) -> PathBuf {
    let mut path = OsString::from(target.as_os_str());
    path.push(BACKUP_SUFFIX);
    PathBuf::from(path)
}

/// Ensure the target's directory exists and is writable.
///
/// Missing directories are created with mode 0755. Write access is confirmed
/// by creating and deleting a hidden sentinel file.
pub fn check_writable(target: &Path) -> Result<(), PermissionError> {
    let dir = target_dir(target);

    let metadata = match fs::metadata(&dir) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            DirBuilder::new()
                .recursive(true)
                .mode(DIR_MODE)
                .create(&dir)
                .map_err(|source| PermissionError::NotCreatable {
                    dir: dir.clone(),
                    source,
                })?;
            debug!(dir = %dir.display(), "Created target directory");
            fs::metadata(&dir).map_err(|source| PermissionError::NotCreatable {
                dir: dir.clone(),
                source,
            })?
        }
        Err(source) => return Err(PermissionError::NotWritable { dir, source }),
    };

    if !metadata.is_dir() {
        return Err(PermissionError::NotADirectory { dir });
    }

    let probe = dir.join(WRITE_PROBE_NAME);
    File::create(&probe).map_err(|source| PermissionError::NotWritable {
        dir: dir.clone(),
        source,
    })?;
    let _ = fs::remove_file(&probe);

    Ok(())
}

/// Swap `new_path` onto `target`, keeping the previous target as a backup.
///
/// If `new_path` lives in another directory it is first renamed next to the
/// target; a cross-device rename fails rather than falling back to a copy.
/// On failure of the final rename the backup is restored, best effort.
pub fn atomic_replace(new_path: &Path, target: &Path) -> Result<ReplaceOutcome, ReplaceError> {
    let dir = target_dir(target);
    let mut staged = new_path.to_path_buf();

    if target_dir(new_path) != dir {
        let moved = match new_path.file_name() {
            Some(name) => dir.join(name),
            None => dir.join(".ota-agent-staged"),
        };
        fs::rename(new_path, &moved).map_err(|source| ReplaceError::MoveIntoPlace {
            from: new_path.to_path_buf(),
            to: moved.clone(),
            source,
        })?;
        staged = moved;
    }

    let backup = if fs::symlink_metadata(target).is_ok() {
        let backup = backup_path(target);
        let _ = fs::remove_file(&backup);
        fs::rename(target, &backup).map_err(|source| ReplaceError::Backup {
            target: target.to_path_buf(),
            source,
        })?;
        Some(backup)
    } else {
        None
    };

    if let Err(source) = fs::rename(&staged, target) {
        if let Some(backup) = &backup {
            if let Err(e) = fs::rename(backup, target) {
                warn!(
                    backup = %backup.display(),
                    target = %target.display(),
                    error = %e,
                    "Failed to restore backup after replace failure"
                );
            }
        }
        return Err(ReplaceError::Swap {
            from: staged,
            target: target.to_path_buf(),
            source,
        });
    }

    let mut warnings = Vec::new();
    if let Err(e) = fs::set_permissions(target, fs::Permissions::from_mode(TARGET_MODE)) {
        warn!(target = %target.display(), error = %e, "chmod failed (non-fatal)");
        warnings.push(format!("chmod {}: {e}", target.display()));
    }

    Ok(ReplaceOutcome { backup, warnings })
}

/// Move a backup back onto its target.
pub fn restore_backup(backup: &Path, target: &Path) -> io::Result<()> {
    fs::rename(backup, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_hash_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"hello").unwrap();
        assert_eq!(hash_file(&path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_hash_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = hash_file(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_target_dir_of_bare_name() {
        assert_eq!(target_dir(Path::new("app")), PathBuf::from("."));
        assert_eq!(target_dir(Path::new("/opt/a/app")), PathBuf::from("/opt/a"));
    }

    #[test]
    fn test_backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/opt/app.bin")),
            PathBuf::from("/opt/app.bin.bak")
        );
    }

    #[test]
    fn test_check_writable_creates_missing_dir() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/deeper/app");

        check_writable(&target).unwrap();

        let created = dir.path().join("nested/deeper");
        assert!(created.is_dir());
        assert!(!created.join(WRITE_PROBE_NAME).exists());
    }

    #[test]
    fn test_check_writable_rejects_file_as_dir() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();

        let err = check_writable(&blocker.join("app")).unwrap_err();
        assert!(matches!(err, PermissionError::NotADirectory { .. }));
    }

    #[test]
    fn test_replace_fresh_install_has_no_backup() {
        let dir = TempDir::new().unwrap();
        let staged = dir.path().join(".tmp-app-1");
        let target = dir.path().join("app");
        fs::write(&staged, b"new").unwrap();

        let outcome = atomic_replace(&staged, &target).unwrap();

        assert_eq!(outcome.backup, None);
        assert!(outcome.warnings.is_empty());
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!staged.exists());
        assert!(!backup_path(&target).exists());
        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_replace_existing_keeps_single_backup() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("app");
        fs::write(&target, b"v1").unwrap();
        fs::write(backup_path(&target), b"stale").unwrap();

        let staged = dir.path().join(".tmp-app-2");
        fs::write(&staged, b"v2").unwrap();
        let outcome = atomic_replace(&staged, &target).unwrap();

        let backup = outcome.backup.unwrap();
        assert_eq!(backup, backup_path(&target));
        assert_eq!(fs::read(&backup).unwrap(), b"v1");
        assert_eq!(fs::read(&target).unwrap(), b"v2");
    }

    #[test]
    fn test_replace_moves_file_from_other_dir() {
        let staging = TempDir::new().unwrap();
        let dest = TempDir::new_in(staging.path()).unwrap();
        let staged = staging.path().join("payload");
        let target = dest.path().join("app");
        fs::write(&staged, b"moved").unwrap();

        atomic_replace(&staged, &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"moved");
        assert!(!staged.exists());
    }

    #[test]
    fn test_replace_failure_restores_backup() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("app");
        fs::write(&target, b"v1").unwrap();
        let missing = dir.path().join(".tmp-missing");

        let err = atomic_replace(&missing, &target).unwrap_err();

        assert!(matches!(err, ReplaceError::Swap { .. }));
        assert_eq!(fs::read(&target).unwrap(), b"v1");
        assert!(!backup_path(&target).exists());
    }

    #[test]
    fn test_restore_backup() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("app");
        fs::write(&target, b"new").unwrap();
        fs::write(backup_path(&target), b"old").unwrap();

        restore_backup(&backup_path(&target), &target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"old");
        assert!(!backup_path(&target).exists());
    }
}
