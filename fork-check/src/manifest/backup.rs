//! Snapshot and restoration of the live manifest.
//!
//! A [`Backup`] is taken before the manifest is touched and puts the original
//! bytes back exactly once. Restoration happens either through an explicit
//! [`Backup::restore`] call, which reports failure to the caller, or from `Drop`
//! when the run unwinds without reaching it.

use crate::utils::errors::{RestoreError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackupState {
    /// Snapshot taken, live file not yet written
    Clean,
    /// Live file may differ from the snapshot
    Dirty,
    /// Restoration attempted; the snapshot is spent
    Consumed,
}

/// Exclusive owner of the original manifest content for one run.
#[derive(Debug)]
pub struct Backup {
    path: PathBuf,
    original: String,
    state: BackupState,
}

impl Backup {
    /// Read the current manifest content into memory.
    pub fn snapshot(path: &Path) -> Result<Self> {
        let original = super::read(path)?;
        debug!("Snapshot of {} taken ({} bytes)", path.display(), original.len());
        Ok(Self {
            path: path.to_path_buf(),
            original,
            state: BackupState::Clean,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The content the manifest had when the snapshot was taken.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Record that the live manifest is about to be written.
    ///
    /// Must be called before the first write so that a partial write is undone.
    pub fn mark_dirty(&mut self) {
        if self.state == BackupState::Clean {
            self.state = BackupState::Dirty;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state == BackupState::Dirty
    }

    /// Write the snapshot back over the live manifest.
    ///
    /// Only the first call does anything; later calls return `Ok(())`. A snapshot
    /// that was never marked dirty is consumed without touching the file, and so
    /// is one whose live file still holds the original bytes (a write that
    /// failed before changing anything).
    pub fn restore(&mut self) -> std::result::Result<(), RestoreError> {
        match self.state {
            BackupState::Consumed => {
                debug!("Restore of {} already done", self.path.display());
                Ok(())
            }
            BackupState::Clean => {
                self.state = BackupState::Consumed;
                debug!("Manifest {} never written, nothing to restore", self.path.display());
                Ok(())
            }
            BackupState::Dirty => {
                self.state = BackupState::Consumed;
                if fs::read(&self.path).is_ok_and(|live| live == self.original.as_bytes()) {
                    debug!("Manifest {} already holds the original content", self.path.display());
                    return Ok(());
                }
                match fs::write(&self.path, &self.original) {
                    Ok(()) => {
                        info!("Restored {}", self.path.display());
                        Ok(())
                    }
                    Err(source) => Err(RestoreError {
                        path: self.path.clone(),
                        original: self.original.clone(),
                        source,
                    }),
                }
            }
        }
    }
}

impl Drop for Backup {
    fn drop(&mut self) {
        if self.state != BackupState::Dirty {
            return;
        }
        if let Err(e) = self.restore() {
            error!("{}", e);
            eprintln!("{}", crate::harness::report::restore_failure_banner(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::HarnessError;
    use tempfile::TempDir;

    const ORIGINAL: &str = "source = \"orig\"\nbranch = \"main\"\n";

    fn manifest(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("deps.toml");
        fs::write(&path, ORIGINAL).unwrap();
        path
    }

    #[test]
    fn test_snapshot_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = Backup::snapshot(&temp_dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, HarnessError::Io { .. }));
    }

    #[test]
    fn test_restore_dirty_writes_original() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = manifest(&temp_dir);

        let mut backup = Backup::snapshot(&path)?;
        backup.mark_dirty();
        fs::write(&path, "source = \"fork\"\n")?;

        backup.restore()?;
        assert_eq!(fs::read_to_string(&path)?, ORIGINAL);
        assert!(!backup.is_dirty());
        Ok(())
    }

    #[test]
    fn test_restore_twice_is_noop() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = manifest(&temp_dir);

        let mut backup = Backup::snapshot(&path)?;
        backup.mark_dirty();
        fs::write(&path, "garbage")?;

        backup.restore()?;
        let once = fs::read(&path)?;
        backup.restore()?;
        assert_eq!(fs::read(&path)?, once);
        assert_eq!(once, ORIGINAL.as_bytes());

        // Spent: a later edit is not undone by another call.
        fs::write(&path, "later edit")?;
        backup.restore()?;
        assert_eq!(fs::read_to_string(&path)?, "later edit");
        Ok(())
    }

    #[test]
    fn test_clean_restore_leaves_file_alone() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = manifest(&temp_dir);

        let mut backup = Backup::snapshot(&path)?;
        fs::remove_file(&path)?;
        backup.restore()?;
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_drop_restores_dirty_snapshot() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = manifest(&temp_dir);

        {
            let mut backup = Backup::snapshot(&path)?;
            backup.mark_dirty();
            fs::write(&path, "source = \"fork\"\n")?;
        }

        assert_eq!(fs::read_to_string(&path)?, ORIGINAL);
        Ok(())
    }

    #[test]
    fn test_drop_restores_on_panic() {
        let temp_dir = TempDir::new().unwrap();
        let path = manifest(&temp_dir);

        let panic_path = path.clone();
        let result = std::panic::catch_unwind(move || {
            let mut backup = Backup::snapshot(&panic_path).unwrap();
            backup.mark_dirty();
            fs::write(&panic_path, "half written").unwrap();
            panic!("build tool wrapper blew up");
        });

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), ORIGINAL);
    }

    #[cfg(unix)]
    #[test]
    fn test_unchanged_read_only_manifest_restores_cleanly() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        if nix::unistd::geteuid().is_root() {
            // Root ignores file permissions.
            return Ok(());
        }

        let temp_dir = TempDir::new()?;
        let path = manifest(&temp_dir);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444))?;

        let mut backup = Backup::snapshot(&path)?;
        backup.mark_dirty();
        assert!(fs::write(&path, "source = \"fork\"\n").is_err());

        backup.restore()?;
        assert_eq!(fs::read_to_string(&path)?, ORIGINAL);
        assert!(!backup.is_dirty());
        Ok(())
    }

    #[test]
    fn test_failed_restore_carries_original() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = manifest(&temp_dir);

        let mut backup = Backup::snapshot(&path)?;
        backup.mark_dirty();
        // A directory in place of the file makes the write fail, even as root.
        fs::remove_file(&path)?;
        fs::create_dir(&path)?;

        let err = backup.restore().unwrap_err();
        assert_eq!(err.original, ORIGINAL);
        assert_eq!(err.path, path);

        // Spent: neither a second call nor drop retries.
        backup.restore()?;
        drop(backup);
        assert!(path.is_dir());
        Ok(())
    }
}
