//! Backup copies that protect a save target until the new content is durable.
//!
//! # Design
//! - The backup is a sibling copy named `<file>.backup`, taken before the
//!   target is opened for writing.
//! - A backup is deleted only after a confirmed successful save, or consumed
//!   by a successful restore (rename over the target). A failed restore keeps
//!   it on disk.
//! - A backup left behind by an earlier failed restore is never overwritten:
//!   it is renamed to `<file>.backup.<n>` before the new copy is taken.
//! - [`WriteRollback`] restores synchronously from `Drop` when the save task is
//!   aborted before reaching a decision.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{error, info, warn};

const BACKUP_SUFFIX: &str = ".backup";
const MAX_STALE_BACKUPS: u32 = 10_000;

/// Sibling backup path for `original`.
#[must_use]
pub fn backup_path_for(original: &Path) -> PathBuf {
    let mut name = original
        .file_name()
        .map_or_else(OsString::new, ToOwned::to_owned);
    name.push(BACKUP_SUFFIX);
    original.with_file_name(name)
}

/// A backup copy of a save target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    original_path: PathBuf,
    backup_path: PathBuf,
}

impl BackupRecord {
    /// Copy `original` to its backup path if it exists.
    ///
    /// Returns `Ok(None)` when there is nothing to protect.
    ///
    /// # Errors
    ///
    /// Returns the IO error from probing or copying the target.
    pub async fn create(original: &Path) -> io::Result<Option<Self>> {
        match fs::metadata(original).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        }
        let backup_path = backup_path_for(original);
        if fs::try_exists(&backup_path).await? {
            let kept = preserve_stale(&backup_path).await?;
            warn!(
                path = %original.display(),
                kept = %kept.display(),
                "stale backup found; kept under a new name"
            );
        }
        fs::copy(original, &backup_path).await?;
        Ok(Some(Self {
            original_path: original.to_path_buf(),
            backup_path,
        }))
    }

    /// Path being protected.
    #[must_use]
    pub fn original_path(&self) -> &Path {
        &self.original_path
    }

    /// Location of the backup copy.
    #[must_use]
    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Move the backup back over the original.
    ///
    /// # Errors
    ///
    /// Returns the rename error; the backup is left in place.
    pub async fn restore(&self) -> io::Result<()> {
        fs::rename(&self.backup_path, &self.original_path).await
    }

    /// Delete the backup after a successful save.
    ///
    /// # Errors
    ///
    /// Returns the removal error.
    pub async fn discard(&self) -> io::Result<()> {
        fs::remove_file(&self.backup_path).await
    }

    fn restore_blocking(&self) -> io::Result<()> {
        std::fs::rename(&self.backup_path, &self.original_path)
    }
}

/// Rename an existing backup to the first free `<backup>.<n>` and return the
/// new path.
async fn preserve_stale(backup_path: &Path) -> io::Result<PathBuf> {
    for n in 1..=MAX_STALE_BACKUPS {
        let mut name = backup_path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        let candidate = PathBuf::from(name);
        if !fs::try_exists(&candidate).await? {
            fs::rename(backup_path, &candidate).await?;
            return Ok(candidate);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("too many stale backups next to {}", backup_path.display()),
    ))
}

/// How a rollback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The backup was moved back over the target.
    Restored,
    /// There was no backup; the partially written file was removed.
    Removed,
    /// Restoring failed; the backup (if any) is still on disk.
    Failed,
}

/// Decides the fate of a save target once a write finishes, fails, or is
/// abandoned.
#[derive(Debug)]
pub struct WriteRollback {
    target: PathBuf,
    backup: Option<BackupRecord>,
    armed: bool,
}

impl WriteRollback {
    /// Arm a rollback for `target`, optionally protected by `backup`.
    #[must_use]
    pub const fn new(target: PathBuf, backup: Option<BackupRecord>) -> Self {
        Self {
            target,
            backup,
            armed: true,
        }
    }

    /// Whether a backup protects the target.
    #[must_use]
    pub const fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// The write succeeded: drop the backup.
    ///
    /// A backup that cannot be deleted is logged and left behind; the save
    /// itself still counts as successful.
    pub async fn commit(mut self) {
        self.armed = false;
        if let Some(backup) = self.backup.take()
            && let Err(err) = backup.discard().await
        {
            warn!(
                error = %err,
                backup = %backup.backup_path().display(),
                "failed to remove backup after successful save"
            );
        }
    }

    /// The write failed or was canceled: put the target back.
    pub async fn rollback(mut self) -> RollbackOutcome {
        self.armed = false;
        match self.backup.take() {
            Some(backup) => match backup.restore().await {
                Ok(()) => {
                    info!(path = %self.target.display(), "restored save target from backup");
                    RollbackOutcome::Restored
                }
                Err(err) => {
                    error!(
                        error = %err,
                        path = %self.target.display(),
                        backup = %backup.backup_path().display(),
                        "failed to restore save target; backup kept"
                    );
                    RollbackOutcome::Failed
                }
            },
            None => match fs::remove_file(&self.target).await {
                Ok(()) => RollbackOutcome::Removed,
                Err(err) if err.kind() == io::ErrorKind::NotFound => RollbackOutcome::Removed,
                Err(err) => {
                    error!(
                        error = %err,
                        path = %self.target.display(),
                        "failed to remove partially written file"
                    );
                    RollbackOutcome::Failed
                }
            },
        }
    }
}

impl Drop for WriteRollback {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let result = match &self.backup {
            Some(backup) => backup.restore_blocking(),
            None => match std::fs::remove_file(&self.target) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        match result {
            Ok(()) => warn!(
                path = %self.target.display(),
                "save abandoned; target rolled back"
            ),
            Err(err) => error!(
                error = %err,
                path = %self.target.display(),
                "save abandoned; rollback failed"
            ),
        }
    }
}
