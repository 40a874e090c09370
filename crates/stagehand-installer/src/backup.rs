use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use stagehand_core::EntryKind;
use tracing::{debug, warn};

use crate::fs_utils::{
    copy_dir_recursive, copy_file_atomic, entry_exists, ensure_parent_dir, remove_entry_if_exists,
    rename, suffixed_path, unique_sibling,
};
use crate::UpdateError;

pub const BACKUP_SUFFIX: &str = ".bak";

pub fn backup_path(path: &Path) -> PathBuf {
    suffixed_path(path, BACKUP_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    Preserved,
    /// `dest` did not exist yet; there is nothing to roll back to.
    NothingToPreserve,
    /// Already backed up earlier in this run; the first copy is kept.
    AlreadyTaken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    NoBackup,
}

/// Backup artifacts for one update run.
///
/// A path is backed up at most once per store, so a manifest that touches
/// the same path twice still rolls back to the pre-run bytes.
#[derive(Debug, Default)]
pub struct BackupStore {
    taken: HashSet<PathBuf>,
}

impl BackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backup(&mut self, dest: &Path, kind: EntryKind) -> Result<BackupOutcome, UpdateError> {
        if self.taken.contains(dest) {
            return Ok(BackupOutcome::AlreadyTaken);
        }

        let backup = backup_path(dest);
        remove_entry_if_exists(&backup)?;
        if !entry_exists(dest) {
            self.taken.insert(dest.to_path_buf());
            return Ok(BackupOutcome::NothingToPreserve);
        }

        let partial = unique_sibling(dest, "bak-partial");
        let copied = match kind {
            EntryKind::Folder if dest.is_dir() => copy_dir_recursive(dest, &partial),
            _ => fs::copy(dest, &partial)
                .map(|_| ())
                .map_err(UpdateError::io("back up", dest)),
        };
        if let Err(err) = copied {
            let _ = remove_entry_if_exists(&partial);
            return Err(err);
        }
        rename(&partial, &backup)?;

        debug!(path = %dest.display(), kind = kind.as_str(), "backed up");
        self.taken.insert(dest.to_path_buf());
        Ok(BackupOutcome::Preserved)
    }

    /// Puts the staged `source` in place of `dest`.
    ///
    /// Folders are copied next to `dest` first and swapped in with renames,
    /// so `dest` is missing only between two renames on the same volume.
    pub fn replace(&self, source: &Path, dest: &Path, kind: EntryKind) -> Result<(), UpdateError> {
        match kind {
            EntryKind::File => copy_file_atomic(source, dest),
            EntryKind::Folder => {
                ensure_parent_dir(dest)?;
                let fresh = unique_sibling(dest, "new");
                if let Err(err) = copy_dir_recursive(source, &fresh) {
                    let _ = remove_entry_if_exists(&fresh);
                    return Err(err);
                }

                let displaced = entry_exists(dest).then(|| unique_sibling(dest, "tmp"));
                if let Some(displaced) = &displaced {
                    if let Err(err) = rename(dest, displaced) {
                        let _ = remove_entry_if_exists(&fresh);
                        return Err(err);
                    }
                }

                if let Err(err) = rename(&fresh, dest) {
                    if let Some(displaced) = &displaced {
                        if let Err(undo) = rename(displaced, dest) {
                            warn!(error = %undo, "could not move displaced folder back");
                        }
                    }
                    let _ = remove_entry_if_exists(&fresh);
                    return Err(err);
                }

                match displaced {
                    Some(displaced) => remove_entry_if_exists(&displaced),
                    None => Ok(()),
                }
            }
        }
    }

    pub fn backup_and_replace(
        &mut self,
        source: &Path,
        dest: &Path,
        kind: EntryKind,
    ) -> Result<BackupOutcome, UpdateError> {
        let outcome = self.backup(dest, kind)?;
        self.replace(source, dest, kind)?;
        Ok(outcome)
    }

    pub fn restore(&self, path: &Path, kind: EntryKind) -> Result<RestoreOutcome, UpdateError> {
        match kind {
            EntryKind::Folder => self.restore_folder(path),
            EntryKind::File => self.restore_file(path),
        }
    }

    pub fn restore_folder(&self, path: &Path) -> Result<RestoreOutcome, UpdateError> {
        let backup = backup_path(path);
        if !entry_exists(&backup) {
            return Ok(RestoreOutcome::NoBackup);
        }

        if !entry_exists(path) {
            ensure_parent_dir(path)?;
            rename(&backup, path)?;
            return Ok(RestoreOutcome::Restored);
        }

        let displaced = unique_sibling(path, "tmp");
        rename(path, &displaced)?;
        if let Err(err) = rename(&backup, path) {
            if let Err(undo) = rename(&displaced, path) {
                warn!(error = %undo, "could not move live folder back");
            }
            return Err(err);
        }
        remove_entry_if_exists(&displaced)?;
        Ok(RestoreOutcome::Restored)
    }

    pub fn restore_file(&self, path: &Path) -> Result<RestoreOutcome, UpdateError> {
        let backup = backup_path(path);
        if !entry_exists(&backup) {
            return Ok(RestoreOutcome::NoBackup);
        }
        ensure_parent_dir(path)?;
        rename(&backup, path)?;
        Ok(RestoreOutcome::Restored)
    }

    /// Removes the backup artifact for `path`, if any. Returns whether one
    /// existed.
    pub fn discard(&self, path: &Path) -> Result<bool, UpdateError> {
        let backup = backup_path(path);
        if !entry_exists(&backup) {
            return Ok(false);
        }
        remove_entry_if_exists(&backup)?;
        Ok(true)
    }
}
