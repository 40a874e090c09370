use std::path::{Component, Path, PathBuf};

use stagehand_core::{Directive, FileChange, Handle};
use tracing::{debug, error, info, warn};

use crate::backup::{BackupStore, RestoreOutcome};
use crate::transactions::Journal;
use crate::{DatabaseRestorer, PathResolver, UpdateError};

pub const DB_BACKUP_EXTENSION: &str = "sql";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub restored: Vec<PathBuf>,
    pub skipped: usize,
    pub failures: Vec<String>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub(crate) fn file_changes(
    directives: &[Directive],
) -> impl DoubleEndedIterator<Item = &FileChange> {
    directives.iter().filter_map(Directive::as_file_change)
}

/// Restores every path of a directive list from its backup artifact.
pub struct RollbackEngine<'a> {
    resolver: &'a dyn PathResolver,
}

impl<'a> RollbackEngine<'a> {
    pub fn new(resolver: &'a dyn PathResolver) -> Self {
        Self { resolver }
    }

    /// Never fails: paths without a backup are skipped and per-path faults
    /// are logged and collected in the report. Paths are restored in reverse
    /// manifest order. Safe to run repeatedly.
    pub fn rollback(&self, directives: &[Directive], handle: &Handle) -> RollbackReport {
        self.run(directives, handle, None)
    }

    pub(crate) fn rollback_journaled(
        &self,
        directives: &[Directive],
        handle: &Handle,
        journal: &mut Journal<'_>,
    ) -> RollbackReport {
        self.run(directives, handle, Some(journal))
    }

    fn run(
        &self,
        directives: &[Directive],
        handle: &Handle,
        mut journal: Option<&mut Journal<'_>>,
    ) -> RollbackReport {
        let mut report = RollbackReport::default();
        let root = match self.resolver.root_for_handle(handle) {
            Ok(root) => root,
            Err(err) => {
                error!(%handle, error = %format!("{err:#}"), "cannot resolve install root for rollback");
                report
                    .failures
                    .push(format!("resolve install root for '{handle}': {err:#}"));
                return report;
            }
        };

        // Last backup first: a folder backup taken after a nested file was
        // backed up holds that file's `.bak`, so the folder comes back first.
        let store = BackupStore::new();
        for change in file_changes(directives).rev() {
            let (relative, kind) = change.target();
            let path = root.join(relative);
            match store.restore(&path, kind) {
                Ok(RestoreOutcome::Restored) => {
                    info!(path = %path.display(), kind = kind.as_str(), "restored from backup");
                    if let Some(journal) = journal.as_deref_mut() {
                        journal.record("rollback", "restored", Some(&path));
                    }
                    report.restored.push(path);
                }
                Ok(RestoreOutcome::NoBackup) => {
                    debug!(path = %path.display(), "no backup; nothing to restore");
                    report.skipped += 1;
                }
                Err(err) => {
                    error!(path = %path.display(), error = %err, "failed to restore from backup");
                    if let Some(journal) = journal.as_deref_mut() {
                        journal.record("rollback", "failed", Some(&path));
                    }
                    report.failures.push(err.to_string());
                }
            }
        }
        report
    }

    /// Deletes backup artifacts left behind by a committed run.
    pub fn cleanup_backups(
        &self,
        directives: &[Directive],
        handle: &Handle,
    ) -> Result<usize, UpdateError> {
        let root = self
            .resolver
            .root_for_handle(handle)
            .map_err(|source| UpdateError::Resolve {
                handle: handle.to_string(),
                source,
            })?;
        let store = BackupStore::new();
        let mut removed = 0;
        for change in file_changes(directives) {
            let (relative, _) = change.target();
            if store.discard(&root.join(relative))? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Database half of a rollback: restores a named backup from the backup dir.
pub struct DatabaseRollback<'a> {
    backup_dir: PathBuf,
    restorer: &'a dyn DatabaseRestorer,
}

impl<'a> DatabaseRollback<'a> {
    pub fn new(backup_dir: impl Into<PathBuf>, restorer: &'a dyn DatabaseRestorer) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            restorer,
        }
    }

    /// `Err` only for identifiers escaping the backup dir; the restorer is
    /// not called then. Restorer failures come back as `Ok(false)`.
    pub fn rollback_database(&self, identifier: &str) -> Result<bool, UpdateError> {
        let path = match contained_backup_path(&self.backup_dir, identifier) {
            Ok(path) => path,
            Err(err) => {
                warn!(error = %err, "rejected database restore outside the backup dir");
                return Err(err);
            }
        };

        match self.restorer.restore(&path) {
            Ok(true) => {
                info!(backup = %path.display(), "restored database backup");
                Ok(true)
            }
            Ok(false) => {
                error!(backup = %path.display(), "there was a problem restoring the database backup");
                Ok(false)
            }
            Err(err) => {
                error!(
                    backup = %path.display(),
                    error = %format!("{err:#}"),
                    "there was a problem restoring the database backup"
                );
                Ok(false)
            }
        }
    }
}

/// `<backup_dir>/<identifier>.sql`, provided it stays inside `backup_dir`.
pub fn contained_backup_path(backup_dir: &Path, identifier: &str) -> Result<PathBuf, UpdateError> {
    let file_name = format!("{identifier}.{DB_BACKUP_EXTENSION}");
    let candidate = backup_dir.join(&file_name);
    let reject = || UpdateError::SecurityRejection {
        root: backup_dir.to_path_buf(),
        path: candidate.clone(),
    };

    let relative = Path::new(&file_name);
    if identifier.trim().is_empty()
        || relative.is_absolute()
        || identifier.contains('\\')
        || !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err(reject());
    }

    if let (Ok(root), Ok(resolved)) = (backup_dir.canonicalize(), candidate.canonicalize()) {
        if !resolved.starts_with(&root) {
            return Err(reject());
        }
    }

    Ok(candidate)
}
