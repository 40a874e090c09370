use std::path::{Path, PathBuf};

use stagehand_core::{Directive, EntryKind, FileAction, Handle};
use tracing::{debug, error, info, warn};

use crate::backup::{BackupOutcome, BackupStore};
use crate::fs_utils::files_under;
use crate::rollback::{file_changes, RollbackEngine, RollbackReport};
use crate::transactions::{
    begin_transaction, clear_active_transaction, read_active_transaction,
    update_transaction_status, Journal, TransactionStatus,
};
use crate::{CacheInvalidator, CancellationToken, PathResolver, UpdateError, UpdateLayout};

#[derive(Debug)]
pub enum ApplyOutcome {
    Committed {
        txid: String,
        applied: usize,
    },
    /// The run failed and was rolled back. `reason` is the fault that
    /// stopped the run, never a rollback fault.
    RolledBack {
        txid: String,
        reason: UpdateError,
        report: RollbackReport,
    },
}

impl ApplyOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn txid(&self) -> &str {
        match self {
            Self::Committed { txid, .. } | Self::RolledBack { txid, .. } => txid,
        }
    }
}

/// Applies directive lists to a live install.
///
/// Runs are sequential and single-writer: `apply` claims the layout's
/// active transaction marker and refuses to start while another run holds
/// it. Callers should still serialize update triggers themselves.
pub struct UpdateApplier<'a> {
    layout: &'a UpdateLayout,
    resolver: &'a dyn PathResolver,
    invalidator: Option<&'a dyn CacheInvalidator>,
    cancellation: Option<CancellationToken>,
}

impl<'a> UpdateApplier<'a> {
    pub fn new(layout: &'a UpdateLayout, resolver: &'a dyn PathResolver) -> Self {
        Self {
            layout,
            resolver,
            invalidator: None,
            cancellation: None,
        }
    }

    pub fn with_cache_invalidator(mut self, invalidator: &'a dyn CacheInvalidator) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn apply(
        &self,
        directives: &[Directive],
        staged_root: &Path,
        handle: &Handle,
    ) -> Result<ApplyOutcome, UpdateError> {
        let staged_display = staged_root.display().to_string();
        let tx = begin_transaction(self.layout, handle.as_str(), Some(&staged_display)).map_err(
            |err| match read_active_transaction(self.layout) {
                Ok(Some(txid)) => UpdateError::Busy { txid: Some(txid) },
                _ => UpdateError::Journal(err),
            },
        )?;
        let mut journal = Journal::new(self.layout, tx.txid.clone());
        info!(txid = %tx.txid, %handle, directives = directives.len(), "applying update");

        let dest_root = match self.prepare(directives, handle, &mut journal) {
            Ok(dest_root) => dest_root,
            Err(reason) => {
                // Nothing in the install tree was touched yet.
                error!(txid = %tx.txid, %handle, error = %reason, "update aborted before applying");
                self.set_status(&tx.txid, TransactionStatus::RolledBack);
                self.release(&tx.txid);
                return Ok(ApplyOutcome::RolledBack {
                    txid: tx.txid,
                    reason,
                    report: RollbackReport::default(),
                });
            }
        };

        match self.apply_directives(directives, staged_root, &dest_root, handle, &mut journal) {
            Ok(applied) => {
                self.set_status(&tx.txid, TransactionStatus::Committed);
                self.release(&tx.txid);
                info!(txid = %tx.txid, %handle, applied, "update committed");
                Ok(ApplyOutcome::Committed {
                    txid: tx.txid,
                    applied,
                })
            }
            Err(reason) => {
                error!(txid = %tx.txid, %handle, error = %reason, "error updating files; rolling back");
                self.set_status(&tx.txid, TransactionStatus::RollingBack);
                let report = RollbackEngine::new(self.resolver).rollback_journaled(
                    directives,
                    handle,
                    &mut journal,
                );

                if report.is_clean() {
                    self.set_status(&tx.txid, TransactionStatus::RolledBack);
                    self.release(&tx.txid);
                    info!(
                        txid = %tx.txid,
                        restored = report.restored.len(),
                        "update rolled back"
                    );
                } else {
                    self.set_status(&tx.txid, TransactionStatus::RollbackIncomplete);
                    error!(
                        txid = %tx.txid,
                        failures = report.failures.len(),
                        "rollback incomplete; leaving active transaction marker in place"
                    );
                }

                Ok(ApplyOutcome::RolledBack {
                    txid: tx.txid,
                    reason,
                    report,
                })
            }
        }
    }

    /// Resolves the install root and drops backup artifacts left by an
    /// earlier committed run, so they are not mistaken for this run's.
    fn prepare(
        &self,
        directives: &[Directive],
        handle: &Handle,
        journal: &mut Journal<'_>,
    ) -> Result<PathBuf, UpdateError> {
        let dest_root =
            self.resolver
                .root_for_handle(handle)
                .map_err(|source| UpdateError::Resolve {
                    handle: handle.to_string(),
                    source,
                })?;

        let store = BackupStore::new();
        for change in file_changes(directives) {
            let dest = dest_root.join(change.relative_path());
            if store.discard(&dest)? {
                journal.record("discard_stale_backup", "done", Some(&dest));
            }
        }
        Ok(dest_root)
    }

    fn apply_directives(
        &self,
        directives: &[Directive],
        staged_root: &Path,
        dest_root: &Path,
        handle: &Handle,
        journal: &mut Journal<'_>,
    ) -> Result<usize, UpdateError> {
        let source_root = staged_root.join(self.resolver.staged_sub_root_for_handle(handle));
        let mut store = BackupStore::new();

        let mut applied = 0;
        for (index, directive) in directives.iter().enumerate() {
            let Some(change) = directive.as_file_change() else {
                continue;
            };
            if self
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
            {
                return Err(UpdateError::Cancelled { index });
            }
            if change.action != FileAction::Add {
                debug!(
                    path = %change.path,
                    action = change.action.as_str(),
                    "skipping directive with unrecognized action"
                );
                continue;
            }

            let (relative, kind) = change.target();
            let dest = dest_root.join(relative);
            let source = source_root.join(relative);
            match kind {
                EntryKind::Folder => info!(path = %dest.display(), "updating folder"),
                EntryKind::File => info!(path = %dest.display(), "updating file"),
            }

            self.invalidate(&dest);
            let outcome = store.backup(&dest, kind)?;
            journal.record("backup", backup_state(outcome), Some(&dest));
            store.replace(&source, &dest, kind)?;
            journal.record("replace", "done", Some(&dest));
            applied += 1;
        }

        Ok(applied)
    }

    fn invalidate(&self, dest: &Path) {
        let Some(invalidator) = self.invalidator else {
            return;
        };
        match files_under(dest) {
            Ok(files) => {
                for file in files {
                    invalidator.invalidate(&file);
                }
            }
            Err(err) => {
                warn!(path = %dest.display(), error = %err, "could not enumerate files to invalidate");
            }
        }
    }

    fn set_status(&self, txid: &str, status: TransactionStatus) {
        if let Err(err) = update_transaction_status(self.layout, txid, status) {
            warn!(
                %txid,
                status = status.as_str(),
                error = %format!("{err:#}"),
                "failed to record transaction status"
            );
        }
    }

    fn release(&self, txid: &str) {
        if let Err(err) = clear_active_transaction(self.layout) {
            error!(%txid, error = %format!("{err:#}"), "failed to clear active transaction marker");
        }
    }
}

fn backup_state(outcome: BackupOutcome) -> &'static str {
    match outcome {
        BackupOutcome::Preserved => "preserved",
        BackupOutcome::NothingToPreserve => "nothing_to_preserve",
        BackupOutcome::AlreadyTaken => "already_taken",
    }
}
