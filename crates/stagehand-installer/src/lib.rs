mod apply;
mod backup;
mod collaborators;
mod error;
mod fs_utils;
mod layout;
mod rollback;
mod transactions;

pub use apply::{ApplyOutcome, UpdateApplier};
pub use backup::{backup_path, BackupOutcome, BackupStore, RestoreOutcome, BACKUP_SUFFIX};
pub use collaborators::{
    CacheInvalidator, CancellationToken, DatabaseRestorer, DirectoryResolver, PathResolver,
};
pub use error::UpdateError;
pub use layout::{default_state_dir, UpdateLayout};
pub use rollback::{
    contained_backup_path, DatabaseRollback, RollbackEngine, RollbackReport, DB_BACKUP_EXTENSION,
};
pub use transactions::{
    append_transaction_journal_entry, begin_transaction, clear_active_transaction,
    current_unix_timestamp, read_active_transaction, read_transaction_journal,
    read_transaction_metadata, update_transaction_status,
    write_transaction_metadata, Journal, TransactionJournalEntry, TransactionMetadata,
    TransactionStatus,
};
