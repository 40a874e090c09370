use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::UpdateLayout;

static TXID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Applying,
    Committed,
    RollingBack,
    RolledBack,
    /// Some paths could not be restored; the active marker is kept so no new
    /// update starts on top of a half-restored tree.
    RollbackIncomplete,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applying => "applying",
            Self::Committed => "committed",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
            Self::RollbackIncomplete => "rollback_incomplete",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub version: u32,
    pub txid: String,
    pub handle: String,
    pub status: TransactionStatus,
    pub started_at_unix: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_root: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionJournalEntry {
    pub seq: u64,
    pub step: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Txid recorded in the active marker, if a transaction holds it.
pub fn read_active_transaction(layout: &UpdateLayout) -> Result<Option<String>> {
    let path = layout.transaction_active_path();
    match fs::read_to_string(&path) {
        Ok(raw) => Ok(Some(raw.trim().to_string()).filter(|txid| !txid.is_empty())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Releases the active marker; an absent marker is fine.
pub fn clear_active_transaction(layout: &UpdateLayout) -> Result<()> {
    let path = layout.transaction_active_path();
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to release {}", path.display())),
    }
}

pub fn write_transaction_metadata(
    layout: &UpdateLayout,
    metadata: &TransactionMetadata,
) -> Result<PathBuf> {
    let path = layout.transaction_metadata_path(&metadata.txid);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let content = serde_json::to_string_pretty(metadata)
        .with_context(|| format!("failed serializing transaction {}", metadata.txid))?;
    fs::write(&path, format!("{content}\n")).with_context(|| {
        format!(
            "failed to write transaction metadata file: {}",
            path.display()
        )
    })?;
    Ok(path)
}

pub fn read_transaction_metadata(
    layout: &UpdateLayout,
    txid: &str,
) -> Result<Option<TransactionMetadata>> {
    let path = layout.transaction_metadata_path(txid);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!(
                    "failed to read transaction metadata file: {}",
                    path.display()
                )
            });
        }
    };

    let metadata = serde_json::from_str(&raw).with_context(|| {
        format!(
            "failed parsing transaction metadata file: {}",
            path.display()
        )
    })?;
    Ok(Some(metadata))
}

pub fn update_transaction_status(
    layout: &UpdateLayout,
    txid: &str,
    status: TransactionStatus,
) -> Result<()> {
    let mut metadata = read_transaction_metadata(layout, txid)?
        .ok_or_else(|| anyhow!("transaction metadata not found for '{txid}'"))?;
    metadata.status = status;
    write_transaction_metadata(layout, &metadata)?;
    Ok(())
}

pub fn append_transaction_journal_entry(
    layout: &UpdateLayout,
    txid: &str,
    entry: &TransactionJournalEntry,
) -> Result<PathBuf> {
    let path = layout.transaction_journal_path(txid);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let line = serde_json::to_string(entry)
        .with_context(|| format!("failed serializing journal entry {}", entry.seq))?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open transaction journal: {}", path.display()))?;
    file.write_all(format!("{line}\n").as_bytes())
        .with_context(|| format!("failed to append transaction journal: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush transaction journal: {}", path.display()))?;
    Ok(path)
}

pub fn read_transaction_journal(
    layout: &UpdateLayout,
    txid: &str,
) -> Result<Vec<TransactionJournalEntry>> {
    let path = layout.transaction_journal_path(txid);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read transaction journal: {}", path.display()));
        }
    };

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| {
                format!(
                    "failed parsing transaction journal line {} in {}",
                    index + 1,
                    path.display()
                )
            })
        })
        .collect()
}

/// Claims the active marker and records a fresh `applying` transaction.
/// Fails while another transaction holds the marker.
pub fn begin_transaction(
    layout: &UpdateLayout,
    handle: &str,
    staged_root: Option<&str>,
) -> Result<TransactionMetadata> {
    let started_at_unix = current_unix_timestamp()?;
    let metadata = TransactionMetadata {
        version: 1,
        txid: next_txid(layout, started_at_unix),
        handle: handle.to_string(),
        status: TransactionStatus::Applying,
        started_at_unix,
        staged_root: staged_root.map(ToOwned::to_owned),
    };

    claim_active_marker(layout, &metadata.txid)?;
    if let Err(err) = write_transaction_metadata(layout, &metadata) {
        let _ = clear_active_transaction(layout);
        return Err(err);
    }
    Ok(metadata)
}

fn claim_active_marker(layout: &UpdateLayout, txid: &str) -> Result<()> {
    let marker = layout.transaction_active_path();
    if let Some(parent) = marker.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let holder = read_active_transaction(layout)
                .ok()
                .flatten()
                .unwrap_or_else(|| "<unknown>".to_string());
            return Err(anyhow!("update transaction {holder} is still active"));
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to claim {}", marker.display()));
        }
    };

    if let Err(err) = file.write_all(format!("{txid}\n").as_bytes()) {
        drop(file);
        let _ = fs::remove_file(&marker);
        return Err(err).with_context(|| format!("failed to write {}", marker.display()));
    }
    Ok(())
}

/// `tx-<unix secs>-<pid>-<sequence>`, skipping ids that already have metadata.
fn next_txid(layout: &UpdateLayout, started_at_unix: u64) -> String {
    loop {
        let sequence = TXID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let txid = format!("tx-{started_at_unix}-{}-{sequence}", std::process::id());
        if !layout.transaction_metadata_path(&txid).exists() {
            return txid;
        }
    }
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}

/// Sequenced journal writer for one transaction. Write failures are logged,
/// not raised.
#[derive(Debug)]
pub struct Journal<'a> {
    layout: &'a UpdateLayout,
    txid: String,
    next_seq: u64,
}

impl<'a> Journal<'a> {
    pub fn new(layout: &'a UpdateLayout, txid: impl Into<String>) -> Self {
        Self {
            layout,
            txid: txid.into(),
            next_seq: 1,
        }
    }

    pub fn record(&mut self, step: &str, state: &str, path: Option<&Path>) {
        let entry = TransactionJournalEntry {
            seq: self.next_seq,
            step: step.to_string(),
            state: state.to_string(),
            path: path.map(|path| path.display().to_string()),
        };
        self.next_seq += 1;
        if let Err(err) = append_transaction_journal_entry(self.layout, &self.txid, &entry) {
            warn!(txid = %self.txid, error = %format!("{err:#}"), "failed to append journal entry");
        }
    }
}
