use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Paths of the applier's own bookkeeping, kept apart from the install tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLayout {
    state_dir: PathBuf,
}

impl UpdateLayout {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn transactions_dir(&self) -> PathBuf {
        self.state_dir.join("transactions")
    }

    pub fn transaction_active_path(&self) -> PathBuf {
        self.transactions_dir().join("active")
    }

    pub fn transaction_metadata_path(&self, txid: &str) -> PathBuf {
        self.transactions_dir().join(format!("{txid}.json"))
    }

    pub fn transaction_journal_path(&self, txid: &str) -> PathBuf {
        self.transactions_dir().join(format!("{txid}.journal"))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.state_dir.clone(), self.transactions_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_state_dir() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows state dir")?;
        return Ok(PathBuf::from(app_data).join("Stagehand"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve state dir")?;
    Ok(PathBuf::from(home).join(".stagehand"))
}
