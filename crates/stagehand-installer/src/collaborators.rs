use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use stagehand_core::Handle;

/// Maps a handle to the live install root and to its sub-root inside the
/// staged tree.
pub trait PathResolver {
    fn root_for_handle(&self, handle: &Handle) -> Result<PathBuf>;

    /// Relative path under the staged tree; empty for the application.
    fn staged_sub_root_for_handle(&self, handle: &Handle) -> PathBuf;
}

/// Evicts compiled or cached forms of a file. Must tolerate paths that do
/// not exist.
pub trait CacheInvalidator {
    fn invalidate(&self, path: &Path);
}

/// Restores a database from a backup file. `Ok(false)` and `Err` both mean
/// the restore did not happen.
pub trait DatabaseRestorer {
    fn restore(&self, backup_file: &Path) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryResolver {
    app_root: PathBuf,
    plugins_root: PathBuf,
    app_staged_subdir: PathBuf,
}

impl DirectoryResolver {
    pub fn new(app_root: impl Into<PathBuf>, plugins_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            plugins_root: plugins_root.into(),
            app_staged_subdir: PathBuf::new(),
        }
    }

    pub fn with_app_staged_subdir(mut self, subdir: impl Into<PathBuf>) -> Self {
        self.app_staged_subdir = subdir.into();
        self
    }
}

impl PathResolver for DirectoryResolver {
    fn root_for_handle(&self, handle: &Handle) -> Result<PathBuf> {
        let root = match handle {
            Handle::App => self.app_root.clone(),
            Handle::Plugin(name) => self.plugins_root.join(name),
        };
        if !root.is_dir() {
            return Err(anyhow!(
                "install root for '{handle}' is not a directory: {}",
                root.display()
            ));
        }
        Ok(root)
    }

    fn staged_sub_root_for_handle(&self, handle: &Handle) -> PathBuf {
        match handle {
            Handle::App => self.app_staged_subdir.clone(),
            Handle::Plugin(name) => PathBuf::from(name),
        }
    }
}

/// Shared flag checked between directives. Cancelling mid-run is treated as
/// a fault and rolls the run back.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
