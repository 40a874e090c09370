use std::io;
use std::path::PathBuf;

use stagehand_core::ManifestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "refused to restore database backup outside {}: {}",
        .root.display(),
        .path.display()
    )]
    SecurityRejection { root: PathBuf, path: PathBuf },
    #[error("cannot resolve install root for handle '{handle}': {source:#}")]
    Resolve {
        handle: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("update already in progress (txid={})", .txid.as_deref().unwrap_or("unknown"))]
    Busy { txid: Option<String> },
    #[error("update cancelled before directive {index}")]
    Cancelled { index: usize },
    #[error("transaction journal failure: {0:#}")]
    Journal(#[source] anyhow::Error),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl UpdateError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { op, path, source }
    }

    pub fn is_security_rejection(&self) -> bool {
        matches!(self, Self::SecurityRejection { .. })
    }
}
