use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::handle::Handle;
use crate::manifest::{parse_anchored_manifest, Directive, ManifestError};

/// Where the installed version of a handle comes from.
pub trait LocalVersionSource {
    fn local_version(&self, handle: &Handle) -> Option<String>;
}

/// Fixed handle-to-version table, typically loaded from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticVersions {
    versions: BTreeMap<Handle, String>,
}

impl StaticVersions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handle: Handle, version: impl Into<String>) -> Self {
        self.insert(handle, version);
        self
    }

    pub fn insert(&mut self, handle: Handle, version: impl Into<String>) {
        self.versions.insert(handle, version.into());
    }
}

impl LocalVersionSource for StaticVersions {
    fn local_version(&self, handle: &Handle) -> Option<String> {
        self.versions.get(handle).cloned()
    }
}

pub fn manifest_path(manifest_dir: &Path, handle: &Handle) -> PathBuf {
    manifest_dir.join(format!("{handle}_manifest"))
}

/// Index of the first version marker equal to `local_version`, or 0.
pub fn cursor_offset(directives: &[Directive], local_version: Option<&str>) -> usize {
    let Some(local_version) = local_version else {
        return 0;
    };
    directives
        .iter()
        .position(|directive| directive.version() == Some(local_version))
        .unwrap_or(0)
}

pub fn slice_from_local_version<'a>(
    directives: &'a [Directive],
    local_version: Option<&str>,
) -> &'a [Directive] {
    &directives[cursor_offset(directives, local_version)..]
}

/// Sliced manifests for one update run, keyed by manifest path and handle.
///
/// The first successful load wins for the lifetime of the cache, so a
/// changing installed version cannot move the cursor mid-run.
#[derive(Debug, Default)]
pub struct ManifestCache {
    entries: HashMap<(PathBuf, Handle), Vec<Directive>>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Ok(None)` when no manifest exists for the handle. Absence is
    /// not cached.
    pub fn load(
        &mut self,
        manifest_dir: &Path,
        handle: &Handle,
        versions: &dyn LocalVersionSource,
    ) -> Result<Option<&[Directive]>, ManifestError> {
        let path = manifest_path(manifest_dir, handle);
        let key = (path, handle.clone());

        if !self.entries.contains_key(&key) {
            let raw = match fs::read_to_string(&key.0) {
                Ok(raw) => raw,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(source) => {
                    return Err(ManifestError::Read {
                        path: key.0.clone(),
                        source,
                    });
                }
            };

            let mut directives = parse_anchored_manifest(&raw)?;
            let local_version = versions.local_version(handle);
            let offset = cursor_offset(&directives, local_version.as_deref());
            debug!(
                manifest = %key.0.display(),
                %handle,
                local_version = local_version.as_deref().unwrap_or("<none>"),
                offset,
                total = directives.len(),
                "sliced manifest from local version"
            );
            directives.drain(..offset);
            self.entries.insert(key.clone(), directives);
        }

        Ok(self.entries.get(&key).map(Vec::as_slice))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
