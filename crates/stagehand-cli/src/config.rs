use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use stagehand_core::{Handle, StaticVersions};
use stagehand_installer::{default_state_dir, DirectoryResolver, UpdateLayout};

pub(crate) const DEFAULT_CONFIG_FILE: &str = "stagehand.toml";
pub(crate) const PATH_PLACEHOLDER: &str = "{path}";

/// `stagehand.toml`. Relative paths are taken relative to the file itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StagehandConfig {
    pub app_root: PathBuf,
    pub plugins_root: PathBuf,
    pub manifest_dir: PathBuf,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub db_backup_dir: Option<PathBuf>,
    /// Parent of unpacked update folders, addressed by update uid.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub app_staged_subdir: PathBuf,
    #[serde(default)]
    pub versions: BTreeMap<String, String>,
    #[serde(default)]
    pub restore_command: Vec<String>,
    #[serde(default)]
    pub invalidate_command: Vec<String>,
}

impl StagehandConfig {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    pub(crate) fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for handle in self.versions.keys() {
            Handle::parse(handle).with_context(|| format!("invalid handle in [versions]: {handle}"))?;
        }
        if self.app_staged_subdir.is_absolute() {
            return Err(anyhow!(
                "app_staged_subdir must be relative: {}",
                self.app_staged_subdir.display()
            ));
        }
        Ok(())
    }

    fn rebase(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        rebase(&mut self.app_root);
        rebase(&mut self.plugins_root);
        rebase(&mut self.manifest_dir);
        for path in [
            &mut self.state_dir,
            &mut self.db_backup_dir,
            &mut self.staging_dir,
        ]
        .into_iter()
        .flatten()
        {
            rebase(path);
        }
    }

    pub(crate) fn layout(&self) -> Result<UpdateLayout> {
        let state_dir = match &self.state_dir {
            Some(state_dir) => state_dir.clone(),
            None => default_state_dir()?,
        };
        Ok(UpdateLayout::new(state_dir))
    }

    pub(crate) fn resolver(&self) -> DirectoryResolver {
        DirectoryResolver::new(&self.app_root, &self.plugins_root)
            .with_app_staged_subdir(&self.app_staged_subdir)
    }

    pub(crate) fn local_versions(&self) -> Result<StaticVersions> {
        let mut versions = StaticVersions::new();
        for (handle, version) in &self.versions {
            versions.insert(Handle::parse(handle)?, version.trim());
        }
        Ok(versions)
    }

    pub(crate) fn staged_root_for_uid(&self, uid: &str) -> Result<PathBuf> {
        let staging_dir = self
            .staging_dir
            .as_ref()
            .ok_or_else(|| anyhow!("--uid requires staging_dir in the config"))?;
        let valid = !uid.is_empty()
            && uid
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !valid {
            return Err(anyhow!("invalid update uid: {uid}"));
        }
        Ok(staging_dir.join(uid))
    }

    pub(crate) fn db_backup_dir(&self) -> Result<&Path> {
        self.db_backup_dir
            .as_deref()
            .ok_or_else(|| anyhow!("db_backup_dir is not configured"))
    }
}
