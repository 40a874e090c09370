use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use stagehand_core::{
    baseline_version, manifest_path, parse_anchored_manifest, slice_from_local_version, Directive,
    Handle, LocalVersionSource, ManifestCache,
};
use stagehand_installer::{
    clear_active_transaction, read_active_transaction, read_transaction_journal,
    read_transaction_metadata, update_transaction_status, ApplyOutcome, CacheInvalidator,
    DatabaseRestorer, DatabaseRollback, RollbackEngine, TransactionMetadata, TransactionStatus,
    UpdateApplier, UpdateError, UpdateLayout,
};
use tracing::{info, warn};

use crate::config::{StagehandConfig, PATH_PLACEHOLDER};
use crate::render::{
    apply_outcome_lines, format_directive, format_transaction_line, rollback_report_lines,
    TerminalRenderer,
};

/// Restores a database by running the configured `restore_command`.
pub(crate) struct CommandRestorer {
    template: Vec<String>,
}

impl CommandRestorer {
    pub(crate) fn new(template: Vec<String>) -> Self {
        Self { template }
    }
}

impl DatabaseRestorer for CommandRestorer {
    fn restore(&self, backup_file: &Path) -> Result<bool> {
        let mut command = build_command(&self.template, backup_file)?;
        run_command(&mut command, "database restore")?;
        Ok(true)
    }
}

/// Runs the configured `invalidate_command` once per file.
pub(crate) struct CommandInvalidator {
    template: Vec<String>,
}

impl CommandInvalidator {
    pub(crate) fn new(template: Vec<String>) -> Self {
        Self { template }
    }
}

impl CacheInvalidator for CommandInvalidator {
    fn invalidate(&self, path: &Path) {
        let result = build_command(&self.template, path)
            .and_then(|mut command| run_command(&mut command, "cache invalidation"));
        if let Err(err) = result {
            warn!(path = %path.display(), error = %format!("{err:#}"), "cache invalidation failed");
        }
    }
}

/// Substitutes `{path}` in a command template; appends the path when the
/// template has no placeholder.
pub(crate) fn command_argv(template: &[String], path: &Path) -> Result<Vec<String>> {
    match template.first() {
        Some(program) if !program.trim().is_empty() => {}
        _ => return Err(anyhow!("command template must name a program")),
    }

    let path = path.display().to_string();
    let mut argv = template
        .iter()
        .map(|arg| arg.replace(PATH_PLACEHOLDER, &path))
        .collect::<Vec<_>>();
    if !template.iter().any(|arg| arg.contains(PATH_PLACEHOLDER)) {
        argv.push(path);
    }
    Ok(argv)
}

fn build_command(template: &[String], path: &Path) -> Result<Command> {
    let argv = command_argv(template, path)?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command template must name a program"))?;
    let mut command = Command::new(program);
    command.args(args);
    Ok(command)
}

fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

/// Directives relevant to `handle`, sliced from its configured local version.
pub(crate) fn load_directives(
    config: &StagehandConfig,
    handle: &Handle,
    manifest: Option<&Path>,
) -> Result<Vec<Directive>> {
    let versions = config.local_versions()?;
    if let Some(path) = manifest {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let directives = parse_anchored_manifest(&raw)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;
        let local_version = versions.local_version(handle);
        return Ok(slice_from_local_version(&directives, local_version.as_deref()).to_vec());
    }

    let mut cache = ManifestCache::new();
    let directives = cache
        .load(&config.manifest_dir, handle, &versions)?
        .ok_or_else(|| {
            anyhow!(
                "no manifest for '{handle}' at {}",
                manifest_path(&config.manifest_dir, handle).display()
            )
        })?;
    Ok(directives.to_vec())
}

pub(crate) struct ApplyRequest<'a> {
    pub handle: Handle,
    pub staged_root: PathBuf,
    pub manifest: Option<&'a Path>,
    pub db_backup: Option<&'a str>,
}

pub(crate) fn run_apply(
    config: &StagehandConfig,
    request: ApplyRequest<'_>,
    renderer: TerminalRenderer,
) -> Result<()> {
    let handle = &request.handle;
    let directives = load_directives(config, handle, request.manifest)?;
    if !request.staged_root.is_dir() {
        return Err(anyhow!(
            "staged root is not a directory: {}",
            request.staged_root.display()
        ));
    }

    let layout = config.layout()?;
    layout.ensure_base_dirs()?;
    let resolver = config.resolver();
    let invalidator = (!config.invalidate_command.is_empty())
        .then(|| CommandInvalidator::new(config.invalidate_command.clone()));
    let mut applier = UpdateApplier::new(&layout, &resolver);
    if let Some(invalidator) = &invalidator {
        applier = applier.with_cache_invalidator(invalidator);
    }

    let outcome = applier
        .apply(&directives, &request.staged_root, handle)
        .map_err(|err| {
            if matches!(err, UpdateError::Busy { .. }) {
                anyhow!("{err}; run `stagehand rollback {handle}` to recover")
            } else {
                anyhow::Error::from(err)
            }
        })?;
    for (status, line) in apply_outcome_lines(handle.as_str(), &outcome) {
        renderer.print_status(status, &line);
    }

    match outcome {
        ApplyOutcome::Committed { .. } => Ok(()),
        ApplyOutcome::RolledBack { reason, .. } => {
            if let Some(identifier) = request.db_backup {
                if let Err(err) = run_restore_database(config, identifier, renderer) {
                    renderer.print_status("err", &format!("{err:#}"));
                }
            }
            Err(anyhow!("update of {handle} was rolled back: {reason}"))
        }
    }
}

pub(crate) fn run_rollback(
    config: &StagehandConfig,
    handle: &Handle,
    manifest: Option<&Path>,
    renderer: TerminalRenderer,
) -> Result<()> {
    let directives = load_directives(config, handle, manifest)?;
    let layout = config.layout()?;
    let pending = pending_transaction_for(&layout, handle)?;
    let resolver = config.resolver();

    let report = RollbackEngine::new(&resolver).rollback(&directives, handle);
    for (status, line) in rollback_report_lines(&report) {
        renderer.print_status(status, &line);
    }

    if let Some(metadata) = pending {
        if report.is_clean() {
            update_transaction_status(&layout, &metadata.txid, TransactionStatus::RolledBack)?;
            clear_active_transaction(&layout)?;
            info!(txid = %metadata.txid, "recovered interrupted transaction");
            renderer.print_status(
                "ok",
                &format!("cleared active transaction {}", metadata.txid),
            );
        } else {
            update_transaction_status(
                &layout,
                &metadata.txid,
                TransactionStatus::RollbackIncomplete,
            )?;
        }
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(anyhow!(
            "rollback of {handle} incomplete ({} failure(s))",
            report.failures.len()
        ))
    }
}

/// The active transaction, provided it belongs to `handle`.
pub(crate) fn pending_transaction_for(
    layout: &UpdateLayout,
    handle: &Handle,
) -> Result<Option<TransactionMetadata>> {
    let Some(txid) = read_active_transaction(layout)? else {
        return Ok(None);
    };
    let metadata = read_transaction_metadata(layout, &txid)?.ok_or_else(|| {
        anyhow!(
            "transaction {txid} requires repair (reason=metadata_missing path={})",
            layout.transaction_metadata_path(&txid).display()
        )
    })?;
    if metadata.handle != handle.as_str() {
        return Err(anyhow!(
            "active transaction {txid} belongs to '{}', not '{handle}'",
            metadata.handle
        ));
    }
    Ok(Some(metadata))
}

pub(crate) fn run_restore_database(
    config: &StagehandConfig,
    identifier: &str,
    renderer: TerminalRenderer,
) -> Result<()> {
    if config.restore_command.is_empty() {
        return Err(anyhow!("restore_command is not configured"));
    }
    let restorer = CommandRestorer::new(config.restore_command.clone());
    let rollback = DatabaseRollback::new(config.db_backup_dir()?, &restorer);
    if rollback.rollback_database(identifier)? {
        renderer.print_status("ok", &format!("restored database backup {identifier}"));
        Ok(())
    } else {
        Err(anyhow!("database backup {identifier} was not restored"))
    }
}

pub(crate) fn manifest_lines(directives: &[Directive]) -> Vec<String> {
    let mut lines = Vec::with_capacity(directives.len() + 1);
    match baseline_version(directives) {
        Some(version) => lines.push(format!("from version {version}")),
        None => lines.push("from start of manifest".to_string()),
    }
    lines.extend(directives.iter().map(format_directive));
    lines
}

pub(crate) fn run_show_manifest(
    config: &StagehandConfig,
    handle: &Handle,
    manifest: Option<&Path>,
    renderer: TerminalRenderer,
) -> Result<()> {
    let directives = load_directives(config, handle, manifest)?;
    renderer.print_lines(&manifest_lines(&directives));
    Ok(())
}

pub(crate) fn run_clean_backups(
    config: &StagehandConfig,
    handle: &Handle,
    manifest: Option<&Path>,
    renderer: TerminalRenderer,
) -> Result<()> {
    let layout = config.layout()?;
    if let Some(txid) = read_active_transaction(&layout)? {
        return Err(anyhow!(
            "cannot clean backups while transaction {txid} is active; run `stagehand rollback` first"
        ));
    }
    let directives = load_directives(config, handle, manifest)?;
    let resolver = config.resolver();
    let removed = RollbackEngine::new(&resolver).cleanup_backups(&directives, handle)?;
    renderer.print_status("ok", &format!("removed {removed} backup(s) for {handle}"));
    Ok(())
}

pub(crate) fn status_lines(layout: &UpdateLayout) -> Result<Vec<(&'static str, String)>> {
    let mut lines = vec![("step", format!("state dir: {}", layout.state_dir().display()))];
    let Some(txid) = read_active_transaction(layout)? else {
        lines.push(("ok", "no active transaction".to_string()));
        return Ok(lines);
    };

    match read_transaction_metadata(layout, &txid)? {
        Some(metadata) => {
            let status = if metadata.status.is_terminal() {
                "warn"
            } else {
                "err"
            };
            lines.push((status, format_transaction_line(&metadata)));
        }
        None => lines.push((
            "err",
            format!("transaction {txid} requires repair (reason=metadata_missing)"),
        )),
    }
    let journal = read_transaction_journal(layout, &txid)?;
    if let Some(last) = journal.last() {
        lines.push((
            "step",
            format!(
                "last step: {} {}{}",
                last.step,
                last.state,
                last.path
                    .as_deref()
                    .map(|path| format!(" {path}"))
                    .unwrap_or_default()
            ),
        ));
    }
    Ok(lines)
}

pub(crate) fn run_status(config: &StagehandConfig, renderer: TerminalRenderer) -> Result<()> {
    let layout = config.layout()?;
    for (status, line) in status_lines(&layout)? {
        renderer.print_status(status, &line);
    }
    Ok(())
}
