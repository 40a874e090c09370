use std::io;

use anyhow::{anyhow, Result};
use stagehand_core::Handle;

use crate::command_flows::{
    run_apply, run_clean_backups, run_restore_database, run_rollback, run_show_manifest,
    run_status, ApplyRequest,
};
use crate::completion::{resolve_completion_shell, write_completions_script};
use crate::config::StagehandConfig;
use crate::render::TerminalRenderer;
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let renderer = TerminalRenderer::current();

    match cli.command {
        Commands::Apply {
            handle,
            staged,
            uid,
            manifest,
            db_backup,
        } => {
            let config = StagehandConfig::load(&cli.config)?;
            let handle = Handle::parse(&handle)?;
            let staged_root = match (staged, uid) {
                (Some(staged), _) => staged,
                (None, Some(uid)) => config.staged_root_for_uid(&uid)?,
                (None, None) => return Err(anyhow!("either --staged or --uid is required")),
            };
            run_apply(
                &config,
                ApplyRequest {
                    handle,
                    staged_root,
                    manifest: manifest.as_deref(),
                    db_backup: db_backup.as_deref(),
                },
                renderer,
            )?;
        }
        Commands::Rollback { handle, manifest } => {
            let config = StagehandConfig::load(&cli.config)?;
            let handle = Handle::parse(&handle)?;
            run_rollback(&config, &handle, manifest.as_deref(), renderer)?;
        }
        Commands::RestoreDb { identifier } => {
            let config = StagehandConfig::load(&cli.config)?;
            run_restore_database(&config, &identifier, renderer)?;
        }
        Commands::ShowManifest { handle, manifest } => {
            let config = StagehandConfig::load(&cli.config)?;
            let handle = Handle::parse(&handle)?;
            run_show_manifest(&config, &handle, manifest.as_deref(), renderer)?;
        }
        Commands::CleanBackups { handle, manifest } => {
            let config = StagehandConfig::load(&cli.config)?;
            let handle = Handle::parse(&handle)?;
            run_clean_backups(&config, &handle, manifest.as_deref(), renderer)?;
        }
        Commands::Status => {
            let config = StagehandConfig::load(&cli.config)?;
            run_status(&config, renderer)?;
        }
        Commands::Completions { shell } => {
            let shell_env = std::env::var("SHELL").ok();
            let shell = resolve_completion_shell(shell, shell_env.as_deref(), cfg!(windows));
            write_completions_script(shell, &mut io::stdout().lock())?;
        }
    }

    Ok(())
}
