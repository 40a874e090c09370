use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod command_flows;
mod completion;
mod config;
mod dispatch;
mod render;

use completion::CliCompletionShell;
use config::DEFAULT_CONFIG_FILE;

pub(crate) const LOG_ENV_VAR: &str = "STAGEHAND_LOG";

#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(about = "Manifest-driven update applier with backup and rollback", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Path to stagehand.toml
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Log level; falls back to STAGEHAND_LOG, then `info`
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Apply a staged update for a handle
    Apply {
        handle: String,
        /// Unpacked update tree
        #[arg(long, conflicts_with = "uid", required_unless_present = "uid")]
        staged: Option<PathBuf>,
        /// Update uid; resolves to <staging_dir>/<uid>
        #[arg(long)]
        uid: Option<String>,
        /// Manifest file instead of <manifest_dir>/<handle>_manifest
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Database backup to restore if the update rolls back
        #[arg(long)]
        db_backup: Option<String>,
    },
    /// Restore every path of a manifest from its backup
    Rollback {
        handle: String,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Restore a database backup from db_backup_dir
    RestoreDb { identifier: String },
    /// Print the directives that apply to a handle
    ShowManifest {
        handle: String,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Delete backups left behind by a committed update
    CleanBackups {
        handle: String,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Show the active transaction, if any
    Status,
    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Option<CliCompletionShell>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

pub(crate) fn log_filter(log_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if let Some(level) = log_level {
        return EnvFilter::new(level.to_filter_directive());
    }
    env_value
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(LogLevel::Info.to_filter_directive()))
}

fn initialize_tracing(log_level: Option<LogLevel>) {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(log_level, env_value.as_deref()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(cli.log_level);
    dispatch::run_cli(cli)
}
