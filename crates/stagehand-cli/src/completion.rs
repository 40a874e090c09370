use std::io::Write;

use anyhow::{Context, Result};
use clap::{CommandFactory, ValueEnum};
use clap_complete::Shell;

use crate::Cli;

pub(crate) const BINARY_NAME: &str = "stagehand";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum CliCompletionShell {
    Bash,
    Zsh,
    Fish,
    Powershell,
}

impl From<CliCompletionShell> for Shell {
    fn from(value: CliCompletionShell) -> Self {
        match value {
            CliCompletionShell::Bash => Shell::Bash,
            CliCompletionShell::Zsh => Shell::Zsh,
            CliCompletionShell::Fish => Shell::Fish,
            CliCompletionShell::Powershell => Shell::PowerShell,
        }
    }
}

pub(crate) fn write_completions_script<W: Write>(
    shell: CliCompletionShell,
    writer: &mut W,
) -> Result<()> {
    let mut command = Cli::command();
    let mut generated = Vec::new();
    clap_complete::generate(Shell::from(shell), &mut command, BINARY_NAME, &mut generated);
    writer
        .write_all(&generated)
        .with_context(|| "failed writing generated completion script")?;
    writer
        .flush()
        .with_context(|| "failed flushing generated completion script")?;
    Ok(())
}

pub(crate) fn detect_shell_from_env(shell_env: Option<&str>) -> Option<CliCompletionShell> {
    let shell_value = shell_env?;
    let shell_token = std::path::Path::new(shell_value)
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or(shell_value)
        .to_ascii_lowercase();
    match shell_token.as_str() {
        "bash" => Some(CliCompletionShell::Bash),
        "zsh" => Some(CliCompletionShell::Zsh),
        "fish" => Some(CliCompletionShell::Fish),
        "powershell" | "pwsh" => Some(CliCompletionShell::Powershell),
        _ => None,
    }
}

pub(crate) fn resolve_completion_shell(
    requested_shell: Option<CliCompletionShell>,
    shell_env: Option<&str>,
    is_windows: bool,
) -> CliCompletionShell {
    if let Some(shell) = requested_shell {
        return shell;
    }
    if let Some(shell) = detect_shell_from_env(shell_env) {
        return shell;
    }
    if is_windows {
        CliCompletionShell::Powershell
    } else {
        CliCompletionShell::Bash
    }
}
