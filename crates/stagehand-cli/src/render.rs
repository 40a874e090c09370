use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};
use stagehand_core::{Directive, FileAction};
use stagehand_installer::{ApplyOutcome, RollbackReport, TransactionMetadata};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    let no_color = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
    if !no_color && std::io::stdout().is_terminal() {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn current() -> Self {
        Self {
            style: current_output_style(),
        }
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        let line = match (self.style, status_badge(status)) {
            (OutputStyle::Rich, Some(badge)) => {
                format!("{} {message}", colorize(badge_style(status), badge))
            }
            _ => render_status_line(self.style, status, message),
        };
        println!("{line}");
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match (style, status_badge(status)) {
        (OutputStyle::Rich, Some(badge)) => format!("{badge} {message}"),
        _ => message.to_string(),
    }
}

fn status_badge(status: &str) -> Option<&'static str> {
    match status {
        "ok" => Some("[OK]"),
        "warn" => Some("[WARN]"),
        "err" => Some("[ERR]"),
        "step" => Some("[..]"),
        _ => None,
    }
}

fn badge_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "warn" => AnsiColor::BrightYellow,
        "err" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

/// `(status, message)` pairs describing an apply run.
pub(crate) fn apply_outcome_lines(
    handle: &str,
    outcome: &ApplyOutcome,
) -> Vec<(&'static str, String)> {
    match outcome {
        ApplyOutcome::Committed { txid, applied } => vec![(
            "ok",
            format!("updated {handle} (txid={txid} applied={applied})"),
        )],
        ApplyOutcome::RolledBack {
            txid,
            reason,
            report,
        } => {
            let mut lines = vec![(
                "err",
                format!("update of {handle} failed (txid={txid}): {reason}"),
            )];
            lines.extend(rollback_report_lines(report));
            lines
        }
    }
}

pub(crate) fn rollback_report_lines(report: &RollbackReport) -> Vec<(&'static str, String)> {
    let mut lines = Vec::with_capacity(1 + report.failures.len());
    let summary = format!(
        "rolled back (restored={} skipped={} failed={})",
        report.restored.len(),
        report.skipped,
        report.failures.len()
    );
    lines.push((if report.is_clean() { "ok" } else { "warn" }, summary));
    for failure in &report.failures {
        lines.push(("err", format!("restore failed: {failure}")));
    }
    lines
}

pub(crate) fn format_directive(directive: &Directive) -> String {
    match directive {
        Directive::VersionMarker { version } => format!("version {version}"),
        Directive::MigrationReference { line } => format!("  migration {line}"),
        Directive::FileChange(change) => {
            let (path, kind) = change.target();
            let inert = if change.action == FileAction::Add {
                ""
            } else {
                " (ignored)"
            };
            format!(
                "  {} {} {path}{inert}",
                change.action.as_str(),
                kind.as_str()
            )
        }
    }
}

pub(crate) fn format_transaction_line(metadata: &TransactionMetadata) -> String {
    format!(
        "transaction {} handle={} status={} started_at={}",
        metadata.txid,
        metadata.handle,
        metadata.status.as_str(),
        metadata.started_at_unix
    )
}
