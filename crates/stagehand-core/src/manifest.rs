use std::path::{Path, PathBuf};

use thiserror::Error;

pub const VERSION_MARKER_PREFIX: &str = "##";
pub const MIGRATIONS_SEGMENT: &str = "migrations/";
pub const FOLDER_MARKER: char = '*';
const FIELD_SEPARATOR: char = ';';

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid manifest line {line}: {reason}")]
    Format { line: usize, reason: String },
    #[error("failed to read manifest {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ManifestError {
    fn format(line: usize, reason: impl Into<String>) -> Self {
        Self::Format {
            line,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAction {
    Add,
    /// Action codes this applier does not know. Accepted and left inert.
    Other(String),
}

impl FileAction {
    pub fn parse(code: &str) -> Self {
        match code.trim() {
            "add" => Self::Add,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Add => "add",
            Self::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Folder,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Path exactly as written in the manifest, folder marker included.
    pub path: String,
    pub action: FileAction,
}

impl FileChange {
    pub fn kind(&self) -> EntryKind {
        if is_folder_directive(&self.path) {
            EntryKind::Folder
        } else {
            EntryKind::File
        }
    }

    pub fn relative_path(&self) -> &str {
        match self.kind() {
            EntryKind::Folder => clean_folder_path(&self.path),
            EntryKind::File => &self.path,
        }
    }

    /// The cleaned relative path and entry kind. Apply and rollback both
    /// resolve directives through here.
    pub fn target(&self) -> (&str, EntryKind) {
        (self.relative_path(), self.kind())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    VersionMarker { version: String },
    MigrationReference { line: String },
    FileChange(FileChange),
}

impl Directive {
    pub fn as_file_change(&self) -> Option<&FileChange> {
        match self {
            Self::FileChange(change) => Some(change),
            _ => None,
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            Self::VersionMarker { version } => Some(version),
            _ => None,
        }
    }
}

pub fn parse_manifest(raw: &str) -> Result<Vec<Directive>, ManifestError> {
    let mut lines = raw.split('\n').map(str::trim).collect::<Vec<_>>();
    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines
        .into_iter()
        .enumerate()
        .map(|(index, line)| parse_line(line, index + 1))
        .collect()
}

/// Like [`parse_manifest`], but the first non-empty line must be a version
/// marker so that the result can be sliced by local version.
pub fn parse_anchored_manifest(raw: &str) -> Result<Vec<Directive>, ManifestError> {
    let first = raw
        .split('\n')
        .map(str::trim)
        .enumerate()
        .find(|(_, line)| !line.is_empty());
    match first {
        Some((_, line)) if is_version_marker(line) => {}
        Some((index, line)) => {
            return Err(ManifestError::format(
                index + 1,
                format!("manifest must start with a version marker, found '{line}'"),
            ));
        }
        None => return Err(ManifestError::format(1, "manifest is empty")),
    }
    parse_manifest(raw)
}

pub fn parse_line(line: &str, line_no: usize) -> Result<Directive, ManifestError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ManifestError::format(line_no, "empty line"));
    }

    if is_version_marker(line) {
        let version = marker_version(line).ok_or_else(|| {
            ManifestError::format(
                line_no,
                format!("version marker must look like '##<version>;': {line}"),
            )
        })?;
        return Ok(Directive::VersionMarker {
            version: version.to_string(),
        });
    }

    if is_migration_reference(line) {
        return Ok(Directive::MigrationReference {
            line: line.to_string(),
        });
    }

    let mut fields = line.split(FIELD_SEPARATOR);
    let path = fields.next().unwrap_or_default().trim();
    let Some(code) = fields.next() else {
        return Err(ManifestError::format(
            line_no,
            format!("file change must look like '<path>;<action>': {line}"),
        ));
    };

    let change = FileChange {
        path: path.to_string(),
        action: FileAction::parse(code),
    };
    validate_relative_path(change.relative_path())
        .map_err(|reason| ManifestError::format(line_no, reason))?;
    if is_folder_directive(change.relative_path()) {
        return Err(ManifestError::format(
            line_no,
            format!("folder path must end in a single '{FOLDER_MARKER}': {path}"),
        ));
    }

    Ok(Directive::FileChange(change))
}

pub fn is_version_marker(line: &str) -> bool {
    line.starts_with(VERSION_MARKER_PREFIX)
}

/// Version carried by a `##<version>;...` line, if the line is well formed.
pub fn marker_version(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(VERSION_MARKER_PREFIX)?;
    let (version, _) = rest.split_once(FIELD_SEPARATOR)?;
    let version = version.trim();
    (!version.is_empty()).then_some(version)
}

pub fn is_migration_reference(line: &str) -> bool {
    line.contains(MIGRATIONS_SEGMENT)
}

pub fn is_folder_directive(path: &str) -> bool {
    path.ends_with(FOLDER_MARKER)
}

/// Drops one trailing folder marker, then the separators before it. Paths
/// without the marker come back unchanged.
pub fn clean_folder_path(path: &str) -> &str {
    match path.strip_suffix(FOLDER_MARKER) {
        Some(folder) => folder.trim_end_matches(['/', '\\']),
        None => path,
    }
}

/// Version of the leading marker, i.e. the release the manifest starts from.
pub fn baseline_version(directives: &[Directive]) -> Option<&str> {
    directives.first().and_then(Directive::version)
}

fn validate_relative_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("file change path must not be empty".to_string());
    }
    if path.starts_with('/') || path.starts_with('\\') || Path::new(path).is_absolute() {
        return Err(format!("file change path must be relative: {path}"));
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(format!("file change path must not include '..': {path}"));
    }
    Ok(())
}
