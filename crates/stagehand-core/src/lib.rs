mod cursor;
mod handle;
mod manifest;

pub use cursor::{
    cursor_offset, manifest_path, slice_from_local_version, LocalVersionSource, ManifestCache,
    StaticVersions,
};
pub use handle::{Handle, APP_HANDLE};
pub use manifest::{
    baseline_version, clean_folder_path, is_folder_directive, is_migration_reference,
    is_version_marker, marker_version, parse_anchored_manifest, parse_line, parse_manifest,
    Directive, EntryKind, FileAction, FileChange, ManifestError, FOLDER_MARKER, MIGRATIONS_SEGMENT,
    VERSION_MARKER_PREFIX,
};

#[cfg(test)]
mod tests;
