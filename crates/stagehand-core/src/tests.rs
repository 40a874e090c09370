use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use super::*;

const SAMPLE_MANIFEST: &str = "##1.0.0;1.0.0.2501\napp/Config.php;add\nwidgets/*;add\nmigrations/m1.php;add\n##1.1.0;1.1.0.2610\ntemplates/index.html;add\nREADME.md;remove\n";

#[test]
fn parse_manifest_classifies_each_line() {
    let directives = parse_manifest(SAMPLE_MANIFEST).expect("manifest should parse");
    assert_eq!(directives.len(), 7);
    assert_eq!(
        directives[0],
        Directive::VersionMarker {
            version: "1.0.0".to_string()
        }
    );
    assert_eq!(
        directives[1],
        Directive::FileChange(FileChange {
            path: "app/Config.php".to_string(),
            action: FileAction::Add,
        })
    );
    let folder = directives[2].as_file_change().expect("folder change");
    assert_eq!(folder.target(), ("widgets", EntryKind::Folder));
    assert!(matches!(
        directives[3],
        Directive::MigrationReference { .. }
    ));
    assert_eq!(directives[4].version(), Some("1.1.0"));
    assert_eq!(
        directives[6].as_file_change().expect("file change").action,
        FileAction::Other("remove".to_string())
    );
}

#[test]
fn parse_manifest_trims_lines_and_drops_single_trailing_blank() {
    let raw = "  ##2.0.0;x  \r\n  lib/a.rs ; add \r\n";
    let directives = parse_manifest(raw).expect("manifest should parse");
    assert_eq!(directives.len(), 2);
    let change = directives[1].as_file_change().expect("file change");
    assert_eq!(change.path, "lib/a.rs");
    assert_eq!(change.action, FileAction::Add);
}

#[test]
fn parse_manifest_of_empty_input_is_empty() {
    assert!(parse_manifest("").expect("empty parses").is_empty());
    assert!(parse_manifest("\n\n").is_err(), "only one trailing blank is dropped");
}

#[test]
fn parse_manifest_rejects_interior_blank_line() {
    let err = parse_manifest("##1.0.0;\n\nfoo.txt;add\n").expect_err("blank line must fail");
    assert!(matches!(err, ManifestError::Format { line: 2, .. }));
}

#[test]
fn parse_manifest_rejects_line_without_action() {
    let err = parse_manifest("##1.0.0;\nfoo.txt\n").expect_err("missing action must fail");
    match err {
        ManifestError::Format { line, reason } => {
            assert_eq!(line, 2);
            assert!(reason.contains("<path>;<action>"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn parse_manifest_rejects_marker_without_separator() {
    let err = parse_manifest("##1.0.0\n").expect_err("malformed marker must fail");
    assert!(matches!(err, ManifestError::Format { line: 1, .. }));
}

#[test]
fn parse_manifest_rejects_escaping_paths() {
    for raw in ["../etc/passwd;add", "/etc/passwd;add", "a/../../b/*;add", "*;add"] {
        let err = parse_manifest(raw).expect_err("escaping path must fail");
        assert!(
            matches!(err, ManifestError::Format { line: 1, .. }),
            "unexpected result for {raw}: {err}"
        );
    }
}

#[test]
fn parse_anchored_manifest_requires_leading_marker() {
    let err = parse_anchored_manifest("foo.txt;add\n##1.0.0;\n").expect_err("must fail");
    assert!(err.to_string().contains("version marker"));

    let err = parse_anchored_manifest("\n\n").expect_err("empty manifest must fail");
    assert!(err.to_string().contains("empty"));

    let directives = parse_anchored_manifest("##1.0.0;\nfoo.txt;add\n").expect("must parse");
    assert_eq!(baseline_version(&directives), Some("1.0.0"));
}

#[test]
fn baseline_version_is_none_without_leading_marker() {
    let directives = parse_manifest("foo.txt;add\n").expect("must parse");
    assert_eq!(baseline_version(&directives), None);
}

#[test]
fn predicates_are_total_over_malformed_input() {
    for input in ["", ";", "#", "##", "***", "/", "\u{1F600}", "migrations", " ; ; "] {
        let _ = is_version_marker(input);
        let _ = is_migration_reference(input);
        let _ = is_folder_directive(input);
        let _ = clean_folder_path(input);
        let _ = marker_version(input);
    }
    assert!(is_version_marker("##"));
    assert_eq!(marker_version("##"), None);
    assert_eq!(marker_version("##;"), None);
    assert_eq!(marker_version("##3.1.4;build"), Some("3.1.4"));
    assert!(is_migration_reference("plugins/x/migrations/m1.php;add"));
    assert!(!is_migration_reference("migrations.md;add"));
}

#[test]
fn folder_directive_detection_and_cleaning() {
    assert!(is_folder_directive("widgets/*"));
    assert!(is_folder_directive("widgets*"));
    assert!(!is_folder_directive("widgets/"));
    assert!(!is_folder_directive("widgets/*.php"));

    assert_eq!(clean_folder_path("widgets/*"), "widgets");
    assert_eq!(clean_folder_path("widgets\\*"), "widgets");
    assert_eq!(clean_folder_path("a/b/c/*"), "a/b/c");
    assert_eq!(clean_folder_path("plain.txt"), "plain.txt");
    assert_eq!(clean_folder_path("widgets/"), "widgets/");
    assert_eq!(clean_folder_path(""), "");
    assert_eq!(clean_folder_path("a/*/*"), "a/*");
    assert_eq!(clean_folder_path("a/**"), "a/*");
    assert_eq!(clean_folder_path("deep/tree//*"), "deep/tree");
}

#[test]
fn parse_manifest_rejects_stacked_folder_markers() {
    for raw in ["##1.0.0;\na/*/*;add\n", "##1.0.0;\na/**;add\n", "##1.0.0;\n*;add\n"] {
        let err = parse_manifest(raw).expect_err("stacked or bare marker must fail");
        assert!(
            matches!(err, ManifestError::Format { line: 2, .. }),
            "unexpected error for {raw:?}: {err}"
        );
    }
}

#[test]
fn clean_folder_path_is_idempotent_for_parsed_paths() {
    let raw = "##1.0.0;\nwidgets/*;add\nwidgets\\*;add\ndeep/tree//*;add\nx.txt;add\n";
    for directive in parse_manifest(raw).expect("manifest should parse") {
        let Some(change) = directive.as_file_change() else {
            continue;
        };
        let once = change.relative_path();
        assert_eq!(clean_folder_path(once), once, "not idempotent for {:?}", change.path);
    }
}

#[test]
fn slice_starts_at_first_matching_marker() {
    let directives = parse_manifest(SAMPLE_MANIFEST).expect("manifest should parse");

    let sliced = slice_from_local_version(&directives, Some("1.1.0"));
    assert_eq!(sliced.len(), 3);
    assert_eq!(sliced[0].version(), Some("1.1.0"));

    let sliced = slice_from_local_version(&directives, Some("1.0.0"));
    assert_eq!(sliced.len(), directives.len());
}

#[test]
fn slice_without_match_returns_whole_list() {
    let directives = parse_manifest(SAMPLE_MANIFEST).expect("manifest should parse");
    assert_eq!(cursor_offset(&directives, Some("0.9.0")), 0);
    assert_eq!(cursor_offset(&directives, None), 0);
    assert_eq!(
        slice_from_local_version(&directives, Some("1.1")).len(),
        directives.len(),
        "prefix of a version must not match"
    );
}

#[test]
fn slice_uses_first_of_duplicate_markers() {
    let directives =
        parse_manifest("##1.0.0;\na;add\n##2.0.0;\nb;add\n##2.0.0;\nc;add\n").expect("must parse");
    assert_eq!(cursor_offset(&directives, Some("2.0.0")), 2);
}

#[test]
fn handle_parse_and_display() {
    assert_eq!(Handle::parse("app").expect("app"), Handle::App);
    assert_eq!(Handle::parse("APP").expect("app"), Handle::App);
    assert_eq!(
        Handle::parse("Commerce").expect("plugin"),
        Handle::Plugin("commerce".to_string())
    );
    assert_eq!(Handle::Plugin("seo".to_string()).to_string(), "seo");
    assert!(Handle::parse("").is_err());
    assert!(Handle::parse("../evil").is_err());
}

#[test]
fn manifest_path_uses_handle_suffix() {
    let dir = PathBuf::from("/var/updates");
    assert_eq!(
        manifest_path(&dir, &Handle::App),
        dir.join("app_manifest")
    );
    assert_eq!(
        manifest_path(&dir, &Handle::Plugin("seo".to_string())),
        dir.join("seo_manifest")
    );
}

#[test]
fn manifest_cache_slices_and_memoizes() {
    let dir = test_dir();
    fs::create_dir_all(&dir).expect("must create dir");
    fs::write(manifest_path(&dir, &Handle::App), SAMPLE_MANIFEST).expect("must write manifest");

    let mut cache = ManifestCache::new();
    let versions = StaticVersions::new().with(Handle::App, "1.1.0");
    let loaded = cache
        .load(&dir, &Handle::App, &versions)
        .expect("must load")
        .expect("manifest exists")
        .to_vec();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded[0].version(), Some("1.1.0"));

    fs::write(manifest_path(&dir, &Handle::App), "##9.9.9;\n").expect("must rewrite manifest");
    let changed_versions = StaticVersions::new().with(Handle::App, "1.0.0");
    let again = cache
        .load(&dir, &Handle::App, &changed_versions)
        .expect("must load")
        .expect("manifest exists");
    assert_eq!(again, loaded.as_slice(), "cursor must stay fixed for the run");
    assert_eq!(cache.len(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn manifest_cache_reports_missing_manifest_without_caching() {
    let dir = test_dir();
    fs::create_dir_all(&dir).expect("must create dir");

    let mut cache = ManifestCache::new();
    let versions = StaticVersions::new();
    let handle = Handle::Plugin("seo".to_string());
    assert!(cache
        .load(&dir, &handle, &versions)
        .expect("missing manifest is not an error")
        .is_none());
    assert!(cache.is_empty());

    fs::write(manifest_path(&dir, &handle), "##1.0.0;\nseo.php;add\n").expect("must write");
    let loaded = cache
        .load(&dir, &handle, &versions)
        .expect("must load")
        .expect("manifest now exists");
    assert_eq!(loaded.len(), 2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn manifest_cache_surfaces_format_errors() {
    let dir = test_dir();
    fs::create_dir_all(&dir).expect("must create dir");
    fs::write(manifest_path(&dir, &Handle::App), "foo.txt;add\n").expect("must write");

    let mut cache = ManifestCache::new();
    let err = cache
        .load(&dir, &Handle::App, &StaticVersions::new())
        .expect_err("unanchored manifest must fail");
    assert!(matches!(err, ManifestError::Format { line: 1, .. }));

    let _ = fs::remove_dir_all(&dir);
}

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "stagehand-core-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ))
}
