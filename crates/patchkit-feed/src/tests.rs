use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use patchkit_core::ProvisionError;
use semver::Version;

use super::*;

#[test]
fn parses_simple_package_file_name() {
    let parsed = parse_package_file_name("Foo.1.0.0.nupkg").expect("must parse");
    assert_eq!(parsed.id, "Foo");
    assert_eq!(parsed.version, Version::new(1, 0, 0));
    assert!(!parsed.symbols);
}

#[test]
fn parses_dotted_id_with_prerelease_version() {
    let parsed =
        parse_package_file_name("NuGet.Build.Tasks.5.3.0-rtm.6251.nupkg").expect("must parse");
    assert_eq!(parsed.id, "NuGet.Build.Tasks");
    assert_eq!(parsed.version.to_string(), "5.3.0-rtm.6251");
}

#[test]
fn parses_symbols_suffix() {
    let parsed = parse_package_file_name("Foo.1.0.0.symbols.nupkg").expect("must parse");
    assert_eq!(parsed.id, "Foo");
    assert_eq!(parsed.version, Version::new(1, 0, 0));
    assert!(parsed.symbols);
}

#[test]
fn parses_four_part_version_as_build_metadata() {
    let parsed = parse_package_file_name("Legacy.Lib.1.2.3.4.nupkg").expect("must parse");
    assert_eq!(parsed.id, "Legacy.Lib");
    assert_eq!(parsed.version.to_string(), "1.2.3+r4");
}

#[test]
fn parses_short_versions() {
    assert_eq!(parse_package_version("2"), Some(Version::new(2, 0, 0)));
    assert_eq!(parse_package_version("2.1"), Some(Version::new(2, 1, 0)));
    assert_eq!(
        parse_package_version("2.1-beta").map(|v| v.to_string()),
        Some("2.1.0-beta".to_string())
    );
    assert_eq!(parse_package_version("1.2.3.4.5"), None);
    assert_eq!(parse_package_version("abc"), None);
}

#[test]
fn rejects_non_package_file_names() {
    assert!(parse_package_file_name("Foo.1.0.0.zip").is_none());
    assert!(parse_package_file_name("Foo.nupkg").is_none());
    assert!(parse_package_file_name("Foo.v1.nupkg").is_none());
}

#[test]
fn symbols_package_is_never_most_recent() {
    let root = test_feed_root();
    let base = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    write_package(&root, "Foo.1.0.0.nupkg", base);
    write_package(
        &root,
        "Foo.1.0.0.symbols.nupkg",
        base + Duration::from_secs(3600),
    );

    let feed = PackageFeed::open(&root);
    let resolved = feed.find_most_recent("Foo").expect("must resolve Foo");
    assert_eq!(resolved.path, root.join("Foo.1.0.0.nupkg"));
    assert!(!resolved.symbols);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn most_recent_prefers_latest_write_time_over_version() {
    let root = test_feed_root();
    let base = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    write_package(&root, "NuGet.Common.6.0.0.nupkg", base);
    write_package(
        &root,
        "NuGet.Common.5.9.0-dev.nupkg",
        base + Duration::from_secs(60),
    );
    write_package(
        &root,
        "NuGet.Commands.7.0.0.nupkg",
        base + Duration::from_secs(120),
    );

    let feed = PackageFeed::open(&root);
    let resolved = feed
        .find_most_recent("nuget.common")
        .expect("id match must ignore case");
    assert_eq!(resolved.id, "NuGet.Common");
    assert_eq!(resolved.version.to_string(), "5.9.0-dev");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn missing_package_reports_artifact_not_found() {
    let root = test_feed_root();
    write_package(
        &root,
        "Foo.1.0.0.symbols.nupkg",
        UNIX_EPOCH + Duration::from_secs(1_700_000_000),
    );

    let err = PackageFeed::open(&root)
        .find_most_recent("Foo")
        .expect_err("symbols-only feed must not resolve");
    match err {
        ProvisionError::ArtifactNotFound { package_id, feed } => {
            assert_eq!(package_id, "Foo");
            assert_eq!(feed, root);
        }
        other => panic!("unexpected error: {other}"),
    }

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn list_packages_skips_directories_and_unrelated_files() {
    let root = test_feed_root();
    let stamp = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    write_package(&root, "Foo.1.0.0.nupkg", stamp);
    write_package(&root, "Bar.2.0.0.nupkg", stamp);
    fs::write(root.join("readme.txt"), "not a package").expect("must write file");
    fs::create_dir_all(root.join("Nested.1.0.0.nupkg")).expect("must create dir");

    let packages = PackageFeed::open(&root)
        .list_packages()
        .expect("must list packages");
    let ids = packages
        .iter()
        .map(|package| package.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["Bar", "Foo"]);
    assert_eq!(packages[0].last_write_time, stamp);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn unreadable_feed_reports_feed_error() {
    let parent = test_feed_root();
    let err = PackageFeed::open(parent.join("missing"))
        .list_packages()
        .expect_err("missing feed must fail");
    assert!(matches!(err, ProvisionError::FeedRead { .. }));

    let _ = fs::remove_dir_all(&parent);
}

#[test]
fn nuspec_identity_wins_over_ambiguous_file_name() {
    let root = test_feed_root();
    let base = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    write_nupkg(&root, "Foo.1.5.0.nupkg", "Foo", "1.5.0", base);
    write_nupkg(
        &root,
        "Foo.2.1.0.0.nupkg",
        "Foo.2",
        "1.0.0",
        base + Duration::from_secs(60),
    );

    let feed = PackageFeed::open(&root);
    let numbered = feed
        .find_most_recent("Foo.2")
        .expect("id with a numeric segment must resolve");
    assert_eq!(numbered.path, root.join("Foo.2.1.0.0.nupkg"));
    assert_eq!(numbered.version, Version::new(1, 0, 0));

    let plain = feed.find_most_recent("Foo").expect("must resolve Foo");
    assert_eq!(plain.path, root.join("Foo.1.5.0.nupkg"));
    assert_eq!(plain.version, Version::new(1, 5, 0));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn symbols_flag_comes_from_file_name_even_with_nuspec() {
    let root = test_feed_root();
    let base = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    write_nupkg(&root, "Foo.1.0.0.nupkg", "Foo", "1.0.0", base);
    write_nupkg(
        &root,
        "Foo.1.0.0.symbols.nupkg",
        "Foo",
        "1.0.0",
        base + Duration::from_secs(60),
    );

    let resolved = PackageFeed::open(&root)
        .find_most_recent("Foo")
        .expect("must resolve Foo");
    assert_eq!(resolved.path, root.join("Foo.1.0.0.nupkg"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn nuspec_identity_reads_metadata_elements_only() {
    let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata minClientVersion="3.3.0">
    <identity>ignored</identity>
    <id>Acme.Tools &amp; More</id>
    <version>5.3.0-rtm.6251</version>
    <dependencies>
      <dependency id="Other" version="9.9.9" />
    </dependencies>
  </metadata>
</package>"#;
    let identity = parse_nuspec_identity(xml).expect("must parse nuspec");
    assert_eq!(identity.id, "Acme.Tools & More");
    assert_eq!(identity.version.to_string(), "5.3.0-rtm.6251");

    assert!(parse_nuspec_identity("<package><metadata><id>Foo</id></metadata></package>").is_none());
    assert!(parse_nuspec_identity("<package><metadata><id> </id><version>1.0.0</version></metadata></package>").is_none());
}

#[test]
fn symbols_detection_ignores_case() {
    assert!(is_symbols_package("Foo.1.0.0.Symbols.NUPKG"));
    assert!(!is_symbols_package("Foo.symbols.1.0.0.nupkg"));
    assert!(!is_symbols_package("Foo.1.0.0.symbols.zip"));
}

fn write_nupkg(root: &Path, file_name: &str, id: &str, version: &str, modified: SystemTime) {
    let path = root.join(file_name);
    let file = fs::File::create(&path).expect("must create package");
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    writer
        .start_file(format!("{id}.nuspec"), options)
        .expect("must start nuspec");
    write!(
        writer,
        "<?xml version=\"1.0\"?><package><metadata><id>{id}</id><version>{version}</version></metadata></package>"
    )
    .expect("must write nuspec");
    writer
        .start_file("lib/netstandard2.1/Foo.dll", options)
        .expect("must start entry");
    writer.write_all(b"dll").expect("must write entry");
    let file = writer.finish().expect("must finish package");
    file.set_modified(modified).expect("must set mtime");
}

fn write_package(root: &Path, file_name: &str, modified: SystemTime) {
    let path = root.join(file_name);
    fs::write(&path, b"PK").expect("must write package");
    let file = fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .expect("must open package");
    file.set_modified(modified).expect("must set mtime");
}

fn test_feed_root() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "patchkit-feed-tests-{}-{nanos}-{sequence}",
        std::process::id()
    ));
    fs::create_dir_all(&root).expect("must create feed root");
    root
}
