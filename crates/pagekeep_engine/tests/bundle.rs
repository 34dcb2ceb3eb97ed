use std::fs;
use std::path::Path;

use pagekeep_engine::{pack_directory, pack_file, unpack, BundleError, BundleLimits};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Deterministic incompressible bytes.
fn noise(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

fn build_archive(dir: &Path) {
    fs::create_dir_all(dir.join("assets/nested")).unwrap();
    fs::write(dir.join("page.html"), "<html><body>hi</body></html>").unwrap();
    fs::write(dir.join("reader.html"), "").unwrap();
    fs::write(dir.join("assets/photo.jpg"), noise(256 * 1024)).unwrap();
    fs::write(dir.join("assets/nested/font.woff2"), b"wOF2").unwrap();
    fs::write(dir.join(".DS_Store"), b"junk").unwrap();
}

#[test]
fn directory_round_trips_byte_for_byte() {
    let source = TempDir::new().unwrap();
    build_archive(source.path());

    let bundle = pack_directory(source.path(), BundleLimits::default()).unwrap();
    let target = TempDir::new().unwrap();
    let report = unpack(&bundle, target.path(), BundleLimits::default()).unwrap();

    assert_eq!(
        report.written,
        vec![
            "assets/nested/font.woff2".to_string(),
            "assets/photo.jpg".to_string(),
            "page.html".to_string(),
            "reader.html".to_string(),
        ]
    );
    assert!(report.failed.is_empty());
    for name in [
        "page.html",
        "reader.html",
        "assets/photo.jpg",
        "assets/nested/font.woff2",
    ] {
        assert_eq!(
            fs::read(target.path().join(name)).unwrap(),
            fs::read(source.path().join(name)).unwrap(),
            "{name} differs"
        );
    }
    assert!(!target.path().join(".DS_Store").exists());
}

#[test]
fn empty_directory_cannot_be_bundled() {
    let source = TempDir::new().unwrap();
    fs::write(source.path().join(".hidden"), b"x").unwrap();
    let err = pack_directory(source.path(), BundleLimits::default()).unwrap_err();
    assert!(matches!(err, BundleError::Empty(_)));
}

#[test]
fn single_document_bundle_restores_under_its_name() {
    let source = TempDir::new().unwrap();
    let doc = source.path().join("paper.pdf");
    fs::write(&doc, b"%PDF-1.7 body").unwrap();

    let bundle = pack_file(&doc, BundleLimits::default()).unwrap();
    let target = TempDir::new().unwrap();
    unpack(&bundle, target.path(), BundleLimits::default()).unwrap();

    assert_eq!(
        fs::read(target.path().join("paper.pdf")).unwrap(),
        b"%PDF-1.7 body"
    );
}

#[test]
fn corrupt_bundle_writes_nothing() {
    let source = TempDir::new().unwrap();
    build_archive(source.path());
    let mut bundle = pack_directory(source.path(), BundleLimits::default()).unwrap();
    let last = bundle.len() - 1;
    bundle.truncate(last / 2);

    let target = TempDir::new().unwrap();
    let out = target.path().join("restore");
    assert!(unpack(&bundle, &out, BundleLimits::default()).is_err());
    assert!(!out.exists());
}

#[test]
fn bundles_above_the_limit_are_refused() {
    let source = TempDir::new().unwrap();
    build_archive(source.path());
    let limits = BundleLimits {
        max_uncompressed_bytes: 1024,
    };
    let err = pack_directory(source.path(), limits).unwrap_err();
    assert!(matches!(err, BundleError::BadLength { max: 1024, .. }));

    let bundle = pack_directory(source.path(), BundleLimits::default()).unwrap();
    let target = TempDir::new().unwrap();
    let err = unpack(&bundle, target.path(), limits).unwrap_err();
    assert!(matches!(err, BundleError::BadLength { .. }));
}
