use std::fs;

use pagekeep_engine::{ensure_output_dir, AtomicFileWriter, PersistError};
use tempfile::TempDir;

#[test]
fn creates_missing_output_dir() {
    let temp = TempDir::new().unwrap();
    let new_dir = temp.path().join("archive");
    assert!(!new_dir.exists());
    ensure_output_dir(&new_dir).unwrap();
    assert!(new_dir.is_dir());
}

#[test]
fn atomic_write_creates_parents_and_replaces_existing() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write("assets/logo.png", b"first").unwrap();
    assert_eq!(first, temp.path().join("assets").join("logo.png"));
    assert_eq!(fs::read(&first).unwrap(), b"first");

    let second = writer.write("assets/logo.png", b"second").unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read(&second).unwrap(), b"second");
}

#[test]
fn rejects_paths_escaping_the_root() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().join("root"));
    for path in ["../evil.html", "a/../../evil.html", "", "./page.html"] {
        assert!(
            matches!(writer.write(path, b"x"), Err(PersistError::InvalidPath(_))),
            "{path:?} should be rejected"
        );
    }
    assert!(!temp.path().join("evil.html").exists());
}

#[test]
fn no_partial_file_on_error() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("not_a_dir");
    fs::write(&file_path, "x").unwrap();

    let writer = AtomicFileWriter::new(file_path.clone());
    let result = writer.write("page.html", b"data");
    assert!(result.is_err());
    assert!(!file_path.with_file_name("page.html").exists());
}
