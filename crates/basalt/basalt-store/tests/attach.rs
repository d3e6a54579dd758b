//! Out-of-process readers refuse regions whose layout they cannot trust.

use basalt_events::OhlcvRow;
use basalt_store::{RingConfig, RingStoreReader, RingStoreWriter, StoreError};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

fn write_region(dir: &Path) -> PathBuf {
    let path = dir.join("region");
    let mut w = RingStoreWriter::create(&path, &["AAPL", "MSFT"], RingConfig::new(8)).unwrap();
    w.append("MSFT", OhlcvRow::flat(42, 1.5, 7)).unwrap();
    path
}

fn patch(path: &Path, offset: u64, bytes: &[u8]) {
    let mut f = OpenOptions::new().write(true).open(path).unwrap();
    f.seek(SeekFrom::Start(offset)).unwrap();
    f.write_all(bytes).unwrap();
}

fn assert_layout_error(path: &Path) {
    match RingStoreReader::attach(path) {
        Err(StoreError::Layout(_)) => {}
        Err(other) => panic!("expected a layout error, got {other}"),
        Ok(_) => panic!("attach accepted a bad region"),
    }
}

#[test]
fn attach_sees_what_the_writer_wrote() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_region(dir.path());

    let r = RingStoreReader::attach(&path).unwrap();
    let names: Vec<&str> = r.tickers().iter().map(|t| t.as_str()).collect();
    assert_eq!(names, ["AAPL", "MSFT"]);
    assert_eq!(r.capacity(), 8);
    assert_eq!(r.latest("MSFT").unwrap(), Some(OhlcvRow::flat(42, 1.5, 7)));
    assert_eq!(r.latest("AAPL").unwrap(), None);
}

#[test]
fn wrong_magic_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_region(dir.path());
    patch(&path, 0, &0u64.to_ne_bytes());
    assert_layout_error(&path);
}

#[test]
fn wrong_layout_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_region(dir.path());
    patch(&path, 8, &99u32.to_ne_bytes());
    assert_layout_error(&path);
}

#[test]
fn tampered_directory_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_region(dir.path());
    // offset field of the first directory entry
    patch(&path, 56 + 16, &8u64.to_ne_bytes());
    assert_layout_error(&path);
}

#[test]
fn truncated_region_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_region(dir.path());
    OpenOptions::new().write(true).open(&path).unwrap().set_len(32).unwrap();
    assert_layout_error(&path);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RingStoreReader::attach(dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, StoreError::Io(_)));
}
