//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Archive format tests - create and extract through the library

use crate::common::*;
use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tarball::fs::FileSystem;
use tarball::modes::{
    append_to_archive, create_archive, create_archive_bytes, extract_archive, list_archive,
    AppendOptions, CreateOptions, ExtractOptions, ListOptions,
};
use tarball::{ArchiveFormat, EntryType, LocalFs, Timestamp};
use tempfile::TempDir;

fn operands(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}

fn create(src: &Path, names: &[&str], format: ArchiveFormat) -> Vec<u8> {
    let options = CreateOptions {
        format,
        ..Default::default()
    };
    create_archive_bytes(&operands(names), src, &LocalFs, &options).unwrap()
}

fn member_names(archive: &[u8]) -> Vec<String> {
    list_archive(Cursor::new(archive.to_vec()), &ListOptions::default())
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect()
}

fn roundtrip(format: ArchiveFormat) {
    let temp = TempDir::new().unwrap();
    let src_dir = temp.path().join("source");
    let dst_dir = temp.path().join("dest");
    fs::create_dir(&src_dir).unwrap();
    fs::create_dir(&dst_dir).unwrap();
    create_test_files(&src_dir);

    let archive = create(&src_dir, &["file.txt", "subdir", "link.txt"], format);
    assert_eq!(archive.len() % 10240, 0, "{format}: archive not record aligned");
    assert_eq!(
        member_names(&archive),
        vec!["file.txt", "subdir/", "subdir/nested.txt", "link.txt"],
        "{format}"
    );

    let entries = list_archive(Cursor::new(archive.clone()), &ListOptions::default()).unwrap();
    // pax headers are only written where needed, so posix members may
    // read back as plain ustar
    assert!(
        entries.iter().all(|e| e.format == format
            || (format == ArchiveFormat::Posix && e.format == ArchiveFormat::Ustar)),
        "{format}"
    );

    let report = extract_archive(
        Cursor::new(archive),
        &dst_dir,
        &LocalFs,
        &ExtractOptions::default(),
    )
    .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.entries.len(), 4);
    verify_files_match(&src_dir, &dst_dir);
}

#[test]
fn test_ustar_roundtrip() {
    roundtrip(ArchiveFormat::Ustar);
}

#[test]
fn test_posix_roundtrip() {
    roundtrip(ArchiveFormat::Posix);
}

#[test]
fn test_gnu_roundtrip() {
    roundtrip(ArchiveFormat::Gnu);
}

#[test]
fn test_star_roundtrip() {
    roundtrip(ArchiveFormat::Star);
}

#[test]
fn test_v7_roundtrip() {
    roundtrip(ArchiveFormat::V7);
}

/// A path too long for the ustar name and prefix fields
fn make_long_path(root: &Path) -> String {
    let parts: Vec<String> = (0..6).map(|i| format!("{}{}", "d".repeat(48), i)).collect();
    let dir = parts.join("/");
    fs::create_dir_all(root.join(&dir)).unwrap();
    let rel = format!("{}/file.txt", dir);
    fs::write(root.join(&rel), b"deep").unwrap();
    rel
}

#[test]
fn test_long_names_use_extension_records() {
    let temp = TempDir::new().unwrap();
    let src_dir = temp.path().join("source");
    fs::create_dir(&src_dir).unwrap();
    let long = make_long_path(&src_dir);
    assert!(long.len() > 256);

    for format in [
        ArchiveFormat::Ustar,
        ArchiveFormat::Posix,
        ArchiveFormat::Gnu,
        ArchiveFormat::Star,
    ] {
        let archive = create(&src_dir, &[long.as_str()], format);
        assert_eq!(member_names(&archive), vec![long.clone()], "{format}");

        let dst_dir = temp.path().join(format!("dest-{format}"));
        fs::create_dir(&dst_dir).unwrap();
        extract_archive(
            Cursor::new(archive),
            &dst_dir,
            &LocalFs,
            &ExtractOptions::default(),
        )
        .unwrap();
        assert_eq!(fs::read(dst_dir.join(&long)).unwrap(), b"deep");
    }
}

#[test]
fn test_v7_skips_names_that_do_not_fit() {
    let temp = TempDir::new().unwrap();
    let src_dir = temp.path().join("source");
    fs::create_dir(&src_dir).unwrap();
    let long = make_long_path(&src_dir);
    fs::write(src_dir.join("short.txt"), b"ok").unwrap();

    let archive = create(&src_dir, &[long.as_str(), "short.txt"], ArchiveFormat::V7);
    assert_eq!(member_names(&archive), vec!["short.txt"]);
}

#[test]
fn test_hard_links_roundtrip() {
    let temp = TempDir::new().unwrap();
    let src_dir = temp.path().join("source");
    let dst_dir = temp.path().join("dest");
    fs::create_dir(&src_dir).unwrap();
    fs::create_dir(&dst_dir).unwrap();
    fs::write(src_dir.join("a"), b"shared").unwrap();
    fs::hard_link(src_dir.join("a"), src_dir.join("b")).unwrap();

    let archive = create(&src_dir, &["a", "b"], ArchiveFormat::Ustar);
    let entries = list_archive(Cursor::new(archive.clone()), &ListOptions::default()).unwrap();
    assert_eq!(entries[1].entry_type, EntryType::HardLink);
    assert_eq!(entries[1].link_name, "a");
    assert_eq!(entries[1].size, 0);

    extract_archive(
        Cursor::new(archive),
        &dst_dir,
        &LocalFs,
        &ExtractOptions::default(),
    )
    .unwrap();
    let a = fs::metadata(dst_dir.join("a")).unwrap();
    let b = fs::metadata(dst_dir.join("b")).unwrap();
    assert_eq!(a.ino(), b.ino());
    assert_eq!(fs::read(dst_dir.join("b")).unwrap(), b"shared");
}

#[test]
fn test_append_to_archive_file() {
    let temp = TempDir::new().unwrap();
    let src_dir = temp.path().join("source");
    let archive_path = temp.path().join("test.tar");
    fs::create_dir(&src_dir).unwrap();
    fs::write(src_dir.join("one"), b"1").unwrap();
    fs::write(src_dir.join("two"), b"2").unwrap();

    let file = File::create(&archive_path).unwrap();
    create_archive(
        file,
        &operands(&["one"]),
        &src_dir,
        &LocalFs,
        &CreateOptions::default(),
    )
    .unwrap();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&archive_path)
        .unwrap();
    append_to_archive(
        file,
        &operands(&["two"]),
        &src_dir,
        &LocalFs,
        &AppendOptions::default(),
    )
    .unwrap();

    let archive = fs::read(&archive_path).unwrap();
    assert_eq!(archive.len() % 10240, 0);
    assert_eq!(member_names(&archive), vec!["one", "two"]);
}

#[test]
fn test_update_only_adds_newer_files() {
    let temp = TempDir::new().unwrap();
    let src_dir = temp.path().join("source");
    let archive_path = temp.path().join("test.tar");
    fs::create_dir(&src_dir).unwrap();
    fs::write(src_dir.join("same"), b"s").unwrap();
    fs::write(src_dir.join("changed"), b"c").unwrap();

    let file = File::create(&archive_path).unwrap();
    create_archive(
        file,
        &operands(&["same", "changed"]),
        &src_dir,
        &LocalFs,
        &CreateOptions::default(),
    )
    .unwrap();

    let later = Timestamp::from_secs(4_000_000_000);
    LocalFs
        .set_times(&src_dir.join("changed"), later, later, true)
        .unwrap();
    let mut f = OpenOptions::new()
        .append(true)
        .open(src_dir.join("changed"))
        .unwrap();
    f.write_all(b"hanged").unwrap();
    drop(f);
    LocalFs
        .set_times(&src_dir.join("changed"), later, later, true)
        .unwrap();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&archive_path)
        .unwrap();
    let options = AppendOptions {
        update: true,
        ..Default::default()
    };
    append_to_archive(
        file,
        &operands(&["same", "changed"]),
        &src_dir,
        &LocalFs,
        &options,
    )
    .unwrap();

    let archive = fs::read(&archive_path).unwrap();
    assert_eq!(member_names(&archive), vec!["same", "changed", "changed"]);
}
