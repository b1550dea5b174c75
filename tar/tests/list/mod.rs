//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! List and test mode tests

use crate::common::*;
use std::fs;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use tarball::blocked_io::{BlockWriter, ReadPipe, DEFAULT_RECORD_SIZE};
use tarball::compression::{auto_decompress, GzipWriter};
use tarball::formats::header::{Header, PAX_GHDR, PAX_XHDR, REGTYPE};
use tarball::formats::pax::write_pax_record;
use tarball::modes::{
    create_archive_bytes, format_entry, list_archive, scan_archive, CreateOptions, ListOptions,
};
use tarball::{ArchiveEntry, ArchiveFormat, EntryType, LocalFs, TarError, TarWriter};
use tempfile::TempDir;

fn names(entries: &[ArchiveEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

#[test]
fn test_list_gzip_archive() {
    let archive = archive_of(ArchiveFormat::Ustar, &[("a.txt", b"alpha"), ("b.txt", b"beta")]);
    let mut gz = GzipWriter::new(Vec::new()).unwrap();
    gz.write_all(&archive).unwrap();
    let compressed = gz.finish().unwrap();

    let stream = ReadPipe(auto_decompress(Cursor::new(compressed)).unwrap());
    let entries = list_archive(stream, &ListOptions::default()).unwrap();
    assert_eq!(names(&entries), vec!["a.txt", "b.txt"]);
}

#[test]
fn test_record_sizes() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("f"), vec![b'z'; 3000]).unwrap();

    for (record_size, expected_len) in [(512, 4608), (20 * 512, 10240), (32256, 32256)] {
        let options = CreateOptions {
            record_size,
            ..Default::default()
        };
        let archive =
            create_archive_bytes(&[PathBuf::from("f")], temp.path(), &LocalFs, &options).unwrap();
        // header + 6 data blocks + 2 end blocks, rounded up to a record
        assert_eq!(archive.len(), expected_len, "record size {record_size}");

        // Readers do not need to know the writer's record size
        let entries = list_archive(Cursor::new(archive), &ListOptions::default()).unwrap();
        assert_eq!(entries[0].size, 3000);
    }
}

#[test]
fn test_test_mode_reports_damage_and_continues() {
    let mut archive = archive_of(
        ArchiveFormat::Ustar,
        &[("one", b"1"), ("two", b"2"), ("three", b"3")],
    );
    // Damage the mode field of "two"
    archive[1024 + 100] = b'9';

    let mut seen = Vec::new();
    let summary = scan_archive(
        Cursor::new(archive),
        &ListOptions::default(),
        true,
        &mut |e| seen.push(e.name.clone()),
    )
    .unwrap();
    assert_eq!(seen, vec!["one", "three"]);
    assert_eq!(summary.failures.len(), 1);
    assert!(matches!(
        summary.failures[0].error,
        TarError::ChecksumError { position: 1024 }
    ));
}

fn pax_record(typeflag: u8, name: &str, records: &[(&str, &str)]) -> Vec<u8> {
    let mut data = Vec::new();
    for (key, value) in records {
        write_pax_record(&mut data, key, value);
    }
    let header = Header {
        mode: 0o644,
        ..Header::special(ArchiveFormat::Ustar, typeflag, name, data.len() as u64)
    };
    raw_member(header, &data)
}

fn plain(name: &str, user: &str) -> Vec<u8> {
    let header = Header {
        format: ArchiveFormat::Ustar,
        typeflag: REGTYPE,
        name: name.to_string(),
        mode: 0o644,
        user_name: user.to_string(),
        mtime: 1_700_000_000,
        ..Default::default()
    };
    raw_member(header, b"")
}

#[test]
fn test_global_and_local_pax_headers() {
    let mut bytes = pax_record(PAX_GHDR, "GlobalHead.0", &[("uname", "everyone")]);
    bytes.extend(plain("first", "ustar-user"));
    bytes.extend(pax_record(
        PAX_XHDR,
        "PaxHeaders/second",
        &[("uname", "local"), ("path", "renamed/second")],
    ));
    bytes.extend(plain("second", "ustar-user"));
    bytes.extend(plain("third", "ustar-user"));
    let bytes = end_archive(bytes);

    let entries = list_archive(Cursor::new(bytes), &ListOptions::default()).unwrap();
    assert_eq!(names(&entries), vec!["first", "renamed/second", "third"]);
    assert_eq!(entries[0].user_name, "everyone");
    assert_eq!(entries[1].user_name, "local");
    assert_eq!(entries[2].user_name, "everyone");
    assert!(entries.iter().all(|e| e.format == ArchiveFormat::Posix));
}

#[test]
fn test_long_link_target() {
    let target = "t/".repeat(80) + "target";
    let writer = BlockWriter::new(Cursor::new(Vec::new()), DEFAULT_RECORD_SIZE);
    let mut tar = TarWriter::new(writer, ArchiveFormat::Gnu);
    let mut link = ArchiveEntry::new("link", EntryType::SymLink);
    link.mode = 0o777;
    link.link_name = target.clone();
    tar.write_entry(&link).unwrap();
    tar.finish_entry().unwrap();
    let archive = tar.finish().unwrap().into_inner();

    let entries = list_archive(Cursor::new(archive), &ListOptions::default()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].link_name, target);
    assert_eq!(entries[0].format, ArchiveFormat::Gnu);

    let line = format_entry(&entries[0], true);
    assert!(line.starts_with("lrwxrwxrwx "), "{line}");
    assert!(line.ends_with(&format!("link -> {target}")), "{line}");
}
