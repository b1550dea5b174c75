//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Extraction tests - safety checks and attribute restoration

use crate::common::*;
use std::fs;
use std::io::Cursor;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use tarball::blocked_io::{BlockWriter, DEFAULT_RECORD_SIZE};
use tarball::formats::header::{Header, REGTYPE};
use tarball::modes::{extract_archive, ExtractOptions};
use tarball::{ArchiveEntry, ArchiveFormat, EntryType, LocalFs, TarError, TarWriter, Timestamp};
use tempfile::TempDir;

fn file_header(name: &str, size: u64) -> Header {
    Header {
        format: ArchiveFormat::Ustar,
        typeflag: REGTYPE,
        name: name.to_string(),
        mode: 0o644,
        size,
        mtime: 1_700_000_000,
        ..Default::default()
    }
}

fn hostile_archive() -> Vec<u8> {
    let mut bytes = raw_member(file_header("../escaped.txt", 4), b"evil");
    bytes.extend(raw_member(file_header("ok.txt", 2), b"ok"));
    bytes.extend(raw_member(file_header("a/../../escaped2.txt", 4), b"evil"));
    end_archive(bytes)
}

#[test]
fn test_parent_components_are_refused() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();

    let err = extract_archive(
        Cursor::new(hostile_archive()),
        &dest,
        &LocalFs,
        &ExtractOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, TarError::BadName(_)));
    assert!(!temp.path().join("escaped.txt").exists());
}

#[test]
fn test_keep_going_reports_each_refused_member() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();

    let options = ExtractOptions {
        keep_going: true,
        ..Default::default()
    };
    let report = extract_archive(Cursor::new(hostile_archive()), &dest, &LocalFs, &options).unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].name, "../escaped.txt");
    assert_eq!(report.failures[0].position, 0);
    assert_eq!(report.entries.len(), 1);
    assert_eq!(fs::read(dest.join("ok.txt")).unwrap(), b"ok");
    assert!(!temp.path().join("escaped.txt").exists());
    assert!(!temp.path().join("escaped2.txt").exists());
}

#[test]
fn test_absolute_names() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();
    let target = temp.path().join("absolute.txt");
    let name = target.to_str().unwrap().to_string();
    let archive = end_archive(raw_member(file_header(&name, 3), b"abs"));

    let err = extract_archive(
        Cursor::new(archive.clone()),
        &dest,
        &LocalFs,
        &ExtractOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, TarError::BadName(_)));
    assert!(!target.exists());

    let options = ExtractOptions {
        allow_absolute: true,
        ..Default::default()
    };
    extract_archive(Cursor::new(archive), &dest, &LocalFs, &options).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"abs");
}

#[test]
fn test_existing_files_are_kept_without_overwrite() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("file.txt"), b"original").unwrap();
    let archive = archive_of(ArchiveFormat::Ustar, &[("file.txt", b"replacement")]);

    let err = extract_archive(
        Cursor::new(archive.clone()),
        &dest,
        &LocalFs,
        &ExtractOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, TarError::Create { .. }));
    assert_eq!(fs::read(dest.join("file.txt")).unwrap(), b"original");

    let options = ExtractOptions {
        overwrite: true,
        ..Default::default()
    };
    extract_archive(Cursor::new(archive), &dest, &LocalFs, &options).unwrap();
    assert_eq!(fs::read(dest.join("file.txt")).unwrap(), b"replacement");

    // No stray temporary copies are left behind
    let names: Vec<_> = fs::read_dir(&dest)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names.len(), 1);
}

#[test]
fn test_restores_mode_and_times() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();

    let writer = BlockWriter::new(Cursor::new(Vec::new()), DEFAULT_RECORD_SIZE);
    let mut tar = TarWriter::new(writer, ArchiveFormat::Posix);
    let mut dir = ArchiveEntry::new("dir", EntryType::Dir);
    dir.mode = 0o750;
    dir.mtime = Timestamp::from_secs(1_600_000_000);
    tar.write_entry(&dir).unwrap();
    tar.finish_entry().unwrap();

    let mut file = ArchiveEntry::new("dir/script.sh", EntryType::File);
    file.mode = 0o751;
    file.size = 9;
    file.mtime = Timestamp::new(1_650_000_000, 250_000_000);
    tar.write_entry(&file).unwrap();
    tar.write_data(b"#!/bin/sh").unwrap();
    tar.finish_entry().unwrap();
    let archive = tar.finish().unwrap().into_inner();

    extract_archive(
        Cursor::new(archive),
        &dest,
        &LocalFs,
        &ExtractOptions::default(),
    )
    .unwrap();

    let meta = fs::metadata(dest.join("dir/script.sh")).unwrap();
    assert_eq!(meta.permissions().mode() & 0o7777, 0o751);
    assert_eq!(meta.mtime(), 1_650_000_000);
    assert_eq!(meta.mtime_nsec(), 250_000_000);

    // Directory times are set after the directory's contents are written
    let meta = fs::metadata(dest.join("dir")).unwrap();
    assert_eq!(meta.permissions().mode() & 0o7777, 0o750);
    assert_eq!(meta.mtime(), 1_600_000_000);
}

#[test]
fn test_include_and_exclude_masks() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("dest");
    fs::create_dir(&dest).unwrap();
    let archive = archive_of(
        ArchiveFormat::Gnu,
        &[("keep.txt", b"1"), ("skip.log", b"2"), ("sub/keep.txt", b"3")],
    );

    let options = ExtractOptions {
        include: tarball::Mask::from_patterns(["*.txt"], true).unwrap(),
        exclude: tarball::Mask::from_patterns(["sub"], true).unwrap(),
        ..Default::default()
    };
    let report = extract_archive(Cursor::new(archive), &dest, &LocalFs, &options).unwrap();
    assert_eq!(report.entries.len(), 1);
    assert!(dest.join("keep.txt").exists());
    assert!(!dest.join("skip.log").exists());
    assert!(!dest.join("sub").exists());
}
