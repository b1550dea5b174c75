//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Common test helpers for tar integration tests

use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tarball::blocked_io::{align_block, BlockWriter, DEFAULT_RECORD_SIZE};
use tarball::formats::header::{build_header, Header};
use tarball::{ArchiveEntry, ArchiveFormat, EntryType, TarWriter};

/// Run tar with given arguments in a specific directory
pub fn run_tar_in_dir(args: &[&str], dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tar"))
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run tar")
}

/// Run tar with stdin input in a specific directory
pub fn run_tar_in_dir_with_stdin(args: &[&str], dir: &Path, stdin_data: &[u8]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_tar"))
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn tar");

    if let Some(ref mut stdin) = child.stdin {
        stdin.write_all(stdin_data).expect("Failed to write stdin");
    }
    // Close stdin so tar sees end of input
    drop(child.stdin.take());

    child.wait_with_output().expect("Failed to wait for tar")
}

/// Create a test directory with standard test files
pub fn create_test_files(dir: &Path) {
    let mut f = File::create(dir.join("file.txt")).unwrap();
    writeln!(f, "Hello, world!").unwrap();

    let subdir = dir.join("subdir");
    fs::create_dir(&subdir).unwrap();
    let mut f = File::create(subdir.join("nested.txt")).unwrap();
    writeln!(f, "Nested file content").unwrap();

    std::os::unix::fs::symlink("file.txt", dir.join("link.txt")).unwrap();
}

/// Verify extracted files match original test files
pub fn verify_files_match(original: &Path, extracted: &Path) {
    let orig_content = fs::read_to_string(original.join("file.txt")).unwrap();
    let extr_content = fs::read_to_string(extracted.join("file.txt")).unwrap();
    assert_eq!(orig_content, extr_content, "file.txt content mismatch");

    let orig_nested = fs::read_to_string(original.join("subdir/nested.txt")).unwrap();
    let extr_nested = fs::read_to_string(extracted.join("subdir/nested.txt")).unwrap();
    assert_eq!(orig_nested, extr_nested, "nested.txt content mismatch");

    let orig_link = fs::read_link(original.join("link.txt")).unwrap();
    let extr_link = fs::read_link(extracted.join("link.txt")).unwrap();
    assert_eq!(orig_link, extr_link, "symlink target mismatch");
}

/// Assert command succeeded
pub fn assert_success(output: &Output, context: &str) {
    assert!(
        output.status.success(),
        "{} failed with status {:?}\nstderr: {}",
        context,
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Assert command failed
pub fn assert_failure(output: &Output, context: &str) {
    assert!(
        !output.status.success(),
        "{} should have failed but succeeded\nstdout: {}",
        context,
        String::from_utf8_lossy(&output.stdout)
    );
}

/// Get stdout as string
pub fn stdout_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Get stderr as string
pub fn stderr_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// In-memory archive of regular files
pub fn archive_of(format: ArchiveFormat, members: &[(&str, &[u8])]) -> Vec<u8> {
    let writer = BlockWriter::new(Cursor::new(Vec::new()), DEFAULT_RECORD_SIZE);
    let mut tar = TarWriter::new(writer, format);
    for (name, data) in members {
        let mut entry = ArchiveEntry::new(name, EntryType::File);
        entry.size = data.len() as u64;
        entry.mtime = tarball::Timestamp::from_secs(1_700_000_000);
        tar.write_entry(&entry).unwrap();
        tar.write_data(data).unwrap();
        tar.finish_entry().unwrap();
    }
    tar.finish().unwrap().into_inner()
}

/// One raw member: header block plus block-padded data
///
/// Bypasses the writer's name checks, for building hostile archives.
pub fn raw_member(header: Header, data: &[u8]) -> Vec<u8> {
    let mut out = build_header(&header).unwrap().to_vec();
    out.extend_from_slice(data);
    out.resize(align_block(out.len() as u64) as usize, 0);
    out
}

/// Append the end-of-archive marker
pub fn end_archive(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.extend_from_slice(&[0u8; 1024]);
    bytes
}
