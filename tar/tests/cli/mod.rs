//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Command line tests - run the tar binary

use crate::common::*;
use std::fs;
use tarball::ArchiveFormat;
use tempfile::TempDir;

struct Fixture {
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("source")).unwrap();
        fs::create_dir(temp.path().join("dest")).unwrap();
        create_test_files(&temp.path().join("source"));
        Fixture { temp }
    }

    fn src(&self) -> std::path::PathBuf {
        self.temp.path().join("source")
    }

    fn dst(&self) -> std::path::PathBuf {
        self.temp.path().join("dest")
    }

    fn archive(&self, name: &str) -> String {
        self.temp.path().join(name).to_str().unwrap().to_string()
    }
}

#[test]
fn test_create_list_extract() {
    let fx = Fixture::new();
    let archive = fx.archive("test.tar");

    let output = run_tar_in_dir(
        &["-c", "-f", &archive, "file.txt", "subdir", "link.txt"],
        &fx.src(),
    );
    assert_success(&output, "tar create");

    let output = run_tar_in_dir(&["-t", "-f", &archive], &fx.src());
    assert_success(&output, "tar list");
    let listing = stdout_str(&output);
    assert_eq!(
        listing.lines().collect::<Vec<_>>(),
        vec!["file.txt", "subdir/", "subdir/nested.txt", "link.txt"]
    );

    let output = run_tar_in_dir(&["-x", "-f", &archive], &fx.dst());
    assert_success(&output, "tar extract");
    verify_files_match(&fx.src(), &fx.dst());
}

#[test]
fn test_formats_and_exclude() {
    for format in ["v7", "ustar", "posix", "gnu", "star"] {
        let fx = Fixture::new();
        let archive = fx.archive("test.tar");
        let output = run_tar_in_dir(
            &[
                "-c", "-H", format, "--exclude", "nested*", "-f", &archive, "file.txt", "subdir",
            ],
            &fx.src(),
        );
        assert_success(&output, format);

        let output = run_tar_in_dir(&["-t", "-f", &archive], &fx.src());
        assert_eq!(stdout_str(&output), "file.txt\nsubdir/\n", "{format}");
    }
}

#[test]
fn test_gzip_roundtrip() {
    let fx = Fixture::new();
    let archive = fx.archive("test.tar.gz");

    let output = run_tar_in_dir(&["-c", "-z", "-f", &archive, "file.txt"], &fx.src());
    assert_success(&output, "tar create gzip");
    let bytes = fs::read(&archive).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

    let output = run_tar_in_dir(&["-t", "-z", "-f", &archive], &fx.src());
    assert_success(&output, "tar list gzip");
    assert_eq!(stdout_str(&output), "file.txt\n");
}

#[test]
fn test_stdout_and_stdin_transport() {
    let fx = Fixture::new();
    let output = run_tar_in_dir(&["-c", "-f", "-", "file.txt"], &fx.src());
    assert_success(&output, "tar create to stdout");
    assert_eq!(output.stdout.len() % 10240, 0);

    let output = run_tar_in_dir_with_stdin(&["-x"], &fx.dst(), &output.stdout);
    assert_success(&output, "tar extract from stdin");
    assert_eq!(
        fs::read_to_string(fx.dst().join("file.txt")).unwrap(),
        "Hello, world!\n"
    );
}

#[test]
fn test_verbose_listing() {
    let fx = Fixture::new();
    let archive = fx.archive("test.tar");
    run_tar_in_dir(&["-c", "-f", &archive, "file.txt", "link.txt"], &fx.src());

    let output = run_tar_in_dir(&["-t", "-v", "-f", &archive], &fx.src());
    assert_success(&output, "tar verbose list");
    let listing = stdout_str(&output);
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("-rw"), "{}", lines[0]);
    assert!(lines[0].ends_with(" file.txt"), "{}", lines[0]);
    assert!(lines[1].starts_with('l'), "{}", lines[1]);
    assert!(lines[1].ends_with("link.txt -> file.txt"), "{}", lines[1]);
}

#[test]
fn test_member_to_stdout() {
    let fx = Fixture::new();
    let archive = fx.archive("test.tar");
    run_tar_in_dir(&["-c", "-f", &archive, "subdir"], &fx.src());

    let output = run_tar_in_dir(&["-x", "-O", "-f", &archive, "subdir/nested.txt"], &fx.dst());
    assert_success(&output, "tar extract to stdout");
    assert_eq!(stdout_str(&output), "Nested file content\n");
    assert!(!fx.dst().join("subdir").exists());

    let output = run_tar_in_dir(&["-x", "-O", "-f", &archive, "missing"], &fx.dst());
    assert_failure(&output, "tar extract missing member");
    assert!(stderr_str(&output).contains("missing"));
}

#[test]
fn test_append_and_append_stdin() {
    let fx = Fixture::new();
    let archive = fx.archive("test.tar");
    run_tar_in_dir(&["-c", "-f", &archive, "file.txt"], &fx.src());

    let output = run_tar_in_dir(&["-r", "-f", &archive, "link.txt"], &fx.src());
    assert_success(&output, "tar append");

    let output = run_tar_in_dir_with_stdin(
        &["--append-stdin", "notes/from-stdin.txt", "-f", &archive],
        &fx.src(),
        b"piped contents",
    );
    assert_success(&output, "tar append stdin");

    let output = run_tar_in_dir(&["-t", "-f", &archive], &fx.src());
    assert_eq!(
        stdout_str(&output),
        "file.txt\nlink.txt\nnotes/from-stdin.txt\n"
    );

    let output = run_tar_in_dir(
        &["-x", "-O", "-f", &archive, "notes/from-stdin.txt"],
        &fx.dst(),
    );
    assert_eq!(stdout_str(&output), "piped contents");
}

#[test]
fn test_refuses_to_clobber() {
    let fx = Fixture::new();
    let archive = fx.archive("test.tar");
    fs::write(
        &archive,
        archive_of(ArchiveFormat::Ustar, &[("file.txt", b"from archive")]),
    )
    .unwrap();
    fs::write(fx.dst().join("file.txt"), "already here").unwrap();

    let output = run_tar_in_dir(&["-x", "-f", &archive], &fx.dst());
    assert_failure(&output, "tar extract over existing file");
    assert!(stderr_str(&output).contains("tar: "));
    assert_eq!(
        fs::read_to_string(fx.dst().join("file.txt")).unwrap(),
        "already here"
    );

    let output = run_tar_in_dir(&["-x", "--overwrite", "-f", &archive], &fx.dst());
    assert_success(&output, "tar extract with overwrite");
    assert_eq!(
        fs::read_to_string(fx.dst().join("file.txt")).unwrap(),
        "from archive"
    );
}

#[test]
fn test_damaged_archive_fails_test_mode() {
    let fx = Fixture::new();
    let archive = fx.archive("test.tar");
    let mut bytes = archive_of(ArchiveFormat::Ustar, &[("a", b"1"), ("b", b"2")]);
    bytes[10] ^= 0x55;
    fs::write(&archive, bytes).unwrap();

    let output = run_tar_in_dir(&["--test", "-v", "-f", &archive], &fx.src());
    assert_failure(&output, "tar test damaged archive");
    assert_eq!(stdout_str(&output), "b\n");
    assert!(stderr_str(&output).contains("checksum"));
}

#[test]
fn test_requires_a_mode() {
    let fx = Fixture::new();
    let output = run_tar_in_dir(&["-f", "x.tar"], &fx.src());
    assert_failure(&output, "tar without a mode");
}
