//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Sparse member tests - old GNU and pax 0.0/0.1/1.0 maps

use crate::common::*;
use std::fs;
use std::io::{Cursor, Read};
use tarball::formats::gnu::{build_sparse_continuation, write_pairs, SPARSE_IN_HEADER};
use tarball::formats::header::{
    build_header, encode_numeric, write_checksum, Header, GNU_ISEXTENDED_OFF, GNU_REALSIZE_OFF,
    GNU_SPARSE, GNU_SPARSE_OFF, PAX_XHDR, REGTYPE,
};
use tarball::formats::pax::write_pax_record;
use tarball::modes::{extract_archive, extract_one, scan_archive, ExtractOptions, ListOptions};
use tarball::{ArchiveFormat, EntryType, LocalFs};
use tempfile::TempDir;

const MAP: [(u64, u64); 2] = [(0, 100), (1000, 50)];
const REAL_SIZE: u64 = 2000;

/// Region contents in map order: 100 bytes of 'a' then 50 of 'b'
fn region_data() -> Vec<u8> {
    let mut data = vec![b'a'; 100];
    data.extend_from_slice(&[b'b'; 50]);
    data
}

fn check_expanded(out: &[u8]) {
    assert_eq!(out.len(), REAL_SIZE as usize);
    assert!(out[..100].iter().all(|&b| b == b'a'));
    assert!(out[100..1000].iter().all(|&b| b == 0));
    assert!(out[1000..1050].iter().all(|&b| b == b'b'));
    assert!(out[1050..].iter().all(|&b| b == 0));
}

fn old_gnu_header(name: &str, pairs: &[(u64, u64)], stored: u64, extended: bool) -> [u8; 512] {
    let header = Header {
        format: ArchiveFormat::Gnu,
        typeflag: GNU_SPARSE,
        name: name.to_string(),
        mode: 0o644,
        size: stored,
        mtime: 1_700_000_000,
        ..Default::default()
    };
    let mut block = build_header(&header).unwrap();
    write_pairs(
        &mut block[GNU_SPARSE_OFF..GNU_ISEXTENDED_OFF],
        pairs,
        SPARSE_IN_HEADER,
    )
    .unwrap();
    block[GNU_ISEXTENDED_OFF] = extended as u8;
    encode_numeric(
        &mut block[GNU_REALSIZE_OFF..GNU_REALSIZE_OFF + 12],
        REAL_SIZE,
        "realsize",
    )
    .unwrap();
    write_checksum(&mut block, ArchiveFormat::Gnu);
    block
}

fn old_gnu_archive() -> Vec<u8> {
    let data = region_data();
    let block = old_gnu_header("old.img", &MAP, data.len() as u64, false);
    let mut bytes = block.to_vec();
    bytes.extend_from_slice(&data);
    bytes.resize(1024, 0);
    end_archive(bytes)
}

fn read_member(archive: Vec<u8>, name: &str) -> Vec<u8> {
    let mut member = extract_one(Cursor::new(archive), name, &ListOptions::default())
        .unwrap()
        .unwrap();
    let mut out = Vec::new();
    member.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn test_old_gnu_sparse_extracts_with_holes() {
    let temp = TempDir::new().unwrap();
    let report = extract_archive(
        Cursor::new(old_gnu_archive()),
        temp.path(),
        &LocalFs,
        &ExtractOptions::default(),
    )
    .unwrap();
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].entry_type, EntryType::SparseFile);
    assert_eq!(report.entries[0].size, 150);
    assert_eq!(report.entries[0].real_size, REAL_SIZE);

    check_expanded(&fs::read(temp.path().join("old.img")).unwrap());
}

#[test]
fn test_old_gnu_sparse_continuation_block() {
    let pairs: Vec<(u64, u64)> = (0..6).map(|i| (i * 300, 10)).collect();
    let block = old_gnu_header("many.img", &pairs, 60, true);
    let mut bytes = block.to_vec();
    bytes.extend_from_slice(&build_sparse_continuation(&pairs[SPARSE_IN_HEADER..], false).unwrap());
    bytes.extend_from_slice(&[b'x'; 60]);
    bytes.resize(3 * 512, 0);
    let bytes = end_archive(bytes);

    let out = read_member(bytes, "many.img");
    assert_eq!(out.len(), REAL_SIZE as usize);
    for (i, chunk) in out.chunks(300).enumerate() {
        if i < 6 {
            assert!(chunk[..10].iter().all(|&b| b == b'x'), "region {i}");
            assert!(chunk[10..].iter().all(|&b| b == 0), "hole {i}");
        } else {
            assert!(chunk.iter().all(|&b| b == 0));
        }
    }
}

/// pax header plus sparse member, without the end marker
fn pax_sparse_members(records: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut rec = Vec::new();
    for (key, value) in records {
        write_pax_record(&mut rec, key, value);
    }
    let ext = Header {
        mode: 0o644,
        ..Header::special(ArchiveFormat::Ustar, PAX_XHDR, "PaxHeaders/holes", rec.len() as u64)
    };
    let member = Header {
        format: ArchiveFormat::Ustar,
        typeflag: REGTYPE,
        name: "GNUSparseFile.0/holes".to_string(),
        mode: 0o644,
        size: body.len() as u64,
        mtime: 1_700_000_000,
        ..Default::default()
    };
    let mut bytes = raw_member(ext, &rec);
    bytes.extend(raw_member(member, body));
    bytes
}

fn pax_sparse_archive(records: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    end_archive(pax_sparse_members(records, body))
}

#[test]
fn test_pax_sparse_0_0() {
    let archive = pax_sparse_archive(
        &[
            ("GNU.sparse.size", "2000"),
            ("GNU.sparse.numblocks", "2"),
            ("GNU.sparse.offset", "0"),
            ("GNU.sparse.numbytes", "100"),
            ("GNU.sparse.offset", "1000"),
            ("GNU.sparse.numbytes", "50"),
            ("GNU.sparse.name", "holes"),
        ],
        &region_data(),
    );
    check_expanded(&read_member(archive, "holes"));
}

#[test]
fn test_pax_sparse_0_1() {
    let archive = pax_sparse_archive(
        &[
            ("GNU.sparse.size", "2000"),
            ("GNU.sparse.numblocks", "2"),
            ("GNU.sparse.map", "0,100,1000,50"),
            ("GNU.sparse.name", "holes"),
        ],
        &region_data(),
    );
    check_expanded(&read_member(archive, "holes"));
}

#[test]
fn test_pax_sparse_1_0() {
    let mut body = b"2\n0\n100\n1000\n50\n".to_vec();
    body.resize(512, 0);
    body.extend(region_data());
    let archive = pax_sparse_archive(
        &[
            ("GNU.sparse.major", "1"),
            ("GNU.sparse.minor", "0"),
            ("GNU.sparse.name", "holes"),
            ("GNU.sparse.realsize", "2000"),
        ],
        &body,
    );

    let temp = TempDir::new().unwrap();
    extract_archive(
        Cursor::new(archive.clone()),
        temp.path(),
        &LocalFs,
        &ExtractOptions::default(),
    )
    .unwrap();
    check_expanded(&fs::read(temp.path().join("holes")).unwrap());
    check_expanded(&read_member(archive, "holes"));
}

#[test]
fn test_empty_sparse_map_is_skipped() {
    let mut body = b"0\n".to_vec();
    body.resize(512, 0);
    let mut bytes = pax_sparse_members(
        &[
            ("GNU.sparse.major", "1"),
            ("GNU.sparse.minor", "0"),
            ("GNU.sparse.realsize", "100"),
        ],
        &body,
    );
    bytes.extend(plain_member("after"));
    let archive = end_archive(bytes);

    let mut seen = Vec::new();
    let summary = scan_archive(
        Cursor::new(archive),
        &ListOptions::default(),
        true,
        &mut |e| seen.push(e.name.clone()),
    )
    .unwrap();
    assert_eq!(seen, vec!["after"]);
    assert_eq!(summary.failures.len(), 1);
}

fn plain_member(name: &str) -> Vec<u8> {
    let header = Header {
        format: ArchiveFormat::Ustar,
        typeflag: REGTYPE,
        name: name.to_string(),
        mode: 0o644,
        mtime: 1_700_000_000,
        ..Default::default()
    };
    raw_member(header, b"")
}
