//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! List and test modes

use crate::archive::{ArchiveEntry, EntryType, Timestamp};
use crate::assembler::EntryAssembler;
use crate::blocked_io::{BlockReader, ByteStream, DEFAULT_RECORD_SIZE};
use crate::error::{TarError, TarResult};
use crate::modes::EntryFailure;
use crate::pattern::Mask;
use chrono::{DateTime, Local};

/// Options for list, test and single-member modes
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Record size in bytes
    pub record_size: usize,
    /// Only members matching this mask are reported (empty: all)
    pub include: Mask,
    /// Members matching this mask are not reported
    pub exclude: Mask,
}

impl Default for ListOptions {
    fn default() -> Self {
        ListOptions {
            record_size: DEFAULT_RECORD_SIZE,
            include: Mask::default(),
            exclude: Mask::default(),
        }
    }
}

impl ListOptions {
    pub(crate) fn selected(&self, entry: &ArchiveEntry) -> bool {
        let name = entry.name.strip_prefix("./").unwrap_or(&entry.name);
        self.include.includes(name) && !self.exclude.matches(name)
    }
}

/// Result of a full scan
#[derive(Debug, Default)]
pub struct ScanSummary {
    /// Members reported to the visitor
    pub entries: usize,
    /// Damaged members and headers that were skipped
    pub failures: Vec<EntryFailure>,
}

/// Check a member's data without writing it anywhere
fn verify_entry<S: ByteStream>(
    assembler: &mut EntryAssembler<S>,
    entry: &ArchiveEntry,
) -> TarResult<()> {
    if let Some(map) = &entry.sparse {
        map.validate()?;
        if map.stored_size() != entry.size {
            return Err(TarError::InvalidHeader(format!(
                "{}: sparse map covers {} bytes but {} are stored",
                entry.name,
                map.stored_size(),
                entry.size
            )));
        }
        if entry.real_size < entry.size {
            return Err(TarError::InvalidHeader(format!(
                "{}: logical size {} is below stored size {}",
                entry.name, entry.real_size, entry.size
            )));
        }
    }

    // Read rather than skip, so a truncated member is noticed even on
    // seekable archives
    let mut buf = vec![0u8; 64 * 1024];
    while assembler.read_data(&mut buf)? > 0 {}
    Ok(())
}

/// Walk every member of the archive on `stream`
///
/// Per-member problems are logged, collected and skipped. With `test`
/// set, each member's data is read through and its sparse map checked.
pub fn scan_archive<S: ByteStream>(
    stream: S,
    options: &ListOptions,
    test: bool,
    visit: &mut dyn FnMut(&ArchiveEntry),
) -> TarResult<ScanSummary> {
    let mut assembler = EntryAssembler::new(BlockReader::new(stream, options.record_size));
    let mut summary = ScanSummary::default();

    loop {
        let position = assembler.reader().offset();
        let entry = match assembler.next_entry() {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) if e.is_entry_error() => {
                log::error!("{}", e);
                summary.failures.push(EntryFailure {
                    name: String::new(),
                    position,
                    error: e,
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        if !options.selected(&entry) {
            continue;
        }
        if test {
            if let Err(e) = verify_entry(&mut assembler, &entry) {
                if !e.is_entry_error() {
                    return Err(e);
                }
                log::error!("{}", e);
                summary.failures.push(EntryFailure {
                    name: entry.name.clone(),
                    position: entry.position,
                    error: e,
                });
                continue;
            }
        }
        summary.entries += 1;
        visit(&entry);
    }

    if let Some(end) = assembler.end_offset() {
        log::trace!("archive ends at offset {}", end);
    }
    Ok(summary)
}

fn collect<S: ByteStream>(stream: S, options: &ListOptions, test: bool) -> TarResult<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    scan_archive(stream, options, test, &mut |entry| entries.push(entry.clone()))?;
    Ok(entries)
}

/// Members of the archive on `stream`
pub fn list_archive<S: ByteStream>(stream: S, options: &ListOptions) -> TarResult<Vec<ArchiveEntry>> {
    collect(stream, options, false)
}

/// Members of the archive on `stream` whose data and maps check out
pub fn test_archive<S: ByteStream>(stream: S, options: &ListOptions) -> TarResult<Vec<ArchiveEntry>> {
    collect(stream, options, true)
}

/// One listing line; `verbose` gives the `ls -l` style form
pub fn format_entry(entry: &ArchiveEntry, verbose: bool) -> String {
    if !verbose {
        return entry.name.clone();
    }

    let owner = match entry.user_name.is_empty() {
        true => entry.uid.to_string(),
        false => entry.user_name.clone(),
    };
    let group = match entry.group_name.is_empty() {
        true => entry.gid.to_string(),
        false => entry.group_name.clone(),
    };
    let size = if entry.is_device() {
        format!("{},{}", entry.major, entry.minor)
    } else if entry.sparse.is_some() {
        entry.real_size.to_string()
    } else {
        entry.size.to_string()
    };
    let suffix = match entry.entry_type {
        EntryType::SymLink => format!(" -> {}", entry.link_name),
        EntryType::HardLink => format!(" link to {}", entry.link_name),
        EntryType::VolumeHeader => "--Volume Header--".to_string(),
        _ => String::new(),
    };

    format!(
        "{} {}/{} {:>8} {} {}{}",
        format_mode(entry),
        owner,
        group,
        size,
        format_mtime(entry.mtime),
        entry.name,
        suffix
    )
}

/// Mode string like "drwxr-xr-x"
fn format_mode(entry: &ArchiveEntry) -> String {
    let mode = entry.mode;
    let mut s = String::with_capacity(10);
    s.push(entry.entry_type.mode_char());
    for (shift, special, special_char) in [(6, 0o4000, 's'), (3, 0o2000, 's'), (0, 0o1000, 't')] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(match (bits & 0o1 != 0, mode & special != 0) {
            (true, true) => special_char,
            (false, true) => special_char.to_ascii_uppercase(),
            (true, false) => 'x',
            (false, false) => '-',
        });
    }
    s
}

fn format_mtime(mtime: Timestamp) -> String {
    match DateTime::from_timestamp(mtime.secs, mtime.nanos) {
        Some(dt) => dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => mtime.to_string(),
    }
}
