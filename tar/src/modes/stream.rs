//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Read a single member's contents as a stream

use crate::archive::ArchiveEntry;
use crate::assembler::EntryAssembler;
use crate::blocked_io::{BlockReader, ByteStream};
use crate::error::{is_eof_error, TarError, TarResult};
use crate::modes::list::ListOptions;
use std::io::{self, Read};

/// Logical contents of one archive member
///
/// Holes of sparse members read back as zeros, so the stream yields
/// exactly `entry().real_size` bytes.
pub struct EntryStream<S: ByteStream> {
    assembler: EntryAssembler<S>,
    entry: ArchiveEntry,
    /// Logical offset of the next byte handed out
    pos: u64,
}

impl<S: ByteStream> EntryStream<S> {
    pub fn entry(&self) -> &ArchiveEntry {
        &self.entry
    }

    /// Give back the assembler, positioned inside or after this member
    pub fn into_inner(self) -> EntryAssembler<S> {
        self.assembler
    }

    fn logical_size(&self) -> u64 {
        if self.entry.entry_type.has_content() || self.entry.sparse.is_some() {
            self.entry.real_size
        } else {
            0
        }
    }

    fn read_stored(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.assembler.read_data(buf).map_err(to_io_error)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn read_sparse(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let end = self.logical_size();
        let region = self.entry.sparse.as_ref().and_then(|m| m.region_at(self.pos));
        let (hole_end, region_end) = match region {
            Some(region) if region.offset > self.pos => (region.offset, None),
            Some(region) => (self.pos, Some(region.end())),
            None => (end, None),
        };

        if let Some(region_end) = region_end {
            let want = std::cmp::min(buf.len() as u64, region_end - self.pos) as usize;
            let n = self.read_stored(&mut buf[..want])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{}: sparse data ends early", self.entry.name),
                ));
            }
            return Ok(n);
        }

        let want = std::cmp::min(buf.len() as u64, hole_end - self.pos) as usize;
        buf[..want].fill(0);
        self.pos += want as u64;
        Ok(want)
    }
}

fn to_io_error(e: TarError) -> io::Error {
    if is_eof_error(&e) {
        return io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string());
    }
    match e {
        TarError::Io(e) | TarError::Read(e) => e,
        e => io::Error::other(e.to_string()),
    }
}

impl<S: ByteStream> Read for EntryStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.logical_size() {
            return Ok(0);
        }
        if self.entry.sparse.is_some() {
            self.read_sparse(buf)
        } else {
            self.read_stored(buf)
        }
    }
}

/// Find the first member named `name` and return a reader over its
/// contents
///
/// Damaged headers on the way are logged and skipped. Returns `None`
/// when the archive has no such member.
pub fn extract_one<S: ByteStream>(
    stream: S,
    name: &str,
    options: &ListOptions,
) -> TarResult<Option<EntryStream<S>>> {
    let wanted = name.strip_prefix("./").unwrap_or(name).trim_end_matches('/');
    let mut assembler = EntryAssembler::new(BlockReader::new(stream, options.record_size));

    loop {
        let entry = match assembler.next_entry() {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(e) if e.is_entry_error() => {
                log::error!("{}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let trimmed = entry.trimmed_name();
        let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
        if trimmed == wanted {
            return Ok(Some(EntryStream {
                assembler,
                entry,
                pos: 0,
            }));
        }
    }
}
