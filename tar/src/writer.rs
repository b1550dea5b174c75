//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Archive writer
//!
//! Emits one header sequence per entry. Names that do not fit the name
//! field are placed, in order of preference, in:
//! - the prefix field (ustar, posix, star)
//! - a pax 'x' record (posix)
//! - a GNU 'L' / 'K' record (ustar, star, gnu)
//!
//! v7 archives, and any archive written with `standard_only`, report
//! `NameTooLong` instead of using an extension record.

use crate::archive::{ArchiveEntry, ArchiveFormat, EntryType};
use crate::blocked_io::{BlockWriter, ByteStream, TAR_BLOCK_SIZE};
use crate::error::{TarError, TarResult};
use crate::formats::gnu::{long_name_data, LONGLINK_NAME};
use crate::formats::header::{
    build_header, split_path, typeflag_for, Header, GNU_LONGLINK, GNU_LONGNAME, LINKNAME_LEN,
    NAME_LEN, PAX_XHDR,
};
use crate::formats::pax::{extended_header_name, ExtendedHeader};

/// Writes entries through a [`BlockWriter`]
pub struct TarWriter<S: ByteStream> {
    writer: BlockWriter<S>,
    format: ArchiveFormat,
    standard_only: bool,
    /// Sequence number for pax header names
    sequence: u64,
    current_size: u64,
    bytes_written: u64,
}

impl<S: ByteStream> TarWriter<S> {
    pub fn new(writer: BlockWriter<S>, format: ArchiveFormat) -> Self {
        TarWriter {
            writer,
            format,
            standard_only: false,
            sequence: 0,
            current_size: 0,
            bytes_written: 0,
        }
    }

    /// Refuse extension records; names must fit the standard fields
    pub fn standard_only(mut self, on: bool) -> Self {
        self.standard_only = on;
        self
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Bytes written to the archive so far
    pub fn offset(&self) -> u64 {
        self.writer.offset()
    }

    fn name_too_long(&self, name: &str) -> TarError {
        TarError::NameTooLong {
            name: name.to_string(),
            format: self.format.to_string(),
        }
    }

    /// Check that `entry` can be written before anything hits the stream
    pub fn check_names(&self, entry: &ArchiveEntry) -> TarResult<()> {
        self.place_names(entry).map(|_| ())
    }

    /// Work out (prefix, name, link) for the header fields, and whether
    /// the full name and link need extension records
    fn place_names(&self, entry: &ArchiveEntry) -> TarResult<NamePlacement> {
        let name = entry.name.as_str();
        if name.is_empty() || name.split('/').any(|part| part == "..") {
            return Err(TarError::BadName(name.to_string()));
        }
        let mut placement = NamePlacement {
            prefix: String::new(),
            name: name.to_string(),
            link: entry.link_name.clone(),
            long_name: false,
            long_link: false,
        };

        if name.len() > NAME_LEN {
            let split = self.format.prefix_len().and_then(|len| split_path(name, len));
            match split {
                Some((prefix, rest)) => {
                    placement.prefix = prefix;
                    placement.name = rest;
                }
                None if self.standard_only || self.format == ArchiveFormat::V7 => {
                    return Err(self.name_too_long(name));
                }
                None => placement.long_name = true,
            }
        }

        if entry.link_name.len() > LINKNAME_LEN {
            if self.standard_only || self.format == ArchiveFormat::V7 {
                return Err(self.name_too_long(&entry.link_name));
            }
            placement.long_link = true;
        }

        Ok(placement)
    }

    /// Write the header sequence for `entry`
    pub fn write_entry(&mut self, entry: &ArchiveEntry) -> TarResult<()> {
        let placement = self.place_names(entry)?;

        let size = if entry.entry_type.has_content() {
            entry.size
        } else {
            0
        };

        if self.format == ArchiveFormat::Posix {
            let ext = ExtendedHeader::from_entry(entry, !placement.long_name, !placement.long_link);
            if !ext.is_empty() {
                self.write_pax_header(&ext, entry)?;
            }
        } else {
            if placement.long_link {
                self.write_long_record(GNU_LONGLINK, &entry.link_name)?;
            }
            if placement.long_name {
                self.write_long_record(GNU_LONGNAME, name_with_slash(entry).as_str())?;
            }
        }

        let with_times = matches!(self.format, ArchiveFormat::Gnu | ArchiveFormat::Star);
        let header = Header {
            format: self.format,
            typeflag: typeflag_for(entry.entry_type),
            name: placement.name,
            prefix: placement.prefix,
            link_name: placement.link,
            mode: entry.mode & 0o7777,
            uid: entry.uid,
            gid: entry.gid,
            size,
            mtime: entry.mtime.secs,
            atime: (with_times && !entry.atime.is_zero()).then_some(entry.atime.secs),
            ctime: (with_times && !entry.ctime.is_zero()).then_some(entry.ctime.secs),
            user_name: entry.user_name.clone(),
            group_name: entry.group_name.clone(),
            devmajor: if entry.is_device() { entry.major } else { 0 },
            devminor: if entry.is_device() { entry.minor } else { 0 },
        };
        let block = build_header(&clamp_for_pax(header))?;
        self.writer.write_data(&block)?;

        log::trace!("wrote header for {:?}, {} data bytes", entry.name, size);
        self.current_size = size;
        self.bytes_written = 0;
        Ok(())
    }

    /// GNU 'L' or 'K' record
    fn write_long_record(&mut self, typeflag: u8, value: &str) -> TarResult<()> {
        let data = long_name_data(value);
        let header = Header {
            mode: 0o644,
            ..Header::special(self.format, typeflag, LONGLINK_NAME, data.len() as u64)
        };
        self.writer.write_data(&build_header(&header)?)?;
        self.writer.write_block(&data, true)
    }

    fn write_pax_header(&mut self, ext: &ExtendedHeader, entry: &ArchiveEntry) -> TarResult<()> {
        let data = ext.serialize();
        self.sequence += 1;
        let header = Header {
            mode: 0o644,
            mtime: entry.mtime.secs.max(0),
            ..Header::special(
                ArchiveFormat::Posix,
                PAX_XHDR,
                &extended_header_name(&entry.name, self.sequence),
                data.len() as u64,
            )
        };
        self.writer.write_data(&build_header(&header)?)?;
        self.writer.write_block(&data, true)
    }

    /// Write data for the current entry
    pub fn write_data(&mut self, data: &[u8]) -> TarResult<()> {
        if self.bytes_written + data.len() as u64 > self.current_size {
            return Err(TarError::InvalidHeader(format!(
                "entry data exceeds declared size {}",
                self.current_size
            )));
        }
        self.writer.write_data(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Bytes still owed to the current entry
    pub fn data_remaining(&self) -> u64 {
        self.current_size - self.bytes_written
    }

    /// Zero-fill any data the entry still owes, then pad to a block
    pub fn finish_entry(&mut self) -> TarResult<()> {
        let zeros = [0u8; TAR_BLOCK_SIZE];
        while self.bytes_written < self.current_size {
            let n = std::cmp::min(self.current_size - self.bytes_written, zeros.len() as u64);
            self.writer.write_data(&zeros[..n as usize])?;
            self.bytes_written += n;
        }
        self.writer.pad_to_block()
    }

    /// Write the end-of-archive marker and flush the final record
    pub fn finish(mut self) -> TarResult<S> {
        self.writer.write_block(&[0u8; 2 * TAR_BLOCK_SIZE], false)?;
        self.writer.finish()
    }
}

struct NamePlacement {
    prefix: String,
    name: String,
    link: String,
    long_name: bool,
    long_link: bool,
}

fn name_with_slash(entry: &ArchiveEntry) -> String {
    if entry.entry_type == EntryType::Dir && !entry.name.ends_with('/') {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    }
}

/// In posix archives out-of-range values travel in the 'x' record; the
/// ustar fields hold the largest octal value instead of base-256.
fn clamp_for_pax(mut header: Header) -> Header {
    if header.format == ArchiveFormat::Posix {
        header.size = header.size.min(0o77777777777);
        header.uid = header.uid.min(0o7777777);
        header.gid = header.gid.min(0o7777777);
        header.mtime = header.mtime.clamp(0, 0o77777777777);
    }
    header
}
