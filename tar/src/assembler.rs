//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Logical entry assembly
//!
//! One archive member may span several physical headers: GNU long-name
//! and long-link records, pax extended headers, and old GNU sparse
//! continuation blocks all precede (or follow) the header that carries
//! the member itself. [`EntryAssembler`] folds them into one
//! [`ArchiveEntry`] and tracks how much of the member's data section is
//! still unread.

use crate::archive::{ArchiveEntry, ArchiveFormat, EntryType, Timestamp};
use crate::blocked_io::{
    align_block, is_zero_block, padding_needed, BlockReader, ByteStream, MAX_MEMBER_SIZE,
};
use crate::error::{TarError, TarResult};
use crate::formats::gnu::{self, parse_long_name};
use crate::formats::header::{
    self, entry_type_for, parse_header, Header, GNU_LONGLINK, GNU_LONGNAME, GNU_SPARSE,
    PAX_GHDR, PAX_XHDR, SOLARIS_XHDR,
};
use crate::formats::pax::ExtendedHeader;
use crate::formats::sparse::SparseMap;

/// Upper bound for long-name and extended-header data kept in memory
const MAX_EXTENSION_SIZE: u64 = 1024 * 1024;

/// Where the assembler is between two real entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    ExpectHeader,
    HaveLongName,
    HaveLongLink,
    HavePax,
    HaveSparseContinuation,
}

/// What a header's typeflag asks the assembler to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    LongName,
    LongLink,
    LocalPax,
    GlobalPax,
    OldSparse,
    Member,
}

impl HeaderKind {
    pub fn classify(typeflag: u8) -> Self {
        match typeflag {
            GNU_LONGNAME => HeaderKind::LongName,
            GNU_LONGLINK => HeaderKind::LongLink,
            PAX_XHDR | SOLARIS_XHDR => HeaderKind::LocalPax,
            PAX_GHDR => HeaderKind::GlobalPax,
            GNU_SPARSE => HeaderKind::OldSparse,
            _ => HeaderKind::Member,
        }
    }
}

/// Extension state captured from special records, consumed by the next
/// real header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingExtensions {
    pub long_name: Option<String>,
    pub long_link: Option<String>,
    pub pax: Option<ExtendedHeader>,
}

impl PendingExtensions {
    pub fn is_empty(&self) -> bool {
        self.long_name.is_none() && self.long_link.is_none() && self.pax.is_none()
    }

    pub fn set_long_name(&mut self, name: String) {
        if let Some(old) = self.long_name.replace(name) {
            log::warn!("long name {:?} replaced before use", old);
        }
    }

    pub fn set_long_link(&mut self, link: String) {
        if let Some(old) = self.long_link.replace(link) {
            log::warn!("long link {:?} replaced before use", old);
        }
    }

    pub fn set_pax(&mut self, ext: ExtendedHeader) {
        if self.pax.replace(ext).is_some() {
            log::warn!("extended header replaced before use");
        }
    }

    /// Apply everything pending to `entry` and clear the pending state
    ///
    /// Long names go first so that pax records, which always win, can
    /// override them. Returns the pax set that was applied, if any.
    pub fn apply(&mut self, entry: &mut ArchiveEntry, global: &ExtendedHeader) -> ExtendedHeader {
        if let Some(name) = self.long_name.take() {
            entry.name = name;
        }
        if let Some(link) = self.long_link.take() {
            entry.link_name = link;
        }
        let mut ext = global.clone();
        if let Some(local) = self.pax.take() {
            ext.merge(&local);
        }
        ext.apply_to(entry);
        ext
    }

    /// Clear pending state, warning about anything dropped
    pub fn discard(&mut self, why: &str) {
        if !self.is_empty() {
            log::warn!("{}: discarding unused extension records", why);
        }
        *self = PendingExtensions::default();
    }
}

/// Turns a stream of header blocks into archive entries
pub struct EntryAssembler<S: ByteStream> {
    reader: BlockReader<S>,
    pending: PendingExtensions,
    global: ExtendedHeader,
    state: AssemblerState,
    /// Unread bytes of the current data section
    data_remaining: u64,
    /// Padding after the current data section
    pad_remaining: u64,
    /// Scanning past damaged headers
    resync: bool,
    /// A pax header was seen, so ustar headers are really posix
    seen_pax: bool,
    finished: bool,
    /// Offset of the end-of-archive marker, once found
    end_offset: Option<u64>,
}

impl<S: ByteStream> EntryAssembler<S> {
    pub fn new(reader: BlockReader<S>) -> Self {
        EntryAssembler {
            reader,
            pending: PendingExtensions::default(),
            global: ExtendedHeader::default(),
            state: AssemblerState::ExpectHeader,
            data_remaining: 0,
            pad_remaining: 0,
            resync: false,
            seen_pax: false,
            finished: false,
            end_offset: None,
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn pending(&self) -> &PendingExtensions {
        &self.pending
    }

    /// Offset where the end-of-archive marker (or physical end) was found
    pub fn end_offset(&self) -> Option<u64> {
        self.end_offset
    }

    pub fn reader(&self) -> &BlockReader<S> {
        &self.reader
    }

    pub fn into_reader(self) -> BlockReader<S> {
        self.reader
    }

    /// Unread data bytes of the current entry
    pub fn data_remaining(&self) -> u64 {
        self.data_remaining
    }

    /// Read data of the current entry; 0 once it is exhausted
    pub fn read_data(&mut self, buf: &mut [u8]) -> TarResult<usize> {
        if self.data_remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = std::cmp::min(buf.len() as u64, self.data_remaining) as usize;
        let n = self.reader.read_data(&mut buf[..want])?;
        if n == 0 {
            return Err(TarError::UnexpectedEof(format!(
                "{} bytes of entry data missing",
                self.data_remaining
            )));
        }
        self.data_remaining -= n as u64;
        Ok(n)
    }

    /// Skip whatever is left of the current data section
    pub fn skip_data(&mut self) -> TarResult<()> {
        let count = self.data_remaining + self.pad_remaining;
        self.data_remaining = 0;
        self.pad_remaining = 0;
        if count > 0 {
            self.reader.skip(count)?;
        }
        Ok(())
    }

    fn read_extension_data(&mut self, header: &Header, what: &str) -> TarResult<Vec<u8>> {
        self.reject_size(header.size, what)?;
        if header.size > MAX_EXTENSION_SIZE {
            self.pending.discard("oversized extension record");
            self.pad_remaining = align_block(header.size);
            return Err(TarError::InvalidHeader(format!(
                "{} record of {} bytes",
                what, header.size
            )));
        }
        let mut data = vec![0u8; header.size as usize];
        self.reader.read_exact_data(&mut data, what)?;
        self.reader.skip(padding_needed(header.size) as u64)?;
        Ok(data)
    }

    /// Refuse a size whose data section cannot be skipped; the next
    /// header is then hunted for block by block
    fn reject_size(&mut self, size: u64, what: &str) -> TarResult<()> {
        if size <= MAX_MEMBER_SIZE {
            return Ok(());
        }
        self.resync = true;
        self.pending.discard("oversized entry");
        self.state = AssemblerState::ExpectHeader;
        Err(TarError::InvalidHeader(format!("{} declares {} bytes", what, size)))
    }

    /// Report `err` and arrange for the next `skip` bytes of the
    /// current data section to be skipped
    fn fail_entry(&mut self, skip: u64, err: TarError) -> TarResult<Option<ArchiveEntry>> {
        log::debug!("entry failed, skipping {} bytes", skip);
        self.data_remaining = 0;
        self.pad_remaining = skip;
        self.state = AssemblerState::ExpectHeader;
        Err(err)
    }

    /// Read the next logical entry
    ///
    /// Returns `Ok(None)` at end of archive. Per-entry problems come back
    /// as errors; calling again continues with the following header.
    pub fn next_entry(&mut self) -> TarResult<Option<ArchiveEntry>> {
        if self.finished {
            return Ok(None);
        }
        self.skip_data()?;

        let mut zero_at: Option<u64> = None;
        let mut start: Option<u64> = None;

        loop {
            let position = self.reader.offset();
            let block = match self.reader.read_block()? {
                Some(b) => *b,
                None => return self.physical_end(zero_at, position),
            };

            if is_zero_block(&block) {
                if let Some(first) = zero_at {
                    log::debug!("end of archive marker at offset {}", first);
                    self.pending.discard("end of archive");
                    self.end_offset = Some(first);
                    self.finished = true;
                    return Ok(None);
                }
                zero_at = Some(position);
                continue;
            }
            if let Some(z) = zero_at.take() {
                log::warn!("ignoring isolated zero block at offset {}", z);
            }

            let header = match parse_header(&block, position) {
                Ok(h) => h,
                Err(TarError::ChecksumError { .. }) if self.resync => continue,
                Err(e) => {
                    // The data length of a damaged header is unknown
                    self.resync = true;
                    self.pending.discard("damaged header");
                    self.state = AssemblerState::ExpectHeader;
                    return Err(e);
                }
            };
            if self.resync {
                log::warn!("resynchronized at offset {}", position);
                self.resync = false;
            }
            let start = *start.get_or_insert(position);

            match HeaderKind::classify(header.typeflag) {
                HeaderKind::LongName => {
                    let data = self.read_extension_data(&header, "long name")?;
                    self.pending.set_long_name(parse_long_name(&data));
                    self.state = AssemblerState::HaveLongName;
                }
                HeaderKind::LongLink => {
                    let data = self.read_extension_data(&header, "long link")?;
                    self.pending.set_long_link(parse_long_name(&data));
                    self.state = AssemblerState::HaveLongLink;
                }
                HeaderKind::LocalPax => {
                    let data = self.read_extension_data(&header, "extended header")?;
                    self.seen_pax = true;
                    match ExtendedHeader::parse(&data) {
                        Ok(ext) => {
                            self.pending.set_pax(ext);
                            self.state = AssemblerState::HavePax;
                        }
                        Err(e) => {
                            self.pending.discard("malformed extended header");
                            return self.fail_entry(0, e);
                        }
                    }
                }
                HeaderKind::GlobalPax => {
                    let data = self.read_extension_data(&header, "global header")?;
                    self.seen_pax = true;
                    match ExtendedHeader::parse(&data) {
                        Ok(ext) => self.global.merge(&ext),
                        Err(e) => log::warn!("ignoring malformed global header: {}", e),
                    }
                }
                HeaderKind::OldSparse | HeaderKind::Member => {
                    return self.finish_entry(&block, header, start);
                }
            }
        }
    }

    /// Physical end of stream while looking for a header
    fn physical_end(&mut self, zero_at: Option<u64>, position: u64) -> TarResult<Option<ArchiveEntry>> {
        match zero_at {
            Some(z) => log::warn!("archive ends after a single zero block at offset {}", z),
            None => log::warn!("archive ends without an end-of-archive marker"),
        }
        self.pending.discard("end of archive");
        self.end_offset = Some(zero_at.unwrap_or(position));
        self.finished = true;
        Ok(None)
    }

    /// Build the entry for a real header and position at its data
    fn finish_entry(
        &mut self,
        block: &header::Block,
        header: Header,
        start: u64,
    ) -> TarResult<Option<ArchiveEntry>> {
        self.reject_size(header.size, &header.path())?;
        let mut format = header.format;
        if format == ArchiveFormat::Ustar && (self.seen_pax || self.pending.pax.is_some()) {
            format = ArchiveFormat::Posix;
        }

        let mut entry = ArchiveEntry {
            name: header.path(),
            link_name: header.link_name.clone(),
            mode: header.mode,
            uid: header.uid,
            gid: header.gid,
            user_name: header.user_name.clone(),
            group_name: header.group_name.clone(),
            size: header.size,
            mtime: Timestamp::from_secs(header.mtime),
            atime: Timestamp::from_secs(header.atime.unwrap_or(0)),
            ctime: Timestamp::from_secs(header.ctime.unwrap_or(0)),
            major: header.devmajor,
            minor: header.devminor,
            position: start,
            format,
            ..Default::default()
        };

        let mut sparse = None;
        if header.typeflag == GNU_SPARSE {
            sparse = match self.read_old_sparse(block) {
                Ok(map) => Some(map),
                Err(e) if e.is_entry_error() => {
                    self.pending.discard("bad sparse header");
                    return self.fail_entry(align_block(header.size), e);
                }
                Err(e) => return Err(e),
            };
        }

        let ext = self.pending.apply(&mut entry, &self.global);
        self.state = AssemblerState::ExpectHeader;
        // A trailing slash on the full name marks old-style directories
        entry.entry_type = entry_type_for(header.typeflag, &entry.name);
        self.reject_size(entry.size, &entry.name)?;

        // Sizes of the device-like types never describe a data section
        if matches!(
            entry.entry_type,
            EntryType::SymLink | EntryType::CharDev | EntryType::BlockDev | EntryType::Pipe
        ) {
            entry.size = 0;
        }
        let mut stored = entry.size;

        if !ext.sparse.is_empty() {
            let data_start = self.reader.offset();
            let pax_map = if ext.sparse.map_in_data() {
                self.read_data_map(&ext, stored)
            } else {
                ext.sparse.header_map().and_then(|m| {
                    m.ok_or_else(|| TarError::InvalidHeader("sparse header without map".to_string()))
                        .map(|m| (m, 0))
                })
            };
            match pax_map {
                Ok((map, map_len)) => {
                    stored -= map_len;
                    entry.size = stored;
                    entry.entry_type = EntryType::SparseFile;
                    sparse = Some(map);
                }
                Err(e) if e.is_entry_error() => {
                    let consumed = self.reader.offset() - data_start;
                    return self.fail_entry(align_block(stored) - consumed, e);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(mut map) = sparse {
            if let Err(e) = map.validate() {
                return self.fail_entry(align_block(stored), e);
            }
            let real = ext.sparse.real_size.or(ext.real_size);
            if let Some(real) = real {
                if ext.size.is_some_and(|s| s > real) {
                    log::warn!(
                        "{}: archived size {} exceeds sparse real size {}; using real size",
                        entry.name,
                        stored,
                        real
                    );
                }
                map.set_real_size(real);
            }
            entry.real_size = map.real_size();
            entry.sparse = Some(map);
        } else {
            entry.real_size = entry.size;
        }

        if entry.name.is_empty() {
            return self.fail_entry(align_block(stored), TarError::BadName(String::new()));
        }
        if entry.entry_type == EntryType::Dir && !entry.name.ends_with('/') {
            entry.name.push('/');
        }

        entry.header_size = self.reader.offset() - start;
        self.data_remaining = stored;
        self.pad_remaining = padding_needed(stored) as u64;

        log::debug!(
            "entry {:?} type {:?} size {} at offset {}",
            entry.name,
            entry.entry_type,
            entry.size,
            entry.position
        );
        Ok(Some(entry))
    }

    /// Old GNU sparse map: header pairs plus continuation blocks
    fn read_old_sparse(&mut self, block: &header::Block) -> TarResult<SparseMap> {
        let old = gnu::parse_old_sparse(block)?;
        let mut pairs = old.pairs;
        let mut more = old.is_extended;
        while more {
            self.state = AssemblerState::HaveSparseContinuation;
            let ext = match self.reader.read_block()? {
                Some(b) => *b,
                None => {
                    return Err(TarError::UnexpectedEof(
                        "sparse continuation block".to_string(),
                    ))
                }
            };
            let (extra, next) = gnu::parse_sparse_continuation(&ext)?;
            pairs.extend(extra);
            more = next;
        }
        let stored = pairs
            .iter()
            .try_fold(0u64, |total, p| total.checked_add(p.1))
            .ok_or_else(|| TarError::InvalidHeader("sparse region lengths overflow".to_string()))?;
        SparseMap::from_pairs(&pairs, old.real_size.unwrap_or(stored))
    }

    /// pax 1.0 map text at the start of the data section
    ///
    /// Returns the map and the bytes it occupies, padding included.
    fn read_data_map(&mut self, ext: &ExtendedHeader, stored: u64) -> TarResult<(SparseMap, u64)> {
        let real_size = ext.sparse.real_size.unwrap_or(0);
        let mut text = Vec::new();
        loop {
            if text.len() as u64 >= align_block(stored) {
                return Err(TarError::InvalidHeader(
                    "sparse map runs past the data section".to_string(),
                ));
            }
            let block = match self.reader.read_block()? {
                Some(b) => *b,
                None => return Err(TarError::UnexpectedEof("sparse map".to_string())),
            };
            text.extend_from_slice(&block);
            if let Some((map, consumed)) = SparseMap::parse_data_map(&text, real_size)? {
                if consumed > stored {
                    return Err(TarError::InvalidHeader(
                        "sparse map runs past the data section".to_string(),
                    ));
                }
                return Ok((map, consumed));
            }
        }
    }
}
