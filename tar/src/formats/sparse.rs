//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Sparse file maps
//!
//! A sparse member stores only its data regions. The map lists the
//! regions in file order; everything between them is a hole.
//!
//! Map sources:
//! - old GNU: up to 4 pairs in the header, 21 more per continuation block
//! - pax 0.0: repeated GNU.sparse.offset / GNU.sparse.numbytes records
//! - pax 0.1: GNU.sparse.map = "off,len,off,len,..."
//! - pax 1.0: decimal text at the start of the data section

use crate::blocked_io::align_block;
use crate::error::{TarError, TarResult};
use crate::fs::OutputFile;
use std::io::{Read, Seek, SeekFrom, Write};

/// One stored region of a sparse file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseRegion {
    pub offset: u64,
    pub length: u64,
}

impl SparseRegion {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Ordered, non-overlapping list of regions plus the logical file size
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseMap {
    regions: Vec<SparseRegion>,
    real_size: u64,
}

impl SparseMap {
    pub fn new(real_size: u64) -> Self {
        SparseMap {
            regions: Vec::new(),
            real_size,
        }
    }

    /// Build a map from (offset, length) pairs
    pub fn from_pairs(pairs: &[(u64, u64)], real_size: u64) -> TarResult<Self> {
        let mut map = SparseMap::new(real_size);
        for &(offset, length) in pairs {
            map.push(offset, length)?;
        }
        Ok(map)
    }

    /// Append a region; it must start at or after the end of the previous one
    pub fn push(&mut self, offset: u64, length: u64) -> TarResult<()> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| TarError::InvalidHeader("sparse region overflows".to_string()))?;
        if let Some(last) = self.regions.last() {
            if offset < last.end() {
                return Err(TarError::InvalidHeader(format!(
                    "sparse region at {} overlaps region ending at {}",
                    offset,
                    last.end()
                )));
            }
        }
        if end > self.real_size {
            self.real_size = end;
        }
        self.regions.push(SparseRegion { offset, length });
        Ok(())
    }

    pub fn regions(&self) -> &[SparseRegion] {
        &self.regions
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Logical size of the expanded file
    pub fn real_size(&self) -> u64 {
        self.real_size
    }

    /// Override the logical size; never shrinks below the last region
    pub fn set_real_size(&mut self, size: u64) {
        let end = self.regions.last().map(|r| r.end()).unwrap_or(0);
        self.real_size = std::cmp::max(size, end);
    }

    /// Bytes of region data stored in the archive
    pub fn stored_size(&self) -> u64 {
        self.regions.iter().map(|r| r.length).sum()
    }

    /// A map needs at least one region to describe anything
    pub fn validate(&self) -> TarResult<()> {
        if self.regions.is_empty() {
            return Err(TarError::InvalidHeader("sparse map has no regions".to_string()));
        }
        Ok(())
    }

    /// Parse a pax 0.1 "GNU.sparse.map" value
    pub fn parse_map_list(value: &str, real_size: u64) -> TarResult<Self> {
        let numbers: Vec<u64> = value
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.trim()
                    .parse()
                    .map_err(|_| TarError::InvalidHeader(format!("invalid sparse map value: {}", s)))
            })
            .collect::<TarResult<_>>()?;
        if numbers.len() % 2 != 0 {
            return Err(TarError::InvalidHeader(
                "sparse map has an odd number of values".to_string(),
            ));
        }
        let pairs: Vec<(u64, u64)> = numbers.chunks(2).map(|c| (c[0], c[1])).collect();
        Self::from_pairs(&pairs, real_size)
    }

    /// Parse the pax 1.0 map text at the start of a data section
    ///
    /// Returns `Ok(None)` when `text` does not yet hold the complete map.
    /// On success the second value is the number of bytes the map occupies
    /// in the data section, padded to a block boundary.
    pub fn parse_data_map(text: &[u8], real_size: u64) -> TarResult<Option<(Self, u64)>> {
        let mut lines = DecimalLines { text, pos: 0 };
        let count = match lines.next_number()? {
            Some(n) => n,
            None => return Ok(None),
        };
        if count == 0 {
            return Err(TarError::InvalidHeader("sparse map has no regions".to_string()));
        }

        let mut map = SparseMap::new(real_size);
        for _ in 0..count {
            let offset = match lines.next_number()? {
                Some(n) => n,
                None => return Ok(None),
            };
            let length = match lines.next_number()? {
                Some(n) => n,
                None => return Ok(None),
            };
            map.push(offset, length)?;
        }
        Ok(Some((map, align_block(lines.pos as u64))))
    }

    /// Write the stored regions from `data` into `out` at their offsets,
    /// then size the file to the logical length.
    pub fn expand<R: Read + ?Sized>(&self, data: &mut R, out: &mut dyn OutputFile) -> TarResult<()> {
        let mut buf = vec![0u8; 64 * 1024];
        for region in &self.regions {
            out.seek(SeekFrom::Start(region.offset))?;
            let mut remaining = region.length;
            while remaining > 0 {
                let want = std::cmp::min(remaining, buf.len() as u64) as usize;
                let n = data.read(&mut buf[..want])?;
                if n == 0 {
                    return Err(TarError::UnexpectedEof(format!(
                        "sparse region at offset {}",
                        region.offset
                    )));
                }
                out.write_all(&buf[..n])?;
                remaining -= n as u64;
            }
        }
        out.set_len(self.real_size)?;
        Ok(())
    }

    /// Region containing logical offset `pos`, or the next region after it
    pub fn region_at(&self, pos: u64) -> Option<&SparseRegion> {
        self.regions.iter().find(|r| r.end() > pos)
    }
}

/// Newline-terminated decimal numbers
struct DecimalLines<'a> {
    text: &'a [u8],
    pos: usize,
}

impl DecimalLines<'_> {
    fn next_number(&mut self) -> TarResult<Option<u64>> {
        let rest = &self.text[self.pos..];
        let nl = match rest.iter().position(|&b| b == b'\n') {
            Some(n) => n,
            None => {
                if rest.iter().any(|b| !b.is_ascii_digit()) {
                    return Err(TarError::InvalidHeader("malformed sparse map".to_string()));
                }
                return Ok(None);
            }
        };
        let line = std::str::from_utf8(&rest[..nl])
            .map_err(|_| TarError::InvalidHeader("malformed sparse map".to_string()))?;
        let value = line
            .parse()
            .map_err(|_| TarError::InvalidHeader(format!("invalid sparse map line: {:?}", line)))?;
        self.pos += nl + 1;
        Ok(Some(value))
    }
}
