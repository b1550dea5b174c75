//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! GNU extension records
//!
//! - 'L' / 'K': the data section is the long name or link target of the
//!   next header, NUL-terminated.
//! - 'S': old-style sparse header. Four (offset, length) pairs live in
//!   the header; when the isextended byte is set, continuation blocks of
//!   21 pairs follow before the data section.

use crate::error::{TarError, TarResult};
use crate::formats::header::{
    decode_numeric, encode_numeric, Block, GNU_ISEXTENDED_OFF, GNU_REALSIZE_OFF, GNU_SPARSE_OFF,
};

/// Name field used by 'L' and 'K' headers
pub const LONGLINK_NAME: &str = "././@LongLink";

/// Pairs held in the main header
pub const SPARSE_IN_HEADER: usize = 4;
/// Pairs held in each continuation block
pub const SPARSE_IN_EXTENSION: usize = 21;
const SPARSE_PAIR_LEN: usize = 24;
const EXTENSION_FLAG_OFF: usize = SPARSE_IN_EXTENSION * SPARSE_PAIR_LEN;

/// Data section of an 'L'/'K' record for `name`
pub fn long_name_data(name: &str) -> Vec<u8> {
    let mut data = name.as_bytes().to_vec();
    data.push(0);
    data
}

/// Recover the string from an 'L'/'K' data section
pub fn parse_long_name(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}

/// Sparse fields of an old GNU 'S' header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OldSparseHeader {
    pub pairs: Vec<(u64, u64)>,
    pub is_extended: bool,
    pub real_size: Option<u64>,
}

fn parse_pairs(area: &[u8], count: usize) -> TarResult<Vec<(u64, u64)>> {
    let mut pairs = Vec::new();
    for i in 0..count {
        let pair = &area[i * SPARSE_PAIR_LEN..(i + 1) * SPARSE_PAIR_LEN];
        // An empty offset field ends the list
        if pair[0] == 0 {
            break;
        }
        let offset = decode_numeric(&pair[..12])?;
        let length = decode_numeric(&pair[12..])?;
        pairs.push((offset, length));
    }
    Ok(pairs)
}

/// Decode the sparse area of an 'S' header
pub fn parse_old_sparse(block: &Block) -> TarResult<OldSparseHeader> {
    let area = &block[GNU_SPARSE_OFF..GNU_SPARSE_OFF + SPARSE_IN_HEADER * SPARSE_PAIR_LEN];
    let real = &block[GNU_REALSIZE_OFF..GNU_REALSIZE_OFF + 12];
    Ok(OldSparseHeader {
        pairs: parse_pairs(area, SPARSE_IN_HEADER)?,
        is_extended: block[GNU_ISEXTENDED_OFF] != 0,
        real_size: if real.iter().all(|&b| b == 0) {
            None
        } else {
            Some(decode_numeric(real)?)
        },
    })
}

/// Decode one continuation block; returns its pairs and whether
/// another block follows.
pub fn parse_sparse_continuation(block: &Block) -> TarResult<(Vec<(u64, u64)>, bool)> {
    if block.iter().all(|&b| b == 0) {
        return Err(TarError::InvalidHeader(
            "zero block in sparse continuation".to_string(),
        ));
    }
    let pairs = parse_pairs(&block[..EXTENSION_FLAG_OFF], SPARSE_IN_EXTENSION)?;
    Ok((pairs, block[EXTENSION_FLAG_OFF] != 0))
}

/// Store up to `capacity` pairs into a sparse area; returns how many fit
pub fn write_pairs(area: &mut [u8], pairs: &[(u64, u64)], capacity: usize) -> TarResult<usize> {
    let n = std::cmp::min(pairs.len(), capacity);
    for (i, &(offset, length)) in pairs[..n].iter().enumerate() {
        let slot = &mut area[i * SPARSE_PAIR_LEN..(i + 1) * SPARSE_PAIR_LEN];
        encode_numeric(&mut slot[..12], offset, "sparse offset")?;
        encode_numeric(&mut slot[12..], length, "sparse length")?;
    }
    Ok(n)
}

/// Build a continuation block holding `pairs` (at most 21)
pub fn build_sparse_continuation(pairs: &[(u64, u64)], more: bool) -> TarResult<Block> {
    let mut block = [0u8; 512];
    write_pairs(&mut block[..EXTENSION_FLAG_OFF], pairs, SPARSE_IN_EXTENSION)?;
    block[EXTENSION_FLAG_OFF] = more as u8;
    Ok(block)
}
