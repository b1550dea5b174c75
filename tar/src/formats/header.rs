//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! 512-byte header record codec
//!
//! Common layout (all formats):
//! - name:     100 bytes (offset 0)
//! - mode:       8 bytes (offset 100)
//! - uid:        8 bytes (offset 108)
//! - gid:        8 bytes (offset 116)
//! - size:      12 bytes (offset 124)
//! - mtime:     12 bytes (offset 136)
//! - chksum:     8 bytes (offset 148)
//! - typeflag:   1 byte  (offset 156)
//! - linkname: 100 bytes (offset 157)
//!
//! ustar/posix/star/gnu continue with magic, version, uname, gname,
//! devmajor and devminor. The area from offset 345 differs:
//! - ustar/posix: prefix[155]
//! - star:        prefix[131], atime[12], ctime[12], ..., "tar\0" at 508
//! - gnu:         atime[12], ctime[12], offset[12], longnames[4], pad[1],
//!                sparse[4 * 24], isextended[1], realsize[12]
//!
//! Numeric fields are octal ASCII, or base-256 binary when the first
//! byte has its top bit set.

use crate::archive::{ArchiveFormat, EntryType};
use crate::blocked_io::TAR_BLOCK_SIZE;
use crate::error::{TarError, TarResult};

pub type Block = [u8; TAR_BLOCK_SIZE];

pub const NAME_LEN: usize = 100;
pub const LINKNAME_LEN: usize = 100;
pub const UNAME_LEN: usize = 32;
pub const GNAME_LEN: usize = 32;

// Header field offsets
pub const NAME_OFF: usize = 0;
pub const MODE_OFF: usize = 100;
pub const UID_OFF: usize = 108;
pub const GID_OFF: usize = 116;
pub const SIZE_OFF: usize = 124;
pub const MTIME_OFF: usize = 136;
pub const CHKSUM_OFF: usize = 148;
pub const CHKSUM_LEN: usize = 8;
pub const TYPEFLAG_OFF: usize = 156;
pub const LINKNAME_OFF: usize = 157;
pub const MAGIC_OFF: usize = 257;
pub const VERSION_OFF: usize = 263;
pub const UNAME_OFF: usize = 265;
pub const GNAME_OFF: usize = 297;
pub const DEVMAJOR_OFF: usize = 329;
pub const DEVMINOR_OFF: usize = 337;
pub const PREFIX_OFF: usize = 345;

// star layout
pub const STAR_ATIME_OFF: usize = 476;
pub const STAR_CTIME_OFF: usize = 488;
pub const STAR_TRAILER_OFF: usize = 508;

// old GNU layout
pub const GNU_ATIME_OFF: usize = 345;
pub const GNU_CTIME_OFF: usize = 357;
pub const GNU_SPARSE_OFF: usize = 386;
pub const GNU_ISEXTENDED_OFF: usize = 482;
pub const GNU_REALSIZE_OFF: usize = 483;

pub const USTAR_MAGIC: &[u8; 6] = b"ustar\0";
pub const USTAR_VERSION: &[u8; 2] = b"00";
pub const GNU_MAGIC: &[u8; 8] = b"ustar  \0";

// Type flags
pub const REGTYPE: u8 = b'0';
pub const AREGTYPE: u8 = b'\0';
pub const LNKTYPE: u8 = b'1';
pub const SYMTYPE: u8 = b'2';
pub const CHRTYPE: u8 = b'3';
pub const BLKTYPE: u8 = b'4';
pub const DIRTYPE: u8 = b'5';
pub const FIFOTYPE: u8 = b'6';
pub const CONTTYPE: u8 = b'7';
pub const PAX_XHDR: u8 = b'x';
pub const PAX_GHDR: u8 = b'g';
pub const SOLARIS_XHDR: u8 = b'X';
pub const GNU_DUMPDIR: u8 = b'D';
pub const GNU_LONGLINK: u8 = b'K';
pub const GNU_LONGNAME: u8 = b'L';
pub const GNU_MULTIVOL: u8 = b'M';
pub const GNU_SPARSE: u8 = b'S';
pub const GNU_VOLHDR: u8 = b'V';

/// One decoded header record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub format: ArchiveFormat,
    pub typeflag: u8,
    /// Contents of the name field
    pub name: String,
    /// Contents of the prefix field (ustar, posix, star)
    pub prefix: String,
    pub link_name: String,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub size: u64,
    pub mtime: i64,
    pub atime: Option<i64>,
    pub ctime: Option<i64>,
    pub user_name: String,
    pub group_name: String,
    pub devmajor: u32,
    pub devminor: u32,
}

impl Header {
    /// Full member path, prefix and name joined with '/'
    pub fn path(&self) -> String {
        if self.prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.prefix, self.name)
        }
    }

    /// Header for a special record (long name, pax data, ...)
    pub fn special(format: ArchiveFormat, typeflag: u8, name: &str, size: u64) -> Self {
        Header {
            format,
            typeflag,
            name: name.to_string(),
            size,
            ..Default::default()
        }
    }
}

/// Parse a NUL-terminated string field
pub fn parse_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

/// Decode an unsigned numeric field (octal or base-256)
pub fn decode_numeric(field: &[u8]) -> TarResult<u64> {
    if field.first().is_some_and(|&b| b & 0x80 != 0) {
        let value = decode_base256(field)?;
        return u64::try_from(value)
            .map_err(|_| TarError::InvalidHeader(format!("negative value {}", value)));
    }
    decode_octal(field)
}

/// Decode a signed numeric field such as a timestamp
pub fn decode_signed(field: &[u8]) -> TarResult<i64> {
    if field.first().is_some_and(|&b| b & 0x80 != 0) {
        let value = decode_base256(field)?;
        return i64::try_from(value)
            .map_err(|_| TarError::InvalidHeader(format!("time out of range: {}", value)));
    }
    let value = decode_octal(field)?;
    i64::try_from(value).map_err(|_| TarError::InvalidHeader(format!("time out of range: {}", value)))
}

fn decode_base256(field: &[u8]) -> TarResult<i128> {
    // Bit 6 of the first byte is the sign bit once the marker is removed
    let first = field[0] & 0x7f;
    let mut value: i128 = if first & 0x40 != 0 {
        first as i128 - 0x80
    } else {
        first as i128
    };
    for &b in &field[1..] {
        value = value
            .checked_mul(256)
            .and_then(|v| v.checked_add(b as i128))
            .ok_or_else(|| TarError::InvalidHeader("base-256 value overflows".to_string()))?;
    }
    Ok(value)
}

/// Octal ASCII, tolerating leading spaces and any NUL/space terminator
fn decode_octal(field: &[u8]) -> TarResult<u64> {
    let start = field.iter().position(|&b| b != b' ').unwrap_or(field.len());
    let mut value: u64 = 0;
    let mut end = start;
    while end < field.len() && (b'0'..=b'7').contains(&field[end]) {
        value = value
            .checked_mul(8)
            .and_then(|v| v.checked_add((field[end] - b'0') as u64))
            .ok_or_else(|| TarError::InvalidHeader("octal value overflows".to_string()))?;
        end += 1;
    }
    match field.get(end).copied() {
        None | Some(0) | Some(b' ') => Ok(value),
        Some(other) if end > start => {
            log::debug!("octal field stopped at byte {:#x}", other);
            Ok(value)
        }
        Some(_) => Err(TarError::InvalidHeader(format!(
            "invalid octal field: {:?}",
            String::from_utf8_lossy(field)
        ))),
    }
}

/// Encode an unsigned value into a numeric field
///
/// Octal with a NUL terminator is preferred; a full-width octal number
/// without terminator comes next; base-256 is the last resort.
pub fn encode_numeric(field: &mut [u8], value: u64, name: &'static str) -> TarResult<()> {
    let width = field.len();
    if fits_octal(value, width - 1) {
        let s = format!("{:0w$o}", value, w = width - 1);
        field[..width - 1].copy_from_slice(s.as_bytes());
        field[width - 1] = 0;
        return Ok(());
    }
    if fits_octal(value, width) {
        let s = format!("{:0w$o}", value, w = width);
        field.copy_from_slice(s.as_bytes());
        return Ok(());
    }
    encode_base256(field, value as i128, name)
}

/// Encode a signed value (timestamps); negatives always use base-256
pub fn encode_signed(field: &mut [u8], value: i64, name: &'static str) -> TarResult<()> {
    if value >= 0 {
        return encode_numeric(field, value as u64, name);
    }
    encode_base256(field, value as i128, name)
}

fn fits_octal(value: u64, digits: usize) -> bool {
    let bits = 3 * digits;
    bits >= 64 || value < (1u64 << bits)
}

fn encode_base256(field: &mut [u8], value: i128, name: &'static str) -> TarResult<()> {
    let width = field.len();
    // One bit of the first byte is the marker, one more is the sign
    let bits = 8 * width as u32 - 2;
    let limit: i128 = 1i128 << std::cmp::min(bits, 126);
    if value >= limit || value < -limit {
        return Err(TarError::EncodingError { field: name, value });
    }
    let mut v = value;
    for slot in field.iter_mut().rev() {
        *slot = (v & 0xff) as u8;
        v >>= 8;
    }
    field[0] |= 0x80;
    Ok(())
}

/// Sum of header bytes with the checksum field read as spaces
pub fn checksum_unsigned(block: &Block) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if (CHKSUM_OFF..CHKSUM_OFF + CHKSUM_LEN).contains(&i) {
                b' ' as u32
            } else {
                b as u32
            }
        })
        .sum()
}

/// Same sum over signed chars, as some historic writers computed it
pub fn checksum_signed(block: &Block) -> i32 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if (CHKSUM_OFF..CHKSUM_OFF + CHKSUM_LEN).contains(&i) {
                b' ' as i32
            } else {
                b as i8 as i32
            }
        })
        .sum()
}

/// Verify header checksum, accepting either summing convention
pub fn verify_checksum(block: &Block) -> bool {
    let stored = match decode_octal(&block[CHKSUM_OFF..CHKSUM_OFF + CHKSUM_LEN]) {
        Ok(v) => v as i64,
        Err(_) => return false,
    };
    stored == checksum_unsigned(block) as i64 || stored == checksum_signed(block) as i64
}

/// Compute and store the checksum in the layout the format expects
pub fn write_checksum(block: &mut Block, format: ArchiveFormat) {
    let sum = checksum_unsigned(block);
    let field = &mut block[CHKSUM_OFF..CHKSUM_OFF + CHKSUM_LEN];
    let s = match format {
        ArchiveFormat::Gnu | ArchiveFormat::V7 => format!("{:06o}\0 ", sum),
        _ => format!("{:07o}\0", sum),
    };
    field.copy_from_slice(&s.as_bytes()[..CHKSUM_LEN]);
}

fn looks_like_star_time(field: &[u8]) -> bool {
    field.len() == 12 && field[..11].iter().all(|b| (b'0'..=b'7').contains(b)) && field[11] == b' '
}

/// Classify a (non-zero) header block by its magic
pub fn detect_format(block: &Block) -> TarResult<ArchiveFormat> {
    let magic = &block[MAGIC_OFF..MAGIC_OFF + 6];
    if magic == USTAR_MAGIC {
        let trailer = &block[STAR_TRAILER_OFF..STAR_TRAILER_OFF + 4];
        let star_times = block[STAR_ATIME_OFF - 1] == 0
            && looks_like_star_time(&block[STAR_ATIME_OFF..STAR_ATIME_OFF + 12])
            && looks_like_star_time(&block[STAR_CTIME_OFF..STAR_CTIME_OFF + 12]);
        if trailer == b"tar\0" || star_times {
            return Ok(ArchiveFormat::Star);
        }
        return Ok(ArchiveFormat::Ustar);
    }
    if &block[MAGIC_OFF..MAGIC_OFF + 7] == b"ustar  " {
        return Ok(ArchiveFormat::Gnu);
    }
    if block[MAGIC_OFF..VERSION_OFF + 2].iter().all(|&b| b == 0) {
        return Ok(ArchiveFormat::V7);
    }
    Err(TarError::UnsupportedFormat(format!(
        "unknown magic {:?}",
        String::from_utf8_lossy(&block[MAGIC_OFF..VERSION_OFF + 2])
    )))
}

/// Parse a header block
///
/// `position` is the stream offset of the block, used for diagnostics.
pub fn parse_header(block: &Block, position: u64) -> TarResult<Header> {
    if !verify_checksum(block) {
        return Err(TarError::ChecksumError { position });
    }
    let format = detect_format(block)?;

    let mut header = Header {
        format,
        typeflag: block[TYPEFLAG_OFF],
        name: parse_string(&block[NAME_OFF..NAME_OFF + NAME_LEN]),
        link_name: parse_string(&block[LINKNAME_OFF..LINKNAME_OFF + LINKNAME_LEN]),
        mode: (decode_numeric(&block[MODE_OFF..MODE_OFF + 8])? & 0o7777) as u32,
        uid: decode_numeric(&block[UID_OFF..UID_OFF + 8])?,
        gid: decode_numeric(&block[GID_OFF..GID_OFF + 8])?,
        size: decode_numeric(&block[SIZE_OFF..SIZE_OFF + 12])?,
        mtime: decode_signed(&block[MTIME_OFF..MTIME_OFF + 12])?,
        ..Default::default()
    };

    if format == ArchiveFormat::V7 {
        return Ok(header);
    }

    header.user_name = parse_string(&block[UNAME_OFF..UNAME_OFF + UNAME_LEN]);
    header.group_name = parse_string(&block[GNAME_OFF..GNAME_OFF + GNAME_LEN]);
    header.devmajor = decode_numeric(&block[DEVMAJOR_OFF..DEVMAJOR_OFF + 8])? as u32;
    header.devminor = decode_numeric(&block[DEVMINOR_OFF..DEVMINOR_OFF + 8])? as u32;

    match format {
        ArchiveFormat::Ustar | ArchiveFormat::Posix => {
            header.prefix = parse_string(&block[PREFIX_OFF..PREFIX_OFF + 155]);
        }
        // star sparse headers reuse the GNU sparse area over the prefix
        ArchiveFormat::Star if header.typeflag == GNU_SPARSE => {}
        ArchiveFormat::Star => {
            header.prefix = parse_string(&block[PREFIX_OFF..PREFIX_OFF + 131]);
            header.atime = optional_time(&block[STAR_ATIME_OFF..STAR_ATIME_OFF + 12])?;
            header.ctime = optional_time(&block[STAR_CTIME_OFF..STAR_CTIME_OFF + 12])?;
        }
        ArchiveFormat::Gnu => {
            header.atime = optional_time(&block[GNU_ATIME_OFF..GNU_ATIME_OFF + 12])?;
            header.ctime = optional_time(&block[GNU_CTIME_OFF..GNU_CTIME_OFF + 12])?;
        }
        ArchiveFormat::V7 => {}
    }

    Ok(header)
}

fn optional_time(field: &[u8]) -> TarResult<Option<i64>> {
    if field.iter().all(|&b| b == 0) {
        return Ok(None);
    }
    Ok(Some(decode_signed(field)?))
}

/// Write a string to a field; longer input is cut at the field width
pub fn write_string(buf: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let len = std::cmp::min(bytes.len(), buf.len());
    buf[..len].copy_from_slice(&bytes[..len]);
}

/// Build a header block
pub fn build_header(header: &Header) -> TarResult<Block> {
    let mut block = [0u8; TAR_BLOCK_SIZE];
    let format = header.format;

    write_string(&mut block[NAME_OFF..NAME_OFF + NAME_LEN], &header.name);
    encode_numeric(&mut block[MODE_OFF..MODE_OFF + 8], header.mode as u64, "mode")?;
    encode_numeric(&mut block[UID_OFF..UID_OFF + 8], header.uid, "uid")?;
    encode_numeric(&mut block[GID_OFF..GID_OFF + 8], header.gid, "gid")?;
    encode_numeric(&mut block[SIZE_OFF..SIZE_OFF + 12], header.size, "size")?;
    encode_signed(&mut block[MTIME_OFF..MTIME_OFF + 12], header.mtime, "mtime")?;
    block[TYPEFLAG_OFF] = header.typeflag;
    write_string(
        &mut block[LINKNAME_OFF..LINKNAME_OFF + LINKNAME_LEN],
        &header.link_name,
    );

    if format != ArchiveFormat::V7 {
        if format == ArchiveFormat::Gnu {
            block[MAGIC_OFF..MAGIC_OFF + 8].copy_from_slice(GNU_MAGIC);
        } else {
            block[MAGIC_OFF..MAGIC_OFF + 6].copy_from_slice(USTAR_MAGIC);
            block[VERSION_OFF..VERSION_OFF + 2].copy_from_slice(USTAR_VERSION);
        }
        write_string(&mut block[UNAME_OFF..UNAME_OFF + UNAME_LEN], &header.user_name);
        write_string(&mut block[GNAME_OFF..GNAME_OFF + GNAME_LEN], &header.group_name);
        encode_numeric(
            &mut block[DEVMAJOR_OFF..DEVMAJOR_OFF + 8],
            header.devmajor as u64,
            "devmajor",
        )?;
        encode_numeric(
            &mut block[DEVMINOR_OFF..DEVMINOR_OFF + 8],
            header.devminor as u64,
            "devminor",
        )?;
    }

    match format {
        ArchiveFormat::Ustar | ArchiveFormat::Posix => {
            write_string(&mut block[PREFIX_OFF..PREFIX_OFF + 155], &header.prefix);
        }
        ArchiveFormat::Star => {
            write_string(&mut block[PREFIX_OFF..PREFIX_OFF + 131], &header.prefix);
            if let Some(atime) = header.atime {
                write_star_time(&mut block[STAR_ATIME_OFF..STAR_ATIME_OFF + 12], atime, "atime")?;
            }
            if let Some(ctime) = header.ctime {
                write_star_time(&mut block[STAR_CTIME_OFF..STAR_CTIME_OFF + 12], ctime, "ctime")?;
            }
            block[STAR_TRAILER_OFF..STAR_TRAILER_OFF + 4].copy_from_slice(b"tar\0");
        }
        ArchiveFormat::Gnu => {
            if let Some(atime) = header.atime {
                encode_signed(&mut block[GNU_ATIME_OFF..GNU_ATIME_OFF + 12], atime, "atime")?;
            }
            if let Some(ctime) = header.ctime {
                encode_signed(&mut block[GNU_CTIME_OFF..GNU_CTIME_OFF + 12], ctime, "ctime")?;
            }
        }
        ArchiveFormat::V7 => {}
    }

    write_checksum(&mut block, format);
    Ok(block)
}

/// star stores times as 11 octal digits and a space
fn write_star_time(field: &mut [u8], value: i64, name: &'static str) -> TarResult<()> {
    if (0..(1i64 << 33)).contains(&value) {
        let s = format!("{:011o} ", value);
        field.copy_from_slice(s.as_bytes());
        Ok(())
    } else {
        encode_signed(field, value, name)
    }
}

/// Split a path into (prefix, name) for the ustar prefix field
///
/// Returns None when no '/' produces a name of at most 100 bytes and a
/// prefix of at most `prefix_len` bytes.
pub fn split_path(path: &str, prefix_len: usize) -> Option<(String, String)> {
    let bytes = path.as_bytes();
    if bytes.len() <= NAME_LEN {
        return Some((String::new(), path.to_string()));
    }
    if bytes.len() > NAME_LEN + prefix_len + 1 {
        return None;
    }
    // The longest prefix keeps the name part short
    let upper = std::cmp::min(prefix_len, bytes.len() - 1);
    (1..=upper)
        .rev()
        .filter(|&i| bytes[i] == b'/')
        .find(|&i| bytes.len() - i - 1 <= NAME_LEN && bytes.len() - i - 1 > 0)
        .map(|i| (path[..i].to_string(), path[i + 1..].to_string()))
}

/// Map a typeflag to the entry type it denotes
pub fn entry_type_for(typeflag: u8, name: &str) -> EntryType {
    match typeflag {
        REGTYPE | CONTTYPE => EntryType::File,
        AREGTYPE => {
            if name.ends_with('/') {
                EntryType::Dir
            } else {
                EntryType::File
            }
        }
        LNKTYPE => EntryType::HardLink,
        SYMTYPE => EntryType::SymLink,
        CHRTYPE => EntryType::CharDev,
        BLKTYPE => EntryType::BlockDev,
        DIRTYPE | GNU_DUMPDIR => EntryType::Dir,
        FIFOTYPE => EntryType::Pipe,
        GNU_VOLHDR => EntryType::VolumeHeader,
        GNU_SPARSE => EntryType::SparseFile,
        _ => EntryType::Unknown,
    }
}

/// Convert EntryType to typeflag
pub fn typeflag_for(entry_type: EntryType) -> u8 {
    match entry_type {
        EntryType::File | EntryType::SparseFile | EntryType::Unknown => REGTYPE,
        EntryType::HardLink => LNKTYPE,
        EntryType::SymLink => SYMTYPE,
        EntryType::CharDev => CHRTYPE,
        EntryType::BlockDev => BLKTYPE,
        EntryType::Dir => DIRTYPE,
        EntryType::Pipe => FIFOTYPE,
        EntryType::VolumeHeader => GNU_VOLHDR,
    }
}
