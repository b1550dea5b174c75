//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! POSIX pax extended headers
//!
//! Extended headers carry metadata that does not fit ustar fields:
//! - long paths and link targets
//! - sizes and ids beyond the octal range
//! - subsecond timestamps
//! - GNU sparse file maps
//!
//! Records are "%d %s=%s\n" where the decimal length counts the whole
//! record, newline included. typeflag 'x' (or Solaris 'X') applies to
//! the next entry, 'g' to every following entry.

use crate::archive::{ArchiveEntry, Timestamp};
use crate::error::{TarError, TarResult};
use crate::formats::header::{GNAME_LEN, LINKNAME_LEN, UNAME_LEN};
use crate::formats::sparse::SparseMap;

const MAX_OCTAL_SIZE: u64 = 0o77777777777;
const MAX_OCTAL_ID: u64 = 0o7777777;

/// GNU sparse keywords seen in one extended header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaxSparse {
    pub name: Option<String>,
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub real_size: Option<u64>,
    /// pax 0.0: offsets and lengths arrive as separate repeated records
    pub offsets: Vec<u64>,
    pub numbytes: Vec<u64>,
    /// pax 0.1
    pub map: Option<String>,
}

impl PaxSparse {
    pub fn is_empty(&self) -> bool {
        *self == PaxSparse::default()
    }

    /// 1.0 stores the map in the data section instead of the header
    pub fn map_in_data(&self) -> bool {
        self.major == Some(1)
    }

    /// Build the map carried in the header itself (formats 0.0 and 0.1)
    pub fn header_map(&self) -> TarResult<Option<SparseMap>> {
        let real_size = self.real_size.unwrap_or(0);
        if let Some(ref list) = self.map {
            return Ok(Some(SparseMap::parse_map_list(list, real_size)?));
        }
        if self.offsets.is_empty() && self.numbytes.is_empty() {
            return Ok(None);
        }
        if self.offsets.len() != self.numbytes.len() {
            return Err(TarError::InvalidHeader(format!(
                "{} sparse offsets but {} lengths",
                self.offsets.len(),
                self.numbytes.len()
            )));
        }
        let pairs: Vec<(u64, u64)> = self
            .offsets
            .iter()
            .copied()
            .zip(self.numbytes.iter().copied())
            .collect();
        Ok(Some(SparseMap::from_pairs(&pairs, real_size)?))
    }
}

/// Extended header keywords
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtendedHeader {
    pub path: Option<String>,
    pub linkpath: Option<String>,
    pub uname: Option<String>,
    pub gname: Option<String>,
    pub mtime: Option<Timestamp>,
    pub atime: Option<Timestamp>,
    pub ctime: Option<Timestamp>,
    pub size: Option<u64>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    /// SCHILY.realsize
    pub real_size: Option<u64>,
    pub sparse: PaxSparse,
}

impl ExtendedHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == ExtendedHeader::default()
    }

    /// Parse extended header records from data
    pub fn parse(data: &[u8]) -> TarResult<Self> {
        let mut header = ExtendedHeader::new();
        let mut pos = 0;

        while pos < data.len() {
            // GNU writers pad the data section with NULs
            if data[pos] == 0 {
                break;
            }

            let space_pos = data[pos..].iter().position(|&b| b == b' ').ok_or_else(|| {
                TarError::InvalidHeader("invalid extended header format".to_string())
            })?;

            let len_str = std::str::from_utf8(&data[pos..pos + space_pos]).map_err(|_| {
                TarError::InvalidHeader("invalid extended header length".to_string())
            })?;
            let record_len: usize = len_str.parse().map_err(|_| {
                TarError::InvalidHeader(format!("invalid extended header length {:?}", len_str))
            })?;

            if record_len <= space_pos + 1 || pos + record_len > data.len() {
                return Err(TarError::InvalidHeader(
                    "extended header record extends past end".to_string(),
                ));
            }
            if data[pos + record_len - 1] != b'\n' {
                return Err(TarError::InvalidHeader(
                    "extended header record not newline-terminated".to_string(),
                ));
            }

            // keyword=value, without the trailing newline
            let record_start = pos + space_pos + 1;
            let record_end = pos + record_len - 1;
            let record = String::from_utf8_lossy(&data[record_start..record_end]);

            match record.find('=') {
                Some(eq_pos) => header.set_keyword(&record[..eq_pos], &record[eq_pos + 1..]),
                None => log::warn!("extended header record without '=': {:?}", record),
            }

            pos += record_len;
        }

        Ok(header)
    }

    /// Set a keyword value; malformed numbers are logged and dropped
    fn set_keyword(&mut self, keyword: &str, value: &str) {
        log::trace!("pax keyword {}={:?}", keyword, value);
        match keyword {
            "path" => self.path = non_empty(value),
            "linkpath" => self.linkpath = non_empty(value),
            "uname" => self.uname = non_empty(value),
            "gname" => self.gname = non_empty(value),
            "mtime" => self.mtime = parse_time_or_warn(keyword, value),
            "atime" => self.atime = parse_time_or_warn(keyword, value),
            "ctime" => self.ctime = parse_time_or_warn(keyword, value),
            "size" => self.size = parse_number_or_warn(keyword, value),
            "uid" => self.uid = parse_number_or_warn(keyword, value),
            "gid" => self.gid = parse_number_or_warn(keyword, value),
            "SCHILY.realsize" => self.real_size = parse_number_or_warn(keyword, value),
            "GNU.sparse.name" => self.sparse.name = non_empty(value),
            "GNU.sparse.major" => self.sparse.major = parse_number_or_warn(keyword, value),
            "GNU.sparse.minor" => self.sparse.minor = parse_number_or_warn(keyword, value),
            "GNU.sparse.realsize" | "GNU.sparse.size" => {
                self.sparse.real_size = parse_number_or_warn(keyword, value)
            }
            "GNU.sparse.offset" => {
                if let Some(n) = parse_number_or_warn(keyword, value) {
                    self.sparse.offsets.push(n);
                }
            }
            "GNU.sparse.numbytes" => {
                if let Some(n) = parse_number_or_warn(keyword, value) {
                    self.sparse.numbytes.push(n);
                }
            }
            "GNU.sparse.map" => self.sparse.map = non_empty(value),
            "GNU.sparse.numblocks" => {}
            _ => {
                // Vendor keywords (SCHILY.*, LIBARCHIVE.*) are expected noise
                if keyword.starts_with(|c: char| c.is_ascii_lowercase()) {
                    log::warn!("ignoring unknown extended header keyword '{}'", keyword);
                } else {
                    log::debug!("ignoring extended header keyword '{}'", keyword);
                }
            }
        }
    }

    /// Layer `other` on top of self; fields present in `other` win
    pub fn merge(&mut self, other: &ExtendedHeader) {
        fn over<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if src.is_some() {
                dst.clone_from(src);
            }
        }
        over(&mut self.path, &other.path);
        over(&mut self.linkpath, &other.linkpath);
        over(&mut self.uname, &other.uname);
        over(&mut self.gname, &other.gname);
        over(&mut self.mtime, &other.mtime);
        over(&mut self.atime, &other.atime);
        over(&mut self.ctime, &other.ctime);
        over(&mut self.size, &other.size);
        over(&mut self.uid, &other.uid);
        over(&mut self.gid, &other.gid);
        over(&mut self.real_size, &other.real_size);
        if !other.sparse.is_empty() {
            self.sparse = other.sparse.clone();
        }
    }

    /// Serialize extended header to bytes
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::new();

        if let Some(ref path) = self.path {
            write_pax_record(&mut data, "path", path);
        }
        if let Some(ref linkpath) = self.linkpath {
            write_pax_record(&mut data, "linkpath", linkpath);
        }
        if let Some(size) = self.size {
            write_pax_record(&mut data, "size", &size.to_string());
        }
        if let Some(uid) = self.uid {
            write_pax_record(&mut data, "uid", &uid.to_string());
        }
        if let Some(gid) = self.gid {
            write_pax_record(&mut data, "gid", &gid.to_string());
        }
        if let Some(ref uname) = self.uname {
            write_pax_record(&mut data, "uname", uname);
        }
        if let Some(ref gname) = self.gname {
            write_pax_record(&mut data, "gname", gname);
        }
        if let Some(mtime) = self.mtime {
            write_pax_record(&mut data, "mtime", &format_pax_time(mtime));
        }
        if let Some(atime) = self.atime {
            write_pax_record(&mut data, "atime", &format_pax_time(atime));
        }
        if let Some(ctime) = self.ctime {
            write_pax_record(&mut data, "ctime", &format_pax_time(ctime));
        }

        data
    }

    /// Apply extended header overrides to an ArchiveEntry
    pub fn apply_to(&self, entry: &mut ArchiveEntry) {
        if let Some(ref path) = self.path {
            entry.name = path.clone();
        }
        if let Some(ref name) = self.sparse.name {
            entry.name = name.clone();
        }
        if let Some(ref linkpath) = self.linkpath {
            entry.link_name = linkpath.clone();
        }
        if let Some(size) = self.size {
            entry.size = size;
        }
        if let Some(uid) = self.uid {
            entry.uid = uid;
        }
        if let Some(gid) = self.gid {
            entry.gid = gid;
        }
        if let Some(ref uname) = self.uname {
            entry.user_name = uname.clone();
        }
        if let Some(ref gname) = self.gname {
            entry.group_name = gname.clone();
        }
        if let Some(mtime) = self.mtime {
            entry.mtime = mtime;
        }
        if let Some(atime) = self.atime {
            entry.atime = atime;
        }
        if let Some(ctime) = self.ctime {
            entry.ctime = ctime;
        }
    }

    /// Keywords needed to carry what the ustar fields of `entry` cannot
    ///
    /// `name_fits` and `link_fits` report whether the writer managed to
    /// place the names in the name/prefix and linkname fields.
    pub fn from_entry(entry: &ArchiveEntry, name_fits: bool, link_fits: bool) -> Self {
        let mut header = ExtendedHeader::new();

        if !name_fits {
            header.path = Some(entry.name.clone());
        }
        if !link_fits {
            header.linkpath = Some(entry.link_name.clone());
        }
        if entry.size > MAX_OCTAL_SIZE {
            header.size = Some(entry.size);
        }
        if entry.uid > MAX_OCTAL_ID {
            header.uid = Some(entry.uid);
        }
        if entry.gid > MAX_OCTAL_ID {
            header.gid = Some(entry.gid);
        }
        if entry.mtime.nanos > 0 || entry.mtime.secs < 0 || entry.mtime.secs > MAX_OCTAL_SIZE as i64
        {
            header.mtime = Some(entry.mtime);
        }
        if !entry.user_name.is_ascii() || entry.user_name.len() > UNAME_LEN {
            header.uname = Some(entry.user_name.clone());
        }
        if !entry.group_name.is_ascii() || entry.group_name.len() > GNAME_LEN {
            header.gname = Some(entry.group_name.clone());
        }

        header
    }
}

/// True when a link target needs no extension record
pub fn link_fits(link: &str) -> bool {
    link.len() <= LINKNAME_LEN
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_number_or_warn(keyword: &str, value: &str) -> Option<u64> {
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            log::warn!("ignoring malformed {} value {:?}", keyword, value);
            None
        }
    }
}

fn parse_time_or_warn(keyword: &str, value: &str) -> Option<Timestamp> {
    match parse_pax_time(value) {
        Ok(t) => Some(t),
        Err(e) => {
            log::warn!("ignoring {} value: {}", keyword, e);
            None
        }
    }
}

/// Parse decimal seconds with an optional fraction
///
/// Digits past the ninth round the nanoseconds.
pub fn parse_pax_time(s: &str) -> TarResult<Timestamp> {
    let invalid = || TarError::InvalidHeader(format!("invalid pax time: {}", s));

    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let mut secs: i64 = int_part.parse().map_err(|_| invalid())?;
    let mut nanos: u64 = 0;
    for (i, b) in frac_part.bytes().take(9).enumerate() {
        nanos += (b - b'0') as u64 * 10u64.pow(8 - i as u32);
    }
    if frac_part.len() > 9 && frac_part.as_bytes()[9] >= b'5' {
        nanos += 1;
    }
    if nanos >= 1_000_000_000 {
        nanos -= 1_000_000_000;
        secs = secs.checked_add(1).ok_or_else(invalid)?;
    }

    if negative {
        // -1.25 is 2 seconds before the epoch plus 0.75
        if nanos == 0 {
            Ok(Timestamp::new(-secs, 0))
        } else {
            Ok(Timestamp::new(-secs - 1, (1_000_000_000 - nanos) as u32))
        }
    } else {
        Ok(Timestamp::new(secs, nanos as u32))
    }
}

/// Format time for a pax extended header
pub fn format_pax_time(time: Timestamp) -> String {
    if time.nanos == 0 {
        return time.secs.to_string();
    }
    let (sign, secs, nanos) = if time.secs < 0 {
        ("-", -(time.secs + 1), 1_000_000_000 - time.nanos)
    } else {
        ("", time.secs, time.nanos)
    };
    let frac = format!("{:09}", nanos);
    format!("{}{}.{}", sign, secs, frac.trim_end_matches('0'))
}

/// Write a pax extended header record
pub fn write_pax_record(data: &mut Vec<u8>, keyword: &str, value: &str) {
    // Length includes itself, so we need to calculate iteratively
    let content = format!(" {}={}\n", keyword, value);

    let mut len = content.len() + 1;
    loop {
        let total = len.to_string().len() + content.len();
        if total == len {
            break;
        }
        len = total;
    }

    data.extend_from_slice(len.to_string().as_bytes());
    data.extend_from_slice(content.as_bytes());
}

/// Name of the 'x' header that precedes `name`
pub fn extended_header_name(name: &str, sequence: u64) -> String {
    let base = name.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let ext_name = format!("PaxHeader/{}.{}", base, sequence);
    if ext_name.len() > crate::formats::header::NAME_LEN {
        format!("PaxHeader/{}", sequence)
    } else {
        ext_name
    }
}
