//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use crate::formats::sparse::SparseMap;
use std::collections::HashMap;
use std::fmt;

/// Type of archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryType {
    /// Regular file
    #[default]
    File,
    /// Hard link to an earlier member
    HardLink,
    /// Symbolic link
    SymLink,
    /// Directory
    Dir,
    /// Character device
    CharDev,
    /// Block device
    BlockDev,
    /// FIFO (named pipe)
    Pipe,
    /// GNU volume label
    VolumeHeader,
    /// File with holes described by a sparse map
    SparseFile,
    /// Typeflag this engine does not interpret
    Unknown,
}

impl EntryType {
    /// Entry types whose data section holds file content
    pub fn has_content(&self) -> bool {
        matches!(
            self,
            EntryType::File | EntryType::SparseFile | EntryType::Unknown
        )
    }

    /// Single-letter code used by verbose listings
    pub fn mode_char(&self) -> char {
        match self {
            EntryType::Dir => 'd',
            EntryType::SymLink => 'l',
            EntryType::HardLink => 'h',
            EntryType::BlockDev => 'b',
            EntryType::CharDev => 'c',
            EntryType::Pipe => 'p',
            EntryType::VolumeHeader => 'V',
            EntryType::SparseFile => 'S',
            EntryType::File | EntryType::Unknown => '-',
        }
    }
}

/// Seconds and nanoseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(secs: i64, nanos: u32) -> Self {
        Timestamp { secs, nanos }
    }

    pub fn from_secs(secs: i64) -> Self {
        Timestamp { secs, nanos: 0 }
    }

    pub fn is_zero(&self) -> bool {
        self.secs == 0 && self.nanos == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            write!(f, "{}", self.secs)
        } else {
            let frac = format!("{:09}", self.nanos);
            write!(f, "{}.{}", self.secs, frac.trim_end_matches('0'))
        }
    }
}

/// Archive header format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    /// Pre-POSIX Version 7 header, no magic
    V7,
    /// POSIX.1-1988 ustar
    #[default]
    Ustar,
    /// POSIX.1-2001 pax: ustar plus extended headers
    Posix,
    /// Pre-POSIX GNU layout, magic "ustar  "
    Gnu,
    /// Schily star layout with atime/ctime in the prefix area
    Star,
}

impl ArchiveFormat {
    /// Length of the name prefix field, if the format has one
    pub fn prefix_len(&self) -> Option<usize> {
        match self {
            ArchiveFormat::Ustar | ArchiveFormat::Posix => Some(155),
            ArchiveFormat::Star => Some(131),
            ArchiveFormat::V7 | ArchiveFormat::Gnu => None,
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::V7 => write!(f, "v7"),
            ArchiveFormat::Ustar => write!(f, "ustar"),
            ArchiveFormat::Posix => write!(f, "posix"),
            ArchiveFormat::Gnu => write!(f, "gnu"),
            ArchiveFormat::Star => write!(f, "star"),
        }
    }
}

/// Metadata for one archive member
#[derive(Debug, Clone, Default)]
pub struct ArchiveEntry {
    /// Archive-relative path, '/'-separated; directories end in '/'
    pub name: String,
    /// Target of symlink and hard link entries
    pub link_name: String,
    pub entry_type: EntryType,
    /// Permission bits including setuid/setgid/sticky
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub user_name: String,
    pub group_name: String,
    /// Bytes stored in the data section, excluding any sparse map text
    pub size: u64,
    /// Logical size after hole expansion
    pub real_size: u64,
    pub mtime: Timestamp,
    pub atime: Timestamp,
    pub ctime: Timestamp,
    /// Device numbers (device entries only)
    pub major: u32,
    pub minor: u32,
    /// Bytes consumed by header and extension blocks
    pub header_size: u64,
    /// Stream offset of the first header block
    pub position: u64,
    /// Format of the header that carried this entry
    pub format: ArchiveFormat,
    /// Hole map for sparse entries
    pub sparse: Option<SparseMap>,
}

impl ArchiveEntry {
    /// Create a new archive entry with default values
    pub fn new(name: &str, entry_type: EntryType) -> Self {
        let mut name = name.to_string();
        if entry_type == EntryType::Dir && !name.ends_with('/') {
            name.push('/');
        }
        ArchiveEntry {
            name,
            entry_type,
            mode: if entry_type == EntryType::Dir {
                0o755
            } else {
                0o644
            },
            ..Default::default()
        }
    }

    /// Check if this entry is a special device file
    pub fn is_device(&self) -> bool {
        matches!(self.entry_type, EntryType::BlockDev | EntryType::CharDev)
    }

    /// Check if this is a directory
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Dir
    }

    /// Name without the trailing slash of directory entries
    pub fn trimmed_name(&self) -> &str {
        let trimmed = self.name.trim_end_matches('/');
        if trimmed.is_empty() {
            &self.name
        } else {
            trimmed
        }
    }

    /// Bytes the data section occupies on the stream, padding included
    pub fn data_blocks_len(&self) -> u64 {
        crate::blocked_io::align_block(self.size)
    }
}

/// Tracks hard links during archive creation
#[derive(Debug, Default)]
pub struct HardLinkTracker {
    /// Maps (dev, ino) to the first archive name seen
    seen: HashMap<(u64, u64), String>,
}

impl HardLinkTracker {
    /// Create a new tracker
    pub fn new() -> Self {
        HardLinkTracker {
            seen: HashMap::new(),
        }
    }

    /// Returns the earlier member name when (dev, ino) was already archived
    pub fn check(&mut self, dev: u64, ino: u64, nlink: u64, name: &str) -> Option<String> {
        if nlink <= 1 {
            return None;
        }

        let key = (dev, ino);
        if let Some(original) = self.seen.get(&key) {
            Some(original.clone())
        } else {
            self.seen.insert(key, name.to_string());
            None
        }
    }
}
