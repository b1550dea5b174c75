//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

use std::io;
use std::path::PathBuf;

/// Error type for tar operations
#[derive(thiserror::Error, Debug)]
pub enum TarError {
    /// Unrecognized magic or typeflag combination
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// Header checksum does not match the header contents
    #[error("header checksum mismatch at offset {position}")]
    ChecksumError { position: u64 },

    /// Empty member name, or a name that escapes the extraction root
    #[error("bad member name: {0:?}")]
    BadName(String),

    /// Name or link target exceeds what the selected headers can hold
    #[error("name too long for {format} headers: {name}")]
    NameTooLong { name: String, format: String },

    /// Short read where more archive data was mandatory
    #[error("unexpected end of archive: {0}")]
    UnexpectedEof(String),

    /// Read failure on the archive transport
    #[error("error reading archive: {0}")]
    Read(#[source] io::Error),

    /// Write failure on the archive transport
    #[error("error writing archive: {0}")]
    Write(#[source] io::Error),

    /// Archive transport previously failed; no further I/O is attempted
    #[error("archive is unusable after an earlier I/O failure")]
    ArchiveBad,

    /// Filesystem mutation failed during extraction
    #[error("cannot create {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Restoring mode, owner or times failed during extraction
    #[error("cannot restore attributes of {}: {source}", .path.display())]
    RestoreAttrs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A source file could not be examined or read during create
    #[error("{}: {source}", .path.display())]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Source file type cannot be stored in an archive
    #[error("{}: unsupported file type ({kind})", .path.display())]
    UnsupportedEntryType { path: PathBuf, kind: String },

    /// Numeric value that neither octal nor base-256 can represent
    #[error("value {value} does not fit in {field} field")]
    EncodingError { field: &'static str, value: i128 },

    /// Malformed header field or extension record
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Pattern compilation error
    #[error("pattern error: {0}")]
    Pattern(String),

    /// Generic I/O error outside the archive transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TarError {
    /// Per-entry structural problems that allow scanning to continue
    /// at the next header boundary.
    pub fn is_entry_error(&self) -> bool {
        matches!(
            self,
            TarError::UnsupportedFormat(_)
                | TarError::ChecksumError { .. }
                | TarError::BadName(_)
                | TarError::NameTooLong { .. }
                | TarError::InvalidHeader(_)
                | TarError::Create { .. }
                | TarError::RestoreAttrs { .. }
                | TarError::Source { .. }
                | TarError::UnsupportedEntryType { .. }
        )
    }

    /// Transport failures that poison the archive handle.
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            TarError::Read(_) | TarError::Write(_) | TarError::ArchiveBad
        )
    }
}

/// Result type for tar operations
pub type TarResult<T> = Result<T, TarError>;

/// Check if a TarError represents end-of-file
pub fn is_eof_error(error: &TarError) -> bool {
    match error {
        TarError::UnexpectedEof(_) => true,
        TarError::Io(e) | TarError::Read(e) => e.kind() == io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}
