//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! tar operation mode implementations

pub mod create;
pub mod extract;
pub mod list;
pub mod stream;

pub use create::{
    append_stream, append_to_archive, create_archive, create_archive_bytes, AppendOptions,
    CreateOptions, StreamMeta,
};
pub use extract::{extract_archive, ExtractOptions, ExtractReport};
pub use list::{format_entry, list_archive, scan_archive, test_archive, ListOptions, ScanSummary};
pub use stream::{extract_one, EntryStream};

use crate::assembler::EntryAssembler;
use crate::blocked_io::ByteStream;
use crate::error::{TarError, TarResult};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

/// A per-entry failure that was skipped over
#[derive(Debug)]
pub struct EntryFailure {
    /// Member name, empty when the header itself was unreadable
    pub name: String,
    /// Stream offset of the member's first header block
    pub position: u64,
    pub error: TarError,
}

/// Split a member name into its components, rejecting `..`
pub(crate) fn name_components(name: &str) -> TarResult<Vec<&str>> {
    let mut parts = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(TarError::BadName(name.to_string())),
            _ => parts.push(part),
        }
    }
    Ok(parts)
}

/// Archive member name for `path`, relative to `base_dir`
///
/// Leading `/` and `.` components are dropped; `..` is refused.
pub(crate) fn archive_name(base_dir: &Path, path: &Path) -> TarResult<String> {
    let rel = path.strip_prefix(base_dir).unwrap_or(path);
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                log::debug!("removing leading '/' from {}", path.display());
            }
            Component::ParentDir => {
                return Err(TarError::BadName(path.display().to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Ok(".".to_string());
    }
    Ok(parts.join("/"))
}

/// Destination path of a member under `dest`
pub(crate) fn resolve_destination(dest: &Path, name: &str, allow_absolute: bool) -> TarResult<PathBuf> {
    if name.is_empty() {
        return Err(TarError::BadName(name.to_string()));
    }
    let parts = name_components(name)?;
    let mut path = if name.starts_with('/') {
        if !allow_absolute {
            return Err(TarError::BadName(name.to_string()));
        }
        PathBuf::from("/")
    } else {
        dest.to_path_buf()
    };
    path.extend(parts);
    Ok(path)
}

/// `Read` over the data section of the current entry
///
/// Archive errors are kept so the caller can report them with their
/// original kind instead of as an opaque I/O error.
pub(crate) struct EntryData<'a, S: ByteStream> {
    assembler: &'a mut EntryAssembler<S>,
    error: Option<TarError>,
}

impl<'a, S: ByteStream> EntryData<'a, S> {
    pub fn new(assembler: &'a mut EntryAssembler<S>) -> Self {
        EntryData {
            assembler,
            error: None,
        }
    }

    /// The archive error behind a failed read, if any
    pub fn take_error(&mut self) -> Option<TarError> {
        self.error.take()
    }
}

impl<S: ByteStream> Read for EntryData<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.assembler.read_data(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                let msg = e.to_string();
                self.error = Some(e);
                Err(io::Error::other(msg))
            }
        }
    }
}
