//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Create and append modes
//!
//! Append works by scanning the existing archive up to its end-of-archive
//! marker, then rewriting the record that holds the marker with the new
//! entries followed by a fresh marker.

use crate::archive::{ArchiveEntry, ArchiveFormat, EntryType, HardLinkTracker, Timestamp};
use crate::assembler::EntryAssembler;
use crate::blocked_io::{BlockReader, BlockWriter, ByteStream, DEFAULT_RECORD_SIZE};
use crate::error::{TarError, TarResult};
use crate::fs::{FileKind, FileStat, FileSystem};
use crate::modes::archive_name;
use crate::pattern::Mask;
use crate::writer::TarWriter;
use std::collections::HashMap;
use std::io::{self, Cursor, Read, SeekFrom};
use std::path::{Path, PathBuf};

/// Options for create mode
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub format: ArchiveFormat,
    /// Record size in bytes
    pub record_size: usize,
    /// Members matching this mask are skipped along with their subtree
    pub exclude: Mask,
    /// Follow symlinks given as operands
    pub cli_dereference: bool,
    /// Follow all symlinks
    pub dereference: bool,
    /// Archive directories without their contents
    pub no_recurse: bool,
    /// Fail instead of writing extension records
    pub standard_only: bool,
    /// Print member names to stderr
    pub verbose: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            format: ArchiveFormat::Ustar,
            record_size: DEFAULT_RECORD_SIZE,
            exclude: Mask::default(),
            cli_dereference: false,
            dereference: false,
            no_recurse: false,
            standard_only: false,
            verbose: false,
        }
    }
}

/// Options for append mode
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    pub create: CreateOptions,
    /// Only add files newer than the archive's copy of the same name
    pub update: bool,
}

/// Metadata for a member appended from a byte stream
#[derive(Debug, Clone)]
pub struct StreamMeta {
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub user_name: String,
    pub group_name: String,
    pub mtime: Timestamp,
}

impl Default for StreamMeta {
    fn default() -> Self {
        StreamMeta {
            mode: 0o644,
            uid: 0,
            gid: 0,
            user_name: String::new(),
            group_name: String::new(),
            mtime: Timestamp::default(),
        }
    }
}

/// Walks source trees and feeds them to a [`TarWriter`]
struct Archiver<'a> {
    fs: &'a dyn FileSystem,
    options: &'a CreateOptions,
    links: HardLinkTracker,
    /// Latest mtime of each member already in the archive (update mode)
    toc: Option<HashMap<String, Timestamp>>,
}

impl Archiver<'_> {
    fn add_paths<S: ByteStream>(
        &mut self,
        writer: &mut TarWriter<S>,
        paths: &[PathBuf],
        base_dir: &Path,
    ) -> TarResult<()> {
        for path in paths {
            let full = base_dir.join(path);
            self.add_path(writer, &full, base_dir, true)?;
        }
        Ok(())
    }

    fn add_path<S: ByteStream>(
        &mut self,
        writer: &mut TarWriter<S>,
        path: &Path,
        base_dir: &Path,
        is_operand: bool,
    ) -> TarResult<()> {
        match self.add_one(writer, path, base_dir, is_operand) {
            Err(e) if e.is_entry_error() => {
                log::error!("{}: {}", path.display(), e);
                Ok(())
            }
            other => other,
        }
    }

    fn add_one<S: ByteStream>(
        &mut self,
        writer: &mut TarWriter<S>,
        path: &Path,
        base_dir: &Path,
        is_operand: bool,
    ) -> TarResult<()> {
        let name = archive_name(base_dir, path)?;
        if self.options.exclude.matches(&name) {
            log::debug!("excluded {}", name);
            return Ok(());
        }

        let follow = self.options.dereference || (is_operand && self.options.cli_dereference);
        let st = self.fs.stat(path, follow).map_err(|e| stat_error(path, e))?;
        let is_dir = st.kind == FileKind::Dir;

        let entry = self.entry_from_stat(path, &name, &st)?;
        if !self.is_newer(&entry) {
            log::debug!("{} is not newer than the archived copy", name);
        } else {
            self.write_member(writer, path, &entry, &st)?;
        }

        if is_dir && !self.options.no_recurse {
            let children = self.fs.list_dir(path).map_err(|e| stat_error(path, e))?;
            for child in children {
                self.add_path(writer, &path.join(child), base_dir, false)?;
            }
        }
        Ok(())
    }

    /// Update mode: write only when newer than the archived copy, at
    /// the one-second resolution of ustar headers
    fn is_newer(&self, entry: &ArchiveEntry) -> bool {
        match self.toc.as_ref().and_then(|toc| toc.get(entry.trimmed_name())) {
            Some(archived) => entry.mtime.secs > archived.secs,
            None => true,
        }
    }

    fn entry_from_stat(&mut self, path: &Path, name: &str, st: &FileStat) -> TarResult<ArchiveEntry> {
        let entry_type = match st.kind {
            FileKind::File => EntryType::File,
            FileKind::Dir => EntryType::Dir,
            FileKind::SymLink => EntryType::SymLink,
            FileKind::CharDev => EntryType::CharDev,
            FileKind::BlockDev => EntryType::BlockDev,
            FileKind::Fifo => EntryType::Pipe,
            FileKind::Socket => {
                return Err(TarError::UnsupportedEntryType {
                    path: path.to_path_buf(),
                    kind: "socket".to_string(),
                })
            }
            FileKind::Other => {
                return Err(TarError::UnsupportedEntryType {
                    path: path.to_path_buf(),
                    kind: "unknown".to_string(),
                })
            }
        };

        let mut entry = ArchiveEntry::new(name, entry_type);
        entry.mode = st.mode;
        entry.uid = st.uid;
        entry.gid = st.gid;
        entry.user_name = self.fs.user_name(st.uid).unwrap_or_default();
        entry.group_name = self.fs.group_name(st.gid).unwrap_or_default();
        entry.mtime = st.mtime;
        entry.atime = st.atime;
        entry.ctime = st.ctime;

        match entry_type {
            EntryType::File => {
                if let Some(first) = self.links.check(st.dev, st.ino, st.nlink, name) {
                    entry.entry_type = EntryType::HardLink;
                    entry.link_name = first;
                } else {
                    entry.size = st.size;
                    entry.real_size = st.size;
                }
            }
            EntryType::SymLink => {
                let target = self.fs.read_link(path).map_err(|e| stat_error(path, e))?;
                entry.link_name = target.to_string_lossy().into_owned();
            }
            EntryType::CharDev | EntryType::BlockDev => {
                entry.major = st.major;
                entry.minor = st.minor;
            }
            _ => {}
        }
        Ok(entry)
    }

    fn write_member<S: ByteStream>(
        &mut self,
        writer: &mut TarWriter<S>,
        path: &Path,
        entry: &ArchiveEntry,
        st: &FileStat,
    ) -> TarResult<()> {
        writer.check_names(entry)?;

        // Open before the header goes out so an unreadable file leaves
        // no partial member behind
        let source = if entry.entry_type == EntryType::File {
            Some(self.fs.open(path).map_err(|e| stat_error(path, e))?)
        } else {
            None
        };

        if self.options.verbose {
            eprintln!("{}", entry.name);
        }
        writer.write_entry(entry)?;
        if let Some(mut source) = source {
            copy_data(writer, &mut source, st.size, &entry.name)?;
        }
        writer.finish_entry()
    }
}

fn stat_error(path: &Path, source: io::Error) -> TarError {
    TarError::Source {
        path: path.to_path_buf(),
        source,
    }
}

/// Copy `size` bytes of `source` into the current member
///
/// A file that shrinks while being read is padded with zeros; bytes past
/// `size` are ignored.
fn copy_data<S: ByteStream>(
    writer: &mut TarWriter<S>,
    source: &mut dyn Read,
    size: u64,
    name: &str,
) -> TarResult<()> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut remaining = size;
    while remaining > 0 {
        let want = std::cmp::min(remaining, buf.len() as u64) as usize;
        let n = match source.read(&mut buf[..want]) {
            Ok(0) => {
                log::warn!("{}: file shrank by {} bytes; padding with zeros", name, remaining);
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TarError::Io(e)),
        };
        writer.write_data(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

fn new_writer<S: ByteStream>(stream: S, options: &CreateOptions) -> TarWriter<S> {
    TarWriter::new(BlockWriter::new(stream, options.record_size), options.format)
        .standard_only(options.standard_only)
}

/// Create an archive of `paths` (relative to `base_dir`) on `stream`
pub fn create_archive<S: ByteStream>(
    stream: S,
    paths: &[PathBuf],
    base_dir: &Path,
    fs: &dyn FileSystem,
    options: &CreateOptions,
) -> TarResult<S> {
    let mut writer = new_writer(stream, options);
    let mut archiver = Archiver {
        fs,
        options,
        links: HardLinkTracker::new(),
        toc: None,
    };
    archiver.add_paths(&mut writer, paths, base_dir)?;
    writer.finish()
}

/// Create an archive in memory
pub fn create_archive_bytes(
    paths: &[PathBuf],
    base_dir: &Path,
    fs: &dyn FileSystem,
    options: &CreateOptions,
) -> TarResult<Vec<u8>> {
    let stream = create_archive(Cursor::new(Vec::new()), paths, base_dir, fs, options)?;
    Ok(stream.into_inner())
}

/// What a scan of an existing archive found
struct ExistingArchive {
    /// Offset of the end-of-archive marker
    end: u64,
    format: Option<ArchiveFormat>,
    toc: HashMap<String, Timestamp>,
}

fn scan_existing<S: ByteStream>(stream: S, record_size: usize) -> TarResult<(S, ExistingArchive)> {
    let mut assembler = EntryAssembler::new(BlockReader::new(stream, record_size));
    let mut found = ExistingArchive {
        end: 0,
        format: None,
        toc: HashMap::new(),
    };

    loop {
        match assembler.next_entry() {
            Ok(Some(entry)) => {
                found.format.get_or_insert(entry.format);
                found
                    .toc
                    .insert(entry.trimmed_name().to_string(), entry.mtime);
            }
            Ok(None) => break,
            Err(e) if e.is_entry_error() => log::error!("{}", e),
            Err(e) => return Err(e),
        }
    }

    let reader = assembler.reader();
    found.end = assembler.end_offset().unwrap_or_else(|| reader.offset());
    Ok((assembler.into_reader().into_inner(), found))
}

/// Position a writer over the end-of-archive marker of `stream`
fn open_for_append<S: ByteStream>(
    stream: S,
    options: &AppendOptions,
) -> TarResult<(TarWriter<S>, HashMap<String, Timestamp>)> {
    let record_size = crate::blocked_io::parse_blocksize(options.create.record_size as u32);
    let (mut stream, existing) = scan_existing(stream, record_size)?;

    let record_offset = existing.end - existing.end % record_size as u64;
    let keep = (existing.end - record_offset) as usize;

    let unseekable = || {
        TarError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "cannot append to a non-seekable archive",
        ))
    };

    // Re-read the part of the final record that stays
    let mut prefix = vec![0u8; keep];
    stream
        .seek_to(SeekFrom::Start(record_offset))
        .map_err(TarError::Read)?
        .ok_or_else(unseekable)?;
    let mut got = 0;
    while got < keep {
        match stream.read_some(&mut prefix[got..]).map_err(TarError::Read)? {
            0 => return Err(TarError::UnexpectedEof("archive shrank during append".into())),
            n => got += n,
        }
    }
    stream
        .seek_to(SeekFrom::Start(record_offset))
        .map_err(TarError::Read)?
        .ok_or_else(unseekable)?;

    let format = existing.format.unwrap_or(options.create.format);
    log::debug!("appending {} entries at offset {}", format, existing.end);
    let writer = TarWriter::new(
        BlockWriter::resume(stream, record_size, record_offset, &prefix),
        format,
    )
    .standard_only(options.create.standard_only);
    Ok((writer, existing.toc))
}

/// Append `paths` to the archive on `stream`
///
/// New members use the format of the existing ones. In update mode a
/// file is skipped unless it is newer than the archived copy.
pub fn append_to_archive<S: ByteStream>(
    stream: S,
    paths: &[PathBuf],
    base_dir: &Path,
    fs: &dyn FileSystem,
    options: &AppendOptions,
) -> TarResult<S> {
    let (mut writer, toc) = open_for_append(stream, options)?;
    let mut archiver = Archiver {
        fs,
        options: &options.create,
        links: HardLinkTracker::new(),
        toc: options.update.then_some(toc),
    };
    archiver.add_paths(&mut writer, paths, base_dir)?;
    writer.finish()
}

/// Append one regular file member named `name` whose `size` bytes of
/// content come from `reader`
pub fn append_stream<S: ByteStream>(
    stream: S,
    name: &str,
    reader: &mut dyn Read,
    size: u64,
    meta: &StreamMeta,
    options: &AppendOptions,
) -> TarResult<S> {
    if crate::modes::name_components(name)?.is_empty() {
        return Err(TarError::BadName(name.to_string()));
    }
    let (mut writer, _) = open_for_append(stream, options)?;

    let mut entry = ArchiveEntry::new(name, EntryType::File);
    entry.mode = meta.mode;
    entry.uid = meta.uid;
    entry.gid = meta.gid;
    entry.user_name = meta.user_name.clone();
    entry.group_name = meta.group_name.clone();
    entry.mtime = meta.mtime;
    entry.size = size;
    entry.real_size = size;

    writer.write_entry(&entry)?;
    copy_data(&mut writer, reader, size, name)?;
    writer.finish_entry()?;
    writer.finish()
}
