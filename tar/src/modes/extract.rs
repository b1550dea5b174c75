//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Extract mode
//!
//! An existing destination is never destroyed before its replacement is
//! complete: it is renamed aside, the new member is written in its place,
//! and only then is the old copy removed. If writing fails the old copy
//! is renamed back.
//!
//! Directory attributes are restored after the whole archive has been
//! read, deepest first, since creating children changes a directory's
//! mtime and a read-only mode would block them.

use crate::archive::{ArchiveEntry, EntryType};
use crate::assembler::EntryAssembler;
use crate::blocked_io::{BlockReader, ByteStream, DEFAULT_RECORD_SIZE};
use crate::error::{TarError, TarResult};
use crate::fs::{FileKind, FileSystem, OutputFile};
use crate::modes::{resolve_destination, EntryData, EntryFailure};
use crate::pattern::Mask;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Options for extract mode
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Record size in bytes
    pub record_size: usize,
    /// Only members matching this mask are extracted (empty: all)
    pub include: Mask,
    /// Members matching this mask are skipped
    pub exclude: Mask,
    /// Replace existing files
    pub overwrite: bool,
    /// With `overwrite`, keep existing files that are not older
    pub update: bool,
    /// Extract absolute member names at their absolute location
    pub allow_absolute: bool,
    pub preserve_owner: bool,
    /// Use numeric ids even when the archived user/group name resolves
    pub numeric_owner: bool,
    pub preserve_perms: bool,
    pub preserve_times: bool,
    /// Record per-member failures and carry on
    pub keep_going: bool,
    /// Print member names to stderr
    pub verbose: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            record_size: DEFAULT_RECORD_SIZE,
            include: Mask::default(),
            exclude: Mask::default(),
            overwrite: false,
            update: false,
            allow_absolute: false,
            preserve_owner: false,
            numeric_owner: false,
            preserve_perms: true,
            preserve_times: true,
            keep_going: false,
            verbose: false,
        }
    }
}

/// Outcome of an extraction
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Members written to the filesystem
    pub entries: Vec<ArchiveEntry>,
    /// Members skipped after a per-member failure (`keep_going` only)
    pub failures: Vec<EntryFailure>,
}

impl ExtractReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn create_error(path: &Path) -> impl FnOnce(io::Error) -> TarError + '_ {
    move |source| TarError::Create {
        path: path.to_path_buf(),
        source,
    }
}

fn attrs_error(path: &Path) -> impl FnOnce(io::Error) -> TarError + '_ {
    move |source| TarError::RestoreAttrs {
        path: path.to_path_buf(),
        source,
    }
}

/// The header stream can no longer be trusted after these
fn position_lost(err: &TarError) -> bool {
    matches!(
        err,
        TarError::ChecksumError { .. } | TarError::UnsupportedFormat(_)
    )
}

enum Outcome {
    Extracted,
    Skipped,
}

struct Extractor<'a> {
    fs: &'a dyn FileSystem,
    dest: &'a Path,
    options: &'a ExtractOptions,
    /// Directories whose attributes are restored at the end
    deferred: Vec<(PathBuf, ArchiveEntry)>,
    aside_seq: u64,
}

impl Extractor<'_> {
    fn selected(&self, entry: &ArchiveEntry) -> bool {
        let name = entry.name.strip_prefix("./").unwrap_or(&entry.name);
        self.options.include.includes(name) && !self.options.exclude.matches(name)
    }

    fn aside_name(&mut self, path: &Path) -> PathBuf {
        self.aside_seq += 1;
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(
            ".{}.tar-{}-{}",
            base,
            std::process::id(),
            self.aside_seq
        ))
    }

    fn extract_entry<S: ByteStream>(
        &mut self,
        assembler: &mut EntryAssembler<S>,
        entry: &ArchiveEntry,
    ) -> TarResult<Outcome> {
        let path = resolve_destination(self.dest, &entry.name, self.options.allow_absolute)?;
        self.guard_parents(&path)?;

        let existing = match self.fs.stat(&path, false) {
            Ok(st) => Some(st),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(create_error(&path)(e)),
        };

        let mut aside = None;
        if let Some(st) = existing {
            if entry.is_dir() && st.kind == FileKind::Dir {
                if path != self.dest {
                    self.deferred.push((path, entry.clone()));
                }
                return Ok(Outcome::Extracted);
            }
            if !self.options.overwrite {
                return Err(create_error(&path)(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "file exists",
                )));
            }
            if self.options.update && st.mtime.secs >= entry.mtime.secs {
                log::info!("{}: existing file is not older; skipped", path.display());
                return Ok(Outcome::Skipped);
            }
            let tmp = self.aside_name(&path);
            self.fs.rename(&path, &tmp).map_err(create_error(&path))?;
            log::debug!("moved {} aside to {}", path.display(), tmp.display());
            aside = Some(tmp);
        }

        let created = match path.parent() {
            Some(parent) => self.fs.create_dir_all(parent).map_err(create_error(parent)),
            None => Ok(()),
        }
        .and_then(|_| self.create_node(assembler, entry, &path));

        match created {
            Ok(true) => {
                if let Some(tmp) = aside {
                    if let Err(e) = self.fs.remove(&tmp) {
                        log::warn!("cannot remove {}: {}", tmp.display(), e);
                    }
                }
            }
            Ok(false) => {
                self.roll_back(&path, aside);
                return Ok(Outcome::Skipped);
            }
            Err(e) => {
                self.roll_back(&path, aside);
                return Err(e);
            }
        }

        match entry.entry_type {
            EntryType::Dir => self.deferred.push((path, entry.clone())),
            // The inode belongs to the earlier member as well
            EntryType::HardLink => {}
            _ => self.restore_attrs(&path, entry)?,
        }
        Ok(Outcome::Extracted)
    }

    /// Refuse to reach `path` through a symbolic link below `dest`
    ///
    /// With `overwrite` the link is removed so that a real directory is
    /// created in its place.
    fn guard_parents(&self, path: &Path) -> TarResult<()> {
        let rel = match path.parent().and_then(|p| p.strip_prefix(self.dest).ok()) {
            Some(rel) => rel,
            None => return Ok(()),
        };
        let mut current = self.dest.to_path_buf();
        for component in rel.components() {
            current.push(component);
            match self.fs.stat(&current, false) {
                Ok(st) if st.kind == FileKind::SymLink => {
                    if !self.options.overwrite {
                        return Err(TarError::BadName(format!(
                            "{}: leads through symbolic link {}",
                            path.display(),
                            current.display()
                        )));
                    }
                    log::warn!("replacing symbolic link {}", current.display());
                    return self.fs.remove(&current).map_err(create_error(&current));
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(create_error(&current)(e)),
            }
        }
        Ok(())
    }

    /// Drop a partial member and put the original back
    fn roll_back(&self, path: &Path, aside: Option<PathBuf>) {
        if self.fs.exists(path) {
            if let Err(e) = self.fs.remove(path) {
                log::warn!("cannot remove partial {}: {}", path.display(), e);
            }
        }
        if let Some(tmp) = aside {
            if let Err(e) = self.fs.rename(&tmp, path) {
                log::error!(
                    "cannot restore {} from {}: {}",
                    path.display(),
                    tmp.display(),
                    e
                );
            }
        }
    }

    /// Create the filesystem object; false when it was skipped
    fn create_node<S: ByteStream>(
        &mut self,
        assembler: &mut EntryAssembler<S>,
        entry: &ArchiveEntry,
        path: &Path,
    ) -> TarResult<bool> {
        let mode = entry.mode & 0o777;
        match entry.entry_type {
            EntryType::File | EntryType::SparseFile => {
                let mut out = self.fs.create_file(path, mode).map_err(create_error(path))?;
                write_contents(assembler, entry, out.as_mut(), path)?;
                Ok(true)
            }
            EntryType::HardLink => self.create_hard_link(assembler, entry, path),
            EntryType::SymLink => {
                self.fs
                    .make_symlink(Path::new(&entry.link_name), path)
                    .map_err(create_error(path))?;
                Ok(true)
            }
            EntryType::Dir => {
                self.fs
                    .create_dir(path, mode | 0o700)
                    .map_err(create_error(path))?;
                Ok(true)
            }
            EntryType::CharDev | EntryType::BlockDev => {
                let kind = if entry.entry_type == EntryType::CharDev {
                    FileKind::CharDev
                } else {
                    FileKind::BlockDev
                };
                match self
                    .fs
                    .make_device(path, kind, mode, entry.major, entry.minor)
                {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                        log::warn!("{}: cannot create device node: {}", path.display(), e);
                        Ok(false)
                    }
                    Err(e) => Err(create_error(path)(e)),
                }
            }
            EntryType::Pipe => {
                self.fs.make_fifo(path, mode).map_err(create_error(path))?;
                Ok(true)
            }
            EntryType::VolumeHeader | EntryType::Unknown => Ok(false),
        }
    }

    /// Link to an earlier member, or copy its contents when linking fails
    fn create_hard_link<S: ByteStream>(
        &mut self,
        assembler: &mut EntryAssembler<S>,
        entry: &ArchiveEntry,
        path: &Path,
    ) -> TarResult<bool> {
        let target =
            resolve_destination(self.dest, &entry.link_name, self.options.allow_absolute)?;
        self.guard_parents(&target)?;
        let err = match self.fs.hard_link(&target, path) {
            Ok(()) => return Ok(true),
            Err(e) => e,
        };
        log::debug!(
            "hard link {} -> {} failed ({}); copying",
            path.display(),
            target.display(),
            err
        );

        let mode = entry.mode & 0o777;
        if assembler.data_remaining() > 0 {
            let mut out = self.fs.create_file(path, mode).map_err(create_error(path))?;
            write_contents(assembler, entry, out.as_mut(), path)?;
            return Ok(true);
        }

        let st = match self.fs.stat(&target, true) {
            Ok(st) if st.kind == FileKind::File => st,
            _ => return Err(create_error(path)(err)),
        };
        let mut source = self.fs.open(&target).map_err(create_error(path))?;
        let mut out = self
            .fs
            .create_file(path, st.mode & 0o777)
            .map_err(create_error(path))?;
        io::copy(&mut source, &mut out).map_err(create_error(path))?;
        Ok(true)
    }

    fn restore_attrs(&self, path: &Path, entry: &ArchiveEntry) -> TarResult<()> {
        let is_link = entry.entry_type == EntryType::SymLink;

        if self.options.preserve_owner {
            let uid = match self.options.numeric_owner || entry.user_name.is_empty() {
                true => None,
                false => self.fs.lookup_user(&entry.user_name),
            }
            .unwrap_or(entry.uid);
            let gid = match self.options.numeric_owner || entry.group_name.is_empty() {
                true => None,
                false => self.fs.lookup_group(&entry.group_name),
            }
            .unwrap_or(entry.gid);
            match self.fs.set_owner(path, uid, gid, false) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    log::warn!("{}: cannot change ownership: {}", path.display(), e);
                }
                Err(e) => return Err(attrs_error(path)(e)),
            }
        }

        // Mode after owner: chown clears setuid/setgid
        if self.options.preserve_perms && !is_link {
            self.fs
                .set_mode(path, entry.mode & 0o7777)
                .map_err(attrs_error(path))?;
        }

        if self.options.preserve_times {
            let atime = if entry.atime.is_zero() {
                entry.mtime
            } else {
                entry.atime
            };
            self.fs
                .set_times(path, atime, entry.mtime, false)
                .map_err(attrs_error(path))?;
        }
        Ok(())
    }

    /// Restore deferred directory attributes, deepest first
    fn finish_directories(&mut self) -> Vec<EntryFailure> {
        let mut dirs = std::mem::take(&mut self.deferred);
        dirs.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));

        let mut failures = Vec::new();
        for (path, entry) in dirs {
            if let Err(e) = self.restore_attrs(&path, &entry) {
                log::error!("{}", e);
                failures.push(EntryFailure {
                    name: entry.name.clone(),
                    position: entry.position,
                    error: e,
                });
            }
        }
        failures
    }
}

/// Copy the current member's data into `out`, expanding holes
fn write_contents<S: ByteStream>(
    assembler: &mut EntryAssembler<S>,
    entry: &ArchiveEntry,
    out: &mut dyn OutputFile,
    path: &Path,
) -> TarResult<()> {
    if let Some(map) = &entry.sparse {
        let mut data = EntryData::new(assembler);
        return map.expand(&mut data, out).map_err(|e| match data.take_error() {
            Some(archive_err) => archive_err,
            None => match e {
                TarError::Io(source) => create_error(path)(source),
                other => other,
            },
        });
    }

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = assembler.read_data(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).map_err(create_error(path))?;
    }
    Ok(())
}

/// Extract every selected member of the archive on `stream` under `dest`
///
/// Without `keep_going` the first failure ends the extraction; members
/// already written stay in place.
pub fn extract_archive<S: ByteStream>(
    stream: S,
    dest: &Path,
    fs: &dyn FileSystem,
    options: &ExtractOptions,
) -> TarResult<ExtractReport> {
    let mut assembler = EntryAssembler::new(BlockReader::new(stream, options.record_size));
    let mut extractor = Extractor {
        fs,
        dest,
        options,
        deferred: Vec::new(),
        aside_seq: 0,
    };
    let mut report = ExtractReport::default();

    let result = extract_loop(&mut assembler, &mut extractor, &mut report);
    let dir_failures = extractor.finish_directories();
    result?;

    if options.keep_going {
        report.failures.extend(dir_failures);
    } else if let Some(first) = dir_failures.into_iter().next() {
        return Err(first.error);
    }
    Ok(report)
}

fn extract_loop<S: ByteStream>(
    assembler: &mut EntryAssembler<S>,
    extractor: &mut Extractor<'_>,
    report: &mut ExtractReport,
) -> TarResult<()> {
    let keep_going = extractor.options.keep_going;
    loop {
        let position = assembler.reader().offset();
        let entry = match assembler.next_entry() {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(()),
            Err(e) if position_lost(&e) => return Err(e),
            Err(e) if keep_going && e.is_entry_error() => {
                log::error!("{}", e);
                report.failures.push(EntryFailure {
                    name: String::new(),
                    position,
                    error: e,
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        if !extractor.selected(&entry) {
            continue;
        }
        match entry.entry_type {
            EntryType::VolumeHeader => continue,
            EntryType::Unknown => {
                log::warn!("{}: unknown member type; skipped", entry.name);
                continue;
            }
            _ => {}
        }

        if extractor.options.verbose {
            eprintln!("{}", entry.name);
        }
        match extractor.extract_entry(assembler, &entry) {
            Ok(Outcome::Extracted) => report.entries.push(entry),
            Ok(Outcome::Skipped) => {}
            Err(e) if keep_going && e.is_entry_error() => {
                log::error!("{}", e);
                report.failures.push(EntryFailure {
                    name: entry.name.clone(),
                    position: entry.position,
                    error: e,
                });
            }
            Err(e) => return Err(e),
        }
    }
}
