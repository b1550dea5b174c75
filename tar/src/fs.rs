//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Filesystem access used by create and extract
//!
//! Archive logic only talks to the host through [`FileSystem`], so the
//! create and extract paths can be driven against something other than
//! the local disk.

use crate::archive::Timestamp;
use std::ffi::{CStr, CString, OsString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Kind of filesystem object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    #[default]
    File,
    Dir,
    SymLink,
    CharDev,
    BlockDev,
    Fifo,
    Socket,
    Other,
}

/// Result of a stat call
#[derive(Debug, Clone, Default)]
pub struct FileStat {
    pub kind: FileKind,
    /// Permission bits, file type bits removed
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub size: u64,
    pub mtime: Timestamp,
    pub atime: Timestamp,
    pub ctime: Timestamp,
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
    /// Device numbers of a device node
    pub major: u32,
    pub minor: u32,
}

/// Writable, seekable, resizable extraction target
pub trait OutputFile: Write + Seek {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl OutputFile for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl OutputFile for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(io::Error::other)?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

/// Filesystem operations needed by the archiver
pub trait FileSystem {
    fn stat(&self, path: &Path, follow: bool) -> io::Result<FileStat>;

    fn exists(&self, path: &Path) -> bool {
        self.stat(path, false).is_ok()
    }

    /// Entry names of a directory, sorted
    fn list_dir(&self, path: &Path) -> io::Result<Vec<OsString>>;
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>>;

    /// Create a new regular file; fails if `path` exists
    fn create_file(&self, path: &Path, mode: u32) -> io::Result<Box<dyn OutputFile>>;
    fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn make_symlink(&self, target: &Path, path: &Path) -> io::Result<()>;
    fn make_fifo(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn make_device(&self, path: &Path, kind: FileKind, mode: u32, major: u32, minor: u32)
        -> io::Result<()>;
    fn hard_link(&self, src: &Path, dst: &Path) -> io::Result<()>;

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn set_owner(&self, path: &Path, uid: u64, gid: u64, follow: bool) -> io::Result<()>;
    fn set_times(&self, path: &Path, atime: Timestamp, mtime: Timestamp, follow: bool)
        -> io::Result<()>;

    fn rename(&self, src: &Path, dst: &Path) -> io::Result<()>;
    /// Remove a file, link or (recursively) a directory
    fn remove(&self, path: &Path) -> io::Result<()>;

    fn user_name(&self, uid: u64) -> Option<String>;
    fn group_name(&self, gid: u64) -> Option<String>;
    fn lookup_user(&self, name: &str) -> Option<u64>;
    fn lookup_group(&self, name: &str) -> Option<u64>;
}

/// The local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

fn cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))
}

fn check(result: libc::c_int) -> io::Result<()> {
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn timespec(t: Timestamp) -> libc::timespec {
    libc::timespec {
        tv_sec: t.secs as libc::time_t,
        tv_nsec: t.nanos as _,
    }
}

impl FileSystem for LocalFs {
    fn stat(&self, path: &Path, follow: bool) -> io::Result<FileStat> {
        let meta = if follow {
            fs::metadata(path)?
        } else {
            fs::symlink_metadata(path)?
        };
        let ft = meta.file_type();
        let kind = if ft.is_symlink() {
            FileKind::SymLink
        } else if ft.is_dir() {
            FileKind::Dir
        } else if ft.is_file() {
            FileKind::File
        } else if ft.is_char_device() {
            FileKind::CharDev
        } else if ft.is_block_device() {
            FileKind::BlockDev
        } else if ft.is_fifo() {
            FileKind::Fifo
        } else if ft.is_socket() {
            FileKind::Socket
        } else {
            FileKind::Other
        };

        let rdev = meta.rdev() as libc::dev_t;
        let (major, minor) = if matches!(kind, FileKind::CharDev | FileKind::BlockDev) {
            (libc::major(rdev) as u32, libc::minor(rdev) as u32)
        } else {
            (0, 0)
        };

        Ok(FileStat {
            kind,
            mode: meta.mode() & 0o7777,
            uid: meta.uid() as u64,
            gid: meta.gid() as u64,
            size: meta.len(),
            mtime: Timestamp::new(meta.mtime(), meta.mtime_nsec() as u32),
            atime: Timestamp::new(meta.atime(), meta.atime_nsec() as u32),
            ctime: Timestamp::new(meta.ctime(), meta.ctime_nsec() as u32),
            dev: meta.dev(),
            ino: meta.ino(),
            nlink: meta.nlink(),
            major,
            minor,
        })
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let mut names = fs::read_dir(path)?
            .map(|e| e.map(|e| e.file_name()))
            .collect::<io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(File::open(path)?))
    }

    fn create_file(&self, path: &Path, mode: u32) -> io::Result<Box<dyn OutputFile>> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode & 0o777)
            .open(path)?;
        Ok(Box::new(file))
    }

    fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::DirBuilder::new().mode(mode & 0o7777).create(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn make_symlink(&self, target: &Path, path: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, path)
    }

    fn make_fifo(&self, path: &Path, mode: u32) -> io::Result<()> {
        let c = cstring(path)?;
        check(unsafe { libc::mkfifo(c.as_ptr(), (mode & 0o7777) as libc::mode_t) })
    }

    fn make_device(
        &self,
        path: &Path,
        kind: FileKind,
        mode: u32,
        major: u32,
        minor: u32,
    ) -> io::Result<()> {
        let c = cstring(path)?;
        // makedev has different signatures on different platforms
        #[cfg(target_os = "macos")]
        let dev = libc::makedev(major as i32, minor as i32);
        #[cfg(not(target_os = "macos"))]
        let dev = libc::makedev(major, minor);
        let type_bits: libc::mode_t = match kind {
            FileKind::BlockDev => libc::S_IFBLK,
            FileKind::CharDev => libc::S_IFCHR,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "not a device kind",
                ))
            }
        };
        let mode = (mode & 0o7777) as libc::mode_t | type_bits;
        check(unsafe { libc::mknod(c.as_ptr(), mode, dev) })
    }

    fn hard_link(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::hard_link(src, dst)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
    }

    fn set_owner(&self, path: &Path, uid: u64, gid: u64, follow: bool) -> io::Result<()> {
        let c = cstring(path)?;
        let (uid, gid) = (uid as libc::uid_t, gid as libc::gid_t);
        if follow {
            check(unsafe { libc::chown(c.as_ptr(), uid, gid) })
        } else {
            check(unsafe { libc::lchown(c.as_ptr(), uid, gid) })
        }
    }

    fn set_times(
        &self,
        path: &Path,
        atime: Timestamp,
        mtime: Timestamp,
        follow: bool,
    ) -> io::Result<()> {
        let c = cstring(path)?;
        let times = [timespec(atime), timespec(mtime)];
        let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
        check(unsafe { libc::utimensat(libc::AT_FDCWD, c.as_ptr(), times.as_ptr(), flags) })
    }

    fn rename(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::rename(src, dst)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn user_name(&self, uid: u64) -> Option<String> {
        unsafe {
            let pw = libc::getpwuid(uid as libc::uid_t);
            if pw.is_null() {
                return None;
            }
            CStr::from_ptr((*pw).pw_name).to_str().ok().map(|s| s.to_string())
        }
    }

    fn group_name(&self, gid: u64) -> Option<String> {
        unsafe {
            let gr = libc::getgrgid(gid as libc::gid_t);
            if gr.is_null() {
                return None;
            }
            CStr::from_ptr((*gr).gr_name).to_str().ok().map(|s| s.to_string())
        }
    }

    fn lookup_user(&self, name: &str) -> Option<u64> {
        let c = CString::new(name).ok()?;
        unsafe {
            let pw = libc::getpwnam(c.as_ptr());
            if pw.is_null() {
                None
            } else {
                Some((*pw).pw_uid as u64)
            }
        }
    }

    fn lookup_group(&self, name: &str) -> Option<u64> {
        let c = CString::new(name).ok()?;
        unsafe {
            let gr = libc::getgrnam(c.as_ptr());
            if gr.is_null() {
                None
            } else {
                Some((*gr).gr_gid as u64)
            }
        }
    }
}
