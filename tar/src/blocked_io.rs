//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Blocked I/O for tar archives
//!
//! Tar archives are organized as:
//! - **block**: 512 bytes (fundamental tar unit)
//! - **record**: multiple blocks written in a single I/O operation
//! - **blocking factor**: number of 512-byte blocks per record
//!
//! [`BlockReader`] and [`BlockWriter`] are the only types that touch the
//! transport. Every physical read and write moves one whole record; the
//! archive code above them works in blocks and bytes.

use crate::error::{TarError, TarResult};
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Default blocking factor (number of 512-byte blocks per record)
pub const DEFAULT_BLOCKING_FACTOR: usize = 20;

/// Size of a single tar block in bytes
pub const TAR_BLOCK_SIZE: usize = 512;

/// Default record size in bytes (blocking factor * block size)
pub const DEFAULT_RECORD_SIZE: usize = DEFAULT_BLOCKING_FACTOR * TAR_BLOCK_SIZE;

/// Maximum record size per POSIX (32256 bytes = 63 blocks)
pub const MAX_RECORD_SIZE: usize = 32256;

static ZERO_BLOCK: [u8; TAR_BLOCK_SIZE] = [0u8; TAR_BLOCK_SIZE];

/// Largest data section an entry may declare; seek offsets are i64
pub const MAX_MEMBER_SIZE: u64 = i64::MAX as u64;

/// Round up to next block boundary
///
/// Saturates at the last block boundary a u64 can hold.
pub fn align_block(size: u64) -> u64 {
    let block = TAR_BLOCK_SIZE as u64;
    size.checked_next_multiple_of(block).unwrap_or(u64::MAX - u64::MAX % block)
}

/// Calculate padding needed to reach block boundary
pub fn padding_needed(bytes: u64) -> usize {
    let remainder = (bytes % TAR_BLOCK_SIZE as u64) as usize;
    if remainder == 0 {
        0
    } else {
        TAR_BLOCK_SIZE - remainder
    }
}

/// Check if a block is all zeros
pub fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Calculate record size from a blocking factor
///
/// Values below 512 are a blocking factor, larger values are bytes.
/// The result is clamped to 512..=32256 and rounded up to a block.
pub fn parse_blocksize(blocksize: u32) -> usize {
    let size = if blocksize < TAR_BLOCK_SIZE as u32 {
        blocksize as usize * TAR_BLOCK_SIZE
    } else {
        blocksize as usize
    };

    let size = std::cmp::max(size, TAR_BLOCK_SIZE);
    let size = std::cmp::min(size, MAX_RECORD_SIZE);

    size.div_ceil(TAR_BLOCK_SIZE) * TAR_BLOCK_SIZE
}

/// Byte transport underneath an archive
///
/// Streams that cannot seek report so by returning `Ok(None)` from
/// [`ByteStream::seek_to`]; the block layer then falls back to
/// read-and-discard.
pub trait ByteStream {
    /// Read up to `buf.len()` bytes; 0 means end of stream
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes
    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Reposition the stream if it is seekable, returning the new offset
    fn seek_to(&mut self, pos: SeekFrom) -> io::Result<Option<u64>>;

    /// Push written data down to the device
    fn sync(&mut self) -> io::Result<()>;
}

fn not_supported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("stream is not {what}"))
}

impl ByteStream for File {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf)
    }

    fn seek_to(&mut self, pos: SeekFrom) -> io::Result<Option<u64>> {
        // Pipes and character devices report ESPIPE here
        match self.seek(pos) {
            Ok(off) => Ok(Some(off)),
            Err(e) if e.raw_os_error() == Some(libc::ESPIPE) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl ByteStream for Cursor<Vec<u8>> {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf)
    }

    fn seek_to(&mut self, pos: SeekFrom) -> io::Result<Option<u64>> {
        self.seek(pos).map(Some)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for Cursor<&[u8]> {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn write_some(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(not_supported("writable"))
    }

    fn seek_to(&mut self, pos: SeekFrom) -> io::Result<Option<u64>> {
        self.seek(pos).map(Some)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: ByteStream + ?Sized> ByteStream for &mut T {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_some(buf)
    }

    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write_some(buf)
    }

    fn seek_to(&mut self, pos: SeekFrom) -> io::Result<Option<u64>> {
        (**self).seek_to(pos)
    }

    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}

impl<T: ByteStream + ?Sized> ByteStream for Box<T> {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_some(buf)
    }

    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write_some(buf)
    }

    fn seek_to(&mut self, pos: SeekFrom) -> io::Result<Option<u64>> {
        (**self).seek_to(pos)
    }

    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}

/// Non-seekable read-only transport (stdin, decompressors, sockets)
pub struct ReadPipe<R: Read>(pub R);

impl<R: Read> ByteStream for ReadPipe<R> {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn write_some(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(not_supported("writable"))
    }

    fn seek_to(&mut self, _pos: SeekFrom) -> io::Result<Option<u64>> {
        Ok(None)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Non-seekable write-only transport (stdout, compressors)
pub struct WritePipe<W: Write>(pub W);

impl<W: Write> ByteStream for WritePipe<W> {
    fn read_some(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(not_supported("readable"))
    }

    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn seek_to(&mut self, _pos: SeekFrom) -> io::Result<Option<u64>> {
        Ok(None)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// A reader that reads the archive in fixed-size records
///
/// Each refill reads one whole record, looping over short reads so that
/// pipes which deliver data in small pieces still produce full records.
/// A final record cut short by end of stream is zero-padded to a block
/// boundary and flagged, which keeps checksums over tail garbage defined.
pub struct BlockReader<S: ByteStream> {
    stream: S,
    /// Size of each record in bytes
    record_size: usize,
    /// Buffer holding the current record
    buffer: Vec<u8>,
    /// Current position within the buffer
    pos: usize,
    /// Number of valid bytes in the buffer, after block padding
    valid: usize,
    /// Zero bytes appended to the last short record
    pad: usize,
    /// Whether we've reached EOF
    eof: bool,
    /// Whether any record came back shorter than record_size
    short_record: bool,
    /// Stream offset of buffer[0]
    buffer_offset: u64,
    /// Sticky transport failure
    bad: bool,
    /// Second sink that receives every record as it is read
    pass_through: Option<Box<dyn Write>>,
}

impl<S: ByteStream> BlockReader<S> {
    /// Create a new blocked reader with the specified record size
    pub fn new(stream: S, record_size: usize) -> Self {
        Self::at_offset(stream, record_size, 0)
    }

    /// Create a reader over a stream already positioned at `offset`
    pub fn at_offset(stream: S, record_size: usize, offset: u64) -> Self {
        let record_size = parse_blocksize(record_size as u32);
        BlockReader {
            stream,
            record_size,
            buffer: vec![0u8; record_size],
            pos: 0,
            valid: 0,
            pad: 0,
            eof: false,
            short_record: false,
            buffer_offset: offset,
            bad: false,
            pass_through: None,
        }
    }

    /// Forward every record read to `sink` as soon as it is filled
    pub fn with_pass_through(mut self, sink: Box<dyn Write>) -> Self {
        self.pass_through = Some(sink);
        self
    }

    /// Logical stream offset of the next unread byte
    pub fn offset(&self) -> u64 {
        self.buffer_offset + self.pos as u64
    }

    /// True once a record shorter than the record size was seen
    pub fn saw_short_record(&self) -> bool {
        self.short_record
    }

    /// Zero bytes added to pad the final short record
    pub fn tail_padding(&self) -> usize {
        self.pad
    }

    /// Whether the underlying stream has been fully consumed
    pub fn at_eof(&mut self) -> TarResult<bool> {
        if self.pos < self.valid {
            return Ok(false);
        }
        Ok(self.fill_buffer()? == 0)
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn check_bad(&self) -> TarResult<()> {
        if self.bad {
            return Err(TarError::ArchiveBad);
        }
        Ok(())
    }

    /// Read the next record from the underlying stream
    ///
    /// Returns the number of bytes now available (0 at EOF).
    fn fill_buffer(&mut self) -> TarResult<usize> {
        self.check_bad()?;
        self.buffer_offset += self.valid as u64;
        self.pos = 0;
        self.valid = 0;
        if self.eof {
            return Ok(0);
        }

        let mut n = 0;
        while n < self.record_size {
            match self.stream.read_some(&mut self.buffer[n..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(got) => n += got,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.bad = true;
                    return Err(TarError::Read(e));
                }
            }
        }

        if n == 0 {
            return Ok(0);
        }

        if n < self.record_size {
            self.short_record = true;
            let padded = align_block(n as u64) as usize;
            self.buffer[n..padded].fill(0);
            self.pad = padded - n;
            self.valid = padded;
            log::trace!("short record: {} bytes, padded to {}", n, padded);
        } else {
            self.valid = n;
        }

        if let Some(sink) = self.pass_through.as_mut() {
            if let Err(e) = sink.write_all(&self.buffer[..n]) {
                self.bad = true;
                return Err(TarError::Write(e));
            }
        }

        Ok(self.valid)
    }

    /// Return the next 512-byte block, or None at end of stream
    pub fn read_block(&mut self) -> TarResult<Option<&[u8; TAR_BLOCK_SIZE]>> {
        if self.pos >= self.valid && self.fill_buffer()? == 0 {
            return Ok(None);
        }
        // valid is always a multiple of the block size
        let start = self.pos;
        if start + TAR_BLOCK_SIZE > self.valid {
            return Err(TarError::InvalidHeader("misaligned block read".to_string()));
        }
        self.pos += TAR_BLOCK_SIZE;
        let block: &[u8; TAR_BLOCK_SIZE] = self.buffer[start..start + TAR_BLOCK_SIZE]
            .try_into()
            .map_err(|_| TarError::InvalidHeader("misaligned block read".to_string()))?;
        Ok(Some(block))
    }

    /// Byte-granular read of archive content
    pub fn read_data(&mut self, buf: &mut [u8]) -> TarResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.valid && self.fill_buffer()? == 0 {
            return Ok(0);
        }
        let available = self.valid - self.pos;
        let to_copy = std::cmp::min(available, buf.len());
        buf[..to_copy].copy_from_slice(&self.buffer[self.pos..self.pos + to_copy]);
        self.pos += to_copy;
        Ok(to_copy)
    }

    /// Fill `buf` completely or fail with UnexpectedEof
    pub fn read_exact_data(&mut self, buf: &mut [u8], what: &str) -> TarResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_data(&mut buf[filled..])?;
            if n == 0 {
                return Err(TarError::UnexpectedEof(what.to_string()));
            }
            filled += n;
        }
        Ok(())
    }

    /// Advance the logical position by `count` bytes without copying
    ///
    /// Whole records are skipped with a seek when the stream supports it
    /// and nothing is being passed through; otherwise they are read and
    /// discarded.
    pub fn skip(&mut self, count: u64) -> TarResult<()> {
        let mut remaining = count;

        let buffered = (self.valid - self.pos) as u64;
        let from_buffer = std::cmp::min(buffered, remaining);
        self.pos += from_buffer as usize;
        remaining -= from_buffer;

        if remaining >= self.record_size as u64 && self.pass_through.is_none() && !self.eof {
            let whole = remaining - remaining % self.record_size as u64;
            let target = (self.buffer_offset + self.valid as u64)
                .checked_add(whole)
                .filter(|&t| t <= MAX_MEMBER_SIZE);
            // Past any seekable offset: let the read loop hit end of stream
            if let Some(target) = target {
                match self.stream.seek_to(SeekFrom::Start(target)) {
                    Ok(Some(_)) => {
                        self.buffer_offset = target;
                        self.pos = 0;
                        self.valid = 0;
                        remaining -= whole;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.bad = true;
                        return Err(TarError::Read(e));
                    }
                }
            }
        }

        while remaining > 0 {
            if self.pos >= self.valid && self.fill_buffer()? == 0 {
                return Err(TarError::UnexpectedEof(format!(
                    "{} bytes short while skipping",
                    remaining
                )));
            }
            let step = std::cmp::min((self.valid - self.pos) as u64, remaining);
            self.pos += step as usize;
            remaining -= step;
        }
        Ok(())
    }

    /// Stream offset and bytes of the record holding the current position
    ///
    /// Used by append to rewrite the record that contains the end marker.
    pub fn current_record_prefix(&self) -> (u64, Vec<u8>) {
        (self.buffer_offset, self.buffer[..self.pos].to_vec())
    }
}

/// A writer that writes the archive in fixed-size records
///
/// Writes are buffered until a full record is available. Any transport
/// failure marks the writer bad and every later call fails without
/// touching the stream again.
pub struct BlockWriter<S: ByteStream> {
    stream: S,
    /// Size of each record in bytes
    record_size: usize,
    /// Buffer holding the current record being built
    buffer: Vec<u8>,
    /// Current position within the buffer
    pos: usize,
    /// Total logical bytes accepted so far
    written: u64,
    /// Sticky transport failure
    bad: bool,
    /// Second sink that receives each completed record
    pass_through: Option<Box<dyn Write>>,
}

impl<S: ByteStream> BlockWriter<S> {
    /// Create a new blocked writer with the specified record size
    pub fn new(stream: S, record_size: usize) -> Self {
        let record_size = parse_blocksize(record_size as u32);
        BlockWriter {
            stream,
            record_size,
            buffer: vec![0u8; record_size],
            pos: 0,
            written: 0,
            bad: false,
            pass_through: None,
        }
    }

    /// Resume writing inside an existing record
    ///
    /// The stream must already be positioned at the start of the record;
    /// `prefix` holds the bytes of that record that are kept.
    pub fn resume(stream: S, record_size: usize, record_offset: u64, prefix: &[u8]) -> Self {
        let mut writer = Self::new(stream, record_size);
        let keep = std::cmp::min(prefix.len(), writer.record_size);
        writer.buffer[..keep].copy_from_slice(&prefix[..keep]);
        writer.pos = keep;
        writer.written = record_offset + keep as u64;
        writer
    }

    /// Forward every completed record to `sink` as well
    pub fn with_pass_through(mut self, sink: Box<dyn Write>) -> Self {
        self.pass_through = Some(sink);
        self
    }

    /// Total logical bytes written
    pub fn offset(&self) -> u64 {
        self.written
    }

    fn check_bad(&self) -> TarResult<()> {
        if self.bad {
            return Err(TarError::ArchiveBad);
        }
        Ok(())
    }

    fn write_all_stream(&mut self, len: usize) -> TarResult<()> {
        let mut done = 0;
        while done < len {
            match self.stream.write_some(&self.buffer[done..len]) {
                Ok(0) => {
                    self.bad = true;
                    return Err(TarError::Write(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "archive device refused data",
                    )));
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.bad = true;
                    return Err(TarError::Write(e));
                }
            }
        }
        if let Some(sink) = self.pass_through.as_mut() {
            if let Err(e) = sink.write_all(&self.buffer[..len]) {
                self.bad = true;
                return Err(TarError::Write(e));
            }
        }
        Ok(())
    }

    /// Flush the current record, zero-padded to the full record size
    fn flush_record(&mut self) -> TarResult<()> {
        if self.pos == 0 {
            return Ok(());
        }
        self.buffer[self.pos..].fill(0);
        let len = self.record_size;
        self.write_all_stream(len)?;
        self.pos = 0;
        Ok(())
    }

    /// Append raw bytes to the archive
    pub fn write_data(&mut self, data: &[u8]) -> TarResult<()> {
        self.check_bad()?;
        let mut written = 0;
        while written < data.len() {
            let space = self.record_size - self.pos;
            let to_copy = std::cmp::min(space, data.len() - written);
            self.buffer[self.pos..self.pos + to_copy]
                .copy_from_slice(&data[written..written + to_copy]);
            self.pos += to_copy;
            written += to_copy;
            self.written += to_copy as u64;

            if self.pos >= self.record_size {
                self.flush_record()?;
            }
        }
        Ok(())
    }

    /// Write bytes, optionally zero-padding to the next block boundary
    pub fn write_block(&mut self, data: &[u8], pad_with_zero: bool) -> TarResult<()> {
        self.write_data(data)?;
        if pad_with_zero {
            self.pad_to_block()?;
        }
        Ok(())
    }

    /// Zero-pad the logical position to a block boundary
    pub fn pad_to_block(&mut self) -> TarResult<()> {
        let padding = padding_needed(self.written);
        if padding > 0 {
            self.write_data(&ZERO_BLOCK[..padding])?;
        }
        Ok(())
    }

    /// Flush the final (zero-padded) record, sync, and return the stream
    pub fn finish(mut self) -> TarResult<S> {
        self.check_bad()?;
        self.flush_record()?;
        if let Err(e) = self.stream.sync() {
            return Err(TarError::Write(e));
        }
        if let Some(sink) = self.pass_through.as_mut() {
            sink.flush().map_err(TarError::Write)?;
        }
        Ok(self.stream)
    }
}
