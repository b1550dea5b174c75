//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Gzip filter for the archive transport (`tar -z`)

use libflate::gzip;
use std::io::{self, Cursor, Read, Write};

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Decompressing reader
pub struct GzipReader<R: Read> {
    decoder: gzip::Decoder<R>,
}

impl<R: Read> GzipReader<R> {
    pub fn new(reader: R) -> io::Result<Self> {
        Ok(GzipReader {
            decoder: gzip::Decoder::new(reader)?,
        })
    }
}

impl<R: Read> Read for GzipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf)
    }
}

/// Compressing writer; call [`GzipWriter::finish`] to write the trailer
pub struct GzipWriter<W: Write> {
    encoder: Option<gzip::Encoder<W>>,
}

impl<W: Write> GzipWriter<W> {
    pub fn new(writer: W) -> io::Result<Self> {
        Ok(GzipWriter {
            encoder: Some(gzip::Encoder::new(writer)?),
        })
    }

    /// Flush the gzip trailer and hand back the underlying writer
    pub fn finish(mut self) -> io::Result<W> {
        match self.encoder.take() {
            Some(encoder) => encoder.finish().into_result(),
            None => Err(io::Error::other("gzip stream already finished")),
        }
    }
}

impl<W: Write> Write for GzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.write(buf),
            None => Err(io::Error::other("gzip stream already finished")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for GzipWriter<W> {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            let _ = encoder.finish();
        }
    }
}

/// Wrap `reader` in a decompressor if its first bytes carry the gzip
/// magic; otherwise return it unchanged.
pub fn auto_decompress<R: Read + 'static>(mut reader: R) -> io::Result<Box<dyn Read>> {
    let mut head = [0u8; 2];
    let mut got = 0;
    while got < head.len() {
        match reader.read(&mut head[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let replay = Cursor::new(head[..got].to_vec()).chain(reader);
    if is_gzip(&head[..got]) {
        Ok(Box::new(GzipReader::new(replay)?))
    } else {
        Ok(Box::new(replay))
    }
}
