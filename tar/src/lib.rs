//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Reading and writing tar archives
//!
//! Handles the V7, ustar, pax, GNU and star header layouts, including
//! GNU long names, pax extended headers and sparse members.

pub mod archive;
pub mod assembler;
pub mod blocked_io;
pub mod compression;
pub mod error;
pub mod formats;
pub mod fs;
pub mod modes;
pub mod pattern;
pub mod writer;

pub use archive::{ArchiveEntry, ArchiveFormat, EntryType, Timestamp};
pub use assembler::EntryAssembler;
pub use blocked_io::{BlockReader, BlockWriter, ByteStream, ReadPipe, WritePipe};
pub use error::{TarError, TarResult};
pub use fs::{FileSystem, LocalFs};
pub use pattern::{Mask, Pattern};
pub use writer::TarWriter;
