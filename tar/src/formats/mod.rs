//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Header formats and extension records

pub mod gnu;
pub mod header;
pub mod pax;
pub mod sparse;

pub use header::{parse_header, Header};
pub use pax::ExtendedHeader;
pub use sparse::{SparseMap, SparseRegion};
