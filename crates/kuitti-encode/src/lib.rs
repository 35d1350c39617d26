// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Kuitti Encode — code page tables and the ESC/POS and Star Line Mode
// command encoders. Pure and synchronous; nothing here does I/O.

pub mod codepage;
pub mod encoder;
pub mod escpos;
pub mod star_line;

pub use codepage::EncodingTable;
pub use encoder::{CommandSet, Dialect, ReceiptEncoder, encode_receipt};
