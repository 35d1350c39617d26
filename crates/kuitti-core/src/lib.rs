// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Kuitti — Core types, receipt document model and error definitions shared
// across all crates.

pub mod config;
pub mod document;
pub mod error;
pub mod types;

pub use config::ServiceConfig;
pub use document::{Node, ReceiptDocument};
pub use error::KuittiError;
pub use types::*;
