// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ESC/POS command set.

use kuitti_core::document::{Align, Node, QrCode, SizeScale};
use kuitti_core::types::{CodePage, ProtocolFamily};

use crate::encoder::CommandSet;

pub const ESC: u8 = 0x1B;
pub const GS: u8 = 0x1D;
pub const DLE: u8 = 0x10;
pub const EOT: u8 = 0x04;
pub const LF: u8 = 0x0A;

/// Largest QR module size accepted by `GS ( k <fn 167>`.
pub const MAX_QR_MODULE: u8 = 16;

/// Real-time printer status request (`DLE EOT 1`). Printers answer with a
/// single status byte even while idle.
pub const STATUS_REQUEST: [u8; 3] = [DLE, EOT, 0x01];

/// `GS ( k` function prefix for QR code commands (cn = 49).
const QR_PREFIX: [u8; 3] = [GS, b'(', b'k'];

/// ESC/POS: the common Epson-compatible control code set.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscPos;

impl EscPos {
    /// `ESC t n` character code table number.
    pub fn code_table(code_page: CodePage) -> u8 {
        match code_page {
            CodePage::Cp437 => 0,
            CodePage::Cp850 => 2,
            CodePage::Cp865 => 5,
            CodePage::Windows1252 => 16,
            CodePage::Cp858 => 19,
        }
    }
}

impl CommandSet for EscPos {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::EscPos
    }

    fn check(&self, node: &Node) -> Result<(), String> {
        match node {
            Node::QrCode(qr) if qr.module_size > MAX_QR_MODULE => Err(format!(
                "QR module size {} exceeds {MAX_QR_MODULE}",
                qr.module_size
            )),
            _ => Ok(()),
        }
    }

    fn initialize(&self, code_page: CodePage, out: &mut Vec<u8>) {
        out.extend_from_slice(&[ESC, b'@']);
        out.extend_from_slice(&[ESC, b't', Self::code_table(code_page)]);
    }

    fn bold(&self, on: bool, out: &mut Vec<u8>) {
        out.extend_from_slice(&[ESC, b'E', u8::from(on)]);
    }

    fn size(&self, scale: SizeScale, out: &mut Vec<u8>) {
        let n = ((scale.width - 1) << 4) | (scale.height - 1);
        out.extend_from_slice(&[GS, b'!', n]);
    }

    fn align(&self, align: Align, out: &mut Vec<u8>) {
        out.extend_from_slice(&[ESC, b'a', align_code(align)]);
    }

    fn qr_code(&self, qr: &QrCode, data: &[u8], out: &mut Vec<u8>) {
        // Model 2
        out.extend_from_slice(&QR_PREFIX);
        out.extend_from_slice(&[0x04, 0x00, 0x31, 0x41, 0x32, 0x00]);
        // Module size
        out.extend_from_slice(&QR_PREFIX);
        out.extend_from_slice(&[0x03, 0x00, 0x31, 0x43, qr.module_size]);
        // Error correction, 48 ('0') = L through 51 ('3') = H
        out.extend_from_slice(&QR_PREFIX);
        out.extend_from_slice(&[0x03, 0x00, 0x31, 0x45, 48 + qr.error_correction.level()]);
        // Store data; the length covers the three function bytes too.
        let len = data.len() + 3;
        out.extend_from_slice(&QR_PREFIX);
        out.extend_from_slice(&[(len & 0xFF) as u8, (len >> 8) as u8, 0x31, 0x50, 0x30]);
        out.extend_from_slice(data);
        // Print
        out.extend_from_slice(&QR_PREFIX);
        out.extend_from_slice(&[0x03, 0x00, 0x31, 0x51, 0x30]);
    }

    fn cut(&self, out: &mut Vec<u8>) {
        // GS V 66 n: feed n lines, then partial cut.
        out.extend_from_slice(&[GS, b'V', 66, 3]);
    }
}

fn align_code(align: Align) -> u8 {
    match align {
        Align::Left => 0,
        Align::Center => 1,
        Align::Right => 2,
    }
}
