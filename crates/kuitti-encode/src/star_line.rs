// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Star Line Mode command set (TSP100/TSP650/mC-Print in line mode).
//
// Same operations as ESC/POS, different bytes: emphasis is two separate
// commands, alignment and code page live behind `ESC GS`, and the QR
// commands use the `ESC GS y` family.

use kuitti_core::document::{Align, Node, QrCode, SizeScale};
use kuitti_core::types::{CodePage, ProtocolFamily};

use crate::encoder::CommandSet;
use crate::escpos::{ESC, GS};

pub const ACK: u8 = 0x06;
pub const SOH: u8 = 0x01;

/// Line mode expands characters up to 6x per axis.
pub const MAX_SIZE: u8 = 6;

/// QR cell size range of `ESC GS y S 2 n`.
pub const MAX_QR_MODULE: u8 = 8;

/// Automatic status request (`ESC ACK SOH`).
pub const STATUS_REQUEST: [u8; 3] = [ESC, ACK, SOH];

#[derive(Debug, Clone, Copy, Default)]
pub struct StarLine;

impl StarLine {
    /// `ESC GS t n` code page number. Line mode has no plain PC850, so it
    /// shares PC858.
    pub fn code_table(code_page: CodePage) -> u8 {
        match code_page {
            CodePage::Cp437 => 1,
            CodePage::Cp850 | CodePage::Cp858 => 4,
            CodePage::Cp865 => 9,
            CodePage::Windows1252 => 32,
        }
    }
}

impl CommandSet for StarLine {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::StarLine
    }

    fn check(&self, node: &Node) -> Result<(), String> {
        match node {
            Node::TextBlock(block) if block.size.width > MAX_SIZE || block.size.height > MAX_SIZE => {
                Err(format!(
                    "size scale {}x{} exceeds line mode maximum of {MAX_SIZE}",
                    block.size.width, block.size.height
                ))
            }
            Node::QrCode(qr) if qr.module_size > MAX_QR_MODULE => Err(format!(
                "QR cell size {} exceeds {MAX_QR_MODULE}",
                qr.module_size
            )),
            _ => Ok(()),
        }
    }

    fn initialize(&self, code_page: CodePage, out: &mut Vec<u8>) {
        out.extend_from_slice(&[ESC, b'@']);
        out.extend_from_slice(&[ESC, GS, b't', Self::code_table(code_page)]);
    }

    fn bold(&self, on: bool, out: &mut Vec<u8>) {
        out.extend_from_slice(&[ESC, if on { b'E' } else { b'F' }]);
    }

    fn size(&self, scale: SizeScale, out: &mut Vec<u8>) {
        // ESC i n1 n2: n1 is height, n2 width, both zero-based.
        out.extend_from_slice(&[ESC, b'i', scale.height - 1, scale.width - 1]);
    }

    fn align(&self, align: Align, out: &mut Vec<u8>) {
        let n = match align {
            Align::Left => 0,
            Align::Center => 1,
            Align::Right => 2,
        };
        out.extend_from_slice(&[ESC, GS, b'a', n]);
    }

    fn qr_code(&self, qr: &QrCode, data: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&[ESC, GS, b'y', b'S', b'0', 2]);
        out.extend_from_slice(&[ESC, GS, b'y', b'S', b'1', qr.error_correction.level()]);
        out.extend_from_slice(&[ESC, GS, b'y', b'S', b'2', qr.module_size]);
        // ESC GS y D 1 m nL nH d..., m = 0 selects automatic analysis.
        let len = data.len();
        out.extend_from_slice(&[ESC, GS, b'y', b'D', b'1', 0, (len & 0xFF) as u8, (len >> 8) as u8]);
        out.extend_from_slice(data);
        out.extend_from_slice(&[ESC, GS, b'y', b'P']);
    }

    fn cut(&self, out: &mut Vec<u8>) {
        // ESC d 3: feed to cut position, partial cut.
        out.extend_from_slice(&[ESC, b'd', 3]);
    }
}
