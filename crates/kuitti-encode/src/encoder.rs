// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Receipt document to printer byte stream.
//
// The walk over document nodes is shared; each printer family only supplies
// the byte sequences for primitive operations through `CommandSet`. The
// walker tracks the current emphasis, size and alignment so a control
// sequence is written only when the value changes.

use enum_dispatch::enum_dispatch;
use tracing::{debug, instrument};

use kuitti_core::document::{Align, Node, QrCode, ReceiptDocument, SizeScale, TextBlock};
use kuitti_core::error::{KuittiError, Result};
use kuitti_core::types::{CodePage, PrinterDevice, ProtocolFamily};

use crate::codepage::EncodingTable;
use crate::escpos::{EscPos, LF};
use crate::star_line::StarLine;

/// Columns at normal size on 80 mm paper.
pub const DEFAULT_COLUMNS: u16 = 48;

/// Byte sequences for one printer command family.
#[enum_dispatch]
pub trait CommandSet {
    fn family(&self) -> ProtocolFamily;

    /// Reject nodes this family cannot represent. Called for every node
    /// before any byte is produced.
    fn check(&self, node: &Node) -> std::result::Result<(), String>;

    /// Reset the printer and select the code page.
    fn initialize(&self, code_page: CodePage, out: &mut Vec<u8>);

    fn bold(&self, on: bool, out: &mut Vec<u8>);

    fn size(&self, scale: SizeScale, out: &mut Vec<u8>);

    fn align(&self, align: Align, out: &mut Vec<u8>);

    fn line_feed(&self, out: &mut Vec<u8>) {
        out.push(LF);
    }

    /// `data` is the payload already passed through the encoding table.
    fn qr_code(&self, qr: &QrCode, data: &[u8], out: &mut Vec<u8>);

    fn cut(&self, out: &mut Vec<u8>);
}

/// The supported command families.
#[enum_dispatch(CommandSet)]
#[derive(Debug, Clone, Copy)]
pub enum Dialect {
    EscPos(EscPos),
    StarLine(StarLine),
}

impl Dialect {
    pub fn for_family(family: ProtocolFamily) -> Self {
        match family {
            ProtocolFamily::EscPos => Self::EscPos(EscPos),
            ProtocolFamily::StarLine => Self::StarLine(StarLine),
        }
    }
}

/// Encodes receipt documents for one family, code page and paper width.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptEncoder {
    dialect: Dialect,
    table: EncodingTable,
    columns: u16,
}

impl ReceiptEncoder {
    pub fn new(family: ProtocolFamily, table: EncodingTable) -> Self {
        Self {
            dialect: Dialect::for_family(family),
            table,
            columns: DEFAULT_COLUMNS,
        }
    }

    /// Encoder matching a catalog record's family, code page and width.
    pub fn for_device(device: &PrinterDevice, fallback: u8, default_columns: u16) -> Self {
        let table = EncodingTable::new(device.code_page).with_fallback(fallback);
        Self::new(device.protocol_family, table)
            .with_columns(device.capabilities.line_width.unwrap_or(default_columns))
    }

    pub fn with_columns(mut self, columns: u16) -> Self {
        self.columns = columns.max(1);
        self
    }

    pub fn family(&self) -> ProtocolFamily {
        self.dialect.family()
    }

    pub fn table(&self) -> &EncodingTable {
        &self.table
    }

    /// Encode `document`, or fail before producing any output if a node
    /// has no representation in this family.
    #[instrument(skip_all, fields(family = %self.family(), code_page = %self.table.code_page(), nodes = document.len()))]
    pub fn encode(&self, document: &ReceiptDocument) -> Result<Vec<u8>> {
        for (index, node) in document.nodes().iter().enumerate() {
            self.dialect
                .check(node)
                .map_err(|reason| KuittiError::EncodingUnsupportedNode {
                    family: self.family(),
                    node: format!("node {index} ({})", node.kind()),
                    reason,
                })?;
        }

        let mut walker = Walker::new(self);
        for node in document.nodes() {
            walker.node(node);
        }
        let bytes = walker.finish();
        debug!(bytes = bytes.len(), "receipt encoded");
        Ok(bytes)
    }
}

/// Encode `document` for `family` at the default paper width.
pub fn encode_receipt(
    document: &ReceiptDocument,
    family: ProtocolFamily,
    table: EncodingTable,
) -> Result<Vec<u8>> {
    ReceiptEncoder::new(family, table).encode(document)
}

// ---------------------------------------------------------------------------
// Node walker
// ---------------------------------------------------------------------------

/// Printer-side style after `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Style {
    bold: bool,
    size: SizeScale,
    align: Align,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            bold: false,
            size: SizeScale::NORMAL,
            align: Align::Left,
        }
    }
}

struct Walker<'a> {
    encoder: &'a ReceiptEncoder,
    style: Style,
    at_line_start: bool,
    out: Vec<u8>,
}

impl<'a> Walker<'a> {
    fn new(encoder: &'a ReceiptEncoder) -> Self {
        let mut out = Vec::with_capacity(512);
        encoder
            .dialect
            .initialize(encoder.table.code_page(), &mut out);
        Self {
            encoder,
            style: Style::default(),
            at_line_start: true,
            out,
        }
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::TextBlock(block) => self.text(block),
            Node::Separator { style } => {
                self.end_line();
                let width = (self.encoder.columns / u16::from(self.style.size.width)).max(1);
                let byte = self.encoder.table.encode(style.glyph());
                self.out.extend(std::iter::repeat_n(byte, usize::from(width)));
                self.line_feed();
            }
            Node::LineFeed { count } => {
                for _ in 0..*count {
                    self.line_feed();
                }
            }
            Node::QrCode(qr) => {
                self.end_line();
                let mut data = Vec::with_capacity(qr.payload.len());
                self.encoder.table.encode_str(&qr.payload, &mut data);
                self.encoder.dialect.qr_code(qr, &data, &mut self.out);
                self.at_line_start = true;
            }
            Node::CutPaper => {
                self.end_line();
                self.encoder.dialect.cut(&mut self.out);
                self.at_line_start = true;
            }
        }
    }

    fn text(&mut self, block: &TextBlock) {
        let dialect = self.encoder.dialect;
        if block.bold != self.style.bold {
            dialect.bold(block.bold, &mut self.out);
            self.style.bold = block.bold;
        }
        if block.size != self.style.size {
            dialect.size(block.size, &mut self.out);
            self.style.size = block.size;
        }
        if block.align != self.style.align {
            // Alignment only applies from the start of a line.
            self.end_line();
            dialect.align(block.align, &mut self.out);
            self.style.align = block.align;
        }
        for c in block.content.chars() {
            match c {
                '\n' => self.line_feed(),
                '\r' => {}
                c => {
                    self.out.push(self.encoder.table.encode(c));
                    self.at_line_start = false;
                }
            }
        }
    }

    fn line_feed(&mut self) {
        self.encoder.dialect.line_feed(&mut self.out);
        self.at_line_start = true;
    }

    /// Terminate a partially written line.
    fn end_line(&mut self) {
        if !self.at_line_start {
            self.line_feed();
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.end_line();
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuitti_core::document::{QrErrorCorrection, SeparatorStyle};

    use crate::escpos::{ESC, GS};

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    fn position(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap_or_else(|| panic!("{needle:02x?} not found"))
    }

    fn hello_document() -> ReceiptDocument {
        ReceiptDocument::builder()
            .text(TextBlock::new("HELLO").emphasized().aligned(Align::Center))
            .cut()
            .build()
            .expect("valid document")
    }

    #[test]
    fn escpos_hello_emits_init_bold_text_and_cut_in_order() {
        let bytes = encode_receipt(
            &hello_document(),
            ProtocolFamily::EscPos,
            EncodingTable::new(CodePage::Cp437),
        )
        .expect("encode");

        assert!(bytes.starts_with(&[ESC, b'@']));
        let bold = position(&bytes, &[ESC, b'E', 1]);
        let text = position(&bytes, b"HELLO");
        let cut = position(&bytes, &[GS, b'V', 66, 3]);
        assert!(bold < text && text < cut);
        assert!(contains(&bytes, &[ESC, b'a', 1]));
        assert!(bytes.ends_with(&[LF, GS, b'V', 66, 3]));
    }

    #[test]
    fn star_line_hello_uses_star_sequences() {
        let bytes = encode_receipt(
            &hello_document(),
            ProtocolFamily::StarLine,
            EncodingTable::new(CodePage::Cp437),
        )
        .expect("encode");

        assert!(bytes.starts_with(&[ESC, b'@', ESC, GS, b't', 1]));
        assert!(contains(&bytes, &[ESC, b'E']));
        assert!(contains(&bytes, &[ESC, GS, b'a', 1]));
        assert!(contains(&bytes, b"HELLO"));
        assert!(bytes.ends_with(&[ESC, b'd', 3]));
    }

    #[test]
    fn encoding_is_deterministic() {
        let doc = ReceiptDocument::builder()
            .text(TextBlock::new("Päivän lounas\n").scaled(2, 2))
            .separator(SeparatorStyle::Double)
            .qr(QrCode::new("https://example.com/r/42"))
            .feed(3)
            .cut()
            .build()
            .expect("valid document");
        for family in [ProtocolFamily::EscPos, ProtocolFamily::StarLine] {
            for cp in CodePage::ALL {
                let a = encode_receipt(&doc, family, EncodingTable::new(cp)).expect("encode");
                let b = encode_receipt(&doc, family, EncodingTable::new(cp)).expect("encode");
                assert_eq!(a, b, "{family} {cp}");
            }
        }
    }

    #[test]
    fn style_changes_are_emitted_only_on_change() {
        let doc = ReceiptDocument::builder()
            .text(TextBlock::new("a").emphasized())
            .text(TextBlock::new("b").emphasized())
            .text(TextBlock::new("c"))
            .build()
            .expect("valid document");
        let bytes = encode_receipt(&doc, ProtocolFamily::EscPos, EncodingTable::new(CodePage::Cp437))
            .expect("encode");
        let on = bytes.windows(3).filter(|w| *w == [ESC, b'E', 1]).count();
        let off = bytes.windows(3).filter(|w| *w == [ESC, b'E', 0]).count();
        assert_eq!((on, off), (1, 1));
        assert!(contains(&bytes, b"ab"));
        // Normal size and left alignment are the reset state.
        assert!(!contains(&bytes, &[GS, b'!']));
        assert!(!contains(&bytes, &[ESC, b'a']));
    }

    #[test]
    fn unmappable_character_becomes_fallback_and_still_succeeds() {
        let doc = ReceiptDocument::builder()
            .text(TextBlock::new("A中B"))
            .build()
            .expect("valid document");
        let bytes = encode_receipt(&doc, ProtocolFamily::EscPos, EncodingTable::new(CodePage::Cp865))
            .expect("encode");
        assert!(contains(&bytes, b"A?B"));
    }

    #[test]
    fn control_characters_in_text_cannot_inject_commands() {
        let doc = ReceiptDocument::builder()
            .text(TextBlock::new("x\u{1B}@y"))
            .build()
            .expect("valid document");
        let bytes = encode_receipt(&doc, ProtocolFamily::EscPos, EncodingTable::new(CodePage::Cp437))
            .expect("encode");
        assert!(contains(&bytes, b"x?@y"));
        assert_eq!(bytes.iter().filter(|&&b| b == ESC).count(), 2);
    }

    #[test]
    fn separator_width_follows_columns_and_width_scale() {
        let doc = ReceiptDocument::builder()
            .text(TextBlock::new("").scaled(2, 1))
            .separator(SeparatorStyle::Single)
            .build()
            .expect("valid document");
        let bytes = ReceiptEncoder::new(ProtocolFamily::EscPos, EncodingTable::new(CodePage::Cp437))
            .with_columns(32)
            .encode(&doc)
            .expect("encode");
        let run = bytes.iter().filter(|&&b| b == b'-').count();
        assert_eq!(run, 16);
    }

    #[test]
    fn partial_line_is_terminated_before_qr_and_cut() {
        let mut qr = QrCode::new("ABC");
        qr.error_correction = QrErrorCorrection::Low;
        let doc = ReceiptDocument::builder()
            .text(TextBlock::new("total"))
            .qr(qr)
            .build()
            .expect("valid document");
        let bytes = encode_receipt(&doc, ProtocolFamily::EscPos, EncodingTable::new(CodePage::Cp437))
            .expect("encode");
        assert!(contains(&bytes, &[b'l', LF, GS, b'(', b'k']));
    }

    #[test]
    fn unsupported_node_fails_before_any_output() {
        let doc = ReceiptDocument::builder()
            .text(TextBlock::new("fine"))
            .text(TextBlock::new("huge").scaled(8, 8))
            .build()
            .expect("valid document");
        let err = encode_receipt(&doc, ProtocolFamily::StarLine, EncodingTable::new(CodePage::Cp437))
            .expect_err("star line cannot scale 8x");
        match err {
            KuittiError::EncodingUnsupportedNode { family, node, .. } => {
                assert_eq!(family, ProtocolFamily::StarLine);
                assert!(node.starts_with("node 1"));
            }
            other => panic!("unexpected error {other}"),
        }
        // ESC/POS handles the same document.
        assert!(encode_receipt(&doc, ProtocolFamily::EscPos, EncodingTable::new(CodePage::Cp437)).is_ok());
    }

    #[test]
    fn device_line_width_overrides_default_columns() {
        let mut device = PrinterDevice::new("p", kuitti_core::types::Transport::Network, "10.0.0.5", ProtocolFamily::EscPos);
        device.capabilities.line_width = Some(32);
        device.code_page = CodePage::Cp865;
        let encoder = ReceiptEncoder::for_device(&device, b'#', DEFAULT_COLUMNS);
        assert_eq!(encoder.table().code_page(), CodePage::Cp865);
        assert_eq!(encoder.table().fallback(), b'#');
        let doc = ReceiptDocument::builder()
            .separator(SeparatorStyle::Double)
            .build()
            .expect("valid document");
        let bytes = encoder.encode(&doc).expect("encode");
        assert_eq!(bytes.iter().filter(|&&b| b == b'=').count(), 32);
    }
}
