// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transport-agnostic receipt document model.
//
// A `ReceiptDocument` is an ordered, immutable list of semantic nodes. It is
// validated once on construction (size scales, QR parameters) so encoders
// can rely on well-formed input. Documents never carry raw printer bytes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{KuittiError, Result};

/// Largest width or height multiplier a document may request.
pub const MAX_SIZE_SCALE: u8 = 8;

/// Largest QR payload, in bytes (QR version 40, numeric mode).
pub const MAX_QR_PAYLOAD: usize = 7089;

/// Horizontal alignment of a text block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    #[default]
    Left,
    Center,
    Right,
}

/// Character magnification, 1..=8 per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SizeScale {
    pub width: u8,
    pub height: u8,
}

impl SizeScale {
    pub const NORMAL: SizeScale = SizeScale {
        width: 1,
        height: 1,
    };

    pub fn new(width: u8, height: u8) -> Result<Self> {
        let scale = Self { width, height };
        scale.validate()?;
        Ok(scale)
    }

    pub fn uniform(factor: u8) -> Result<Self> {
        Self::new(factor, factor)
    }

    fn validate(&self) -> Result<()> {
        let in_range = |v: u8| (1..=MAX_SIZE_SCALE).contains(&v);
        if in_range(self.width) && in_range(self.height) {
            Ok(())
        } else {
            Err(KuittiError::InvalidDocument(format!(
                "size scale {}x{} outside 1..={MAX_SIZE_SCALE}",
                self.width, self.height
            )))
        }
    }
}

impl Default for SizeScale {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Character used to draw a separator line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeparatorStyle {
    #[default]
    Single,
    Double,
    Dotted,
    Custom(char),
}

impl SeparatorStyle {
    pub fn glyph(&self) -> char {
        match self {
            Self::Single => '-',
            Self::Double => '=',
            Self::Dotted => '.',
            Self::Custom(c) => *c,
        }
    }
}

/// QR error-correction level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QrErrorCorrection {
    /// ~7% recovery.
    #[serde(rename = "L")]
    Low,
    /// ~15% recovery.
    #[default]
    #[serde(rename = "M")]
    Medium,
    /// ~25% recovery.
    #[serde(rename = "Q")]
    Quartile,
    /// ~30% recovery.
    #[serde(rename = "H")]
    High,
}

impl QrErrorCorrection {
    /// Level as 0 (L) through 3 (H).
    pub fn level(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::Quartile => 2,
            Self::High => 3,
        }
    }
}

/// A run of styled text. `\n` inside `content` starts a new printed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    pub content: String,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub size: SizeScale,
    #[serde(default)]
    pub align: Align,
}

impl TextBlock {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            bold: false,
            size: SizeScale::NORMAL,
            align: Align::Left,
        }
    }

    pub fn emphasized(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn aligned(mut self, align: Align) -> Self {
        self.align = align;
        self
    }

    /// Unchecked here; `ReceiptDocument` construction rejects bad scales.
    pub fn scaled(mut self, width: u8, height: u8) -> Self {
        self.size = SizeScale { width, height };
        self
    }
}

/// A QR code symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCode {
    pub payload: String,
    /// Dot width of one module.
    pub module_size: u8,
    #[serde(default)]
    pub error_correction: QrErrorCorrection,
}

impl QrCode {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            module_size: 4,
            error_correction: QrErrorCorrection::Medium,
        }
    }
}

/// One semantic element of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    TextBlock(TextBlock),
    Separator {
        #[serde(default)]
        style: SeparatorStyle,
    },
    LineFeed {
        count: u8,
    },
    QrCode(QrCode),
    CutPaper,
}

impl Node {
    /// Short label for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextBlock(_) => "text block",
            Self::Separator { .. } => "separator",
            Self::LineFeed { .. } => "line feed",
            Self::QrCode(_) => "QR code",
            Self::CutPaper => "paper cut",
        }
    }

    fn validate(&self, index: usize) -> Result<()> {
        match self {
            Self::TextBlock(block) => block.size.validate().map_err(|e| {
                KuittiError::InvalidDocument(format!("node {index} ({}): {e}", self.kind()))
            }),
            Self::QrCode(qr) => {
                if qr.payload.is_empty() {
                    return Err(KuittiError::InvalidDocument(format!(
                        "node {index}: QR payload is empty"
                    )));
                }
                if qr.payload.len() > MAX_QR_PAYLOAD {
                    return Err(KuittiError::InvalidDocument(format!(
                        "node {index}: QR payload of {} bytes exceeds {MAX_QR_PAYLOAD}",
                        qr.payload.len()
                    )));
                }
                if qr.module_size == 0 {
                    return Err(KuittiError::InvalidDocument(format!(
                        "node {index}: QR module size must be at least 1"
                    )));
                }
                Ok(())
            }
            Self::Separator { .. } | Self::LineFeed { .. } | Self::CutPaper => Ok(()),
        }
    }
}

/// An ordered, immutable, validated sequence of receipt nodes.
///
/// Cloning is cheap; the node list is shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Node>", into = "Vec<Node>")]
pub struct ReceiptDocument {
    nodes: Arc<[Node]>,
}

impl ReceiptDocument {
    pub fn new(nodes: Vec<Node>) -> Result<Self> {
        for (index, node) in nodes.iter().enumerate() {
            node.validate(index)?;
        }
        Ok(Self {
            nodes: nodes.into(),
        })
    }

    pub fn builder() -> DocumentBuilder {
        DocumentBuilder::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl TryFrom<Vec<Node>> for ReceiptDocument {
    type Error = KuittiError;

    fn try_from(nodes: Vec<Node>) -> Result<Self> {
        Self::new(nodes)
    }
}

impl From<ReceiptDocument> for Vec<Node> {
    fn from(doc: ReceiptDocument) -> Self {
        doc.nodes.to_vec()
    }
}

/// Incremental construction of a `ReceiptDocument`.
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    nodes: Vec<Node>,
}

impl DocumentBuilder {
    pub fn text(self, block: TextBlock) -> Self {
        self.node(Node::TextBlock(block))
    }

    /// Plain left-aligned line, terminated with a newline.
    pub fn line(self, content: impl Into<String>) -> Self {
        let mut content = content.into();
        content.push('\n');
        self.text(TextBlock::new(content))
    }

    pub fn separator(self, style: SeparatorStyle) -> Self {
        self.node(Node::Separator { style })
    }

    pub fn feed(self, count: u8) -> Self {
        self.node(Node::LineFeed { count })
    }

    pub fn qr(self, qr: QrCode) -> Self {
        self.node(Node::QrCode(qr))
    }

    pub fn cut(self) -> Self {
        self.node(Node::CutPaper)
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn build(self) -> Result<ReceiptDocument> {
        ReceiptDocument::new(self.nodes)
    }
}
