// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Character code page tables.
//
// Thermal printers render one byte per glyph through a selectable code page.
// Each table here maps printable ASCII (0x20..=0x7E) to itself and lists the
// glyphs of the upper half (0x80..=0xFF). Anything the table cannot represent,
// including every control character, is written as the fallback byte so a
// stray ESC or NUL in receipt text can never turn into a printer command.

use std::sync::LazyLock;

use kuitti_core::types::CodePage;

/// Byte written for unmappable characters unless configured otherwise.
pub const DEFAULT_FALLBACK: u8 = b'?';

/// Lookup table for one code page.
#[derive(Debug, Clone, Copy)]
pub struct EncodingTable {
    code_page: CodePage,
    upper: &'static [char; 128],
    fallback: u8,
}

impl EncodingTable {
    pub fn new(code_page: CodePage) -> Self {
        let upper = match code_page {
            CodePage::Cp437 => &CP437,
            CodePage::Cp850 => &CP850,
            CodePage::Cp858 => &CP858,
            CodePage::Cp865 => &CP865,
            CodePage::Windows1252 => &*WINDOWS_1252,
        };
        Self {
            code_page,
            upper,
            fallback: DEFAULT_FALLBACK,
        }
    }

    /// Replace the fallback byte. Only printable ASCII is accepted; any
    /// other value keeps the current fallback.
    pub fn with_fallback(mut self, fallback: u8) -> Self {
        if (0x20..=0x7E).contains(&fallback) {
            self.fallback = fallback;
        }
        self
    }

    pub fn code_page(&self) -> CodePage {
        self.code_page
    }

    pub fn fallback(&self) -> u8 {
        self.fallback
    }

    /// Map one character to its code page byte, or the fallback byte.
    pub fn encode(&self, c: char) -> u8 {
        if (' '..='~').contains(&c) {
            return c as u8;
        }
        if c.is_control() {
            return self.fallback;
        }
        self.upper
            .iter()
            .position(|&g| g == c)
            .map(|i| 0x80 + i as u8)
            .unwrap_or(self.fallback)
    }

    /// Append the encoding of every character of `s` to `out`.
    pub fn encode_str(&self, s: &str, out: &mut Vec<u8>) {
        out.extend(s.chars().map(|c| self.encode(c)));
    }

    /// The glyph a printer shows for `byte`, if this table defines one.
    pub fn decode(&self, byte: u8) -> Option<char> {
        match byte {
            0x20..=0x7E => Some(byte as char),
            0x80..=0xFF => Some(self.upper[(byte - 0x80) as usize]).filter(|c| !c.is_control()),
            _ => None,
        }
    }

    /// Whether `c` has a byte of its own in this table.
    pub fn contains(&self, c: char) -> bool {
        ((' '..='~').contains(&c)) || (!c.is_control() && self.upper.contains(&c))
    }

    /// Every character this table can represent, in byte order.
    pub fn charset(&self) -> impl Iterator<Item = char> + '_ {
        (0x20u8..=0xFF).filter_map(|b| self.decode(b))
    }
}

// ---------------------------------------------------------------------------
// Upper halves (0x80..=0xFF)
// ---------------------------------------------------------------------------

/// PC437, USA / standard Europe.
static CP437: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç',
    'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù',
    'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º',
    '¿', '⌐', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖',
    '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟',
    '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫',
    '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ',
    'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈',
    '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{00A0}',
];

/// PC850, Multilingual.
static CP850: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç',
    'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù',
    'ÿ', 'Ö', 'Ü', 'ø', '£', 'Ø', '×', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º',
    '¿', '®', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', 'Á', 'Â', 'À',
    '©', '╣', '║', '╗', '╝', '¢', '¥', '┐',
    '└', '┴', '┬', '├', '─', '┼', 'ã', 'Ã',
    '╚', '╔', '╩', '╦', '╠', '═', '╬', '¤',
    'ð', 'Ð', 'Ê', 'Ë', 'È', 'ı', 'Í', 'Î',
    'Ï', '┘', '┌', '█', '▄', '¦', 'Ì', '▀',
    'Ó', 'ß', 'Ô', 'Ò', 'õ', 'Õ', 'µ', 'þ',
    'Þ', 'Ú', 'Û', 'Ù', 'ý', 'Ý', '¯', '´',
    '\u{00AD}', '±', '‗', '¾', '¶', '§', '÷', '¸',
    '°', '¨', '·', '¹', '³', '²', '■', '\u{00A0}',
];

/// PC858, PC850 with the euro sign replacing the dotless i at 0xD5.
static CP858: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç',
    'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù',
    'ÿ', 'Ö', 'Ü', 'ø', '£', 'Ø', '×', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º',
    '¿', '®', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', 'Á', 'Â', 'À',
    '©', '╣', '║', '╗', '╝', '¢', '¥', '┐',
    '└', '┴', '┬', '├', '─', '┼', 'ã', 'Ã',
    '╚', '╔', '╩', '╦', '╠', '═', '╬', '¤',
    'ð', 'Ð', 'Ê', 'Ë', 'È', '€', 'Í', 'Î',
    'Ï', '┘', '┌', '█', '▄', '¦', 'Ì', '▀',
    'Ó', 'ß', 'Ô', 'Ò', 'õ', 'Õ', 'µ', 'þ',
    'Þ', 'Ú', 'Û', 'Ù', 'ý', 'Ý', '¯', '´',
    '\u{00AD}', '±', '‗', '¾', '¶', '§', '÷', '¸',
    '°', '¨', '·', '¹', '³', '²', '■', '\u{00A0}',
];

/// PC865, Nordic.
static CP865: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç',
    'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù',
    'ÿ', 'Ö', 'Ü', 'ø', '£', 'Ø', '₧', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º',
    '¿', '⌐', '¬', '½', '¼', '¡', '«', '¤',
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖',
    '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟',
    '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫',
    '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ',
    'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈',
    '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{00A0}',
];

/// Windows-1252 as defined by the WHATWG encoding standard. Its five
/// undefined slots decode to C1 controls and are therefore never produced.
static WINDOWS_1252: LazyLock<[char; 128]> = LazyLock::new(|| {
    let mut table = ['\u{FFFD}'; 128];
    for (i, slot) in table.iter_mut().enumerate() {
        let byte = [0x80 + i as u8];
        let (decoded, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(&byte);
        if let Some(c) = decoded.chars().next() {
            *slot = c;
        }
    }
    table
});
