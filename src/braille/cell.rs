//! # Braille Cells
//!
//! A six-dot Braille cell is numbered like this:
//!
//! ```text
//! 1 ● ● 4
//! 2 ● ● 5
//! 3 ● ● 6
//! ```
//!
//! [`Dots`] stores the raised dots as a 6-bit mask where bit `n-1` is dot `n`.
//! That mask is also the byte sent to the embosser, and the offset of the
//! matching Unicode Braille Patterns glyph from U+2800.

use serde::{Deserialize, Serialize};

use crate::error::{BraillinkError, Result};

/// First code point of the Unicode Braille Patterns block (blank cell).
pub const BRAILLE_BASE: u32 = 0x2800;

/// Mask of the six valid dot bits.
const DOT_MASK: u8 = 0b0011_1111;

/// Set of raised dots in one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dots(u8);

impl Dots {
    /// The blank cell (a space).
    pub const EMPTY: Self = Self(0);

    /// Build from dot positions (1..=6). Duplicates are harmless.
    ///
    /// ```
    /// use braillink::braille::Dots;
    ///
    /// let z = Dots::from_positions(&[1, 3, 5, 6]).unwrap();
    /// assert_eq!(z.to_byte(), 0b110101);
    /// assert!(Dots::from_positions(&[7]).is_err());
    /// ```
    pub fn from_positions(positions: &[u8]) -> Result<Self> {
        let mut mask = 0u8;
        for &p in positions {
            if !(1..=6).contains(&p) {
                return Err(BraillinkError::InvalidInput(format!(
                    "dot position {} outside 1..=6",
                    p
                )));
            }
            mask |= 1 << (p - 1);
        }
        Ok(Self(mask))
    }

    /// Build from a wire byte. Returns `None` if bit 6 or 7 is set.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        if byte & !DOT_MASK == 0 {
            Some(Self(byte))
        } else {
            None
        }
    }

    /// Table constructor for masks known to be in range.
    pub(crate) const fn from_mask(mask: u8) -> Self {
        Self(mask & DOT_MASK)
    }

    /// Wire byte: bit `n-1` set for each raised dot `n`.
    #[inline]
    pub const fn to_byte(self) -> u8 {
        self.0
    }

    /// Whether dot `position` is raised.
    pub fn contains(self, position: u8) -> bool {
        (1..=6).contains(&position) && self.0 & (1 << (position - 1)) != 0
    }

    /// Raised positions in ascending order.
    pub fn positions(self) -> Vec<u8> {
        (1..=6).filter(|&p| self.contains(p)).collect()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Unicode Braille Patterns glyph for this cell.
    pub fn glyph(self) -> char {
        // U+2800..=U+283F are all assigned scalar values
        char::from_u32(BRAILLE_BASE + self.0 as u32).unwrap_or('\u{2800}')
    }

    /// Parse a Unicode glyph. Only the six-dot range U+2800..=U+283F is accepted.
    pub fn from_glyph(glyph: char) -> Option<Self> {
        let offset = (glyph as u32).checked_sub(BRAILLE_BASE)?;
        if offset <= DOT_MASK as u32 {
            Some(Self(offset as u8))
        } else {
            None
        }
    }
}

/// What a cell stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "char", rename_all = "snake_case")]
pub enum Symbol {
    /// A literal character (letter, digit, punctuation or space).
    Char(char),
    /// Dot 6: the next letter is uppercase.
    Capital,
    /// Dots 3-4-5-6: following a–j patterns are digits.
    Numeral,
    /// Dots 5-6: the next a–j pattern is a letter even in numeral mode.
    Letter,
}

/// One Braille cell together with the symbol it encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DotCell {
    symbol: Symbol,
    dots: Dots,
}

impl DotCell {
    pub const fn new(symbol: Symbol, dots: Dots) -> Self {
        Self { symbol, dots }
    }

    pub const fn symbol(&self) -> Symbol {
        self.symbol
    }

    pub const fn dots(&self) -> Dots {
        self.dots
    }

    /// The source character, or `None` for indicator cells.
    pub const fn source_char(&self) -> Option<char> {
        match self.symbol {
            Symbol::Char(c) => Some(c),
            _ => None,
        }
    }

    pub fn glyph(&self) -> char {
        self.dots.glyph()
    }

    pub const fn to_byte(&self) -> u8 {
        self.dots.to_byte()
    }

    pub const fn is_indicator(&self) -> bool {
        !matches!(self.symbol, Symbol::Char(_))
    }
}

// ============================================================================
// TESTS
// ============================================================================
