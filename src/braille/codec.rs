//! # Text ↔ Braille Translation
//!
//! ## Indicators
//!
//! | Cell | Dots | Effect |
//! |------|------|--------|
//! | Capital | 6 | Next letter is uppercase |
//! | Numeral | 3-4-5-6 | Following `a`–`j` patterns read as `1`–`0` |
//! | Letter | 5-6 | Next `a`–`j` pattern is a letter, even in numeral mode |
//!
//! ## Numeral Mode
//!
//! A run of digits gets exactly one numeral indicator. The mode lasts until
//! the next space, so `"A1B2"` carries one numeral indicator while `"1 2"`
//! carries two. Lowercase `a`–`j` written inside numeral mode get a letter
//! indicator so that decoding stays unambiguous.
//!
//! ## Unmapped Characters
//!
//! Characters without a cell are not emitted. They are listed in
//! [`TranslationResult::skipped`]; [`encode_strict`] turns them into an error.

use serde::{Deserialize, Serialize};

use super::cell::{DotCell, Dots, Symbol};
use super::table::{
    self, CAPITAL_INDICATOR, LETTER_INDICATOR, NUMERAL_INDICATOR, UNKNOWN_CHAR,
};
use crate::error::{BraillinkError, Result};

/// Output of [`encode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationResult {
    /// The text that was translated
    pub source_text: String,
    /// Emitted cells including indicator cells, in reading order
    pub cells: Vec<DotCell>,
    /// Concatenated Unicode glyphs of `cells`
    pub unicode_string: String,
    /// Characters that had no Braille mapping, in input order
    pub skipped: Vec<char>,
}

impl TranslationResult {
    /// Whether every input character was translated.
    pub fn is_lossless(&self) -> bool {
        self.skipped.is_empty()
    }

    /// Wire bytes, one per cell.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.cells.iter().map(DotCell::to_byte).collect()
    }
}

/// Translate text into Braille cells.
///
/// ```
/// use braillink::braille::codec::encode;
///
/// let result = encode("Hi 42");
/// assert_eq!(result.unicode_string, "⠠⠓⠊⠀⠼⠙⠃");
/// assert!(result.is_lossless());
/// ```
pub fn encode(text: &str) -> TranslationResult {
    let mut cells = Vec::with_capacity(text.len() + text.len() / 4);
    let mut skipped = Vec::new();
    let mut numeral = false;

    for ch in text.chars() {
        if ch == ' ' {
            numeral = false;
            cells.push(DotCell::new(Symbol::Char(' '), Dots::EMPTY));
            continue;
        }
        if ch.is_whitespace() {
            numeral = false;
            skipped.push(ch);
            continue;
        }

        let Some(dots) = table::character_to_dots(ch) else {
            skipped.push(ch);
            continue;
        };

        if ch.is_ascii_digit() {
            if !numeral {
                cells.push(DotCell::new(Symbol::Numeral, NUMERAL_INDICATOR));
                numeral = true;
            }
        } else if ch.is_ascii_uppercase() {
            cells.push(DotCell::new(Symbol::Capital, CAPITAL_INDICATOR));
        } else if numeral && table::is_digit_pattern(dots) {
            cells.push(DotCell::new(Symbol::Letter, LETTER_INDICATOR));
        }

        cells.push(DotCell::new(Symbol::Char(ch), dots));
    }

    let unicode_string = cells.iter().map(DotCell::glyph).collect();
    TranslationResult {
        source_text: text.to_string(),
        cells,
        unicode_string,
        skipped,
    }
}

/// Like [`encode`] but fails if any character was unmapped.
pub fn encode_strict(text: &str) -> Result<TranslationResult> {
    let result = encode(text);
    if result.is_lossless() {
        Ok(result)
    } else {
        Err(BraillinkError::UnmappedCharacters(result.skipped))
    }
}

/// Decode cells back to text.
pub fn decode_cells(cells: &[DotCell]) -> String {
    decode_dots(cells.iter().map(DotCell::dots))
}

/// Decode raw dot patterns (e.g. read back from hardware) to text.
pub fn decode_dots<I>(dots: I) -> String
where
    I: IntoIterator<Item = Dots>,
{
    let mut decoder = Decoder::default();
    for d in dots {
        decoder.push(d);
    }
    decoder.out
}

/// Decode a string of Unicode Braille glyphs.
///
/// ASCII space is accepted as a blank cell. Any other non-Braille character,
/// and eight-dot patterns, decode to [`UNKNOWN_CHAR`].
pub fn decode_unicode(braille: &str) -> String {
    let mut decoder = Decoder::default();
    for ch in braille.chars() {
        if ch == ' ' {
            decoder.push(Dots::EMPTY);
        } else {
            match Dots::from_glyph(ch) {
                Some(d) => decoder.push(d),
                None => decoder.push_unknown(),
            }
        }
    }
    decoder.out
}

#[derive(Default)]
struct Decoder {
    out: String,
    numeral: bool,
    capital: bool,
    letter: bool,
}

impl Decoder {
    fn push(&mut self, dots: Dots) {
        if dots.is_empty() {
            self.out.push(' ');
            self.numeral = false;
            self.capital = false;
            self.letter = false;
            return;
        }

        match dots {
            CAPITAL_INDICATOR => self.capital = true,
            NUMERAL_INDICATOR => self.numeral = true,
            LETTER_INDICATOR => self.letter = true,
            _ => {
                let as_digit = self.numeral && !self.capital && !self.letter;
                let ch = match table::dots_to_digit(dots) {
                    Some(digit) if as_digit => digit,
                    _ => {
                        let ch = table::dots_to_character(dots);
                        if self.capital {
                            ch.to_ascii_uppercase()
                        } else {
                            ch
                        }
                    }
                };
                self.out.push(ch);
                self.capital = false;
                self.letter = false;
            }
        }
    }

    fn push_unknown(&mut self) {
        self.out.push(UNKNOWN_CHAR);
        self.capital = false;
        self.letter = false;
    }
}

// ============================================================================
// TESTS
// ============================================================================
