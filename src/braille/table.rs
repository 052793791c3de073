//! # Grade-1 Braille Table
//!
//! Literal (uncontracted) English Braille: letters, digits, space and a small
//! punctuation set. Digits share the patterns of `a`–`j` and are only told
//! apart by the numeral indicator.
//!
//! Every pattern in this table maps back to exactly one character, so the
//! reverse lookup in [`dots_to_character`] is exact.

use super::cell::Dots;

/// Returned by reverse lookups for patterns with no definition.
///
/// Hardware input can be noisy, so unknown patterns never fail.
pub const UNKNOWN_CHAR: char = '\u{FFFD}';

/// Capital indicator (dot 6).
pub const CAPITAL_INDICATOR: Dots = Dots::from_mask(0b10_0000);

/// Numeral indicator (dots 3-4-5-6).
pub const NUMERAL_INDICATOR: Dots = Dots::from_mask(0b11_1100);

/// Letter indicator (dots 5-6), cancels numeral reading for one a–j cell.
pub const LETTER_INDICATOR: Dots = Dots::from_mask(0b11_0000);

/// Punctuation characters with a defined cell.
pub const PUNCTUATION: &[char] = &[',', ';', ':', '.', '!', '?', '\'', '-', '"', '/'];

/// Dots for a character. Uppercase letters map like lowercase, digits like `a`–`j`.
///
/// ```
/// use braillink::braille::table::character_to_dots;
///
/// assert_eq!(character_to_dots('A').unwrap().positions(), vec![1]);
/// assert_eq!(character_to_dots('z').unwrap().positions(), vec![1, 3, 5, 6]);
/// assert_eq!(character_to_dots('1'), character_to_dots('a'));
/// assert!(character_to_dots('★').is_none());
/// ```
pub fn character_to_dots(ch: char) -> Option<Dots> {
    let ch = ch.to_ascii_lowercase();
    if let Some(letter) = digit_letter(ch) {
        return letter_dots(letter);
    }
    letter_dots(ch).or_else(|| punctuation_dots(ch))
}

/// Unicode glyph for a character.
pub fn character_to_glyph(ch: char) -> Option<char> {
    character_to_dots(ch).map(Dots::glyph)
}

/// Exact reverse lookup of one cell, reading `a`–`j` as letters.
///
/// Indicator patterns and undefined patterns return [`UNKNOWN_CHAR`].
pub fn dots_to_character(dots: Dots) -> char {
    if dots.is_empty() {
        return ' ';
    }
    LETTERS
        .iter()
        .position(|&mask| mask == dots.to_byte())
        .map(|i| (b'a' + i as u8) as char)
        .or_else(|| {
            PUNCTUATION
                .iter()
                .copied()
                .find(|&p| punctuation_dots(p) == Some(dots))
        })
        .unwrap_or(UNKNOWN_CHAR)
}

/// Digit value of an `a`–`j` pattern (`a` → `'1'`, `j` → `'0'`).
pub fn dots_to_digit(dots: Dots) -> Option<char> {
    let index = LETTERS[..10].iter().position(|&mask| mask == dots.to_byte())?;
    Some(DIGITS[index])
}

/// Whether the cell is one of the ten `a`–`j` patterns shared with digits.
pub fn is_digit_pattern(dots: Dots) -> bool {
    dots_to_digit(dots).is_some()
}

/// Masks for `a`–`z`, bit `n-1` per dot `n`.
const LETTERS: [u8; 26] = [
    0b00_0001, // a  1
    0b00_0011, // b  12
    0b00_1001, // c  14
    0b01_1001, // d  145
    0b01_0001, // e  15
    0b00_1011, // f  124
    0b01_1011, // g  1245
    0b01_0011, // h  125
    0b00_1010, // i  24
    0b01_1010, // j  245
    0b00_0101, // k  13
    0b00_0111, // l  123
    0b00_1101, // m  134
    0b01_1101, // n  1345
    0b01_0101, // o  135
    0b00_1111, // p  1234
    0b01_1111, // q  12345
    0b01_0111, // r  1235
    0b00_1110, // s  234
    0b01_1110, // t  2345
    0b10_0101, // u  136
    0b10_0111, // v  1236
    0b11_1010, // w  2456
    0b10_1101, // x  1346
    0b11_1101, // y  13456
    0b11_0101, // z  1356
];

/// Digits in the order of the `a`–`j` patterns.
const DIGITS: [char; 10] = ['1', '2', '3', '4', '5', '6', '7', '8', '9', '0'];

fn letter_dots(ch: char) -> Option<Dots> {
    if ch.is_ascii_lowercase() {
        Some(Dots::from_mask(LETTERS[(ch as u8 - b'a') as usize]))
    } else {
        None
    }
}

fn digit_letter(ch: char) -> Option<char> {
    let index = DIGITS.iter().position(|&d| d == ch)?;
    Some((b'a' + index as u8) as char)
}

fn punctuation_dots(ch: char) -> Option<Dots> {
    let mask = match ch {
        ' ' => 0,
        ',' => 0b00_0010,  // 2
        ';' => 0b00_0110,  // 23
        ':' => 0b01_0010,  // 25
        '.' => 0b11_0010,  // 256
        '!' => 0b01_0110,  // 235
        '?' => 0b10_0110,  // 236
        '\'' => 0b00_0100, // 3
        '-' => 0b10_0100,  // 36
        '"' => 0b11_0100,  // 356
        '/' => 0b00_1100,  // 34
        _ => return None,
    };
    Some(Dots::from_mask(mask))
}

// ============================================================================
// TESTS
// ============================================================================
