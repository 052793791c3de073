//! # Braille Codec
//!
//! Stateless translation between text and six-dot Braille cells.
//!
//! - [`cell`]: `Dots` bitmask and `DotCell`
//! - [`table`]: grade-1 character table and reverse lookup
//! - [`codec`]: text encoding with capital/numeral/letter indicators, decoding

pub mod cell;
pub mod codec;
pub mod table;

pub use cell::{DotCell, Dots, Symbol};
pub use codec::{
    TranslationResult, decode_cells, decode_dots, decode_unicode, encode, encode_strict,
};
pub use table::{UNKNOWN_CHAR, character_to_dots, character_to_glyph, dots_to_character};
