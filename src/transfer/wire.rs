//! # Embosser Wire Commands
//!
//! Data bytes on the link are cell masks in `0x00..=0x3F`. Command bytes set
//! bit 7 so they can never be mistaken for a cell.
//!
//! | Byte | Meaning |
//! |------|---------|
//! | `0x00..=0x3F` | One cell, bit `n-1` per raised dot `n` |
//! | `0x81` | Commit: emboss everything received |
//! | `0x82` | Status request: device answers with 3 status bytes |

/// Bit set on every command byte.
pub const COMMAND_FLAG: u8 = 0x80;

/// Commit opcode.
pub const COMMIT: u8 = COMMAND_FLAG | 0x01;

/// Status request opcode.
pub const STATUS_REQUEST: u8 = COMMAND_FLAG | 0x02;

/// Length of a status reply: battery, paper, error code.
pub const STATUS_REPLY_LEN: usize = 3;

/// # Commit and Emboss (0x81)
///
/// Sent once after the last data chunk of a job. The device embosses the
/// buffered cells and clears its buffer.
///
/// ```
/// use braillink::transfer::wire;
///
/// assert_eq!(wire::commit(), vec![0x81]);
/// ```
#[inline]
pub fn commit() -> Vec<u8> {
    vec![COMMIT]
}

/// # Request Status (0x82)
///
/// The device replies with `[battery, paper, error]`.
#[inline]
pub fn status_request() -> Vec<u8> {
    vec![STATUS_REQUEST]
}

/// Whether a byte is a command rather than a cell.
#[inline]
pub fn is_command(byte: u8) -> bool {
    byte & COMMAND_FLAG != 0
}
