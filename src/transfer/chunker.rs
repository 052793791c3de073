//! # Link-Sized Chunking
//!
//! Splits a cell sequence into byte chunks no larger than the link's maximum
//! payload per write. Pure data transformation: no knowledge of connections.
//!
//! ```text
//! cells:  [c0 c1 c2 ... c44]          45 cells, max_chunk_size = 20
//! chunks: [b0..b19] [b20..b39] [b40..b44]
//! ```

use crate::braille::{DotCell, Dots};
use crate::error::{BraillinkError, Result};

/// Reference payload size of one link write (BLE default ATT payload).
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 20;

/// One link write worth of cell bytes.
pub type Chunk = Vec<u8>;

/// Split cells into chunks of at most `max_chunk_size` bytes.
///
/// Returns `ceil(n / max_chunk_size)` chunks; only the last may be shorter.
/// An empty input yields no chunks.
///
/// ```
/// use braillink::braille::encode;
/// use braillink::transfer::chunk;
///
/// let cells = encode("hello world").cells;
/// let chunks = chunk(&cells, 4).unwrap();
/// assert_eq!(chunks.len(), 3);
/// assert_eq!(chunks[2].len(), 3);
/// ```
pub fn chunk(cells: &[DotCell], max_chunk_size: usize) -> Result<Vec<Chunk>> {
    if max_chunk_size == 0 {
        return Err(BraillinkError::InvalidInput(
            "max_chunk_size must be at least 1".to_string(),
        ));
    }
    Ok(cells
        .chunks(max_chunk_size)
        .map(|slice| slice.iter().map(DotCell::to_byte).collect())
        .collect())
}

/// Serialize cells to wire bytes without chunking.
pub fn pack_cells(cells: &[DotCell]) -> Vec<u8> {
    cells.iter().map(DotCell::to_byte).collect()
}

/// Parse wire bytes back to dot patterns.
///
/// Bytes with bit 6 or 7 set are commands, not cells, and are rejected.
pub fn unpack_bytes(bytes: &[u8]) -> Result<Vec<Dots>> {
    bytes
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            Dots::from_byte(b).ok_or_else(|| {
                BraillinkError::InvalidInput(format!(
                    "byte 0x{:02X} at offset {} is not a cell",
                    b, i
                ))
            })
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::braille::{decode_dots, encode};

    fn cells(n: usize) -> Vec<DotCell> {
        let text: String = "abcdefghijklmnopqrstuvwxyz".chars().cycle().take(n).collect();
        encode(&text).cells
    }

    #[test]
    fn test_chunk_counts() {
        for n in [0usize, 1, 19, 20, 21, 40, 41, 99] {
            for k in [1usize, 3, 20] {
                let input = cells(n);
                let chunks = chunk(&input, k).unwrap();
                assert_eq!(chunks.len(), n.div_ceil(k), "n={} k={}", n, k);
                let (last, rest) = match chunks.split_last() {
                    Some(split) => split,
                    None => continue,
                };
                assert!(rest.iter().all(|c| c.len() == k));
                assert!(!last.is_empty() && last.len() <= k);
            }
        }
    }

    #[test]
    fn test_concatenation_reconstructs_sequence() {
        let input = cells(45);
        let chunks = chunk(&input, DEFAULT_MAX_CHUNK_SIZE).unwrap();
        let joined: Vec<u8> = chunks.concat();
        assert_eq!(joined.len(), input.len());
        assert_eq!(joined, pack_cells(&input));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(chunk(&cells(3), 0).is_err());
    }

    #[test]
    fn test_unpack_round_trip() {
        let result = encode("Round 2");
        let bytes = pack_cells(&result.cells);
        let dots = unpack_bytes(&bytes).unwrap();
        assert_eq!(decode_dots(dots), "Round 2");
    }

    #[test]
    fn test_unpack_rejects_command_bytes() {
        assert!(unpack_bytes(&[0x01, 0x81]).is_err());
        assert!(unpack_bytes(&[0x40]).is_err());
    }
}
