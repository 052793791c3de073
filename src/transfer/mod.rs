//! # Transfer Layer
//!
//! Byte-level framing between the codec and the device link.
//!
//! - [`chunker`]: cell → byte serialization and link-sized chunking
//! - [`wire`]: command bytes (commit, status request)

pub mod chunker;
pub mod wire;

pub use chunker::{Chunk, DEFAULT_MAX_CHUNK_SIZE, chunk, pack_cells, unpack_bytes};
