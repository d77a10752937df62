//! Message framing for continuous, unreliable byte streams.
//!
//! Two wire formats are provided:
//! - **Binary checksummed** (UART): big-endian `u16` header, a float count,
//!   up to ten little-endian `f32`s and an XOR checksum of everything before it
//! - **Delimited text** (TCP): arbitrary bytes followed by a `;` delimiter,
//!   where an empty frame is a heartbeat
//!
//! Decoding is incremental: bytes may arrive split anywhere, and corrupted
//! input sends the binary decoder into a seeking state that discards bytes
//! until the line goes quiet. Nothing unchecked is ever surfaced.

pub mod binary;
pub mod error;
pub mod resync;
pub mod text;

pub use binary::{
    checksum, encode_binary, try_decode, BinaryMessage, DecodeCursor, Decoded, CHECKSUM_SIZE,
    COUNT_SIZE, FLOAT_SIZE, HEADER_SIZE, MAX_FLOATS, MAX_FRAME_SIZE,
};
pub use error::{FrameError, Result};
pub use resync::{BinaryDecoder, DecodeStatus, Resynchronizer, SyncState, DEFAULT_QUIET_FACTOR};
pub use text::{
    encode_text, split, Split, TextDecoder, TextStatus, DEFAULT_DELIMITER, DEFAULT_MAX_TEXT_FRAME,
};
