use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Header: big-endian `u16`.
pub const HEADER_SIZE: usize = 2;
/// Float count: one byte.
pub const COUNT_SIZE: usize = 1;
/// One little-endian IEEE-754 `f32`.
pub const FLOAT_SIZE: usize = 4;
/// Trailing XOR checksum.
pub const CHECKSUM_SIZE: usize = 1;
/// Upper bound on floats per frame. A larger count is a desync signal.
pub const MAX_FLOATS: usize = 10;
/// Largest possible frame: 2 + 1 + 40 + 1 = 47 bytes.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + COUNT_SIZE + MAX_FLOATS * FLOAT_SIZE + CHECKSUM_SIZE;

/// A decoded binary message: a header word plus up to ten floats.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMessage {
    header: u16,
    floats: Vec<f32>,
}

impl BinaryMessage {
    /// Create a message, rejecting more than [`MAX_FLOATS`] floats.
    pub fn new(header: u16, floats: impl Into<Vec<f32>>) -> Result<Self> {
        let floats = floats.into();
        if floats.len() > MAX_FLOATS {
            return Err(FrameError::TooManyFloats {
                count: floats.len(),
                max: MAX_FLOATS,
            });
        }
        Ok(Self { header, floats })
    }

    /// The header word.
    pub fn header(&self) -> u16 {
        self.header
    }

    /// The float payload.
    pub fn floats(&self) -> &[f32] {
        &self.floats
    }

    /// Split into `(header, floats)`.
    pub fn into_parts(self) -> (u16, Vec<f32>) {
        (self.header, self.floats)
    }

    /// Total wire size of this message once framed.
    pub fn wire_size(&self) -> usize {
        frame_size(self.floats.len())
    }

    /// Append the framed message to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        put_frame(self.header, &self.floats, dst);
    }
}

fn frame_size(count: usize) -> usize {
    HEADER_SIZE + COUNT_SIZE + count * FLOAT_SIZE + CHECKSUM_SIZE
}

/// XOR of every byte in `data`.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Encode a binary frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬───────────┬──────────────────────┬──────────┐
/// │ Header (2B)  │ Count     │ Floats               │ Checksum │
/// │ big-endian   │ (1B, ≤10) │ (Count × 4B LE f32)  │ (1B XOR) │
/// └──────────────┴───────────┴──────────────────────┴──────────┘
/// ```
///
/// Fails without touching `dst` if more than [`MAX_FLOATS`] floats are given.
pub fn encode_binary(header: u16, floats: &[f32], dst: &mut BytesMut) -> Result<()> {
    if floats.len() > MAX_FLOATS {
        return Err(FrameError::TooManyFloats {
            count: floats.len(),
            max: MAX_FLOATS,
        });
    }
    put_frame(header, floats, dst);
    Ok(())
}

fn put_frame(header: u16, floats: &[f32], dst: &mut BytesMut) {
    let start = dst.len();
    dst.reserve(frame_size(floats.len()));
    dst.put_u16(header);
    // Bounded by MAX_FLOATS at every construction site.
    dst.put_u8(floats.len() as u8);
    for value in floats {
        dst.put_slice(&value.to_le_bytes());
    }
    let sum = checksum(&dst[start..]);
    dst.put_u8(sum);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingHeader {
    header: u16,
    count: u8,
}

/// In-progress decode state for one connection.
///
/// Holds the header learned from a partially received frame and the bytes
/// not consumed yet. Persists across reads so a frame may arrive split over
/// any number of them; reset whenever a frame completes or is discarded.
#[derive(Debug, Default)]
pub struct DecodeCursor {
    pending: Option<PendingHeader>,
    residual: BytesMut,
}

impl DecodeCursor {
    /// Create an empty cursor.
    pub fn new() -> Self {
        Self {
            pending: None,
            residual: BytesMut::with_capacity(MAX_FRAME_SIZE * 4),
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.residual.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed.
    pub fn residual_len(&self) -> usize {
        self.residual.len()
    }

    /// `(header, count)` of the frame currently being assembled, if any.
    pub fn pending_header(&self) -> Option<(u16, u8)> {
        self.pending.map(|p| (p.header, p.count))
    }

    /// True if nothing is buffered or pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_none() && self.residual.is_empty()
    }

    /// Drop the pending header and every buffered byte.
    pub fn reset(&mut self) {
        self.pending = None;
        self.residual.clear();
    }
}

/// Result of one staged decode attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A frame validated. `consumed` is its full wire size.
    Complete {
        message: BinaryMessage,
        consumed: usize,
    },
    /// More bytes are needed.
    Incomplete,
    /// The bytes cannot be a valid frame; alignment is lost.
    Invalid(FrameError),
}

/// Try to decode one frame from the cursor's buffered bytes.
///
/// Decoding is staged. The header and count are consumed first; a count
/// above [`MAX_FLOATS`] is rejected right there, before any payload is
/// awaited, and the learned header is dropped. Otherwise the call waits for
/// `count * 4 + 1` more bytes and validates the checksum.
pub fn try_decode(cursor: &mut DecodeCursor) -> Decoded {
    let pending = match cursor.pending {
        Some(pending) => pending,
        None => {
            if cursor.residual.len() < HEADER_SIZE + COUNT_SIZE {
                return Decoded::Incomplete;
            }
            let header = cursor.residual.get_u16();
            let count = cursor.residual.get_u8();
            if usize::from(count) > MAX_FLOATS {
                return Decoded::Invalid(FrameError::TooManyFloats {
                    count: usize::from(count),
                    max: MAX_FLOATS,
                });
            }
            let pending = PendingHeader { header, count };
            cursor.pending = Some(pending);
            pending
        }
    };

    let count = usize::from(pending.count);
    let body_len = count * FLOAT_SIZE + CHECKSUM_SIZE;
    if cursor.residual.len() < body_len {
        return Decoded::Incomplete;
    }

    cursor.pending = None;
    let body = cursor.residual.split_to(body_len);
    let (payload, trailer) = body.split_at(count * FLOAT_SIZE);

    let header_bytes = pending.header.to_be_bytes();
    let computed = checksum(&header_bytes) ^ pending.count ^ checksum(payload);
    let received = trailer[0];
    if computed != received {
        return Decoded::Invalid(FrameError::ChecksumMismatch { computed, received });
    }

    let floats = payload
        .chunks_exact(FLOAT_SIZE)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Decoded::Complete {
        message: BinaryMessage {
            header: pending.header,
            floats,
        },
        consumed: frame_size(count),
    }
}
