/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// A binary frame carries more floats than the fixed bound.
    #[error("too many floats ({count}, max {max})")]
    TooManyFloats { count: usize, max: usize },

    /// The trailing checksum does not match the frame contents.
    #[error("checksum mismatch (computed 0x{computed:02X}, received 0x{received:02X})")]
    ChecksumMismatch { computed: u8, received: u8 },

    /// A text payload contains the frame delimiter.
    #[error("payload contains the delimiter byte 0x{delimiter:02X}")]
    DelimiterInPayload { delimiter: u8 },

    /// A text frame grew past the configured bound without a delimiter.
    #[error("text frame too long ({len} bytes, max {max})")]
    FrameTooLong { len: usize, max: usize },
}

impl FrameError {
    /// True for errors produced by corrupted or misaligned input, as opposed
    /// to invalid arguments on the encoding side.
    pub fn is_corruption(&self) -> bool {
        match self {
            FrameError::TooManyFloats { .. }
            | FrameError::ChecksumMismatch { .. }
            | FrameError::FrameTooLong { .. } => true,
            FrameError::DelimiterInPayload { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
