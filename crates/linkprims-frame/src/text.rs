use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::{FrameError, Result};

/// Frame terminator used by the TCP text protocol.
pub const DEFAULT_DELIMITER: u8 = b';';

/// Default bound on a pending text frame that has not seen a delimiter yet.
pub const DEFAULT_MAX_TEXT_FRAME: usize = 64 * 1024;

/// Append `payload ++ delimiter` to `dst`.
///
/// An empty payload encodes the heartbeat frame. A payload containing the
/// delimiter would split on the far side, so it is rejected without writing.
pub fn encode_text(payload: &[u8], delimiter: u8, dst: &mut BytesMut) -> Result<()> {
    if payload.contains(&delimiter) {
        return Err(FrameError::DelimiterInPayload { delimiter });
    }
    dst.reserve(payload.len() + 1);
    dst.put_slice(payload);
    dst.put_u8(delimiter);
    Ok(())
}

/// Result of splitting a buffer on a delimiter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    /// Non-empty frames, in wire order.
    pub frames: Vec<Bytes>,
    /// Empty frames seen (heartbeats). Never part of `frames`.
    pub heartbeats: usize,
    /// Bytes after the last delimiter.
    pub remainder: Bytes,
}

/// Split `buffer` into complete frames and a trailing remainder.
pub fn split(buffer: &[u8], delimiter: u8) -> Split {
    let mut out = Split::default();
    let mut start = 0;
    for (index, _) in buffer
        .iter()
        .enumerate()
        .filter(|(_, byte)| **byte == delimiter)
    {
        if index == start {
            out.heartbeats += 1;
        } else {
            out.frames.push(Bytes::copy_from_slice(&buffer[start..index]));
        }
        start = index + 1;
    }
    out.remainder = Bytes::copy_from_slice(&buffer[start..]);
    out
}

/// What one [`TextDecoder::feed`] call produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextStatus {
    /// Complete application frames.
    pub frames: Vec<Bytes>,
    /// Heartbeats received.
    pub heartbeats: usize,
    /// Bytes thrown away because a frame outgrew the bound.
    pub discarded: usize,
    /// Set when a frame outgrew the bound during this call.
    pub overflow: Option<FrameError>,
    /// True while the decoder is skipping to the next delimiter.
    pub resynchronizing: bool,
}

/// Incremental text frame decoder.
///
/// Bytes after the last delimiter are carried forward and prepended to the
/// next read, so frames may span any number of reads. A pending frame that
/// grows past the bound is dropped along with everything up to the next
/// delimiter.
#[derive(Debug)]
pub struct TextDecoder {
    delimiter: u8,
    max_frame: usize,
    remainder: BytesMut,
    skipping: bool,
}

impl Default for TextDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER, DEFAULT_MAX_TEXT_FRAME)
    }
}

impl TextDecoder {
    pub fn new(delimiter: u8, max_frame: usize) -> Self {
        Self {
            delimiter,
            max_frame: max_frame.max(1),
            remainder: BytesMut::new(),
            skipping: false,
        }
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Bytes carried over from previous reads.
    pub fn pending(&self) -> &[u8] {
        &self.remainder
    }

    pub fn is_resynchronizing(&self) -> bool {
        self.skipping
    }

    /// Drop the carried remainder and any skip in progress.
    pub fn reset(&mut self) {
        self.remainder.clear();
        self.skipping = false;
    }

    /// Decode everything `bytes` completes.
    pub fn feed(&mut self, bytes: &[u8]) -> TextStatus {
        let mut status = TextStatus::default();
        let mut data = bytes;

        if self.skipping {
            match data.iter().position(|b| *b == self.delimiter) {
                Some(pos) => {
                    status.discarded += pos + 1;
                    data = &data[pos + 1..];
                    self.skipping = false;
                    debug!("text stream realigned on delimiter");
                }
                None => {
                    status.discarded += data.len();
                    status.resynchronizing = true;
                    return status;
                }
            }
        }

        self.remainder.extend_from_slice(data);
        let parts = split(&self.remainder, self.delimiter);
        status.frames = parts.frames;
        status.heartbeats = parts.heartbeats;
        self.remainder.clear();

        if parts.remainder.len() > self.max_frame {
            let err = FrameError::FrameTooLong {
                len: parts.remainder.len(),
                max: self.max_frame,
            };
            debug!(error = %err, "dropping oversized text frame");
            status.discarded += parts.remainder.len();
            status.overflow = Some(err);
            self.skipping = true;
        } else {
            self.remainder.extend_from_slice(&parts.remainder);
        }

        status.frames.retain(|frame| {
            if frame.len() > self.max_frame {
                status.discarded += frame.len();
                status.overflow.get_or_insert(FrameError::FrameTooLong {
                    len: frame.len(),
                    max: self.max_frame,
                });
                false
            } else {
                true
            }
        });

        status.resynchronizing = self.skipping;
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(status: &TextStatus) -> Vec<&[u8]> {
        status.frames.iter().map(|f| f.as_ref()).collect()
    }

    #[test]
    fn encode_appends_delimiter() {
        let mut buf = BytesMut::new();
        encode_text(b"hello", b';', &mut buf).unwrap();
        encode_text(b"", b';', &mut buf).unwrap();
        assert_eq!(buf.as_ref(), b"hello;;");
    }

    #[test]
    fn encode_rejects_embedded_delimiter() {
        let mut buf = BytesMut::new();
        let err = encode_text(b"a;b", b';', &mut buf).unwrap_err();
        assert_eq!(err, FrameError::DelimiterInPayload { delimiter: b';' });
        assert!(!err.is_corruption());
        assert!(buf.is_empty());
    }

    #[test]
    fn split_separates_frames_heartbeats_and_remainder() {
        let parts = split(b";AB;;CD;ef", b';');
        assert_eq!(parts.frames, vec![Bytes::from_static(b"AB"), Bytes::from_static(b"CD")]);
        assert_eq!(parts.heartbeats, 2);
        assert_eq!(parts.remainder.as_ref(), b"ef");
    }

    #[test]
    fn split_without_delimiter_is_all_remainder() {
        let parts = split(b"partial", b';');
        assert!(parts.frames.is_empty());
        assert_eq!(parts.heartbeats, 0);
        assert_eq!(parts.remainder.as_ref(), b"partial");
    }

    #[test]
    fn remainder_carries_across_reads() {
        let mut decoder = TextDecoder::default();
        let first = decoder.feed(b"AB;C");
        assert_eq!(frames(&first), vec![b"AB".as_ref()]);
        assert_eq!(decoder.pending(), b"C");

        let second = decoder.feed(b"D");
        assert!(second.frames.is_empty());
        assert_eq!(decoder.pending(), b"CD");

        let third = decoder.feed(b"E;");
        assert_eq!(frames(&third), vec![b"CDE".as_ref()]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn remainder_joins_first_token_of_next_read() {
        let mut decoder = TextDecoder::default();
        decoder.feed(b"AB;C");
        let next = decoder.feed(b";X;");
        assert_eq!(frames(&next), vec![b"C".as_ref(), b"X".as_ref()]);
        assert_eq!(next.heartbeats, 0);
    }

    #[test]
    fn heartbeats_are_counted_not_delivered() {
        let mut decoder = TextDecoder::default();
        let status = decoder.feed(b";;;");
        assert!(status.frames.is_empty());
        assert_eq!(status.heartbeats, 3);
    }

    #[test]
    fn oversized_frame_skips_to_next_delimiter() {
        let mut decoder = TextDecoder::new(b';', 4);
        let status = decoder.feed(b"ok;abcdefgh");
        assert_eq!(frames(&status), vec![b"ok".as_ref()]);
        assert!(matches!(
            status.overflow,
            Some(FrameError::FrameTooLong { len: 8, max: 4 })
        ));
        assert!(status.resynchronizing);
        assert!(decoder.pending().is_empty());

        let status = decoder.feed(b"ijk");
        assert!(status.resynchronizing);
        assert_eq!(status.discarded, 3);

        let status = decoder.feed(b"lm;next;");
        assert!(!status.resynchronizing);
        assert_eq!(frames(&status), vec![b"next".as_ref()]);
        assert_eq!(status.discarded, 3);
    }

    #[test]
    fn oversized_complete_frame_is_dropped() {
        let mut decoder = TextDecoder::new(b';', 4);
        let status = decoder.feed(b"toolong;ok;");
        assert_eq!(frames(&status), vec![b"ok".as_ref()]);
        assert!(status.overflow.is_some());
        assert!(!status.resynchronizing);
    }

    #[test]
    fn reset_drops_remainder() {
        let mut decoder = TextDecoder::default();
        decoder.feed(b"half");
        decoder.reset();
        let status = decoder.feed(b";");
        assert!(status.frames.is_empty());
        assert_eq!(status.heartbeats, 1);
    }

    #[test]
    fn custom_delimiter() {
        let mut decoder = TextDecoder::new(b'\n', DEFAULT_MAX_TEXT_FRAME);
        let status = decoder.feed(b"one\ntwo;three\n");
        assert_eq!(frames(&status), vec![b"one".as_ref(), b"two;three".as_ref()]);
        assert_eq!(decoder.delimiter(), b'\n');
    }
}
