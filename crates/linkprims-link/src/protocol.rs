//! Wire protocols a link can speak.
//!
//! A [`Protocol`] bundles a frame codec with its liveness policy. The text
//! protocol sends a heartbeat on every idle tick and counts empty reads; the
//! binary protocol relies on continuous polling and the idle timeout alone,
//! and realigns by waiting for a quiet line.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use linkprims_frame::{
    encode_text, BinaryDecoder, BinaryMessage, DecodeStatus, FrameError, Resynchronizer,
    SyncState, TextDecoder, DEFAULT_DELIMITER, DEFAULT_MAX_TEXT_FRAME, DEFAULT_QUIET_FACTOR,
};

use crate::error::Result;

/// Everything one decode pass produced.
#[derive(Debug)]
pub struct DecodeReport<M> {
    /// Validated messages, in wire order.
    pub frames: Vec<M>,
    /// Heartbeat frames seen.
    pub heartbeats: usize,
    /// Corruption detected during this pass.
    pub corrupt: Vec<FrameError>,
    /// True if the decoder is discarding bytes to realign.
    pub resynchronizing: bool,
}

impl<M> Default for DecodeReport<M> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            heartbeats: 0,
            corrupt: Vec::new(),
            resynchronizing: false,
        }
    }
}

impl<M> DecodeReport<M> {
    /// True if at least one frame, heartbeat included, completed.
    pub fn saw_frame(&self) -> bool {
        !self.frames.is_empty() || self.heartbeats > 0
    }
}

/// A framing scheme plus its liveness policy.
pub trait Protocol: Send + Sync + 'static {
    /// Application message type.
    type Message: Send + 'static;
    /// Per-connection decode state.
    type Decoder: Send + 'static;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Fresh decode state for a connection opened at `now`.
    fn new_decoder(&self, now: Instant) -> Self::Decoder;

    /// Reject messages that cannot be framed.
    fn validate(&self, message: &Self::Message) -> Result<()>;

    /// Append the framed message to `dst`.
    fn encode(&self, message: &Self::Message, dst: &mut BytesMut) -> Result<()>;

    /// Append a heartbeat frame to `dst`. Returns false if the protocol has
    /// no heartbeat.
    fn heartbeat(&self, dst: &mut BytesMut) -> bool;

    /// Feed bytes read at `now` (possibly none) and collect what completed.
    fn decode(
        &self,
        decoder: &mut Self::Decoder,
        bytes: &[u8],
        now: Instant,
    ) -> DecodeReport<Self::Message>;

    /// Drop buffered state and treat the next byte as a frame boundary.
    fn mark_synchronized(&self, decoder: &mut Self::Decoder);

    /// Empty messages are silently not sent.
    fn is_empty(&self, message: &Self::Message) -> bool;

    /// Whether empty read cycles count toward the missed-heartbeat limit.
    fn counts_missed_reads(&self) -> bool;

    /// Idle interval that marks a realigned line, if the protocol uses one.
    fn quiet_interval(&self) -> Option<Duration>;
}

/// `payload ++ delimiter` framing for TCP.
#[derive(Debug, Clone)]
pub struct TextProtocol {
    delimiter: u8,
    max_frame: usize,
}

impl Default for TextProtocol {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER)
    }
}

impl TextProtocol {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            max_frame: DEFAULT_MAX_TEXT_FRAME,
        }
    }

    /// Bound on a frame still waiting for its delimiter.
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame.max(1);
        self
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }
}

impl Protocol for TextProtocol {
    type Message = Bytes;
    type Decoder = TextDecoder;

    fn name(&self) -> &'static str {
        "text"
    }

    fn new_decoder(&self, _now: Instant) -> TextDecoder {
        TextDecoder::new(self.delimiter, self.max_frame)
    }

    fn validate(&self, message: &Bytes) -> Result<()> {
        if message.contains(&self.delimiter) {
            return Err(FrameError::DelimiterInPayload {
                delimiter: self.delimiter,
            }
            .into());
        }
        Ok(())
    }

    fn encode(&self, message: &Bytes, dst: &mut BytesMut) -> Result<()> {
        encode_text(message, self.delimiter, dst)?;
        Ok(())
    }

    fn heartbeat(&self, dst: &mut BytesMut) -> bool {
        encode_text(&[], self.delimiter, dst).is_ok()
    }

    fn decode(&self, decoder: &mut TextDecoder, bytes: &[u8], _now: Instant) -> DecodeReport<Bytes> {
        if bytes.is_empty() {
            return DecodeReport {
                resynchronizing: decoder.is_resynchronizing(),
                ..DecodeReport::default()
            };
        }
        let status = decoder.feed(bytes);
        DecodeReport {
            frames: status.frames,
            heartbeats: status.heartbeats,
            corrupt: status.overflow.into_iter().collect(),
            resynchronizing: status.resynchronizing,
        }
    }

    fn mark_synchronized(&self, decoder: &mut TextDecoder) {
        decoder.reset();
    }

    fn is_empty(&self, message: &Bytes) -> bool {
        message.is_empty()
    }

    fn counts_missed_reads(&self) -> bool {
        true
    }

    fn quiet_interval(&self) -> Option<Duration> {
        None
    }
}

/// Header + floats + XOR checksum framing for UART.
#[derive(Debug, Clone)]
pub struct BinaryProtocol {
    quiet_interval: Duration,
    start_seeking: bool,
}

impl BinaryProtocol {
    /// Protocol for a line with the given byte spacing, realigning after
    /// [`DEFAULT_QUIET_FACTOR`] spacings of silence.
    pub fn new(byte_spacing: Duration) -> Self {
        Self::with_quiet_factor(byte_spacing, DEFAULT_QUIET_FACTOR)
    }

    pub fn with_quiet_factor(byte_spacing: Duration, quiet_factor: u32) -> Self {
        Self {
            quiet_interval: Resynchronizer::quiet_interval_for(byte_spacing, quiet_factor),
            start_seeking: true,
        }
    }

    /// Whether a fresh connection waits for a quiet line before decoding.
    /// On by default: a port opened mid-transmission has unknown alignment.
    pub fn start_seeking(mut self, seeking: bool) -> Self {
        self.start_seeking = seeking;
        self
    }
}

impl Protocol for BinaryProtocol {
    type Message = BinaryMessage;
    type Decoder = BinaryDecoder;

    fn name(&self) -> &'static str {
        "binary"
    }

    fn new_decoder(&self, now: Instant) -> BinaryDecoder {
        if self.start_seeking {
            BinaryDecoder::seeking(self.quiet_interval, now)
        } else {
            BinaryDecoder::new(self.quiet_interval, now)
        }
    }

    fn validate(&self, _message: &BinaryMessage) -> Result<()> {
        // The float bound is enforced by `BinaryMessage::new`.
        Ok(())
    }

    fn encode(&self, message: &BinaryMessage, dst: &mut BytesMut) -> Result<()> {
        message.encode(dst);
        Ok(())
    }

    fn heartbeat(&self, _dst: &mut BytesMut) -> bool {
        false
    }

    fn decode(
        &self,
        decoder: &mut BinaryDecoder,
        bytes: &[u8],
        now: Instant,
    ) -> DecodeReport<BinaryMessage> {
        let mut report = DecodeReport::default();
        decoder.feed(bytes, now);
        loop {
            match decoder.next(now) {
                DecodeStatus::Message(message) => report.frames.push(message),
                DecodeStatus::Pending => break,
                DecodeStatus::Resynchronizing => {
                    report.resynchronizing = true;
                    break;
                }
                DecodeStatus::Corrupt(err) => report.corrupt.push(err),
            }
        }
        report.resynchronizing |= decoder.state() == SyncState::Seeking;
        report
    }

    fn mark_synchronized(&self, decoder: &mut BinaryDecoder) {
        decoder.mark_synchronized();
    }

    fn is_empty(&self, _message: &BinaryMessage) -> bool {
        false
    }

    fn counts_missed_reads(&self) -> bool {
        false
    }

    fn quiet_interval(&self) -> Option<Duration> {
        Some(self.quiet_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_heartbeat_is_bare_delimiter() {
        let protocol = TextProtocol::default();
        let mut buf = BytesMut::new();
        assert!(protocol.heartbeat(&mut buf));
        assert_eq!(buf.as_ref(), b";");
        assert!(protocol.counts_missed_reads());
    }

    #[test]
    fn text_validate_rejects_delimiter() {
        let protocol = TextProtocol::default();
        assert!(protocol.validate(&Bytes::from_static(b"a;b")).is_err());
        assert!(protocol.validate(&Bytes::from_static(b"ab")).is_ok());
        assert!(protocol.is_empty(&Bytes::new()));
    }

    #[test]
    fn text_decode_reports_heartbeats_separately() {
        let protocol = TextProtocol::default();
        let now = Instant::now();
        let mut decoder = protocol.new_decoder(now);
        let report = protocol.decode(&mut decoder, b";hi;;", now);
        assert_eq!(report.frames, vec![Bytes::from_static(b"hi")]);
        assert_eq!(report.heartbeats, 2);
        assert!(report.saw_frame());

        let empty = protocol.decode(&mut decoder, b"", now);
        assert!(!empty.saw_frame());
    }

    #[test]
    fn binary_has_no_heartbeat() {
        let protocol = BinaryProtocol::new(Duration::from_micros(100));
        let mut buf = BytesMut::new();
        assert!(!protocol.heartbeat(&mut buf));
        assert!(buf.is_empty());
        assert!(!protocol.counts_missed_reads());
        assert_eq!(protocol.quiet_interval(), Some(Duration::from_micros(200)));
    }

    #[test]
    fn binary_decoder_starts_seeking_then_locks_on_quiet_line() {
        let protocol = BinaryProtocol::new(Duration::from_millis(1));
        let t0 = Instant::now();
        let mut decoder = protocol.new_decoder(t0);

        let mut wire = BytesMut::new();
        let message = BinaryMessage::new(0x0042, vec![1.5]).unwrap();
        protocol.encode(&message, &mut wire).unwrap();

        let report = protocol.decode(&mut decoder, &wire, t0);
        assert!(report.resynchronizing);
        assert!(report.frames.is_empty());

        // Data on the next read still extends the seek.
        let report = protocol.decode(&mut decoder, &wire, t0 + Duration::from_millis(5));
        assert!(report.resynchronizing);
        assert!(report.frames.is_empty());

        // An idle read one quiet interval later realigns.
        let report = protocol.decode(&mut decoder, &[], t0 + Duration::from_millis(10));
        assert!(!report.resynchronizing);

        let report = protocol.decode(&mut decoder, &wire, t0 + Duration::from_millis(15));
        assert!(!report.resynchronizing);
        assert_eq!(report.frames, vec![message]);
    }

    #[test]
    fn binary_decode_collects_corruption() {
        let protocol = BinaryProtocol::new(Duration::from_millis(1)).start_seeking(false);
        let t0 = Instant::now();
        let mut decoder = protocol.new_decoder(t0);

        let report = protocol.decode(&mut decoder, &[0x00, 0x00, 0xFF], t0);
        assert_eq!(report.corrupt.len(), 1);
        assert!(report.resynchronizing);
    }
}
