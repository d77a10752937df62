use std::time::{Duration, Instant};

use tracing::debug;

use crate::binary::{try_decode, BinaryMessage, DecodeCursor, Decoded};
use crate::error::FrameError;

/// Default multiple of the byte spacing that counts as an idle line.
pub const DEFAULT_QUIET_FACTOR: u32 = 2;

/// Alignment of the decoder with frame boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Normal decoding.
    Locked,
    /// Alignment is lost; bytes are discarded until the line goes quiet.
    Seeking,
}

/// Tracks byte arrivals and decides when a seeking stream is realigned.
///
/// Arbitrary payload bytes can always look like a valid header, so the only
/// trustworthy realignment signal is an idle line: no byte for the whole
/// quiet interval.
#[derive(Debug, Clone)]
pub struct Resynchronizer {
    state: SyncState,
    quiet_interval: Duration,
    last_activity: Instant,
    discarded: u64,
}

impl Resynchronizer {
    /// Start locked, with `quiet_interval` as the realignment threshold.
    pub fn new(quiet_interval: Duration, now: Instant) -> Self {
        Self {
            state: SyncState::Locked,
            quiet_interval,
            last_activity: now,
            discarded: 0,
        }
    }

    /// Quiet interval for a line with the given byte spacing.
    pub fn quiet_interval_for(byte_spacing: Duration, quiet_factor: u32) -> Duration {
        byte_spacing.saturating_mul(quiet_factor.max(1))
    }

    /// Current state, without re-evaluating the quiet interval.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Configured quiet interval.
    pub fn quiet_interval(&self) -> Duration {
        self.quiet_interval
    }

    /// Total bytes thrown away while seeking.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Enter `Seeking`. The quiet interval restarts at `now`.
    pub fn lose_sync(&mut self, now: Instant) {
        if self.state == SyncState::Locked {
            debug!(quiet_interval = ?self.quiet_interval, "frame alignment lost, seeking");
        }
        self.state = SyncState::Seeking;
        self.last_activity = now;
    }

    /// Force `Locked`, e.g. after an explicit blocking flush.
    pub fn lock(&mut self) {
        self.state = SyncState::Locked;
    }

    /// Record one read at `now` that returned `len` bytes.
    ///
    /// Returns true if the bytes must be discarded because the stream is
    /// still seeking. Bytes only ever extend a seek: reads are polled, so
    /// the gap since the previous read says nothing about when the bytes
    /// actually arrived. Alignment is restored by an empty read at least
    /// one quiet interval after the last read that carried data.
    pub fn observe(&mut self, len: usize, now: Instant) -> bool {
        if len == 0 {
            return self.poll(now) == SyncState::Seeking;
        }
        self.last_activity = now;
        if self.state == SyncState::Seeking {
            self.discarded = self.discarded.saturating_add(len as u64);
            return true;
        }
        false
    }

    /// Re-evaluate the state after a read at `now` that returned nothing.
    pub fn poll(&mut self, now: Instant) -> SyncState {
        if self.state == SyncState::Seeking && self.is_quiet(now) {
            debug!(discarded = self.discarded, "line quiet, frame alignment restored");
            self.state = SyncState::Locked;
        }
        self.state
    }

    /// True if no read has carried data for at least the quiet interval.
    pub fn is_quiet(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) >= self.quiet_interval
    }
}

/// Outcome of [`BinaryDecoder::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeStatus {
    /// A validated message.
    Message(BinaryMessage),
    /// Waiting for more bytes.
    Pending,
    /// The stream is being repaired; bytes are being discarded.
    Resynchronizing,
    /// Corruption was detected just now. The decoder has moved to seeking.
    Corrupt(FrameError),
}

/// Binary frame decoder with idle-line resynchronization.
#[derive(Debug)]
pub struct BinaryDecoder {
    cursor: DecodeCursor,
    sync: Resynchronizer,
}

impl BinaryDecoder {
    /// A decoder that trusts the stream to start on a frame boundary.
    pub fn new(quiet_interval: Duration, now: Instant) -> Self {
        Self {
            cursor: DecodeCursor::new(),
            sync: Resynchronizer::new(quiet_interval, now),
        }
    }

    /// A decoder for a line whose alignment is unknown, such as a serial
    /// port just opened mid-transmission. Decoding starts once the line has
    /// been quiet for the whole interval.
    pub fn seeking(quiet_interval: Duration, now: Instant) -> Self {
        let mut decoder = Self::new(quiet_interval, now);
        decoder.sync.lose_sync(now);
        decoder
    }

    /// Buffer the result of one read at `now`. Bytes arriving while seeking
    /// are dropped; an empty slice records a read that found the line idle.
    pub fn feed(&mut self, bytes: &[u8], now: Instant) {
        if !self.sync.observe(bytes.len(), now) {
            self.cursor.extend(bytes);
        }
    }

    /// Decode the next message, if one is complete.
    pub fn next(&mut self, now: Instant) -> DecodeStatus {
        if self.sync.state() == SyncState::Seeking {
            return DecodeStatus::Resynchronizing;
        }
        match try_decode(&mut self.cursor) {
            Decoded::Complete { message, .. } => DecodeStatus::Message(message),
            Decoded::Incomplete => DecodeStatus::Pending,
            Decoded::Invalid(err) => {
                self.sync.discarded = self
                    .sync
                    .discarded
                    .saturating_add(self.cursor.residual_len() as u64);
                self.cursor.reset();
                self.sync.lose_sync(now);
                DecodeStatus::Corrupt(err)
            }
        }
    }

    /// Drop everything buffered and resume decoding at the next byte.
    pub fn mark_synchronized(&mut self) {
        self.cursor.reset();
        self.sync.lock();
    }

    /// Current alignment state.
    pub fn state(&self) -> SyncState {
        self.sync.state()
    }

    /// Quiet interval used for realignment.
    pub fn quiet_interval(&self) -> Duration {
        self.sync.quiet_interval()
    }

    /// Total bytes discarded while realigning.
    pub fn discarded(&self) -> u64 {
        self.sync.discarded()
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.cursor.residual_len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::binary::encode_binary;

    const QUIET: Duration = Duration::from_millis(2);

    fn frame(header: u16, floats: &[f32]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_binary(header, floats, &mut buf).unwrap();
        buf.to_vec()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn locked_decoder_yields_messages() {
        let t0 = Instant::now();
        let mut decoder = BinaryDecoder::new(QUIET, t0);
        decoder.feed(&frame(7, &[1.0, 2.0]), t0);
        match decoder.next(t0) {
            DecodeStatus::Message(message) => {
                assert_eq!(message.header(), 7);
                assert_eq!(message.floats(), &[1.0, 2.0]);
            }
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(decoder.next(t0), DecodeStatus::Pending);
    }

    #[test]
    fn oversized_count_triggers_seeking() {
        let t0 = Instant::now();
        let mut decoder = BinaryDecoder::new(QUIET, t0);
        decoder.feed(&[0x00, 0x01, 11, 0xAA, 0xBB], t0);
        assert_eq!(
            decoder.next(t0),
            DecodeStatus::Corrupt(FrameError::TooManyFloats { count: 11, max: 10 })
        );
        assert_eq!(decoder.state(), SyncState::Seeking);
        assert_eq!(decoder.next(t0), DecodeStatus::Resynchronizing);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn checksum_failure_triggers_seeking() {
        let t0 = Instant::now();
        let mut decoder = BinaryDecoder::new(QUIET, t0);
        let mut bad = frame(1, &[3.0]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        decoder.feed(&bad, t0);
        assert!(matches!(
            decoder.next(t0),
            DecodeStatus::Corrupt(FrameError::ChecksumMismatch { .. })
        ));
        assert_eq!(decoder.state(), SyncState::Seeking);
    }

    #[test]
    fn bytes_during_seek_are_discarded_until_quiet() {
        let t0 = Instant::now();
        let mut decoder = BinaryDecoder::seeking(QUIET, t0);

        // Continuous traffic keeps the decoder seeking.
        decoder.feed(&frame(1, &[1.0]), t0 + ms(1));
        assert_eq!(decoder.next(t0 + ms(2)), DecodeStatus::Resynchronizing);
        decoder.feed(&frame(2, &[2.0]), t0 + ms(2));
        assert_eq!(decoder.next(t0 + ms(3)), DecodeStatus::Resynchronizing);
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.discarded(), 2 * 8);

        // An empty read before the quiet interval has passed changes nothing.
        decoder.feed(&[], t0 + ms(3));
        assert_eq!(decoder.state(), SyncState::Seeking);

        // Quiet line: the next frame starts on a boundary.
        decoder.feed(&[], t0 + ms(4));
        assert_eq!(decoder.next(t0 + ms(4)), DecodeStatus::Pending);
        assert_eq!(decoder.state(), SyncState::Locked);
        decoder.feed(&frame(3, &[3.0]), t0 + ms(5));
        assert!(matches!(
            decoder.next(t0 + ms(5)),
            DecodeStatus::Message(m) if m.header() == 3
        ));
    }

    #[test]
    fn dropped_byte_recovers_after_idle_gap() {
        let t0 = Instant::now();
        let mut decoder = BinaryDecoder::new(QUIET, t0);

        // First frame loses its header's low byte; the rest of the burst
        // is misaligned.
        let mut burst = frame(0x0102, &[1.0, 2.0]);
        burst.remove(1);
        burst.extend(frame(0x0304, &[3.0]));
        decoder.feed(&burst, t0);

        let mut surfaced = Vec::new();
        let mut corrupt = 0;
        loop {
            match decoder.next(t0) {
                DecodeStatus::Message(m) => surfaced.push(m),
                DecodeStatus::Corrupt(_) => corrupt += 1,
                DecodeStatus::Pending | DecodeStatus::Resynchronizing => break,
            }
        }
        assert!(surfaced.is_empty());
        assert_eq!(corrupt, 1);

        // Bytes without an idle read in between are still discarded.
        decoder.feed(&frame(0x0304, &[3.0]), t0 + ms(10));
        assert_eq!(decoder.next(t0 + ms(10)), DecodeStatus::Resynchronizing);

        // After an idle read, a clean frame decodes.
        decoder.feed(&[], t0 + ms(20));
        decoder.feed(&frame(0x0506, &[5.0]), t0 + ms(30));
        assert!(matches!(
            decoder.next(t0 + ms(30)),
            DecodeStatus::Message(m) if m.header() == 0x0506
        ));
    }

    #[test]
    fn continuous_traffic_across_ticks_keeps_seeking() {
        // 57600 baud: 348us quiet interval, read every 10ms, a back-to-back
        // frame stream joined mid-frame.
        let quiet = Duration::from_micros(348);
        let mut stream = Vec::new();
        for header in 0..40u16 {
            stream.extend(frame(header, &[1.0, 2.0, 3.0, 4.0]));
        }
        let t0 = Instant::now();
        let mut decoder = BinaryDecoder::seeking(quiet, t0);

        let mut offset = 5;
        for tick in 1..=8u64 {
            let now = t0 + ms(10 * tick);
            decoder.feed(&stream[offset..offset + 50], now);
            offset += 50;
            assert_eq!(decoder.next(now), DecodeStatus::Resynchronizing);
            assert_eq!(decoder.state(), SyncState::Seeking);
        }
        assert_eq!(decoder.discarded(), 8 * 50);

        // The sender pauses; one idle read realigns, and the next frame is
        // decoded whole.
        decoder.feed(&[], t0 + ms(90));
        assert_eq!(decoder.state(), SyncState::Locked);
        decoder.feed(&frame(0x0A0B, &[5.5]), t0 + ms(100));
        assert!(matches!(
            decoder.next(t0 + ms(100)),
            DecodeStatus::Message(m) if m.header() == 0x0A0B
        ));
    }

    #[test]
    fn mark_synchronized_resumes_immediately() {
        let t0 = Instant::now();
        let mut decoder = BinaryDecoder::seeking(QUIET, t0);
        decoder.mark_synchronized();
        decoder.feed(&frame(9, &[]), t0);
        assert!(matches!(decoder.next(t0), DecodeStatus::Message(_)));
    }

    #[test]
    fn quiet_interval_scales_with_factor() {
        let spacing = Duration::from_micros(174);
        assert_eq!(
            Resynchronizer::quiet_interval_for(spacing, DEFAULT_QUIET_FACTOR),
            Duration::from_micros(348)
        );
        assert_eq!(Resynchronizer::quiet_interval_for(spacing, 0), spacing);
    }
}
