use std::fmt;
use std::time::Instant;

use bytes::BytesMut;
use linkprims_transport::{ByteStream, ReadOutcome, TransportError};
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::liveness::{Liveness, LivenessMonitor};
use crate::mailbox::Mailbox;
use crate::protocol::Protocol;
use crate::shutdown::ShutdownSignal;
use crate::state::{SharedState, StatsCounters};

/// State shared by the application handle and the workers.
pub(crate) struct Shared<P: Protocol> {
    pub protocol: P,
    pub config: LinkConfig,
    pub inbound: Mailbox<P::Message>,
    pub outbound: Mailbox<P::Message>,
    pub state: SharedState,
    pub stats: StatsCounters,
    pub shutdown: ShutdownSignal,
}

impl<P: Protocol> Shared<P> {
    pub fn new(protocol: P, config: LinkConfig) -> Self {
        Self {
            protocol,
            config,
            inbound: Mailbox::new(),
            outbound: Mailbox::new(),
            state: SharedState::new(),
            stats: StatsCounters::default(),
            shutdown: ShutdownSignal::new(),
        }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub(crate) enum CloseReason {
    WriteFailed(TransportError),
    ReadFailed(TransportError),
    Liveness(Liveness),
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::WriteFailed(err) => write!(f, "write failed: {err}"),
            CloseReason::ReadFailed(err) => write!(f, "read failed: {err}"),
            CloseReason::Liveness(Liveness::IdleTimeout) => f.write_str("idle timeout"),
            CloseReason::Liveness(Liveness::HeartbeatsMissed) => {
                f.write_str("missed heartbeat limit reached")
            }
            CloseReason::Liveness(Liveness::Alive) => f.write_str("closed"),
            CloseReason::Shutdown => f.write_str("shutdown requested"),
        }
    }
}

/// One established connection: the stream plus its decode and liveness
/// state. Owned by exactly one driver (the I/O worker, or the manual
/// driver) for its whole life.
pub(crate) struct Session<P: Protocol> {
    stream: Box<dyn ByteStream>,
    decoder: P::Decoder,
    liveness: LivenessMonitor,
    read_buf: Vec<u8>,
    write_buf: BytesMut,
    seeking: bool,
    peer: String,
}

impl<P: Protocol> Session<P> {
    pub fn establish(shared: &Shared<P>, stream: Box<dyn ByteStream>, now: Instant) -> Self {
        let config = &shared.config;
        let missed_limit = if shared.protocol.counts_missed_reads() {
            config.missed_heartbeat_limit
        } else {
            None
        };
        let peer = stream.peer();
        shared.state.connected(peer.clone(), now);
        StatsCounters::add(&shared.stats.connects, 1);
        info!(
            transport = stream.transport_name(),
            peer = %peer,
            protocol = shared.protocol.name(),
            "link connected"
        );
        Self {
            stream,
            decoder: shared.protocol.new_decoder(now),
            liveness: LivenessMonitor::new(
                config.timeout_period,
                missed_limit,
                config.connect_grace,
                now,
            ),
            read_buf: vec![0u8; config.read_chunk_size.max(1)],
            write_buf: BytesMut::new(),
            seeking: false,
            peer,
        }
    }

    /// One I/O cycle: drain the outbound mailbox (or send a heartbeat),
    /// then read and decode whatever is available.
    pub fn tick(&mut self, shared: &Shared<P>, now: Instant) -> Result<(), CloseReason> {
        self.write_pending(shared)?;
        self.read_available(shared, now)?;

        match self.liveness.verdict(now) {
            Liveness::Alive => Ok(()),
            verdict => Err(CloseReason::Liveness(verdict)),
        }
    }

    fn write_pending(&mut self, shared: &Shared<P>) -> Result<(), CloseReason> {
        let pending = shared.outbound.take_all();
        if pending.is_empty() {
            self.write_buf.clear();
            if shared.protocol.heartbeat(&mut self.write_buf) {
                self.stream
                    .write_all(&self.write_buf)
                    .map_err(CloseReason::WriteFailed)?;
                StatsCounters::add(&shared.stats.heartbeats_out, 1);
            }
            return Ok(());
        }

        let mut written = 0u64;
        let mut iter = pending.into_iter();
        while let Some(message) = iter.next() {
            self.write_buf.clear();
            if let Err(err) = shared.protocol.encode(&message, &mut self.write_buf) {
                warn!(error = %err, "dropping message that cannot be framed");
                continue;
            }
            if let Err(err) = self.stream.write_all(&self.write_buf) {
                // Unsent messages go back in order, ahead of newer ones.
                let mut unsent = vec![message];
                unsent.extend(iter);
                shared.outbound.requeue_front(unsent);
                StatsCounters::add(&shared.stats.frames_out, written);
                return Err(CloseReason::WriteFailed(err));
            }
            written += 1;
        }
        StatsCounters::add(&shared.stats.frames_out, written);
        Ok(())
    }

    fn read_available(&mut self, shared: &Shared<P>, now: Instant) -> Result<(), CloseReason> {
        let mut received = Vec::new();
        let mut eof = false;
        for _ in 0..shared.config.max_reads_per_tick.max(1) {
            match self.stream.read_nonblocking(&mut self.read_buf) {
                Ok(ReadOutcome::Data(n)) => received.extend_from_slice(&self.read_buf[..n]),
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Eof) => {
                    eof = true;
                    break;
                }
                Err(err) => return Err(CloseReason::ReadFailed(err)),
            }
        }

        if received.is_empty() {
            if shared.protocol.counts_missed_reads() {
                self.liveness.record_miss();
                if eof {
                    debug!(peer = %self.peer, missed = self.liveness.missed_heartbeats(), "peer reported end of stream");
                }
            }
        } else {
            self.liveness.record_read();
            trace!(peer = %self.peer, bytes = received.len(), "read");
        }

        let report = shared.protocol.decode(&mut self.decoder, &received, now);

        for err in &report.corrupt {
            warn!(peer = %self.peer, error = %err, "corrupt frame, resynchronizing");
        }
        StatsCounters::add(&shared.stats.corrupt_frames, report.corrupt.len() as u64);
        if report.resynchronizing && !self.seeking {
            StatsCounters::add(&shared.stats.resyncs, 1);
        }
        self.seeking = report.resynchronizing;

        if report.saw_frame() {
            self.liveness.record_frame(now);
        }
        StatsCounters::add(&shared.stats.heartbeats_in, report.heartbeats as u64);
        StatsCounters::add(&shared.stats.frames_in, report.frames.len() as u64);
        shared.inbound.push_all(report.frames);

        shared.state.update(
            self.seeking,
            self.liveness.missed_heartbeats(),
            self.liveness.last_frame(),
        );
        Ok(())
    }

    /// Read and discard until nothing has arrived for `quiet`, then treat
    /// the next byte as a frame boundary.
    pub fn flush_incoming(
        &mut self,
        shared: &Shared<P>,
        quiet: std::time::Duration,
    ) -> Result<usize, CloseReason> {
        let mut discarded = 0usize;
        let mut last_byte = Instant::now();
        while last_byte.elapsed() < quiet {
            if shared.shutdown.is_triggered() {
                return Err(CloseReason::Shutdown);
            }
            match self.stream.read_nonblocking(&mut self.read_buf) {
                Ok(ReadOutcome::Data(n)) => {
                    discarded += n;
                    last_byte = Instant::now();
                }
                Ok(ReadOutcome::WouldBlock) | Ok(ReadOutcome::Eof) => std::thread::yield_now(),
                Err(err) => return Err(CloseReason::ReadFailed(err)),
            }
        }
        shared.protocol.mark_synchronized(&mut self.decoder);
        self.seeking = false;
        debug!(peer = %self.peer, discarded, "flushed incoming bytes");
        Ok(discarded)
    }

    /// Close the stream and publish the disconnect.
    pub fn close(mut self, shared: &Shared<P>, reason: &CloseReason) {
        self.stream.close();
        match reason {
            CloseReason::Shutdown => debug!(peer = %self.peer, "link closed"),
            other => warn!(peer = %self.peer, reason = %other, "link dropped"),
        }
        shared.state.disconnected();
        StatsCounters::add(&shared.stats.disconnects, 1);
    }
}
