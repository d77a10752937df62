use std::time::{Duration, Instant};

use serde::Serialize;

/// Liveness verdict for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Alive,
    /// No frame for longer than the timeout period.
    IdleTimeout,
    /// Too many consecutive read cycles without any bytes.
    HeartbeatsMissed,
}

/// Tracks frame arrivals and empty reads for one connection.
///
/// Two signals are kept because half-open TCP connections do not always
/// surface as read errors: an idle timeout on completed frames, and a count
/// of consecutive empty reads that a heartbeating peer should never produce.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    timeout_period: Duration,
    missed_limit: Option<u32>,
    connect_grace: u32,
    missed: i64,
    last_frame: Instant,
}

impl LivenessMonitor {
    pub fn new(
        timeout_period: Duration,
        missed_limit: Option<u32>,
        connect_grace: u32,
        now: Instant,
    ) -> Self {
        let mut monitor = Self {
            timeout_period,
            missed_limit,
            connect_grace,
            missed: 0,
            last_frame: now,
        };
        monitor.reset(now);
        monitor
    }

    /// Start over for a connection established at `now`. The miss counter
    /// starts negative so the first few empty reads are forgiven.
    pub fn reset(&mut self, now: Instant) {
        self.last_frame = now;
        self.missed = -i64::from(self.connect_grace);
    }

    /// A frame (message or heartbeat) completed at `now`.
    pub fn record_frame(&mut self, now: Instant) {
        self.last_frame = now;
        self.missed = 0;
    }

    /// A read cycle delivered bytes.
    pub fn record_read(&mut self) {
        self.missed = 0;
    }

    /// A read cycle delivered nothing.
    pub fn record_miss(&mut self) {
        self.missed = self.missed.saturating_add(1);
    }

    /// Consecutive empty read cycles, negative during the connect grace.
    pub fn missed_heartbeats(&self) -> i64 {
        self.missed
    }

    pub fn last_frame(&self) -> Instant {
        self.last_frame
    }

    pub fn since_last_frame(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_frame)
    }

    pub fn verdict(&self, now: Instant) -> Liveness {
        if let Some(limit) = self.missed_limit {
            if self.missed >= i64::from(limit) {
                return Liveness::HeartbeatsMissed;
            }
        }
        if self.since_last_frame(now) > self.timeout_period {
            return Liveness::IdleTimeout;
        }
        Liveness::Alive
    }
}
