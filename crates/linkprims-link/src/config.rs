use std::time::Duration;

use linkprims_frame::{DEFAULT_MAX_TEXT_FRAME, DEFAULT_QUIET_FACTOR};
use linkprims_transport::tcp::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
use serde::Serialize;

/// Default tick period of the I/O loop.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(10);
/// Default pause between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// Default idle timeout.
pub const DEFAULT_TIMEOUT_PERIOD: Duration = Duration::from_millis(1000);
/// Default number of consecutive empty reads that closes a TCP link.
pub const DEFAULT_MISSED_HEARTBEAT_LIMIT: u32 = 3;
/// Default number of empty reads tolerated right after connecting.
pub const DEFAULT_CONNECT_GRACE: u32 = 5;

/// Who drives the per-tick I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// Background workers connect, reconnect and tick on their own.
    Background,
    /// Nothing runs in the background; the owner calls `update()`.
    Manual,
}

/// Link configuration. Fixed at construction.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// A link with no frame for longer than this is considered dead.
    pub timeout_period: Duration,
    /// Pause between connection attempts.
    pub retry_interval: Duration,
    /// Consecutive empty read cycles that close the link, for protocols
    /// that send heartbeats. `None` disables the counter.
    pub missed_heartbeat_limit: Option<u32>,
    /// Extra empty read cycles tolerated right after connecting.
    pub connect_grace: u32,
    /// Size of the buffer handed to each read.
    pub read_chunk_size: usize,
    /// Upper bound on reads per tick, so a flooding peer cannot starve writes.
    pub max_reads_per_tick: usize,
    /// Background or manual driving.
    pub drive_mode: DriveMode,
    /// Multiple of the byte spacing that counts as an idle serial line.
    pub quiet_factor: u32,
    /// Longest text frame accepted before skipping to the next delimiter.
    pub max_text_frame: usize,
    /// Bound on a single TCP dial.
    pub connect_timeout: Duration,
    /// Bound on how long one write may wait for socket buffer space.
    pub write_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            timeout_period: DEFAULT_TIMEOUT_PERIOD,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            missed_heartbeat_limit: Some(DEFAULT_MISSED_HEARTBEAT_LIMIT),
            connect_grace: DEFAULT_CONNECT_GRACE,
            read_chunk_size: 1024,
            max_reads_per_tick: 8,
            drive_mode: DriveMode::Background,
            quiet_factor: DEFAULT_QUIET_FACTOR,
            max_text_frame: DEFAULT_MAX_TEXT_FRAME,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl LinkConfig {
    pub fn with_timeout_period(mut self, timeout: Duration) -> Self {
        self.timeout_period = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_missed_heartbeat_limit(mut self, limit: Option<u32>) -> Self {
        self.missed_heartbeat_limit = limit;
        self
    }

    pub fn with_connect_grace(mut self, grace: u32) -> Self {
        self.connect_grace = grace;
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub fn with_max_reads_per_tick(mut self, reads: usize) -> Self {
        self.max_reads_per_tick = reads.max(1);
        self
    }

    pub fn with_drive_mode(mut self, mode: DriveMode) -> Self {
        self.drive_mode = mode;
        self
    }

    pub fn with_quiet_factor(mut self, factor: u32) -> Self {
        self.quiet_factor = factor.max(1);
        self
    }

    pub fn with_max_text_frame(mut self, max: usize) -> Self {
        self.max_text_frame = max.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Per-`connect` options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Wait until connected (or a one-shot attempt gave up) before returning.
    pub blocking: bool,
    /// Keep reconnecting after failures and drops until disconnected.
    pub auto_reconnect: bool,
    /// Period of the I/O tick.
    pub tick_period: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            blocking: false,
            auto_reconnect: false,
            tick_period: DEFAULT_TICK_PERIOD,
        }
    }
}

impl ConnectOptions {
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }
}
