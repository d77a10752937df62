use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Connection phase, owned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but the decoder is realigning with frame boundaries.
    Seeking,
}

impl Phase {
    /// True while a stream is established, realigning or not.
    pub fn is_connected(self) -> bool {
        matches!(self, Phase::Connected | Phase::Seeking)
    }
}

/// Immutable snapshot of the connection state.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub phase: Phase,
    /// Consecutive empty read cycles, negative during the connect grace.
    pub missed_heartbeats: i64,
    /// Time since the last completed frame, while connected.
    #[serde(with = "opt_millis")]
    pub since_last_frame: Option<Duration>,
    /// Description of the remote end, while connected.
    pub peer: Option<String>,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        self.phase.is_connected()
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }
}

/// Counters accumulated over the lifetime of a link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub frames_in: u64,
    pub frames_out: u64,
    pub heartbeats_in: u64,
    pub heartbeats_out: u64,
    pub corrupt_frames: u64,
    pub resyncs: u64,
    pub connects: u64,
    pub connect_failures: u64,
    pub disconnects: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub frames_in: AtomicU64,
    pub frames_out: AtomicU64,
    pub heartbeats_in: AtomicU64,
    pub heartbeats_out: AtomicU64,
    pub corrupt_frames: AtomicU64,
    pub resyncs: AtomicU64,
    pub connects: AtomicU64,
    pub connect_failures: AtomicU64,
    pub disconnects: AtomicU64,
}

impl StatsCounters {
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> LinkStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LinkStats {
            frames_in: get(&self.frames_in),
            frames_out: get(&self.frames_out),
            heartbeats_in: get(&self.heartbeats_in),
            heartbeats_out: get(&self.heartbeats_out),
            corrupt_frames: get(&self.corrupt_frames),
            resyncs: get(&self.resyncs),
            connects: get(&self.connects),
            connect_failures: get(&self.connect_failures),
            disconnects: get(&self.disconnects),
        }
    }
}

#[derive(Debug)]
struct ConnectionState {
    phase: Phase,
    missed_heartbeats: i64,
    last_frame: Option<Instant>,
    peer: Option<String>,
    /// A connection-management loop is active (background) or armed (manual).
    attempting: bool,
}

/// Connection state shared between workers and the application.
///
/// Transitions only happen through the methods below; every waiter on
/// `changed` re-checks its condition.
#[derive(Debug)]
pub(crate) struct SharedState {
    inner: Mutex<ConnectionState>,
    changed: Condvar,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ConnectionState {
                phase: Phase::Disconnected,
                missed_heartbeats: 0,
                last_frame: None,
                peer: None,
                attempting: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn set_attempting(&self, attempting: bool) {
        self.lock().attempting = attempting;
        self.changed.notify_all();
    }

    pub fn is_attempting(&self) -> bool {
        self.lock().attempting
    }

    pub fn connecting(&self) {
        let mut state = self.lock();
        if !state.phase.is_connected() {
            state.phase = Phase::Connecting;
        }
    }

    pub fn connected(&self, peer: String, now: Instant) {
        let mut state = self.lock();
        state.phase = Phase::Connected;
        state.peer = Some(peer);
        state.last_frame = Some(now);
        state.missed_heartbeats = 0;
        drop(state);
        self.changed.notify_all();
    }

    pub fn update(&self, seeking: bool, missed_heartbeats: i64, last_frame: Instant) {
        let mut state = self.lock();
        if state.phase.is_connected() {
            state.phase = if seeking {
                Phase::Seeking
            } else {
                Phase::Connected
            };
        }
        state.missed_heartbeats = missed_heartbeats;
        state.last_frame = Some(last_frame);
    }

    pub fn disconnected(&self) {
        let mut state = self.lock();
        state.phase = Phase::Disconnected;
        state.peer = None;
        state.last_frame = None;
        drop(state);
        self.changed.notify_all();
    }

    /// Wait until connected, or until `stop` says to give up.
    /// Returns true if connected.
    pub fn wait_connected(&self, stop: impl Fn(bool) -> bool) -> bool {
        let mut state = self.lock();
        loop {
            if state.phase.is_connected() {
                return true;
            }
            if stop(state.attempting) {
                return false;
            }
            // Bounded so a shutdown signalled elsewhere is noticed.
            state = match self.changed.wait_timeout(state, Duration::from_millis(50)) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn snapshot(&self, now: Instant) -> LinkStatus {
        let state = self.lock();
        LinkStatus {
            phase: state.phase,
            missed_heartbeats: state.missed_heartbeats,
            since_last_frame: state
                .last_frame
                .map(|t| now.saturating_duration_since(t)),
            peer: state.peer.clone(),
        }
    }
}
