use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use linkprims_frame::BinaryMessage;
use linkprims_transport::{byte_spacing, Role, SerialOpener, StreamOpener, TcpOpener};
use tracing::{debug, error, info, trace, warn};

use crate::config::{ConnectOptions, DriveMode, LinkConfig};
use crate::error::{LinkError, Result};
use crate::protocol::{BinaryProtocol, Protocol, TextProtocol};
use crate::session::{CloseReason, Session, Shared};
use crate::state::{LinkStats, LinkStatus, SharedState, StatsCounters};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Whether another connection attempt is allowed.
///
/// Auto-reconnect keeps attempting until shutdown. Otherwise the link
/// attempts until the first success (a server with no pending peer keeps
/// waiting) and gives up on the first failed attempt.
#[derive(Debug, Clone, Copy)]
struct AttemptPolicy {
    auto_reconnect: bool,
    one_shot: bool,
    gave_up: bool,
}

impl AttemptPolicy {
    fn new(auto_reconnect: bool) -> Self {
        Self {
            auto_reconnect,
            one_shot: true,
            gave_up: false,
        }
    }

    fn may_attempt(&self) -> bool {
        !self.gave_up && (self.auto_reconnect || self.one_shot)
    }

    fn succeeded(&mut self) {
        self.one_shot = false;
    }

    fn failed(&mut self) {
        if !self.auto_reconnect {
            self.gave_up = true;
        }
    }
}

/// One connection attempt. Errors are logged and counted, never returned:
/// a failed attempt is a state transition, not a failure of the caller.
fn attempt<P: Protocol>(
    shared: &Shared<P>,
    opener: &mut dyn StreamOpener,
    policy: &mut AttemptPolicy,
    now: Instant,
) -> Option<Session<P>> {
    shared.state.connecting();
    match opener.open() {
        Ok(Some(stream)) => {
            policy.succeeded();
            Some(Session::establish(shared, stream, now))
        }
        Ok(None) => {
            trace!(target = %opener.target(), "no peer yet");
            None
        }
        Err(err) => {
            StatsCounters::add(&shared.stats.connect_failures, 1);
            policy.failed();
            shared.state.disconnected();
            if policy.may_attempt() {
                debug!(target = %opener.target(), error = %err, "connection attempt failed");
            } else {
                warn!(target = %opener.target(), error = %err, "connection failed, not retrying");
            }
            None
        }
    }
}

/// Clears `attempting` when the management worker exits, even by panic.
struct AttemptingGuard<'a>(&'a SharedState);

impl Drop for AttemptingGuard<'_> {
    fn drop(&mut self) {
        self.0.set_attempting(false);
    }
}

/// Publishes the disconnect if the I/O worker panics mid-session.
struct DisconnectOnPanic<'a>(&'a SharedState);

impl Drop for DisconnectOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.disconnected();
        }
    }
}

struct ManagerExit {
    opener: Box<dyn StreamOpener>,
    io_panicked: bool,
}

fn join_io(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => false,
        Err(_) => {
            error!("link I/O worker panicked");
            true
        }
    }
}

fn run_manager<P: Protocol>(
    shared: Arc<Shared<P>>,
    mut opener: Box<dyn StreamOpener>,
    options: ConnectOptions,
) -> ManagerExit {
    let _attempting = AttemptingGuard(&shared.state);
    let mut policy = AttemptPolicy::new(options.auto_reconnect);
    let mut io_worker: Option<JoinHandle<()>> = None;
    let mut io_panicked = false;

    while !shared.shutdown.is_triggered() && policy.may_attempt() {
        if !shared.state.phase().is_connected() {
            if let Some(handle) = io_worker.take() {
                io_panicked |= join_io(handle);
            }
            if let Some(session) = attempt(&shared, opener.as_mut(), &mut policy, Instant::now()) {
                let io_shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name("linkprims-io".to_string())
                    .spawn(move || run_io(io_shared, session, options.tick_period));
                match spawned {
                    Ok(handle) => io_worker = Some(handle),
                    Err(err) => {
                        error!(error = %err, "failed to spawn link I/O worker");
                        shared.state.disconnected();
                    }
                }
            }
        }
        if shared.shutdown.sleep(shared.config.retry_interval) {
            break;
        }
    }

    // One-shot links end up here right after connecting; the I/O worker
    // keeps running until the stream drops or shutdown.
    if let Some(handle) = io_worker.take() {
        io_panicked |= join_io(handle);
    }
    ManagerExit {
        opener,
        io_panicked,
    }
}

fn run_io<P: Protocol>(shared: Arc<Shared<P>>, mut session: Session<P>, tick_period: Duration) {
    let _guard = DisconnectOnPanic(&shared.state);
    let reason = loop {
        if shared.shutdown.is_triggered() {
            break CloseReason::Shutdown;
        }
        if let Err(reason) = session.tick(&shared, Instant::now()) {
            break reason;
        }
        if shared.shutdown.sleep(tick_period) {
            break CloseReason::Shutdown;
        }
    };
    session.close(&shared, &reason);
}

struct ManualDriver<P: Protocol> {
    session: Option<Session<P>>,
    policy: Option<AttemptPolicy>,
    last_attempt: Option<Instant>,
}

/// A self-healing, point-to-point message link.
///
/// The application only ever touches the mailboxes and status snapshots;
/// the byte stream is owned by whoever drives the link. In
/// [`DriveMode::Background`] a connection-management worker dials or
/// accepts, retries at the configured interval, and hands each stream to an
/// I/O worker that ticks at the connect period. In [`DriveMode::Manual`]
/// nothing runs in the background and the owner calls
/// [`update`](Self::update) at its own pace; both modes run the same tick.
///
/// Outbound messages queued while disconnected are sent, in order, right
/// after the next successful connect.
pub struct Link<P: Protocol> {
    shared: Arc<Shared<P>>,
    target: String,
    opener: Mutex<Option<Box<dyn StreamOpener>>>,
    manager: Mutex<Option<JoinHandle<ManagerExit>>>,
    manual: Mutex<ManualDriver<P>>,
}

impl<P: Protocol> Link<P> {
    /// Create a disconnected link speaking `protocol` over streams from
    /// `opener`.
    pub fn new(protocol: P, opener: impl StreamOpener + 'static, config: LinkConfig) -> Self {
        let target = opener.target();
        Self {
            shared: Arc::new(Shared::new(protocol, config)),
            target,
            opener: Mutex::new(Some(Box::new(opener))),
            manager: Mutex::new(None),
            manual: Mutex::new(ManualDriver {
                session: None,
                policy: None,
                last_attempt: None,
            }),
        }
    }

    /// Start connecting.
    ///
    /// With `options.blocking`, waits until connected; a one-shot link whose
    /// attempt fails returns [`LinkError::ConnectFailed`]. Otherwise returns
    /// immediately and the connection proceeds on its own (background) or
    /// on the next [`update`](Self::update) (manual).
    pub fn connect(&self, options: ConnectOptions) -> Result<()> {
        match self.shared.config.drive_mode {
            DriveMode::Background => self.connect_background(options),
            DriveMode::Manual => self.connect_manual(options),
        }
    }

    fn connect_background(&self, options: ConnectOptions) -> Result<()> {
        let mut manager = lock(&self.manager);
        if let Some(handle) = manager.take() {
            // A worker that stopped attempting is on its way out; reap it.
            if !handle.is_finished() && self.shared.state.is_attempting() {
                *manager = Some(handle);
                return Err(LinkError::AlreadyConnected);
            }
            self.reap_manager(handle)?;
        }

        let opener = lock(&self.opener)
            .take()
            .ok_or(LinkError::WorkerPanicked("connection"))?;
        self.shared.shutdown.reset();
        self.shared.state.set_attempting(true);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("linkprims-connect".to_string())
            .spawn(move || run_manager(shared, opener, options))
            .map_err(|err| {
                self.shared.state.set_attempting(false);
                LinkError::Transport(err.into())
            })?;
        *manager = Some(handle);
        drop(manager);

        info!(target = %self.target, auto_reconnect = options.auto_reconnect, "link connecting");
        if options.blocking {
            self.wait_connected()
        } else {
            Ok(())
        }
    }

    fn connect_manual(&self, options: ConnectOptions) -> Result<()> {
        {
            let mut manual = lock(&self.manual);
            let running = manual.session.is_some()
                || manual.policy.is_some_and(|policy| policy.may_attempt());
            if running {
                return Err(LinkError::AlreadyConnected);
            }
            manual.policy = Some(AttemptPolicy::new(options.auto_reconnect));
            manual.last_attempt = None;
        }
        self.shared.shutdown.reset();
        self.shared.state.set_attempting(true);
        info!(target = %self.target, auto_reconnect = options.auto_reconnect, "link connecting");

        if !options.blocking {
            return Ok(());
        }
        loop {
            self.update()?;
            if self.is_connected() {
                return Ok(());
            }
            if !self.shared.state.is_attempting() || self.shared.shutdown.sleep(options.tick_period)
            {
                return Err(LinkError::ConnectFailed(self.target.clone()));
            }
        }
    }

    fn wait_connected(&self) -> Result<()> {
        let shutdown = &self.shared.shutdown;
        let connected = self
            .shared
            .state
            .wait_connected(|attempting| !attempting || shutdown.is_triggered());
        if connected {
            Ok(())
        } else {
            Err(LinkError::ConnectFailed(self.target.clone()))
        }
    }

    fn reap_manager(&self, handle: JoinHandle<ManagerExit>) -> Result<()> {
        match handle.join() {
            Ok(exit) => {
                *lock(&self.opener) = Some(exit.opener);
                if exit.io_panicked {
                    return Err(LinkError::WorkerPanicked("I/O"));
                }
                Ok(())
            }
            Err(_) => {
                error!("link connection worker panicked");
                Err(LinkError::WorkerPanicked("connection"))
            }
        }
    }

    /// Stop every worker, close the stream and wait for all of it.
    ///
    /// Safe to call at any time, including when never connected and more
    /// than once. Queued outbound messages are kept for a later `connect`.
    pub fn disconnect(&self) -> Result<()> {
        self.shared.shutdown.trigger();

        let handle = lock(&self.manager).take();
        let mut result = Ok(());
        let was_running = handle.is_some();
        if let Some(handle) = handle {
            result = self.reap_manager(handle);
        }

        let mut manual = lock(&self.manual);
        let was_manual = manual.policy.take().is_some();
        manual.last_attempt = None;
        if let Some(session) = manual.session.take() {
            session.close(&self.shared, &CloseReason::Shutdown);
        }
        drop(manual);

        if self.shared.state.phase() != crate::state::Phase::Disconnected {
            self.shared.state.disconnected();
        }
        self.shared.state.set_attempting(false);
        if was_running || was_manual {
            info!(target = %self.target, "link disconnected");
        }
        result
    }

    /// One manual drive step at the current time.
    pub fn update(&self) -> Result<()> {
        self.update_at(Instant::now())
    }

    /// One manual drive step: a connection attempt if disconnected and the
    /// retry interval has passed, then one I/O tick if connected.
    pub fn update_at(&self, now: Instant) -> Result<()> {
        self.require_manual()?;
        let mut manual = lock(&self.manual);
        let ManualDriver {
            session,
            policy,
            last_attempt,
        } = &mut *manual;
        let Some(policy) = policy.as_mut() else {
            return Ok(());
        };

        let retry = self.shared.config.retry_interval;
        let due = last_attempt.is_none_or(|at| now.saturating_duration_since(at) >= retry);
        if session.is_none() && policy.may_attempt() && due {
            *last_attempt = Some(now);
            if let Some(opener) = lock(&self.opener).as_mut() {
                *session = attempt(&self.shared, opener.as_mut(), policy, now);
            }
        }

        if let Some(active) = session.as_mut() {
            if let Err(reason) = active.tick(&self.shared, now) {
                if let Some(closed) = session.take() {
                    closed.close(&self.shared, &reason);
                }
            }
        }

        if session.is_none() && !policy.may_attempt() {
            self.shared.state.set_attempting(false);
        }
        Ok(())
    }

    /// Block until the line has been quiet for one resynchronization
    /// interval, discarding everything read meanwhile, then decode from the
    /// next byte. Returns the number of bytes discarded. A no-op for
    /// protocols without a quiet interval.
    pub fn flush_incoming(&self) -> Result<usize> {
        self.require_manual()?;
        let Some(quiet) = self.shared.protocol.quiet_interval() else {
            return Ok(0);
        };
        let mut manual = lock(&self.manual);
        let Some(session) = manual.session.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        match session.flush_incoming(&self.shared, quiet) {
            Ok(discarded) => Ok(discarded),
            Err(reason) => {
                if let Some(closed) = manual.session.take() {
                    closed.close(&self.shared, &reason);
                }
                match reason {
                    CloseReason::ReadFailed(err) => Err(err.into()),
                    _ => Err(LinkError::NotConnected),
                }
            }
        }
    }

    fn require_manual(&self) -> Result<()> {
        if self.shared.config.drive_mode == DriveMode::Manual {
            Ok(())
        } else {
            Err(LinkError::WrongDriveMode {
                expected: DriveMode::Manual,
            })
        }
    }

    /// Queue a message for transmission. Never blocks. Empty messages are
    /// ignored; messages the protocol cannot frame are rejected.
    pub fn send(&self, message: impl Into<P::Message>) -> Result<()> {
        let message = message.into();
        if self.shared.protocol.is_empty(&message) {
            return Ok(());
        }
        self.shared.protocol.validate(&message)?;
        self.shared.outbound.push(message);
        Ok(())
    }

    /// Take up to `count` received messages, oldest first.
    pub fn receive(&self, count: usize) -> Vec<P::Message> {
        self.shared.inbound.take(count)
    }

    /// Take every received message, oldest first.
    pub fn receive_all(&self) -> Vec<P::Message> {
        self.shared.inbound.take_all()
    }

    /// Like [`receive`](Self::receive), waiting up to `timeout` for at least
    /// one message. `Duration::MAX` waits until one arrives.
    pub fn receive_wait(&self, count: usize, timeout: Duration) -> Vec<P::Message> {
        self.shared.inbound.wait_take(count, timeout)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.phase().is_connected()
    }

    pub fn status(&self) -> LinkStatus {
        self.shared.state.snapshot(Instant::now())
    }

    pub fn stats(&self) -> LinkStats {
        self.shared.stats.snapshot()
    }

    /// Drop every received message not yet taken.
    pub fn clear_inbound(&self) -> usize {
        self.shared.inbound.clear()
    }

    /// Drop every queued outbound message not yet written.
    pub fn clear_outbound(&self) -> usize {
        self.shared.outbound.clear()
    }

    pub fn pending_inbound(&self) -> usize {
        self.shared.inbound.len()
    }

    pub fn pending_outbound(&self) -> usize {
        self.shared.outbound.len()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    pub fn protocol(&self) -> &P {
        &self.shared.protocol
    }
}

impl Link<TextProtocol> {
    /// Text link over TCP, dialing (`Role::Client`) or accepting
    /// (`Role::Server`) on `addr`.
    pub fn tcp(addr: impl Into<String>, role: Role, config: LinkConfig) -> Self {
        let opener = TcpOpener::new(addr, role)
            .with_connect_timeout(config.connect_timeout)
            .with_write_timeout(config.write_timeout);
        let protocol = TextProtocol::default().with_max_frame(config.max_text_frame);
        Self::new(protocol, opener, config)
    }
}

impl Link<BinaryProtocol> {
    /// Binary link over a UART serial port.
    pub fn serial(port: impl Into<String>, baud_rate: u32, config: LinkConfig) -> Result<Self> {
        let spacing = byte_spacing(baud_rate)?;
        let protocol = BinaryProtocol::with_quiet_factor(spacing, config.quiet_factor);
        Ok(Self::new(
            protocol,
            SerialOpener::new(port, baud_rate),
            config,
        ))
    }

    /// Queue a header plus up to ten floats.
    pub fn send_values(&self, header: u16, values: &[f32]) -> Result<()> {
        self.send(BinaryMessage::new(header, values.to_vec())?)
    }
}

impl<P: Protocol> Drop for Link<P> {
    fn drop(&mut self) {
        if let Err(err) = self.disconnect() {
            warn!(error = %err, "link teardown reported an error");
        }
    }
}

impl<P: Protocol> std::fmt::Debug for Link<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("target", &self.target)
            .field("protocol", &self.shared.protocol.name())
            .field("phase", &self.shared.state.phase())
            .finish()
    }
}
