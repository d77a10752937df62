use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod chat;
pub mod uart;
pub mod version;

/// Line speed of the reference serial test firmware.
pub const DEFAULT_BAUD: u32 = 57600;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Line-oriented text chat over TCP.
    Chat(ChatArgs),
    /// Exchange binary test frames over a serial port.
    Uart(UartArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Chat(args) => chat::run(args, format),
        Command::Uart(args) => uart::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Host to dial, or address to listen on with --server.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Accept a peer instead of dialing one.
    #[arg(long)]
    pub server: bool,
    /// Keep reconnecting after failures and dropped connections.
    #[arg(long)]
    pub auto_reconnect: bool,
    /// I/O tick period in milliseconds.
    #[arg(long, default_value = "100")]
    pub period_ms: u64,
    /// Close the connection after this long without a frame.
    #[arg(long, default_value = "1000")]
    pub timeout_ms: u64,
    /// Start reading input before the connection is established.
    #[arg(long)]
    pub no_wait: bool,
    /// Send these messages instead of reading lines from stdin.
    #[arg(long, short = 'm', conflicts_with = "listen_only")]
    pub message: Vec<String>,
    /// Do not read stdin; only print what arrives.
    #[arg(long)]
    pub listen_only: bool,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Give up after this many milliseconds (exit 124).
    #[arg(long)]
    pub deadline_ms: Option<u64>,
    /// Print link counters on exit.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct UartArgs {
    /// Serial port name (e.g. /dev/ttyUSB0, COM3).
    pub port: String,
    /// Line speed.
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
    /// Header of the test message.
    #[arg(long, default_value = "7")]
    pub header: u16,
    /// Floats of the test message (comma-separated, at most 10).
    #[arg(
        long,
        value_delimiter = ',',
        allow_negative_numbers = true,
        default_value = "5.123,1,2,5.5"
    )]
    pub values: Vec<f32>,
    /// Milliseconds between test messages; 0 sends only once.
    #[arg(long, default_value = "1000")]
    pub interval_ms: u64,
    /// Poll period in milliseconds.
    #[arg(long, default_value = "1")]
    pub period_ms: u64,
    /// Close the port after this long without a frame.
    #[arg(long, default_value = "1000")]
    pub timeout_ms: u64,
    /// Reopen the port after it is lost.
    #[arg(long)]
    pub auto_reconnect: bool,
    /// Discard bytes until the line goes quiet before decoding.
    #[arg(long)]
    pub flush: bool,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Give up after this many milliseconds (exit 124).
    #[arg(long)]
    pub deadline_ms: Option<u64>,
    /// Print link counters on exit.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Why a command loop stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stop {
    Interrupted,
    DeadlineExpired,
}

/// Ctrl-C flag plus an optional deadline, shared by the command loops.
#[derive(Clone)]
pub(crate) struct StopFlag {
    interrupted: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl StopFlag {
    pub fn new(deadline_ms: Option<u64>) -> Self {
        Self {
            interrupted: Arc::new(AtomicBool::new(false)),
            deadline: deadline_ms
                .and_then(|ms| Instant::now().checked_add(Duration::from_millis(ms))),
        }
    }

    /// Install the Ctrl-C handler. `on_interrupt` runs on the signal thread
    /// after the flag is set.
    pub fn install_ctrlc_handler(
        &self,
        on_interrupt: impl Fn() + Send + 'static,
    ) -> CliResult<()> {
        let interrupted = self.interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            on_interrupt();
        })
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
    }

    pub fn check(&self) -> Option<Stop> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Some(Stop::Interrupted);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Stop::DeadlineExpired),
            _ => None,
        }
    }

    /// Time left before the deadline, capped at `max`.
    pub fn remaining(&self, max: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(max),
            None => max,
        }
    }
}
