//! Self-healing, point-to-point message links.
//!
//! This is the "just works" layer. Queue messages with [`Link::send`], take
//! complete ones with [`Link::receive`], and let the link dial or accept,
//! detect a dead peer, and reconnect underneath:
//! - [`TextProtocol`]: `;`-delimited text over TCP with heartbeats
//! - [`BinaryProtocol`]: header + floats + XOR checksum over UART, realigned
//!   on an idle line

pub mod config;
pub mod error;
pub mod liveness;
pub mod mailbox;
pub mod protocol;
pub mod shutdown;
pub mod state;
pub mod supervisor;

mod session;

pub use config::{
    ConnectOptions, DriveMode, LinkConfig, DEFAULT_CONNECT_GRACE, DEFAULT_MISSED_HEARTBEAT_LIMIT,
    DEFAULT_RETRY_INTERVAL, DEFAULT_TICK_PERIOD, DEFAULT_TIMEOUT_PERIOD,
};
pub use error::{LinkError, Result};
pub use liveness::{Liveness, LivenessMonitor};
pub use mailbox::Mailbox;
pub use protocol::{BinaryProtocol, DecodeReport, Protocol, TextProtocol};
pub use shutdown::ShutdownSignal;
pub use state::{LinkStats, LinkStatus, Phase};
pub use supervisor::Link;
