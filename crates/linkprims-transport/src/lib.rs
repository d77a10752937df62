//! Byte stream abstraction for point-to-point links.
//!
//! Provides one non-blocking interface over the physical links a link
//! supervisor drives:
//! - TCP sockets, as a dialing client or an accepting server
//! - UART serial ports at a fixed baud rate
//! - An in-memory mock for tests
//!
//! This is the lowest layer of linkprims. Everything else builds on top of
//! the [`ByteStream`] and [`StreamOpener`] traits provided here.

pub mod error;
pub mod mock;
pub mod serial;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use mock::{MockAttempt, MockOpener, MockStream};
pub use serial::{byte_spacing, SerialByteStream, SerialOpener};
pub use tcp::{Role, TcpByteStream, TcpOpener};
pub use traits::{ByteStream, ReadOutcome, StreamOpener};
