//! Resilient message links over continuous, unreliable byte streams.
//!
//! linkprims delivers discrete messages over TCP sockets and UART serial
//! links, surviving partial reads, corrupted bytes, silent peers and
//! dropped connections.
//!
//! # Crate Structure
//!
//! - [`transport`]: Byte stream abstraction (TCP client/server, serial port, mock)
//! - [`frame`]: Binary checksummed and delimited text framing with resynchronization
//! - [`link`]: Mailboxes, liveness and the reconnecting supervisor (behind `link` feature)

/// Re-export transport types.
pub mod transport {
    pub use linkprims_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use linkprims_frame::*;
}

/// Re-export link types (requires `link` feature).
#[cfg(feature = "link")]
pub mod link {
    pub use linkprims_link::*;
}
