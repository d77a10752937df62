use crate::error::Result;

/// Result of a single non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the caller's buffer (`n > 0`).
    Data(usize),
    /// Nothing is available right now.
    WouldBlock,
    /// The remote end closed the stream.
    Eof,
}

impl ReadOutcome {
    /// Number of bytes delivered by this read.
    pub fn len(self) -> usize {
        match self {
            ReadOutcome::Data(n) => n,
            ReadOutcome::WouldBlock | ReadOutcome::Eof => 0,
        }
    }

    /// True if the read delivered no bytes.
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }
}

/// A connected, continuous byte stream.
///
/// Implementations never block indefinitely on reads: a read either returns
/// the bytes currently available or reports [`ReadOutcome::WouldBlock`].
/// Streams are `Send` so a connection worker can hand a freshly opened stream
/// to the I/O worker that owns it from then on.
pub trait ByteStream: Send {
    /// Write every byte of `bytes`, retrying partial writes.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Copy whatever is currently available into `buf` without blocking.
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Release the underlying handle. Safe to call more than once.
    fn close(&mut self);

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;

    /// Human-readable description of the remote end.
    fn peer(&self) -> String;
}

impl std::fmt::Debug for dyn ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("type", &self.transport_name())
            .field("peer", &self.peer())
            .finish()
    }
}

/// Produces connected streams for a single configured target.
///
/// An opener is owned by the connection-management worker and asked for a
/// new stream on every connection attempt.
pub trait StreamOpener: Send {
    /// Attempt to establish a stream.
    ///
    /// `Ok(None)` means there is nothing to connect to yet (for example a
    /// server with no pending peer). It is not a failed attempt.
    fn open(&mut self) -> Result<Option<Box<dyn ByteStream>>>;

    /// Description of the configured target, for logs.
    fn target(&self) -> String;
}
