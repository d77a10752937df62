//! In-memory byte streams for tests.
//!
//! Both types are cheap handles over shared state, so a test keeps one clone
//! to inject traffic and inspect writes while the link owns the other.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Result, TransportError};
use crate::traits::{ByteStream, ReadOutcome, StreamOpener};

/// Scriptable in-memory stream.
#[derive(Clone, Default)]
pub struct MockStream {
    inner: Arc<Mutex<MockStreamInner>>,
}

#[derive(Default)]
struct MockStreamInner {
    read_chunks: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    writes: usize,
    eof: bool,
    fail_writes_after: Option<usize>,
    fail_reads: bool,
    closed: bool,
}

impl MockStream {
    /// Create an empty, open stream.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockStreamInner> {
        // A panicking test thread must not hide the state from the others.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue bytes to be returned by a later read.
    ///
    /// Each call is delivered by a separate read, which lets tests control
    /// exactly where the stream splits.
    pub fn inject_read(&self, data: &[u8]) {
        if !data.is_empty() {
            self.lock().read_chunks.push_back(data.to_vec());
        }
    }

    /// Report end-of-stream once all queued reads are consumed.
    pub fn set_eof(&self) {
        self.lock().eof = true;
    }

    /// Make every write after the next `n` successful ones fail.
    pub fn fail_writes_after(&self, n: usize) {
        let mut inner = self.lock();
        inner.fail_writes_after = Some(inner.writes + n);
    }

    /// Make every read fail with an I/O error.
    pub fn fail_reads(&self) {
        self.lock().fail_reads = true;
    }

    /// All bytes written so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Take and clear the bytes written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().written)
    }

    /// Number of successful `write_all` calls.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Bytes still queued for reading.
    pub fn pending_reads(&self) -> usize {
        self.lock().read_chunks.iter().map(Vec::len).sum()
    }
}

impl ByteStream for MockStream {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if inner.fail_writes_after.is_some_and(|limit| inner.writes >= limit) {
            return Err(TransportError::Io(std::io::Error::new(
                ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        inner.written.extend_from_slice(bytes);
        inner.writes += 1;
        Ok(())
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if inner.fail_reads {
            return Err(TransportError::Io(std::io::Error::new(
                ErrorKind::ConnectionReset,
                "mock read failure",
            )));
        }
        let Some(chunk) = inner.read_chunks.front_mut() else {
            return Ok(if inner.eof {
                ReadOutcome::Eof
            } else {
                ReadOutcome::WouldBlock
            });
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            inner.read_chunks.pop_front();
        }
        Ok(if n == 0 {
            ReadOutcome::WouldBlock
        } else {
            ReadOutcome::Data(n)
        })
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }

    fn transport_name(&self) -> &'static str {
        "mock"
    }

    fn peer(&self) -> String {
        "mock-peer".to_string()
    }
}

/// One scripted response of a [`MockOpener`].
#[derive(Clone)]
pub enum MockAttempt {
    /// Hand out this stream.
    Connect(MockStream),
    /// Nothing to connect to yet.
    Pending,
    /// Fail the attempt with a connect error.
    Refuse,
}

/// Opener that replays scripted attempts, then reports `Pending` forever.
#[derive(Clone, Default)]
pub struct MockOpener {
    inner: Arc<Mutex<MockOpenerInner>>,
}

#[derive(Default)]
struct MockOpenerInner {
    script: VecDeque<MockAttempt>,
    attempts: usize,
}

impl MockOpener {
    /// Create an opener with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an opener that connects once to `stream`.
    pub fn connecting(stream: &MockStream) -> Self {
        let opener = Self::new();
        opener.push(MockAttempt::Connect(stream.clone()));
        opener
    }

    fn lock(&self) -> MutexGuard<'_, MockOpenerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a scripted attempt.
    pub fn push(&self, attempt: MockAttempt) {
        self.lock().script.push_back(attempt);
    }

    /// Number of times `open` has been called.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }
}

impl StreamOpener for MockOpener {
    fn open(&mut self) -> Result<Option<Box<dyn ByteStream>>> {
        let mut inner = self.lock();
        inner.attempts += 1;
        match inner.script.pop_front() {
            Some(MockAttempt::Connect(stream)) => Ok(Some(Box::new(stream))),
            Some(MockAttempt::Refuse) => Err(TransportError::Connect {
                addr: "mock".to_string(),
                source: std::io::Error::from(ErrorKind::ConnectionRefused),
            }),
            Some(MockAttempt::Pending) | None => Ok(None),
        }
    }

    fn target(&self) -> String {
        "mock://".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_follow_injection_boundaries() {
        let stream = MockStream::new();
        stream.inject_read(b"AB;");
        stream.inject_read(b"C");

        let mut handle = stream.clone();
        let mut buf = [0u8; 16];
        assert_eq!(handle.read_nonblocking(&mut buf).unwrap(), ReadOutcome::Data(3));
        assert_eq!(&buf[..3], b"AB;");
        assert_eq!(handle.read_nonblocking(&mut buf).unwrap(), ReadOutcome::Data(1));
        assert_eq!(
            handle.read_nonblocking(&mut buf).unwrap(),
            ReadOutcome::WouldBlock
        );

        stream.set_eof();
        assert_eq!(handle.read_nonblocking(&mut buf).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn small_buffer_drains_chunk_over_several_reads() {
        let stream = MockStream::new();
        stream.inject_read(b"abcdef");
        let mut handle = stream.clone();
        let mut buf = [0u8; 4];
        assert_eq!(handle.read_nonblocking(&mut buf).unwrap(), ReadOutcome::Data(4));
        assert_eq!(stream.pending_reads(), 2);
        assert_eq!(handle.read_nonblocking(&mut buf).unwrap(), ReadOutcome::Data(2));
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn scripted_write_failure() {
        let stream = MockStream::new();
        let mut handle = stream.clone();
        stream.fail_writes_after(1);
        handle.write_all(b"ok").unwrap();
        assert!(handle.write_all(b"boom").is_err());
        assert_eq!(stream.written(), b"ok");
        assert_eq!(stream.write_count(), 1);
    }

    #[test]
    fn closed_stream_rejects_io() {
        let stream = MockStream::new();
        let mut handle = stream.clone();
        handle.close();
        assert!(stream.is_closed());
        assert!(matches!(handle.write_all(b"x"), Err(TransportError::Closed)));
    }

    #[test]
    fn opener_replays_script_then_pends() {
        let stream = MockStream::new();
        let mut opener = MockOpener::new();
        opener.push(MockAttempt::Refuse);
        opener.push(MockAttempt::Connect(stream));

        assert!(matches!(opener.open(), Err(TransportError::Connect { .. })));
        assert!(opener.open().unwrap().is_some());
        assert!(opener.open().unwrap().is_none());
        assert_eq!(opener.attempts(), 3);
    }
}
