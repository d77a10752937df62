use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{ByteStream, ReadOutcome, StreamOpener};

/// Default bound on how long a single dial may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Default bound on how long `write_all` keeps retrying a full socket buffer.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

const WRITE_RETRY_BACKOFF: Duration = Duration::from_micros(200);

/// Which side of the TCP handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Resolve the address and dial it.
    Client,
    /// Bind the address once and accept peers on it.
    Server,
}

/// Opens TCP streams to (client) or from (server) one configured address.
///
/// In the server role the listener is bound on first use and kept for the
/// lifetime of the opener, so reconnecting peers are accepted on the same
/// socket. Accepting never blocks: with no pending peer, [`StreamOpener::open`]
/// returns `Ok(None)`.
pub struct TcpOpener {
    addr: String,
    role: Role,
    listener: Option<TcpListener>,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl TcpOpener {
    /// Create an opener for `addr` (e.g. `"127.0.0.1:51717"`).
    pub fn new(addr: impl Into<String>, role: Role) -> Self {
        Self {
            addr: addr.into(),
            role,
            listener: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Override the dial timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the write timeout applied to opened streams.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// The configured role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Bind the server listener now instead of on the first accept.
    ///
    /// Returns the bound address, which is how callers learn the port when
    /// binding to port 0. Client openers have nothing to bind.
    pub fn listen(&mut self) -> Result<SocketAddr> {
        if self.role != Role::Server {
            return Err(TransportError::Bind {
                addr: self.addr.clone(),
                source: std::io::Error::new(
                    ErrorKind::InvalidInput,
                    "only server openers can listen",
                ),
            });
        }
        let listener = self.listener()?;
        listener.local_addr().map_err(|e| TransportError::Bind {
            addr: self.addr.clone(),
            source: e,
        })
    }

    fn listener(&mut self) -> Result<&TcpListener> {
        if self.listener.is_none() {
            let addrs = resolve(&self.addr)?;
            let mut last_err = None;
            for candidate in addrs {
                match TcpListener::bind(candidate) {
                    Ok(listener) => {
                        listener
                            .set_nonblocking(true)
                            .map_err(|e| TransportError::Bind {
                                addr: self.addr.clone(),
                                source: e,
                            })?;
                        info!(addr = %candidate, "listening for tcp peer");
                        self.listener = Some(listener);
                        break;
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            if self.listener.is_none() {
                return Err(TransportError::Bind {
                    addr: self.addr.clone(),
                    source: last_err.unwrap_or_else(|| {
                        std::io::Error::new(ErrorKind::AddrNotAvailable, "no usable address")
                    }),
                });
            }
        }
        self.listener.as_ref().ok_or(TransportError::Closed)
    }

    fn accept(&mut self) -> Result<Option<Box<dyn ByteStream>>> {
        let write_timeout = self.write_timeout;
        let listener = self.listener()?;
        match listener.accept() {
            Ok((stream, peer)) => {
                info!(%peer, "accepted tcp peer");
                Ok(Some(Box::new(TcpByteStream::from_std(
                    stream,
                    write_timeout,
                )?)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(None)
            }
            Err(e) => Err(TransportError::Accept(e)),
        }
    }

    fn dial(&mut self) -> Result<Option<Box<dyn ByteStream>>> {
        let addrs = resolve(&self.addr)?;
        let mut last_err = None;
        for candidate in addrs {
            match TcpStream::connect_timeout(&candidate, self.connect_timeout) {
                Ok(stream) => {
                    info!(peer = %candidate, "connected to tcp peer");
                    return Ok(Some(Box::new(TcpByteStream::from_std(
                        stream,
                        self.write_timeout,
                    )?)));
                }
                Err(e) => {
                    debug!(peer = %candidate, error = %e, "dial attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(TransportError::Connect {
            addr: self.addr.clone(),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(ErrorKind::AddrNotAvailable, "no usable address")
            }),
        })
    }
}

impl StreamOpener for TcpOpener {
    fn open(&mut self) -> Result<Option<Box<dyn ByteStream>>> {
        match self.role {
            Role::Client => self.dial(),
            Role::Server => self.accept(),
        }
    }

    fn target(&self) -> String {
        match self.role {
            Role::Client => format!("tcp://{} (client)", self.addr),
            Role::Server => format!("tcp://{} (server)", self.addr),
        }
    }
}

impl std::fmt::Debug for TcpOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpOpener")
            .field("addr", &self.addr)
            .field("role", &self.role)
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

/// Resolve `addr`, IPv4 candidates first.
fn resolve(addr: &str) -> Result<Vec<SocketAddr>> {
    let resolved = addr
        .to_socket_addrs()
        .map_err(|e| TransportError::Resolve {
            addr: addr.to_string(),
            source: e,
        })?;
    let (mut v4, v6): (Vec<SocketAddr>, Vec<SocketAddr>) =
        resolved.partition(SocketAddr::is_ipv4);
    v4.extend(v6);
    if v4.is_empty() {
        return Err(TransportError::Resolve {
            addr: addr.to_string(),
            source: std::io::Error::new(ErrorKind::NotFound, "address resolved to nothing"),
        });
    }
    Ok(v4)
}

/// A connected, non-blocking TCP stream.
pub struct TcpByteStream {
    stream: Option<TcpStream>,
    peer: String,
    write_timeout: Duration,
}

impl TcpByteStream {
    /// Wrap a connected std stream, switching it to non-blocking mode.
    pub fn from_std(stream: TcpStream, write_timeout: Duration) -> Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Ok(Self {
            stream: Some(stream),
            peer,
            write_timeout,
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }
}

impl ByteStream for TcpByteStream {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let deadline = Instant::now().checked_add(self.write_timeout);
        let stream = self.stream()?;

        let mut offset = 0usize;
        while offset < bytes.len() {
            match stream.write(&bytes[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(TransportError::Io(std::io::Error::new(
                            ErrorKind::TimedOut,
                            "socket send buffer stayed full",
                        )));
                    }
                    std::thread::sleep(WRITE_RETRY_BACKOFF);
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(())
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let stream = self.stream()?;
        loop {
            return match stream.read(buf) {
                Ok(0) if !buf.is_empty() => Ok(ReadOutcome::Eof),
                Ok(0) => Ok(ReadOutcome::WouldBlock),
                Ok(n) => Ok(ReadOutcome::Data(n)),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
                Err(err) => Err(TransportError::Io(err)),
            };
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(peer = %self.peer, "tcp stream closed");
        }
    }

    fn transport_name(&self) -> &'static str {
        "tcp"
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

impl Drop for TcpByteStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn read_until(stream: &mut dyn ByteStream, want: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        while out.len() < want {
            assert!(Instant::now() < deadline, "timed out waiting for bytes");
            match stream.read_nonblocking(&mut buf).unwrap() {
                ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
                ReadOutcome::WouldBlock => thread::sleep(Duration::from_millis(2)),
                ReadOutcome::Eof => panic!("unexpected eof"),
            }
        }
        out
    }

    fn accept_blocking(server: &mut TcpOpener) -> Box<dyn ByteStream> {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            if let Some(stream) = server.open().unwrap() {
                return stream;
            }
            assert!(Instant::now() < deadline, "no peer accepted");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn dial_accept_roundtrip() {
        let mut server = TcpOpener::new("127.0.0.1:0", Role::Server);
        let addr = server.listen().unwrap();

        let mut client = TcpOpener::new(addr.to_string(), Role::Client);
        let mut dialed = client.open().unwrap().expect("client dial yields a stream");
        let mut accepted = accept_blocking(&mut server);

        dialed.write_all(b"hello;").unwrap();
        assert_eq!(read_until(accepted.as_mut(), 6), b"hello;");

        accepted.write_all(b"back;").unwrap();
        assert_eq!(read_until(dialed.as_mut(), 5), b"back;");
        assert_eq!(dialed.transport_name(), "tcp");
    }

    #[test]
    fn server_without_pending_peer_yields_none() {
        let mut server = TcpOpener::new("127.0.0.1:0", Role::Server);
        server.listen().unwrap();
        assert!(server.open().unwrap().is_none());
    }

    #[test]
    fn empty_socket_reports_would_block() {
        let mut server = TcpOpener::new("127.0.0.1:0", Role::Server);
        let addr = server.listen().unwrap();
        let _dialed = TcpOpener::new(addr.to_string(), Role::Client)
            .open()
            .unwrap()
            .unwrap();
        let mut accepted = accept_blocking(&mut server);

        let mut buf = [0u8; 16];
        assert_eq!(
            accepted.read_nonblocking(&mut buf).unwrap(),
            ReadOutcome::WouldBlock
        );
    }

    #[test]
    fn peer_close_reports_eof() {
        let mut server = TcpOpener::new("127.0.0.1:0", Role::Server);
        let addr = server.listen().unwrap();
        let mut dialed = TcpOpener::new(addr.to_string(), Role::Client)
            .open()
            .unwrap()
            .unwrap();
        let mut accepted = accept_blocking(&mut server);

        dialed.close();
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut buf = [0u8; 16];
        loop {
            match accepted.read_nonblocking(&mut buf).unwrap() {
                ReadOutcome::Eof => break,
                ReadOutcome::WouldBlock => {
                    assert!(Instant::now() < deadline, "eof never observed");
                    thread::sleep(Duration::from_millis(2));
                }
                ReadOutcome::Data(n) => panic!("unexpected {n} bytes"),
            }
        }
    }

    #[test]
    fn refused_dial_is_connect_error() {
        // Bind then drop to obtain a port nobody is listening on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut client = TcpOpener::new(format!("127.0.0.1:{port}"), Role::Client)
            .with_connect_timeout(Duration::from_millis(200));
        let err = client.open().unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[test]
    fn unresolvable_address_is_resolve_error() {
        let mut client = TcpOpener::new("not an address", Role::Client);
        assert!(matches!(
            client.open().unwrap_err(),
            TransportError::Resolve { .. }
        ));
    }

    #[test]
    fn client_cannot_listen() {
        let mut client = TcpOpener::new("127.0.0.1:0", Role::Client);
        assert!(matches!(client.listen(), Err(TransportError::Bind { .. })));
    }

    #[test]
    fn closed_stream_rejects_io() {
        let mut server = TcpOpener::new("127.0.0.1:0", Role::Server);
        let addr = server.listen().unwrap();
        let mut dialed = TcpOpener::new(addr.to_string(), Role::Client)
            .open()
            .unwrap()
            .unwrap();
        dialed.close();
        dialed.close();
        assert!(matches!(dialed.write_all(b"x"), Err(TransportError::Closed)));
        let mut buf = [0u8; 4];
        assert!(matches!(
            dialed.read_nonblocking(&mut buf),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn target_names_role() {
        assert_eq!(
            TcpOpener::new("127.0.0.1:9", Role::Client).target(),
            "tcp://127.0.0.1:9 (client)"
        );
        assert_eq!(
            TcpOpener::new("127.0.0.1:9", Role::Server).target(),
            "tcp://127.0.0.1:9 (server)"
        );
    }
}
