use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{ByteStream, ReadOutcome, StreamOpener};

/// Bits on the wire per byte with 8N1 framing (start + 8 data + stop).
const BITS_PER_BYTE: u64 = 10;

/// Read timeout handed to the driver; reads are gated on `bytes_to_read`
/// so this only bounds a read racing a port going away.
const DRIVER_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Minimum expected gap between consecutive bytes at `baud_rate`.
///
/// An idle line is detected by observing no byte for a multiple of this.
pub fn byte_spacing(baud_rate: u32) -> Result<Duration> {
    if baud_rate == 0 {
        return Err(TransportError::InvalidBaudRate(baud_rate));
    }
    let baud = u64::from(baud_rate);
    let micros = (BITS_PER_BYTE * 1_000_000).div_ceil(baud);
    Ok(Duration::from_micros(micros))
}

/// Opens a named serial port at a fixed baud rate, 8N1, no flow control.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    port: String,
    baud_rate: u32,
}

impl SerialOpener {
    /// Create an opener for `port` (e.g. `/dev/ttyUSB0`, `COM5`).
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Configured port name.
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl StreamOpener for SerialOpener {
    fn open(&mut self) -> Result<Option<Box<dyn ByteStream>>> {
        let stream = SerialByteStream::open(&self.port, self.baud_rate)?;
        Ok(Some(Box::new(stream)))
    }

    fn target(&self) -> String {
        format!("serial://{}@{}", self.port, self.baud_rate)
    }
}

/// An open UART serial port.
pub struct SerialByteStream {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    baud_rate: u32,
}

impl SerialByteStream {
    /// Open `path` at `baud_rate`.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        byte_spacing(baud_rate)?;
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(DRIVER_READ_TIMEOUT)
            .open()
            .map_err(|e| TransportError::Open {
                port: path.to_string(),
                source: e,
            })?;

        info!(port = path, baud_rate, "opened serial port");
        Ok(Self {
            port: Some(port),
            name: path.to_string(),
            baud_rate,
        })
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl ByteStream for SerialByteStream {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let port = self.port()?;
        let pending = port.bytes_to_read()? as usize;
        if pending == 0 || buf.is_empty() {
            return Ok(ReadOutcome::WouldBlock);
        }
        let want = pending.min(buf.len());
        match port.read(&mut buf[..want]) {
            Ok(0) => Ok(ReadOutcome::WouldBlock),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::WouldBlock)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.name, "serial port closed");
        }
    }

    fn transport_name(&self) -> &'static str {
        "serial"
    }

    fn peer(&self) -> String {
        format!("{}@{}", self.name, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_spacing_rounds_up() {
        // 10 bits at 9600 baud = 1041.67us
        assert_eq!(byte_spacing(9600).unwrap(), Duration::from_micros(1042));
        assert_eq!(byte_spacing(57_600).unwrap(), Duration::from_micros(174));
        assert_eq!(byte_spacing(1_000_000).unwrap(), Duration::from_micros(10));
    }

    #[test]
    fn zero_baud_rejected() {
        assert!(matches!(
            byte_spacing(0),
            Err(TransportError::InvalidBaudRate(0))
        ));
        assert!(matches!(
            SerialByteStream::open("/dev/null", 0),
            Err(TransportError::InvalidBaudRate(0))
        ));
    }

    #[test]
    fn missing_port_is_open_error() {
        let mut opener = SerialOpener::new("/dev/linkprims-no-such-port", 57_600);
        let err = opener.open().unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }

    #[test]
    fn target_includes_baud() {
        let opener = SerialOpener::new("/dev/ttyUSB0", 115_200);
        assert_eq!(opener.target(), "serial:///dev/ttyUSB0@115200");
        assert_eq!(opener.port(), "/dev/ttyUSB0");
        assert_eq!(opener.baud_rate(), 115_200);
    }
}
