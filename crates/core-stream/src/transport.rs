//! Byte-stream transports to the motion controller.
//!
//! TCP and serial share identical semantics above the byte level: writes
//! are whole-buffer, reads return whatever arrived (with `Ok(0)` meaning
//! the peer closed), and a read timeout surfaces as `TimedOut`/
//! `WouldBlock` rather than an error state. `try_clone` hands out an
//! independent handle used solely by the E-stop path, which must be able
//! to write while the primary handle is parked mid-stream.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serialport::SerialPort;

/// One end of the controller link.
pub trait Transport: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// Read available bytes. `Ok(0)` means the peer closed the stream;
    /// `TimedOut`/`WouldBlock` means nothing arrived inside the timeout.
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    /// Independent handle over the same link (E-stop path).
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}

/// Where the controller lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Serial { path: String, baud: u32 },
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Serial { path, baud } => write!(f, "serial://{path}@{baud}"),
        }
    }
}

/// Open a transport for `endpoint`, bounding the dial by `timeout`.
pub fn connect(endpoint: &Endpoint, timeout: Duration) -> io::Result<Box<dyn Transport>> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let addr = (host.as_str(), *port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved")
                })?;
            let stream = TcpStream::connect_timeout(&addr, timeout)?;
            stream.set_nodelay(true)?;
            Ok(Box::new(TcpTransport { stream }))
        }
        Endpoint::Serial { path, baud } => {
            let port = serialport::new(path.as_str(), *baud)
                .timeout(timeout)
                .open()
                .map_err(io::Error::other)?;
            Ok(Box::new(SerialTransport { port }))
        }
    }
}

pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(TcpTransport {
            stream: self.stream.try_clone()?,
        }))
    }
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl Transport for SerialTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(SerialTransport {
            port: self.port.try_clone().map_err(io::Error::other)?,
        }))
    }
}
