//! Transport seam
//!
//! [`Transport`] is one open byte link to the ECM, [`TransportProvider`] the
//! host-side factory that opens it. Serial lives in `serial`; the TCP bridge
//! transport and the shared read helpers live here.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::definition::{Definition, DEFAULT_BAUD_RATE};

/// Parameters handed to the host when opening a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Bus speed
    pub baud_rate: u32,
}

impl OpenOptions {
    /// Options for `definition`, or the default bus speed without one
    pub fn for_definition(definition: Option<&Definition>) -> Self {
        Self {
            baud_rate: definition.map(|d| d.baud_rate).unwrap_or(DEFAULT_BAUD_RATE),
        }
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::for_definition(None)
    }
}

/// An open byte link to the ECM
pub trait Transport: Send {
    /// Write `bytes` to completion
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read whatever has arrived. May return fewer bytes than a full packet,
    /// or none at all.
    fn read(&mut self) -> io::Result<Vec<u8>>;

    /// Release the link
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Host-side factory for transports
pub trait TransportProvider {
    /// Request and open a transport. An error means access was denied or the
    /// device could not be opened.
    fn open(&mut self, options: &OpenOptions) -> io::Result<Box<dyn Transport>>;
}

/// Read once from `reader`. `None` means the read timed out with nothing
/// received; `Some` of an empty buffer means end of stream.
fn read_once<R: Read>(reader: &mut R, buf_len: usize) -> io::Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; buf_len];
    match reader.read(&mut buf) {
        Ok(n) => {
            buf.truncate(n);
            Ok(Some(buf))
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Read once from `reader`, treating a timeout as an empty read
pub(crate) fn read_available<R: Read>(reader: &mut R, buf_len: usize) -> io::Result<Vec<u8>> {
    Ok(read_once(reader, buf_len)?.unwrap_or_default())
}

/// TCP stream transport, for network ALDL bridges
pub struct TcpTransport {
    stream: TcpStream,
    buf_len: usize,
}

impl TcpTransport {
    /// Wrap a connected stream, bounding reads and writes by `read_timeout`
    pub fn new(stream: TcpStream, read_timeout: Duration, buf_len: usize) -> io::Result<Self> {
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_write_timeout(Some(read_timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, buf_len })
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    fn read(&mut self) -> io::Result<Vec<u8>> {
        match read_once(&mut self.stream, self.buf_len)? {
            // Zero bytes without a timeout means the bridge hung up
            Some(buf) if buf.is_empty() => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "bridge closed the connection",
            )),
            Some(buf) => Ok(buf),
            None => Ok(Vec::new()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }
}

/// Opens [`TcpTransport`]s to a fixed address. The baud rate is the bridge's concern.
#[derive(Debug, Clone)]
pub struct TcpProvider {
    /// Bridge address, `host:port`
    pub addr: String,
    /// Upper bound on a single read
    pub read_timeout: Duration,
    /// Read buffer size
    pub buf_len: usize,
}

impl TransportProvider for TcpProvider {
    fn open(&mut self, _options: &OpenOptions) -> io::Result<Box<dyn Transport>> {
        let stream = TcpStream::connect(&self.addr)?;
        Ok(Box::new(TcpTransport::new(
            stream,
            self.read_timeout,
            self.buf_len,
        )?))
    }
}
