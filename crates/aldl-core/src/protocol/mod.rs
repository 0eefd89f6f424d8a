//! ALDL Communication
//!
//! The engine talks to the ECM through a [`Transport`] handed out by a
//! host-supplied [`TransportProvider`]. [`Connection`] owns that transport and
//! exposes the single request/response [`exchange`](Connection::exchange)
//! the poll loop is built on.

pub mod command;
mod connection;
mod error;
pub mod serial;
mod transport;

pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::TransportError;
pub use serial::{list_ports, PortInfo, SerialProvider, SerialTransport};
pub use transport::{OpenOptions, TcpProvider, TcpTransport, Transport, TransportProvider};

/// Default upper bound on a single read, in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 250;

/// Read buffer size; comfortably above the longest ALDL data stream message
pub const MAX_PACKET_SIZE: usize = 512;
