//! Connection management
//!
//! Owns the transport handle for one session and performs exchanges.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    OpenOptions, Transport, TransportError, TransportProvider, DEFAULT_READ_TIMEOUT_MS,
    MAX_PACKET_SIZE,
};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport open
    Disconnected,
    /// Transport open and ready for exchanges
    Connected,
}

/// Host transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Upper bound on a single read; a read that times out yields an empty packet
    pub read_timeout: Duration,
    /// Read buffer size
    pub read_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            read_buffer: MAX_PACKET_SIZE,
        }
    }
}

/// ECM connection
///
/// Exchanges take `&mut self`, so only one can be in flight.
pub struct Connection {
    /// Open transport
    transport: Option<Box<dyn Transport>>,
    /// Options the transport was opened with
    options: Option<OpenOptions>,
    /// Metrics: cumulative bytes sent & received
    tx_bytes: u64,
    rx_bytes: u64,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Create a connection (not yet open)
    pub fn new() -> Self {
        Self {
            transport: None,
            options: None,
            tx_bytes: 0,
            rx_bytes: 0,
        }
    }

    /// Open a transport from `provider`. Any transport already open is closed first.
    pub fn open(
        &mut self,
        provider: &mut dyn TransportProvider,
        options: OpenOptions,
    ) -> Result<(), TransportError> {
        if self.transport.is_some() {
            debug!("open: closing previous transport");
            self.close();
        }

        let transport = provider.open(&options).map_err(|e| {
            warn!(baud_rate = options.baud_rate, "link failed: {e}");
            TransportError::LinkRefused(e.to_string())
        })?;

        info!(baud_rate = options.baud_rate, "hardware linked");
        self.transport = Some(transport);
        self.options = Some(options);
        Ok(())
    }

    /// Release the transport. Safe to call when already closed.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!("error while closing transport: {e}");
            }
            info!("hardware unlinked");
        }
        self.options = None;
    }

    /// Whether a transport is open
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        if self.is_open() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Options of the open transport
    pub fn options(&self) -> Option<OpenOptions> {
        self.options
    }

    /// Get cumulative (tx, rx) byte counters
    pub fn get_counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    /// Write `request`, then read once.
    ///
    /// Returns whatever arrived, which may be a partial or empty packet.
    pub fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let transport = self.transport.as_mut().ok_or(TransportError::NotConnected)?;

        transport
            .write(request)
            .map_err(|e| TransportError::BusError(e.to_string()))?;
        self.tx_bytes += request.len() as u64;

        let response = transport
            .read()
            .map_err(|e| TransportError::BusError(e.to_string()))?;
        self.rx_bytes += response.len() as u64;

        debug!(
            sent = request.len(),
            received = response.len(),
            "exchange complete"
        );
        Ok(response)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
