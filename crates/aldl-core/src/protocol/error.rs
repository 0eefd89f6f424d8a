//! Transport errors

use thiserror::Error;

/// Errors that can occur while talking to the ECM
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Opening the transport failed or the host denied access
    #[error("Link failed: {0}")]
    LinkRefused(String),

    /// A write or read failed mid-poll
    #[error("Bus error: {0}")]
    BusError(String),

    /// Exchange attempted with no open transport
    #[error("Not connected to ECM")]
    NotConnected,
}
