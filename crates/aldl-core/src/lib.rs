//! # ALDL Core Library
//!
//! Acquisition engine for ECMs on the GM ALDL diagnostic bus.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Definition model: how to pull parameters out of a response packet
//! - Packet decoding into timestamped telemetry samples
//! - Serial, TCP and simulated transports behind one connection type
//! - A cancellable request/response poll loop
//! - Session logging with CSV export
//!
//! ## Example
//!
//! ```rust,ignore
//! use aldl_core::prelude::*;
//!
//! let definition = library.active().cloned();
//! let mut provider = SerialProvider::new(ConnectionConfig {
//!     port_name: "/dev/ttyUSB0".into(),
//!     ..Default::default()
//! });
//!
//! let mut conn = Connection::new();
//! conn.open(&mut provider, OpenOptions::for_definition(definition.as_ref()))?;
//!
//! let scheduler = PollScheduler::default();
//! let outcome = scheduler.start(&mut conn, definition.as_ref()).await;
//! ```

pub mod analysis;
pub mod datalog;
pub mod decode;
pub mod definition;
pub mod demo;
pub mod protocol;
pub mod scheduler;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::analysis::{Advisor, AnalysisError, EngineAnalyst, HttpAnalyst};
    pub use crate::datalog::SessionLogger;
    pub use crate::decode::{decode, TelemetrySample};
    pub use crate::definition::{
        Definition, DefinitionLibrary, DefinitionSource, GaugeBinding, GaugeRange,
        JsonDefinitionSource, ParameterDefinition, ParameterId,
    };
    pub use crate::demo::DemoProvider;
    pub use crate::protocol::{
        Connection, ConnectionConfig, ConnectionState, OpenOptions, SerialProvider, TcpProvider,
        Transport, TransportError, TransportProvider,
    };
    pub use crate::scheduler::{PollConfig, PollHandle, PollOutcome, PollScheduler, PollState};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
