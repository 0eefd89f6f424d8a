//! Session Logging
//!
//! Records decoded samples during a logging window and exports them as CSV.

mod format;
mod recorder;

pub use format::{export_file_name, to_csv, write_csv, TIMESTAMP_COLUMN};
pub use recorder::SessionLogger;
