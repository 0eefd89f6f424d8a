//! CSV export
//!
//! The header is the key set of the first sample: the timestamp column, then
//! the parameter ids that sample decoded. Later samples that decoded other
//! fields only fill the columns the header already has; missing values are
//! empty cells.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::decode::TelemetrySample;

/// Name of the capture-time column
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// File name for a log exported at `now`
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("aldl_log_{}.csv", now.timestamp_millis())
}

/// Render samples as CSV. Returns `None` when there are no samples.
pub fn to_csv<'a, I>(samples: I) -> Option<String>
where
    I: IntoIterator<Item = &'a TelemetrySample>,
{
    let mut samples = samples.into_iter().peekable();
    let first = samples.peek()?;

    let mut headers = vec![TIMESTAMP_COLUMN.to_string()];
    headers.extend(first.keys().map(|k| k.to_string()));

    let mut out = headers.join(",");
    for sample in samples {
        out.push('\n');
        for (i, header) in headers.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            if i == 0 {
                out.push_str(&sample.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true));
            } else if let Some(value) = sample.get(header) {
                // Writing into a String cannot fail
                let _ = write!(out, "{}", value);
            }
        }
    }
    Some(out)
}

/// Write rendered CSV text to `path`
pub fn write_csv<P: AsRef<Path>>(path: P, text: &str) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(text.as_bytes())?;
    writeln!(writer)?;
    writer.flush()
}
