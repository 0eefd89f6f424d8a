//! Session recorder
//!
//! Buffers samples while logging is active.

use chrono::{DateTime, Duration, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::format::{export_file_name, to_csv, write_csv};
use crate::decode::TelemetrySample;

/// Session logger state
#[derive(Debug, Default)]
pub struct SessionLogger {
    /// Recorded samples, oldest first
    buffer: Vec<Arc<TelemetrySample>>,
    /// Whether logging is active
    is_recording: bool,
}

impl SessionLogger {
    /// Create an idle logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording. Clears anything recorded before.
    pub fn start(&mut self) {
        self.buffer.clear();
        self.is_recording = true;
        info!("session logging started");
    }

    /// Stop recording. The buffer stays available for export.
    pub fn stop(&mut self) {
        self.is_recording = false;
        info!(samples = self.buffer.len(), "session logging stopped");
    }

    /// Check if recording is active
    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    /// Record a sample. Ignored unless recording.
    pub fn record(&mut self, sample: impl Into<Arc<TelemetrySample>>) {
        if !self.is_recording {
            return;
        }
        self.buffer.push(sample.into());
    }

    /// Number of recorded samples
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Recorded samples, oldest first
    pub fn samples(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.buffer.iter().map(|s| s.as_ref())
    }

    /// Drop all recorded samples
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Time between the first and last recorded sample
    pub fn duration(&self) -> Duration {
        match (self.buffer.first(), self.buffer.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => Duration::zero(),
        }
    }

    /// CSV rendering of the buffer, `None` when empty
    pub fn export(&self) -> Option<String> {
        to_csv(self.buffer.iter().map(|s| s.as_ref()))
    }

    /// Write the buffer to `dir` as `aldl_log_<millis>.csv`.
    ///
    /// Returns the path written, or `None` when the buffer is empty.
    pub fn export_to_dir(&self, dir: &Path, now: DateTime<Utc>) -> io::Result<Option<PathBuf>> {
        let Some(text) = self.export() else {
            debug!("export skipped: log is empty");
            return Ok(None);
        };
        let path = dir.join(export_file_name(now));
        write_csv(&path, &text)?;
        info!(
            path = %path.display(),
            samples = self.buffer.len(),
            duration_ms = self.duration().num_milliseconds(),
            "session log exported"
        );
        Ok(Some(path))
    }

    /// Stop, export to `dir`, then clear: the logging toggle's off path
    pub fn finish(&mut self, dir: &Path, now: DateTime<Utc>) -> io::Result<Option<PathBuf>> {
        self.stop();
        let written = self.export_to_dir(dir, now)?;
        self.clear();
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetrySample {
        TelemetrySample::empty(Utc::now())
    }

    #[test]
    fn test_logger_basic() {
        let mut logger = SessionLogger::new();
        assert!(!logger.is_recording());

        logger.record(sample());
        assert!(logger.is_empty());

        logger.start();
        assert!(logger.is_recording());
        logger.record(sample());
        assert_eq!(logger.len(), 1);

        logger.stop();
        assert!(!logger.is_recording());
        logger.record(sample());
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn test_restart_clears_buffer() {
        let mut logger = SessionLogger::new();
        logger.start();
        logger.record(sample());
        logger.record(sample());
        logger.stop();
        assert_eq!(logger.len(), 2);

        logger.start();
        assert!(logger.is_empty());
    }

    #[test]
    fn test_duration_spans_first_to_last() {
        let mut logger = SessionLogger::new();
        assert_eq!(logger.duration(), Duration::zero());

        let t0 = Utc::now();
        logger.start();
        logger.record(TelemetrySample::empty(t0));
        logger.record(TelemetrySample::empty(t0 + Duration::milliseconds(120)));
        logger.record(TelemetrySample::empty(t0 + Duration::milliseconds(240)));
        assert_eq!(logger.duration(), Duration::milliseconds(240));
    }

    #[test]
    fn test_empty_export_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SessionLogger::new();
        assert!(logger.export().is_none());
        assert!(logger.export_to_dir(dir.path(), Utc::now()).unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_finish_exports_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = SessionLogger::new();
        logger.start();
        logger.record(sample());

        let path = logger.finish(dir.path(), Utc::now()).unwrap().unwrap();
        assert!(path.exists());
        assert!(!logger.is_recording());
        assert!(logger.is_empty());
    }
}
