//! Granular CSV logging of test measurements.
//!
//! Every record stream gets its own logger. When the user does not ask
//! for logging, the null logger stands in so the orchestrator never has
//! to branch on whether logging is enabled.

use log::warn;
use serde::Serialize;
use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

/// A sink for one stream of serializable records.
pub trait DataLogger<T: Serialize>: Send {
    /// Record one data point. Failures are logged and swallowed; a broken
    /// log file must not fail the measurement.
    fn log_record(&mut self, record: &T);

    /// Flush everything recorded so far.
    fn export(&mut self) -> io::Result<()>;
}

/// Writes records as CSV rows, headers derived from the record type.
pub struct CsvDataLogger<T: Serialize> {
    writer: csv::Writer<File>,
    _record: PhantomData<T>,
}

impl<T: Serialize> CsvDataLogger<T> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let writer = csv::Writer::from_path(path.as_ref())
            .map_err(io::Error::other)?;
        Ok(Self { writer, _record: PhantomData })
    }
}

impl<T: Serialize + Send> DataLogger<T> for CsvDataLogger<T> {
    fn log_record(&mut self, record: &T) {
        if let Err(e) = self.writer.serialize(record) {
            warn!("could not write log record: {}", e);
        }
    }

    fn export(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullDataLogger;

impl<T: Serialize> DataLogger<T> for NullDataLogger {
    fn log_record(&mut self, _record: &T) {}

    fn export(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Insert `appendage` into `filename` just before its first `.`, or append
/// it when there is no extension.
pub fn filename_append(filename: &str, appendage: &str) -> String {
    match filename.split_once('.') {
        Some((stem, rest)) => format!("{}{}.{}", stem, appendage, rest),
        None => format!("{}{}", filename, appendage),
    }
}
