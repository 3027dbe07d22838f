//! Load generation: an elastic pool of bulk HTTP transfers that saturates
//! the link in one direction while a sampler reports aggregate throughput
//! once per interval.

pub mod connection;
pub mod generator;
pub mod pool;

pub use connection::{
    ClientFactory, ConnectionHandle, Connector, DownloadConnector,
    UploadConnector,
};
pub use generator::start_load_generator;
pub use pool::ConnectionPool;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Direction of the bulk transfers a load generator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Download => "Download",
            Direction::Upload => "Upload",
        }
    }
}

/// Throughput of a single connection over the last sampling interval.
#[derive(Debug, Clone, Serialize)]
pub struct GranularSample {
    pub time: DateTime<Utc>,
    pub connection_id: u64,
    pub bytes_per_second: f64,
    pub direction: Direction,
}

/// Aggregate throughput over the last sampling interval, across every
/// connection in the pool.
#[derive(Debug, Clone, Serialize)]
pub struct ThroughputMeasurement {
    pub time: DateTime<Utc>,
    pub bytes_per_second: f64,
    pub connection_count: usize,
    /// Per-connection breakdown, for granular logging only.
    #[serde(skip)]
    pub granular: Vec<GranularSample>,
}
