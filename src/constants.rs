//! Tuning constants for the responsiveness test.

use std::time::Duration;

/// User-Agent header sent on every HTTP request.
pub const USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Default host of the responsiveness configuration server.
pub const DEFAULT_CONFIG_HOST: &str = "mensura.cdn-apple.com";

/// Default port of the responsiveness configuration server.
pub const DEFAULT_CONFIG_PORT: u16 = 4043;

/// Default path to the configuration endpoint.
pub const DEFAULT_CONFIG_PATH: &str = "config";

/// Default hard deadline for the whole test, in seconds.
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 20;

/// Default interval between probe ticks, in milliseconds.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 100;

/// Interval between throughput samples on a load generator.
pub const THROUGHPUT_SAMPLING_INTERVAL: Duration = Duration::from_secs(1);

/// Number of instantaneous throughput measurements per moving average (I).
pub const INSTANTANEOUS_THROUGHPUT_WINDOW: usize = 4;

/// Number of instantaneous probe measurements per moving average (I).
pub const INSTANTANEOUS_PROBE_WINDOW: usize = 5;

/// Number of successive moving averages inspected for stability (K).
pub const MOVING_AVERAGE_STABILITY_COUNT: usize = 4;

/// Stability cutoff: coefficient of variation across the last K moving
/// averages must not exceed this fraction (S).
pub const STABILITY_CV_CUTOFF: f64 = 0.05;

/// Number of connections added to the pool when the flow-balance policy
/// decides to grow.
pub const ADDITIVE_CONNECTION_COUNT: usize = 4;

/// A connection counts as saturated when its per-interval byte delta is
/// within this absolute percent difference of the pool mean.
pub const SATURATION_EPSILON_PERCENT: f64 = 25.0;

/// The pool grows only while at least this fraction of its connections
/// are saturated.
pub const HIGH_WATER_SATURATION_RATIO: f64 = 0.75;

/// Offset subtracted from quality-attenuation samples before accumulating
/// sums, to limit floating-point cancellation for small latencies.
pub const QA_LATENCY_OFFSET: f64 = 0.1;

/// Samples strictly above this latency (seconds) count as losses.
pub const QA_LOSS_THRESHOLD: f64 = 15.0;

/// Percent trimmed from each side of the latency series for the
/// trimmed-mean RPM.
pub const RPM_TRIM_PERCENT: usize = 10;

/// Compression factor of the online quantile sketch.
pub const SKETCH_COMPRESSION: f64 = 100.0;

/// Size of a single chunk of upload payload.
pub const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;
