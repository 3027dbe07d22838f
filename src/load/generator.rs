//! The load-generator sampler loop.
//!
//! One connection opens at t = 0. Every sampling interval the loop reads
//! the cumulative byte counter of every pool member, emits a throughput
//! measurement, and applies the flow-balance growth policy. The operator
//! scope stops this loop; the network-activity scope closes the transfers
//! themselves.

use super::connection::{ConnectionHandle, Connector};
use super::pool::ConnectionPool;
use super::{Direction, GranularSample, ThroughputMeasurement};
use crate::constants::{
    ADDITIVE_CONNECTION_COUNT, HIGH_WATER_SATURATION_RATIO,
    SATURATION_EPSILON_PERCENT,
};
use crate::stats::abs_percent_difference;
use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Streams returned by [`start_load_generator`].
pub struct LoadGeneratorStreams {
    /// Emits exactly one value: the first connection's handle, as soon as
    /// its transfer has begun.
    pub self_probe_rx: mpsc::Receiver<Arc<ConnectionHandle>>,
    /// Emits one throughput measurement per sampling interval.
    pub throughput_rx: mpsc::UnboundedReceiver<ThroughputMeasurement>,
}

/// Start a load generator for one direction.
pub fn start_load_generator(
    direction: Direction,
    connector: Arc<dyn Connector>,
    pool: Arc<ConnectionPool>,
    sampling_interval: Duration,
    operator: CancellationToken,
    network: CancellationToken,
) -> LoadGeneratorStreams {
    let (self_probe_tx, self_probe_rx) = mpsc::channel(1);
    let (throughput_tx, throughput_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let first = match connector.open(network.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{}: could not open first connection: {}", direction.label(), e);
                return;
            }
        };
        pool.lock().push(first.clone());

        // Hand the first connection to the prober once it carries data.
        loop {
            if first.started() {
                let _ = self_probe_tx.send(first.clone()).await;
                break;
            }
            if operator.is_cancelled() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut previous_counters: Vec<u64> = Vec::new();
        let mut ticker = interval_at(
            Instant::now() + sampling_interval,
            sampling_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = operator.cancelled() => break,
                _ = ticker.tick() => {
                    let measurement = sample_pool(
                        direction,
                        connector.as_ref(),
                        &pool,
                        &network,
                        sampling_interval,
                        &mut previous_counters,
                    );
                    debug!(
                        "{}: {} bytes/sec across {} connections",
                        direction.label(),
                        measurement.bytes_per_second,
                        measurement.connection_count,
                    );
                    if throughput_tx.send(measurement).is_err() {
                        break;
                    }
                }
            }
        }
    });

    LoadGeneratorStreams { self_probe_rx, throughput_rx }
}

/// Take one throughput sample and apply the growth policy. Holds the pool
/// lock for the whole pass.
fn sample_pool(
    direction: Direction,
    connector: &dyn Connector,
    pool: &ConnectionPool,
    network: &CancellationToken,
    sampling_interval: Duration,
    previous_counters: &mut Vec<u64>,
) -> ThroughputMeasurement {
    let now = Utc::now();
    let interval_secs = sampling_interval.as_secs_f64();
    let mut guard = pool.lock();

    let counters: Vec<u64> =
        guard.iter().map(|handle| handle.bytes_transferred()).collect();
    // Connections appended since the last tick start from zero.
    previous_counters.resize(counters.len(), 0);

    let deltas: Vec<u64> = counters
        .iter()
        .zip(previous_counters.iter())
        .map(|(current, previous)| current - previous)
        .collect();

    let total: u64 = deltas.iter().sum();
    let granular = guard
        .iter()
        .zip(deltas.iter())
        .map(|(handle, delta)| GranularSample {
            time: now,
            connection_id: handle.id(),
            bytes_per_second: *delta as f64 / interval_secs,
            direction,
        })
        .collect();

    if pool_should_grow(&deltas) {
        for _ in 0..ADDITIVE_CONNECTION_COUNT {
            match connector.open(network.clone()) {
                Ok(handle) => guard.push(handle),
                Err(e) => {
                    warn!(
                        "{}: could not open connection: {}",
                        direction.label(),
                        e
                    );
                }
            }
        }
    }

    *previous_counters = counters;

    ThroughputMeasurement {
        time: now,
        bytes_per_second: total as f64 / interval_secs,
        connection_count: previous_counters.len(),
        granular,
    }
}

/// Count connections whose per-interval delta sits within the saturation
/// epsilon of the pool mean. A stalled connection (delta far below the
/// mean) is not saturated.
fn saturated_connection_count(deltas: &[u64]) -> usize {
    if deltas.is_empty() {
        return 0;
    }
    let mean = deltas.iter().sum::<u64>() as f64 / deltas.len() as f64;
    if mean == 0.0 {
        return 0;
    }
    deltas
        .iter()
        .filter(|delta| {
            abs_percent_difference(**delta as f64, mean)
                <= SATURATION_EPSILON_PERCENT
        })
        .count()
}

/// The flow-balance decision: grow while the saturated fraction of the
/// pool is at or above the high-water threshold.
fn pool_should_grow(deltas: &[u64]) -> bool {
    if deltas.is_empty() {
        return false;
    }
    let ratio = saturated_connection_count(deltas) as f64 / deltas.len() as f64;
    ratio >= HIGH_WATER_SATURATION_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TestError;
    use reqwest::Client;

    /// Opens handles with no transfer task attached.
    struct FakeConnector;

    impl Connector for FakeConnector {
        fn open(
            &self,
            _network: CancellationToken,
        ) -> Result<Arc<ConnectionHandle>, TestError> {
            Ok(ConnectionHandle::new(Client::new()))
        }
    }

    fn pool_with_connections(count: usize) -> Arc<ConnectionPool> {
        let pool = Arc::new(ConnectionPool::new());
        for _ in 0..count {
            let handle =
                FakeConnector.open(CancellationToken::new()).unwrap();
            pool.lock().push(handle);
        }
        pool
    }

    #[test]
    fn test_saturated_connection_count() {
        // All deltas equal: everything saturated.
        assert_eq!(saturated_connection_count(&[1000, 1000, 1000]), 3);
        // One stalled connection falls outside the epsilon.
        assert_eq!(saturated_connection_count(&[1000, 1000, 0]), 2);
        // No traffic at all: nothing is saturated.
        assert_eq!(saturated_connection_count(&[0, 0, 0]), 0);
        assert_eq!(saturated_connection_count(&[]), 0);
    }

    #[test]
    fn test_pool_should_grow() {
        assert!(pool_should_grow(&[1000]));
        assert!(pool_should_grow(&[1000, 1000, 1000, 990]));
        // Half the pool stalled: below the high-water ratio.
        assert!(!pool_should_grow(&[1000, 1000, 0, 0]));
        assert!(!pool_should_grow(&[]));
    }

    #[tokio::test]
    async fn test_sample_pool_reports_counter_deltas() {
        let pool = pool_with_connections(2);
        let network = CancellationToken::new();
        let mut previous = Vec::new();

        {
            let guard = pool.lock();
            guard[0].add_bytes(1000);
            guard[1].add_bytes(3000);
        }

        let measurement = sample_pool(
            Direction::Download,
            &FakeConnector,
            &pool,
            &network,
            Duration::from_secs(1),
            &mut previous,
        );

        assert_eq!(measurement.connection_count, 2);
        assert!((measurement.bytes_per_second - 4000.0).abs() < 1e-9);
        assert_eq!(measurement.granular.len(), 2);
        assert!((measurement.granular[0].bytes_per_second - 1000.0).abs() < 1e-9);

        // Second tick with no new bytes reports zero throughput.
        let measurement = sample_pool(
            Direction::Download,
            &FakeConnector,
            &pool,
            &network,
            Duration::from_secs(1),
            &mut previous,
        );
        assert_eq!(measurement.bytes_per_second, 0.0);
    }

    #[tokio::test]
    async fn test_sample_pool_grows_saturated_pool() {
        let pool = pool_with_connections(2);
        let network = CancellationToken::new();
        let mut previous = Vec::new();

        // Equal deltas: fully saturated, so the pool grows by the batch.
        {
            let guard = pool.lock();
            for handle in guard.iter() {
                handle.add_bytes(5000);
            }
        }

        let before = pool.lock().len();
        sample_pool(
            Direction::Upload,
            &FakeConnector,
            &pool,
            &network,
            Duration::from_secs(1),
            &mut previous,
        );
        let after = pool.lock().len();

        assert_eq!(after, before + ADDITIVE_CONNECTION_COUNT);

        // An idle tick must not shrink or grow the pool.
        sample_pool(
            Direction::Upload,
            &FakeConnector,
            &pool,
            &network,
            Duration::from_secs(1),
            &mut previous,
        );
        assert_eq!(pool.lock().len(), after);
    }
}
