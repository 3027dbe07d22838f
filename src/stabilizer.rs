//! Stability detection for measurement time series.
//!
//! A series is considered stable when the coefficient of variation across
//! the last K moving averages (each over the last I measurements) does not
//! exceed the cutoff S. Separate instances watch download throughput,
//! upload throughput, and probe responsiveness; the orchestrator requires
//! all three to hold at the same time.

use crate::load::ThroughputMeasurement;
use crate::probe::ProbeSample;
use crate::stats::{mean_f64, std_dev_f64};
use std::collections::VecDeque;

/// Moving-average stabilizer over a real-valued series.
#[derive(Debug, Clone)]
pub struct Stabilizer {
    /// Window length for the instantaneous moving average (I).
    window: usize,
    /// Number of successive moving averages inspected (K).
    ma_count: usize,
    /// Coefficient-of-variation cutoff (S).
    cv_cutoff: f64,
    measurements: VecDeque<f64>,
    moving_averages: VecDeque<f64>,
}

impl Stabilizer {
    pub fn new(window: usize, ma_count: usize, cv_cutoff: f64) -> Self {
        Self {
            window,
            ma_count,
            cv_cutoff,
            measurements: VecDeque::with_capacity(window),
            moving_averages: VecDeque::with_capacity(ma_count),
        }
    }

    /// Absorb one measurement.
    pub fn add_measurement(&mut self, value: f64) {
        if self.measurements.len() >= self.window {
            self.measurements.pop_front();
        }
        self.measurements.push_back(value);

        if self.measurements.len() < self.window {
            return;
        }

        let sum: f64 = self.measurements.iter().sum();
        let moving_average = sum / self.window as f64;
        if self.moving_averages.len() >= self.ma_count {
            self.moving_averages.pop_front();
        }
        self.moving_averages.push_back(moving_average);
    }

    /// Whether the series has stabilized.
    ///
    /// Always false until I measurements have produced K moving averages.
    pub fn is_stable(&self) -> bool {
        if self.moving_averages.len() < self.ma_count {
            return false;
        }

        let averages: Vec<f64> =
            self.moving_averages.iter().copied().collect();
        let mean = mean_f64(&averages).unwrap_or(0.0);
        let std_dev = std_dev_f64(&averages).unwrap_or(0.0);

        // An all-zero series yields 0/0 here; NaN fails the comparison, so
        // a link that never moved data can never be declared stable.
        (std_dev / mean).abs() <= self.cv_cutoff
    }
}

/// Stabilizer over aggregate throughput measurements.
#[derive(Debug, Clone)]
pub struct ThroughputStabilizer {
    inner: Stabilizer,
}

impl ThroughputStabilizer {
    pub fn new(window: usize, ma_count: usize, cv_cutoff: f64) -> Self {
        Self { inner: Stabilizer::new(window, ma_count, cv_cutoff) }
    }

    pub fn add_measurement(&mut self, measurement: &ThroughputMeasurement) {
        self.inner.add_measurement(measurement.bytes_per_second);
    }

    pub fn is_stable(&self) -> bool {
        self.inner.is_stable()
    }
}

/// Stabilizer over probe samples.
///
/// Each sample contributes its instantaneous responsiveness,
/// 60 * round_trip_count / duration (round-trips per minute).
#[derive(Debug, Clone)]
pub struct ProbeStabilizer {
    inner: Stabilizer,
}

impl ProbeStabilizer {
    pub fn new(window: usize, ma_count: usize, cv_cutoff: f64) -> Self {
        Self { inner: Stabilizer::new(window, ma_count, cv_cutoff) }
    }

    pub fn add_measurement(&mut self, sample: &ProbeSample) {
        if sample.total_seconds > 0.0 {
            self.inner.add_measurement(
                60.0 * sample.round_trip_count as f64 / sample.total_seconds,
            );
        }
    }

    pub fn is_stable(&self) -> bool {
        self.inner.is_stable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_is_unstable() {
        let mut stabilizer = Stabilizer::new(4, 4, 0.05);
        assert!(!stabilizer.is_stable());

        for _ in 0..3 {
            stabilizer.add_measurement(1.0);
            assert!(!stabilizer.is_stable());
        }

        // One full window, but not yet K moving averages.
        stabilizer.add_measurement(1.0);
        assert!(!stabilizer.is_stable());
    }

    #[test]
    fn test_flat_series_stabilizes() {
        let mut stabilizer = Stabilizer::new(4, 4, 0.05);
        for _ in 0..(4 + 4) {
            stabilizer.add_measurement(42.0);
        }
        assert!(stabilizer.is_stable());
    }

    #[test]
    fn test_flat_zero_series_never_stabilizes() {
        let mut stabilizer = Stabilizer::new(4, 4, 0.05);
        for _ in 0..(4 + 4) {
            stabilizer.add_measurement(0.0);
        }
        assert!(!stabilizer.is_stable());
    }

    #[test]
    fn test_step_change_destabilizes_then_recovers() {
        let i = 4;
        let k = 4;
        let mut stabilizer = Stabilizer::new(i, k, 0.05);

        for _ in 0..(i + k) {
            stabilizer.add_measurement(100.0);
        }
        assert!(stabilizer.is_stable());

        // A doubled level shows up in the very next moving average.
        stabilizer.add_measurement(200.0);
        assert!(!stabilizer.is_stable());

        // While the window ramps up, the averages keep drifting.
        for _ in 0..(i - 1) {
            stabilizer.add_measurement(200.0);
            assert!(!stabilizer.is_stable());
        }

        // K more measurements at the new level flush the old averages.
        for _ in 0..k {
            stabilizer.add_measurement(200.0);
        }
        assert!(stabilizer.is_stable());
    }

    #[test]
    fn test_small_jitter_stays_stable() {
        let mut stabilizer = Stabilizer::new(4, 4, 0.05);
        let values = [100.0, 101.0, 99.0, 100.5, 100.0, 99.5, 100.2, 100.1];
        for v in values {
            stabilizer.add_measurement(v);
        }
        assert!(stabilizer.is_stable());
    }

    #[test]
    fn test_probe_stabilizer_ignores_zero_durations() {
        let mut stabilizer = ProbeStabilizer::new(1, 1, 0.05);
        let mut sample = ProbeSample::self_down(0.0);
        stabilizer.add_measurement(&sample);
        assert!(!stabilizer.is_stable());

        sample.total_seconds = 0.1;
        stabilizer.add_measurement(&sample);
        assert!(stabilizer.is_stable());
    }
}
