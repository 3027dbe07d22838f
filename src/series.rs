//! An append-only series of measurements with the aggregate queries the
//! orchestrator needs at the end of a test.

use crate::stats::{double_sided_trim, mean_f64, percentile_f64};

/// A streaming series of `f64` measurements.
///
/// Appends are O(1); the series is never trimmed in place. Trimming
/// produces a new, sorted series.
#[derive(Debug, Clone, Default)]
pub struct StreamingSeries {
    values: Vec<f64>,
}

impl StreamingSeries {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Append a measurement to the series.
    pub fn add(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<f64> {
        self.values.get(idx).copied()
    }

    /// Returns a new series with the lowest and highest `percent`% of
    /// values dropped. The result is sorted ascending.
    pub fn double_sided_trim(&self, percent: usize) -> StreamingSeries {
        StreamingSeries { values: double_sided_trim(&self.values, percent) }
    }

    /// Arithmetic mean of the series, or `None` if it is empty.
    pub fn average(&self) -> Option<f64> {
        mean_f64(&self.values)
    }

    /// The p-th percentile (p in [0, 100]) with linear interpolation, or
    /// `None` if the series is empty or p is out of range.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let mut copy = self.values.clone();
        percentile_f64(&mut copy, p / 100.0)
    }
}
