//! A streaming quantile sketch for latency distributions.
//!
//! The sketch keeps a bounded set of weighted centroids (a t-digest style
//! summary): incoming samples are buffered, then merged into the centroid
//! list in sorted order under a q(1-q) size bound, which keeps the tails
//! fine-grained and the middle coarse. Quantile queries interpolate
//! linearly between the midranks of adjacent centroids and clamp to the
//! observed min/max outside the outermost midranks.

use crate::constants::SKETCH_COMPRESSION;

/// Samples buffered before a merge pass.
const BUFFER_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy)]
struct Centroid {
    mean: f64,
    weight: f64,
}

/// An online summary of an empirical distribution supporting rank queries
/// at arbitrary quantiles with bounded error.
#[derive(Debug, Clone)]
pub struct QuantileSketch {
    compression: f64,
    centroids: Vec<Centroid>,
    buffer: Vec<f64>,
    count: u64,
    min: f64,
    max: f64,
}

impl Default for QuantileSketch {
    fn default() -> Self {
        Self::new()
    }
}

impl QuantileSketch {
    pub fn new() -> Self {
        Self::with_compression(SKETCH_COMPRESSION)
    }

    pub fn with_compression(compression: f64) -> Self {
        Self {
            compression,
            centroids: Vec::new(),
            buffer: Vec::new(),
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Number of samples the sketch has absorbed.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Smallest sample seen, or `None` if the sketch is empty.
    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.min)
    }

    /// Largest sample seen, or `None` if the sketch is empty.
    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.max)
    }

    /// Add a sample to the sketch.
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.buffer.push(value);
        if self.buffer.len() >= BUFFER_LIMIT {
            self.merge_buffer();
        }
    }

    /// The value at quantile `q` in [0, 1].
    ///
    /// Returns `None` if the sketch is empty or `q` is out of range.
    pub fn quantile(&mut self, q: f64) -> Option<f64> {
        if self.is_empty() || !(0.0..=1.0).contains(&q) {
            return None;
        }
        self.merge_buffer();

        let total = self.count as f64;
        let rank = q * total;

        // Walk cumulative midranks; interpolate between the two centroids
        // bracketing the target rank.
        let mut cumulative = 0.0;
        let mut previous: Option<(f64, f64)> = None;
        for centroid in &self.centroids {
            let midrank = cumulative + centroid.weight / 2.0;
            if rank < midrank {
                return Some(match previous {
                    None => self.min,
                    Some((prev_rank, prev_mean)) => {
                        prev_mean
                            + (rank - prev_rank) / (midrank - prev_rank)
                                * (centroid.mean - prev_mean)
                    }
                });
            }
            previous = Some((midrank, centroid.mean));
            cumulative += centroid.weight;
        }

        Some(self.max)
    }

    /// Merge buffered samples into the centroid list.
    fn merge_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        self.buffer.sort_by(|a, b| a.total_cmp(b));

        // Merge-join existing centroids with the sorted buffer by mean.
        let mut incoming: Vec<Centroid> =
            Vec::with_capacity(self.centroids.len() + self.buffer.len());
        let mut ci = self.centroids.iter().peekable();
        let mut bi = self.buffer.iter().peekable();
        loop {
            match (ci.peek(), bi.peek()) {
                (Some(c), Some(b)) => {
                    if c.mean <= **b {
                        incoming.push(**c);
                        ci.next();
                    } else {
                        incoming.push(Centroid { mean: **b, weight: 1.0 });
                        bi.next();
                    }
                }
                (Some(c), None) => {
                    incoming.push(**c);
                    ci.next();
                }
                (None, Some(b)) => {
                    incoming.push(Centroid { mean: **b, weight: 1.0 });
                    bi.next();
                }
                (None, None) => break,
            }
        }

        let total: f64 = incoming.iter().map(|c| c.weight).sum();
        let mut merged: Vec<Centroid> = Vec::new();
        let mut cumulative = 0.0;
        let mut current = incoming[0];
        for candidate in incoming.into_iter().skip(1) {
            let combined_weight = current.weight + candidate.weight;
            let q = (cumulative + combined_weight / 2.0) / total;
            let limit = 4.0 * total * q * (1.0 - q) / self.compression;
            if combined_weight <= limit {
                current.mean = (current.mean * current.weight
                    + candidate.mean * candidate.weight)
                    / combined_weight;
                current.weight = combined_weight;
            } else {
                cumulative += current.weight;
                merged.push(current);
                current = candidate;
            }
        }
        merged.push(current);

        self.centroids = merged;
        self.buffer.clear();
    }
}
