//! Online quality-attenuation summary of self-probe latencies.
//!
//! Latency samples (seconds) feed a set of parametric aggregates and an
//! empirical distribution. Samples above the loss threshold count as
//! losses and stay out of both. The parametric sums are kept relative to a
//! fixed offset, which limits floating-point cancellation when computing
//! the variance of small latencies.

use crate::constants::{QA_LATENCY_OFFSET, QA_LOSS_THRESHOLD};
use crate::sketch::QuantileSketch;
use std::error::Error;
use std::fmt;

/// Errors surfaced by the quality-attenuation accessors.
#[derive(Debug, Clone, PartialEq)]
pub enum QaError {
    /// A latency sample below zero was offered.
    NegativeLatency(f64),
    /// A percentile outside [0, 100] was requested.
    PercentileOutOfRange(f64),
    /// A rank query was made before any live sample arrived.
    EmptyDistribution,
}

impl fmt::Display for QaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QaError::NegativeLatency(v) => {
                write!(f, "latency sample {} is negative", v)
            }
            QaError::PercentileOutOfRange(p) => {
                write!(f, "percentile {} is outside [0, 100]", p)
            }
            QaError::EmptyDistribution => {
                write!(f, "the empirical distribution is empty")
            }
        }
    }
}

impl Error for QaError {}

/// Streaming estimator of the latency distribution, including loss.
#[derive(Debug, Clone)]
pub struct QualityAttenuation {
    n_samples: u64,
    n_losses: u64,
    min: f64,
    max: f64,
    offset_sum: f64,
    offset_sum_of_squares: f64,
    distribution: QuantileSketch,
}

impl Default for QualityAttenuation {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityAttenuation {
    pub fn new() -> Self {
        Self {
            n_samples: 0,
            n_losses: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            offset_sum: 0.0,
            offset_sum_of_squares: 0.0,
            distribution: QuantileSketch::new(),
        }
    }

    /// Absorb one latency sample, in seconds.
    ///
    /// Samples strictly above the loss threshold count as losses and are
    /// excluded from the parametric aggregates and the empirical
    /// distribution. Negative samples are rejected.
    pub fn add_sample(&mut self, latency: f64) -> Result<(), QaError> {
        if latency < 0.0 {
            return Err(QaError::NegativeLatency(latency));
        }
        self.n_samples += 1;
        if latency > QA_LOSS_THRESHOLD {
            self.n_losses += 1;
            return Ok(());
        }

        self.min = self.min.min(latency);
        self.max = self.max.max(latency);
        let offset = latency - QA_LATENCY_OFFSET;
        self.offset_sum += offset;
        self.offset_sum_of_squares += offset * offset;
        self.distribution.add(latency);
        Ok(())
    }

    pub fn n_samples(&self) -> u64 {
        self.n_samples
    }

    pub fn n_losses(&self) -> u64 {
        self.n_losses
    }

    fn n_live(&self) -> u64 {
        self.n_samples - self.n_losses
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Mean latency of the live samples, in seconds.
    pub fn average(&self) -> f64 {
        self.offset_sum / self.n_live() as f64 + QA_LATENCY_OFFSET
    }

    /// Sample variance of the live latencies.
    pub fn variance(&self) -> f64 {
        let n_live = self.n_live() as f64;
        (self.offset_sum_of_squares
            - self.offset_sum * self.offset_sum / n_live)
            / (n_live - 1.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Percentage of all samples that counted as losses.
    pub fn loss_percentage(&self) -> f64 {
        100.0 * self.n_losses as f64 / self.n_samples as f64
    }

    /// Latency at percentile `p` in [0, 100], from the empirical
    /// distribution of live samples.
    pub fn percentile(&mut self, p: f64) -> Result<f64, QaError> {
        if !(0.0..=100.0).contains(&p) {
            return Err(QaError::PercentileOutOfRange(p));
        }
        self.distribution
            .quantile(p / 100.0)
            .ok_or(QaError::EmptyDistribution)
    }

    pub fn median(&mut self) -> Result<f64, QaError> {
        self.percentile(50.0)
    }

    /// Packet Delay Variation at percentile `p`: P(p) - min.
    pub fn pdv(&mut self, p: f64) -> Result<f64, QaError> {
        Ok(self.percentile(p)? - self.min)
    }

    /// Round-trips per minute implied by the mean latency.
    pub fn rpm(&self) -> f64 {
        60.0 / self.average()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, relative: f64) {
        let tolerance = expected.abs() * relative;
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {} within {} of {}",
            actual,
            tolerance,
            expected
        );
    }

    #[test]
    fn test_three_samples() {
        let mut qa = QualityAttenuation::new();
        qa.add_sample(1.0).unwrap();
        qa.add_sample(2.0).unwrap();
        qa.add_sample(3.0).unwrap();

        assert_eq!(qa.n_samples(), 3);
        assert_eq!(qa.n_losses(), 0);
        assert_close(qa.min(), 1.0, 1e-6);
        assert_close(qa.max(), 3.0, 1e-6);
        assert_close(qa.offset_sum, 5.7, 1e-6);
        assert_close(qa.offset_sum_of_squares, 12.83, 1e-6);
        assert_close(qa.average(), 2.0, 1e-6);
        assert_close(qa.variance(), 1.0, 1e-6);
        assert_close(qa.std_dev(), 1.0, 1e-6);
        assert_close(qa.median().unwrap(), 2.0, 1e-6);
        assert_eq!(qa.loss_percentage(), 0.0);
        assert_close(qa.rpm(), 30.0, 1e-6);
        assert_close(qa.percentile(10.0).unwrap(), 1.0, 1e-6);
        assert_close(qa.percentile(50.0).unwrap(), 2.0, 1e-6);
        assert_close(qa.percentile(90.0).unwrap(), 3.0, 1e-6);
        assert_close(qa.pdv(90.0).unwrap(), 2.0, 1e-6);
    }

    #[test]
    fn test_linear_ramp_with_losses() {
        // Linear ramp from 0.0001 to 15.9999 in 0.0001 steps; everything
        // strictly above 15.0 is a loss.
        let mut qa = QualityAttenuation::new();
        for i in 1..160_000 {
            qa.add_sample(i as f64 / 10_000.0).unwrap();
        }

        assert_eq!(qa.n_samples(), 159_999);
        assert_eq!(qa.n_losses(), 9_999);
        assert_close(qa.min(), 0.0001, 1e-6);
        assert_close(qa.max(), 15.0, 1e-6);
        assert_close(qa.offset_sum, 1_110_007.5, 1e-6);
        assert_close(qa.offset_sum_of_squares, 11_026_611.000_249_98, 1e-6);
        assert_close(qa.average(), 7.500_049, 1e-6);
        assert_close(qa.variance(), 18.750_120, 1e-6);
        assert_close(qa.std_dev(), 4.330_141, 1e-6);
        assert_close(qa.median().unwrap(), 7.500_049, 1e-6);
        assert_close(qa.loss_percentage(), 6.249_414, 1e-6);
        assert_close(qa.rpm(), 7.999_947, 1e-6);
        assert_close(qa.percentile(10.0).unwrap(), 1.50005, 1e-6);
        assert_close(qa.percentile(50.0).unwrap(), 7.500_049, 1e-6);
        assert_close(qa.percentile(90.0).unwrap(), 13.50005, 1e-6);
    }

    #[test]
    fn test_sample_at_exactly_loss_threshold_is_live() {
        let mut qa = QualityAttenuation::new();
        qa.add_sample(15.0).unwrap();
        assert_eq!(qa.n_samples(), 1);
        assert_eq!(qa.n_losses(), 0);
        assert_eq!(qa.max(), 15.0);
    }

    #[test]
    fn test_loss_does_not_enter_distribution() {
        let mut qa = QualityAttenuation::new();
        qa.add_sample(0.1).unwrap();
        qa.add_sample(0.2).unwrap();
        qa.add_sample(16.0).unwrap();

        assert_eq!(qa.n_samples(), 3);
        assert_eq!(qa.n_losses(), 1);
        // Max reflects live samples only.
        assert_close(qa.max(), 0.2, 1e-9);
        // The distribution never saw the lost sample.
        assert!(qa.percentile(99.0).unwrap() <= 0.2);
        assert_close(qa.loss_percentage(), 100.0 / 3.0, 1e-9);
    }

    #[test]
    fn test_negative_sample_rejected() {
        let mut qa = QualityAttenuation::new();
        assert_eq!(
            qa.add_sample(-0.5),
            Err(QaError::NegativeLatency(-0.5))
        );
        assert_eq!(qa.n_samples(), 0);
    }

    #[test]
    fn test_percentile_out_of_range() {
        let mut qa = QualityAttenuation::new();
        qa.add_sample(1.0).unwrap();
        assert_eq!(
            qa.percentile(100.5),
            Err(QaError::PercentileOutOfRange(100.5))
        );
        assert_eq!(
            qa.percentile(-1.0),
            Err(QaError::PercentileOutOfRange(-1.0))
        );
    }

    #[test]
    fn test_empty_distribution() {
        let mut qa = QualityAttenuation::new();
        assert_eq!(qa.percentile(50.0), Err(QaError::EmptyDistribution));

        // A lone loss leaves the distribution empty too.
        qa.add_sample(20.0).unwrap();
        assert_eq!(qa.percentile(50.0), Err(QaError::EmptyDistribution));
    }
}
