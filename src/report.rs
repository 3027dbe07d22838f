//! Final report rendering: the human summary on stdout and the optional
//! Prometheus text exposition.

use crate::orchestrate::TestOutcome;
use std::fmt::Write;

/// Bytes/sec to megabits/sec.
pub fn to_mbps(bytes_per_second: f64) -> f64 {
    to_mbytes_per_second(bytes_per_second) * 8.0
}

/// Bytes/sec to mebibytes/sec.
pub fn to_mbytes_per_second(bytes_per_second: f64) -> f64 {
    bytes_per_second / (1024.0 * 1024.0)
}

/// Snapshot of the quality-attenuation figures for display.
#[derive(Debug, Clone)]
pub struct QaSummary {
    pub n_losses: u64,
    pub n_samples: u64,
    pub loss_percentage: f64,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub pdv_90: f64,
    pub pdv_99: f64,
    pub p_90: f64,
    pub p_99: f64,
}

/// The complete result of one responsiveness test.
#[derive(Debug)]
pub struct TestReport {
    pub reached_stability: bool,
    pub p90_rpm: f64,
    pub trimmed_mean_rpm: f64,
    pub download_rate_bytes_per_second: f64,
    pub download_connection_count: usize,
    pub upload_rate_bytes_per_second: f64,
    pub upload_connection_count: usize,
    pub quality_attenuation: Option<QaSummary>,
}

impl TestReport {
    pub fn from_outcome(outcome: TestOutcome) -> Self {
        let quality_attenuation =
            outcome.quality_attenuation.and_then(|mut qa| {
                if qa.n_samples() == 0 {
                    return None;
                }
                Some(QaSummary {
                    n_losses: qa.n_losses(),
                    n_samples: qa.n_samples(),
                    loss_percentage: qa.loss_percentage(),
                    min: qa.min(),
                    max: qa.max(),
                    average: qa.average(),
                    variance: qa.variance(),
                    std_dev: qa.std_dev(),
                    pdv_90: qa.pdv(90.0).unwrap_or(f64::NAN),
                    pdv_99: qa.pdv(99.0).unwrap_or(f64::NAN),
                    p_90: qa.percentile(90.0).unwrap_or(f64::NAN),
                    p_99: qa.percentile(99.0).unwrap_or(f64::NAN),
                })
            });

        Self {
            reached_stability: outcome.reached_stability,
            p90_rpm: outcome.p90_rpm,
            trimmed_mean_rpm: outcome.trimmed_mean_rpm,
            download_rate_bytes_per_second: outcome
                .download_rate_bytes_per_second,
            download_connection_count: outcome.download_connection_count,
            upload_rate_bytes_per_second: outcome
                .upload_rate_bytes_per_second,
            upload_connection_count: outcome.upload_connection_count,
            quality_attenuation,
        }
    }

    /// The stdout summary.
    pub fn human_summary(&self) -> String {
        let mut out = String::new();

        if let Some(qa) = &self.quality_attenuation {
            let _ = writeln!(out, "Quality Attenuation Statistics:");
            let _ = writeln!(out, "Number of losses: {}", qa.n_losses);
            let _ = writeln!(out, "Number of samples: {}", qa.n_samples);
            let _ = writeln!(out, "Loss: {:.6}", qa.loss_percentage);
            let _ = writeln!(out, "Min: {:.6}", qa.min);
            let _ = writeln!(out, "Max: {:.6}", qa.max);
            let _ = writeln!(out, "Mean: {:.6}", qa.average);
            let _ = writeln!(out, "Variance: {:.6}", qa.variance);
            let _ = writeln!(out, "Standard Deviation: {:.6}", qa.std_dev);
            let _ = writeln!(out, "PDV(90): {:.6}", qa.pdv_90);
            let _ = writeln!(out, "PDV(99): {:.6}", qa.pdv_99);
            let _ = writeln!(out, "P(90): {:.6}", qa.p_90);
            let _ = writeln!(out, "P(99): {:.6}", qa.p_99);
        }

        if !self.reached_stability {
            let _ = writeln!(
                out,
                "Test did not run to stability, these results are estimates:"
            );
        }

        let _ = writeln!(out, "RPM: {:5.0} (P90)", self.p90_rpm);
        let _ = writeln!(
            out,
            "RPM: {:5.0} (Double-Sided 10% Trimmed Mean)",
            self.trimmed_mean_rpm
        );
        let _ = writeln!(
            out,
            "Download: {:7.3} Mbps ({:7.3} MBps), using {} parallel connections.",
            to_mbps(self.download_rate_bytes_per_second),
            to_mbytes_per_second(self.download_rate_bytes_per_second),
            self.download_connection_count,
        );
        let _ = writeln!(
            out,
            "Upload:   {:7.3} Mbps ({:7.3} MBps), using {} parallel connections.",
            to_mbps(self.upload_rate_bytes_per_second),
            to_mbytes_per_second(self.upload_rate_bytes_per_second),
            self.upload_connection_count,
        );

        out
    }

    /// Plain-text Prometheus exposition of the headline figures.
    pub fn prometheus_exposition(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "networkquality_test_stable {}",
            i64::from(self.reached_stability)
        );
        let _ = writeln!(
            out,
            "networkquality_rpm_value {}",
            self.p90_rpm as i64
        );
        let _ = writeln!(
            out,
            "networkquality_trimmed_rpm_value {}",
            self.trimmed_mean_rpm as i64
        );
        let _ = writeln!(
            out,
            "networkquality_download_bits_per_second {}",
            (self.download_rate_bytes_per_second * 8.0) as i64
        );
        let _ = writeln!(
            out,
            "networkquality_download_connections {}",
            self.download_connection_count
        );
        let _ = writeln!(
            out,
            "networkquality_upload_bits_per_second {}",
            (self.upload_rate_bytes_per_second * 8.0) as i64
        );
        let _ = writeln!(
            out,
            "networkquality_upload_connections {}",
            self.upload_connection_count
        );
        out
    }
}
