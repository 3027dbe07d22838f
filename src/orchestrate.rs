//! The test orchestrator.
//!
//! Drains the throughput and probe streams, feeds the three stabilizers
//! and the latency series, and stops the world when everything is stable
//! at the same time or the deadline fires. The orchestrator performs no
//! network I/O of its own.

use crate::constants::{
    INSTANTANEOUS_PROBE_WINDOW, INSTANTANEOUS_THROUGHPUT_WINDOW,
    MOVING_AVERAGE_STABILITY_COUNT, RPM_TRIM_PERCENT, STABILITY_CV_CUTOFF,
};
use crate::datalogger::{DataLogger, NullDataLogger};
use crate::load::{GranularSample, ThroughputMeasurement};
use crate::probe::{ProbeKind, ProbeSample};
use crate::qa::QualityAttenuation;
use crate::series::StreamingSeries;
use crate::stabilizer::{ProbeStabilizer, ThroughputStabilizer};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// The five data-logger sinks the orchestrator writes to.
pub struct Loggers {
    pub self_probes: Box<dyn DataLogger<ProbeSample>>,
    pub foreign_probes: Box<dyn DataLogger<ProbeSample>>,
    pub download_throughput: Box<dyn DataLogger<ThroughputMeasurement>>,
    pub upload_throughput: Box<dyn DataLogger<ThroughputMeasurement>>,
    pub granular_throughput: Box<dyn DataLogger<GranularSample>>,
}

impl Loggers {
    /// Null loggers for every stream.
    pub fn disabled() -> Self {
        Self {
            self_probes: Box::new(NullDataLogger),
            foreign_probes: Box::new(NullDataLogger),
            download_throughput: Box::new(NullDataLogger),
            upload_throughput: Box::new(NullDataLogger),
            granular_throughput: Box::new(NullDataLogger),
        }
    }
}

/// Everything the final report needs, computed at termination.
#[derive(Debug)]
pub struct TestOutcome {
    /// True when termination came from stabilization rather than timeout.
    pub reached_stability: bool,
    pub self_probe_count: usize,
    pub foreign_probe_count: usize,
    pub self_p90: Option<f64>,
    pub foreign_p90: Option<f64>,
    pub self_trimmed_mean: Option<f64>,
    pub foreign_trimmed_mean: Option<f64>,
    pub p90_rpm: f64,
    pub trimmed_mean_rpm: f64,
    pub download_rate_bytes_per_second: f64,
    pub download_connection_count: usize,
    pub upload_rate_bytes_per_second: f64,
    pub upload_connection_count: usize,
    pub quality_attenuation: Option<QualityAttenuation>,
}

pub struct Orchestrator {
    download_stabilizer: ThroughputStabilizer,
    upload_stabilizer: ThroughputStabilizer,
    probe_stabilizer: ProbeStabilizer,
    self_rtts: StreamingSeries,
    foreign_rtts: StreamingSeries,
    quality_attenuation: Option<QualityAttenuation>,
    loggers: Loggers,
    download_stable: bool,
    upload_stable: bool,
    responsiveness_stable: bool,
    reached_stability: bool,
    last_download_rate: f64,
    last_download_connections: usize,
    last_upload_rate: f64,
    last_upload_connections: usize,
}

impl Orchestrator {
    pub fn new(track_quality_attenuation: bool, loggers: Loggers) -> Self {
        Self {
            download_stabilizer: ThroughputStabilizer::new(
                INSTANTANEOUS_THROUGHPUT_WINDOW,
                MOVING_AVERAGE_STABILITY_COUNT,
                STABILITY_CV_CUTOFF,
            ),
            upload_stabilizer: ThroughputStabilizer::new(
                INSTANTANEOUS_THROUGHPUT_WINDOW,
                MOVING_AVERAGE_STABILITY_COUNT,
                STABILITY_CV_CUTOFF,
            ),
            probe_stabilizer: ProbeStabilizer::new(
                INSTANTANEOUS_PROBE_WINDOW,
                MOVING_AVERAGE_STABILITY_COUNT,
                STABILITY_CV_CUTOFF,
            ),
            self_rtts: StreamingSeries::new(),
            foreign_rtts: StreamingSeries::new(),
            quality_attenuation: track_quality_attenuation
                .then(QualityAttenuation::new),
            loggers,
            download_stable: false,
            upload_stable: false,
            responsiveness_stable: false,
            reached_stability: false,
            last_download_rate: 0.0,
            last_download_connections: 0,
            last_upload_rate: 0.0,
            last_upload_connections: 0,
        }
    }

    /// Drain the measurement streams until every stabilizer holds at once
    /// or the deadline fires. Returns whether stability was reached.
    pub async fn run(
        &mut self,
        mut download_rx: mpsc::UnboundedReceiver<ThroughputMeasurement>,
        mut upload_rx: mpsc::UnboundedReceiver<ThroughputMeasurement>,
        mut probe_rx: mpsc::UnboundedReceiver<ProbeSample>,
        deadline: Instant,
    ) -> bool {
        let timeout = sleep_until(deadline);
        tokio::pin!(timeout);

        let mut download_open = true;
        let mut upload_open = true;
        let mut probe_open = true;

        // Each new measurement can also destabilize a series that looked
        // stable, so keep draining until everything holds simultaneously.
        while !(self.download_stable
            && self.upload_stable
            && self.responsiveness_stable)
        {
            tokio::select! {
                measurement = download_rx.recv(), if download_open => {
                    match measurement {
                        Some(m) => self.absorb_download(m),
                        None => download_open = false,
                    }
                }
                measurement = upload_rx.recv(), if upload_open => {
                    match measurement {
                        Some(m) => self.absorb_upload(m),
                        None => upload_open = false,
                    }
                }
                sample = probe_rx.recv(), if probe_open => {
                    match sample {
                        Some(s) => self.absorb_probe(s),
                        None => probe_open = false,
                    }
                }
                _ = &mut timeout => break,
            }
        }

        self.reached_stability = self.download_stable
            && self.upload_stable
            && self.responsiveness_stable;
        self.reached_stability
    }

    fn absorb_download(&mut self, measurement: ThroughputMeasurement) {
        self.download_stabilizer.add_measurement(&measurement);
        self.download_stable = self.download_stabilizer.is_stable();
        debug!(
            "download is instantaneously {}",
            if self.download_stable { "stable" } else { "unstable" }
        );

        for granular in &measurement.granular {
            self.loggers.granular_throughput.log_record(granular);
        }
        self.loggers.download_throughput.log_record(&measurement);

        self.last_download_rate = measurement.bytes_per_second;
        self.last_download_connections = measurement.connection_count;
    }

    fn absorb_upload(&mut self, measurement: ThroughputMeasurement) {
        self.upload_stabilizer.add_measurement(&measurement);
        self.upload_stable = self.upload_stabilizer.is_stable();
        debug!(
            "upload is instantaneously {}",
            if self.upload_stable { "stable" } else { "unstable" }
        );

        for granular in &measurement.granular {
            self.loggers.granular_throughput.log_record(granular);
        }
        self.loggers.upload_throughput.log_record(&measurement);

        self.last_upload_rate = measurement.bytes_per_second;
        self.last_upload_connections = measurement.connection_count;
    }

    fn absorb_probe(&mut self, sample: ProbeSample) {
        self.probe_stabilizer.add_measurement(&sample);
        self.responsiveness_stable = self.probe_stabilizer.is_stable();
        debug!(
            "responsiveness is instantaneously {}",
            if self.responsiveness_stable { "stable" } else { "unstable" }
        );

        match sample.kind {
            ProbeKind::Foreign => {
                // A bundled measurement becomes round_trip_count
                // equal-weight sub-samples.
                for _ in 0..sample.round_trip_count {
                    self.foreign_rtts.add(sample.rtt_seconds());
                }
                self.loggers.foreign_probes.log_record(&sample);
            }
            ProbeKind::SelfDown | ProbeKind::SelfUp => {
                self.self_rtts.add(sample.total_seconds);
                if let Some(qa) = self.quality_attenuation.as_mut() {
                    if let Err(e) = qa.add_sample(sample.total_seconds) {
                        debug!("quality attenuation rejected sample: {}", e);
                    }
                }
                self.loggers.self_probes.log_record(&sample);
            }
        }
    }

    /// Compute the final figures and flush the data loggers.
    pub fn finish(mut self) -> TestOutcome {
        let self_trimmed =
            self.self_rtts.double_sided_trim(RPM_TRIM_PERCENT);
        let foreign_trimmed =
            self.foreign_rtts.double_sided_trim(RPM_TRIM_PERCENT);

        let self_p90 = self.self_rtts.percentile(90.0);
        let foreign_p90 = self.foreign_rtts.percentile(90.0);
        let self_trimmed_mean = self_trimmed.average();
        let foreign_trimmed_mean = foreign_trimmed.average();

        for result in [
            self.loggers.self_probes.export(),
            self.loggers.foreign_probes.export(),
            self.loggers.download_throughput.export(),
            self.loggers.upload_throughput.export(),
            self.loggers.granular_throughput.export(),
        ] {
            if let Err(e) = result {
                warn!("could not flush data log: {}", e);
            }
        }

        TestOutcome {
            reached_stability: self.reached_stability,
            self_probe_count: self.self_rtts.len(),
            foreign_probe_count: self.foreign_rtts.len(),
            self_p90,
            foreign_p90,
            self_trimmed_mean,
            foreign_trimmed_mean,
            p90_rpm: combined_rpm(self_p90, foreign_p90),
            trimmed_mean_rpm: combined_rpm(
                self_trimmed_mean,
                foreign_trimmed_mean,
            ),
            download_rate_bytes_per_second: self.last_download_rate,
            download_connection_count: self.last_download_connections,
            upload_rate_bytes_per_second: self.last_upload_rate,
            upload_connection_count: self.last_upload_connections,
            quality_attenuation: self.quality_attenuation,
        }
    }
}

/// 60 / mean RTT across the probe kinds that produced samples. A test
/// that gathered nothing reports zero rather than dividing by it.
fn combined_rpm(
    self_rtt: Option<f64>,
    foreign_rtt: Option<f64>,
) -> f64 {
    let mean_rtt = match (self_rtt, foreign_rtt) {
        (Some(own), Some(foreign)) => (own + foreign) / 2.0,
        (Some(value), None) | (None, Some(value)) => value,
        (None, None) => return 0.0,
    };
    if mean_rtt > 0.0 {
        60.0 / mean_rtt
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn throughput(bytes_per_second: f64) -> ThroughputMeasurement {
        ThroughputMeasurement {
            time: Utc::now(),
            bytes_per_second,
            connection_count: 4,
            granular: Vec::new(),
        }
    }

    #[test]
    fn test_combined_rpm() {
        assert!((combined_rpm(Some(0.1), Some(0.1)) - 600.0).abs() < 1e-9);
        assert!((combined_rpm(Some(0.1), Some(0.3)) - 300.0).abs() < 1e-9);
        assert!((combined_rpm(Some(0.2), None) - 300.0).abs() < 1e-9);
        assert!((combined_rpm(None, Some(0.2)) - 300.0).abs() < 1e-9);
        assert_eq!(combined_rpm(None, None), 0.0);
        assert_eq!(combined_rpm(Some(0.0), Some(0.0)), 0.0);
    }

    #[tokio::test]
    async fn test_stable_run_terminates_with_rpm_600() {
        let (download_tx, download_rx) = mpsc::unbounded_channel();
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();

        // Perfectly flat synthetic streams: 100 bytes/sec throughput,
        // 100 ms probes in every flavor.
        for _ in 0..30 {
            download_tx.send(throughput(100.0)).unwrap();
            upload_tx.send(throughput(100.0)).unwrap();
            probe_tx.send(ProbeSample::self_down(0.1)).unwrap();
            probe_tx.send(ProbeSample::self_up(0.1)).unwrap();
            probe_tx.send(ProbeSample::foreign(0.1, 0.1, 0.1)).unwrap();
        }
        drop(download_tx);
        drop(upload_tx);
        drop(probe_tx);

        let mut orchestrator = Orchestrator::new(false, Loggers::disabled());
        let reached = orchestrator
            .run(
                download_rx,
                upload_rx,
                probe_rx,
                Instant::now() + Duration::from_secs(5),
            )
            .await;
        assert!(reached);

        let outcome = orchestrator.finish();
        assert!(outcome.reached_stability);
        assert!((outcome.p90_rpm - 600.0).abs() < 1e-6);
        assert!((outcome.trimmed_mean_rpm - 600.0).abs() < 1e-6);
        assert_eq!(outcome.download_rate_bytes_per_second, 100.0);
        assert_eq!(outcome.download_connection_count, 4);
        assert_eq!(outcome.upload_rate_bytes_per_second, 100.0);
    }

    #[tokio::test]
    async fn test_drifting_throughput_hits_timeout() {
        let (download_tx, download_rx) = mpsc::unbounded_channel();
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();

        // Monotonically drifting throughput never settles; probes are
        // fine. Stop feeding after a few samples and let the deadline
        // fire.
        for i in 1..=12 {
            download_tx.send(throughput(i as f64)).unwrap();
            upload_tx.send(throughput(i as f64)).unwrap();
            probe_tx.send(ProbeSample::self_down(0.1)).unwrap();
        }
        drop(download_tx);
        drop(upload_tx);
        drop(probe_tx);

        let mut orchestrator = Orchestrator::new(false, Loggers::disabled());
        let reached = orchestrator
            .run(
                download_rx,
                upload_rx,
                probe_rx,
                Instant::now() + Duration::from_millis(300),
            )
            .await;
        assert!(!reached);

        let outcome = orchestrator.finish();
        assert!(!outcome.reached_stability);
        // Results are still numeric estimates.
        assert!((outcome.p90_rpm - 600.0).abs() < 1e-6);
        assert_eq!(outcome.self_probe_count, 12);
        assert_eq!(outcome.download_rate_bytes_per_second, 12.0);
    }

    #[tokio::test]
    async fn test_lost_probes_count_as_losses_without_skewing_p90() {
        let (download_tx, download_rx) = mpsc::unbounded_channel();
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();

        for _ in 0..10 {
            probe_tx.send(ProbeSample::self_down(0.1)).unwrap();
        }
        // Two effectively-lost probes above the loss threshold.
        probe_tx.send(ProbeSample::self_down(16.0)).unwrap();
        probe_tx.send(ProbeSample::self_up(17.0)).unwrap();
        drop(download_tx);
        drop(upload_tx);
        drop(probe_tx);

        let mut orchestrator = Orchestrator::new(true, Loggers::disabled());
        orchestrator
            .run(
                download_rx,
                upload_rx,
                probe_rx,
                Instant::now() + Duration::from_millis(100),
            )
            .await;

        let outcome = orchestrator.finish();
        let mut qa = outcome.quality_attenuation.unwrap();
        assert_eq!(qa.n_samples(), 12);
        assert_eq!(qa.n_losses(), 2);
        // The empirical distribution never saw the lost samples.
        assert!(qa.percentile(90.0).unwrap() <= 0.1 + 1e-9);
    }

    #[tokio::test]
    async fn test_foreign_bundle_splits_into_sub_samples() {
        let (download_tx, download_rx) = mpsc::unbounded_channel();
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();

        probe_tx.send(ProbeSample::foreign(0.01, 0.02, 0.03)).unwrap();
        drop(download_tx);
        drop(upload_tx);
        drop(probe_tx);

        let mut orchestrator = Orchestrator::new(false, Loggers::disabled());
        orchestrator
            .run(
                download_rx,
                upload_rx,
                probe_rx,
                Instant::now() + Duration::from_millis(50),
            )
            .await;

        let outcome = orchestrator.finish();
        assert_eq!(outcome.foreign_probe_count, 3);
        // Each sub-sample carries an equal share of the bundle.
        assert!((outcome.foreign_p90.unwrap() - 0.02).abs() < 1e-9);
    }
}
