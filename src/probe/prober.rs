//! The combined prober.
//!
//! Every probe interval the prober launches, in parallel: one foreign
//! tri-probe, one self probe over the saturated download connection, and
//! one self probe over the saturated upload connection. Results from all
//! of them merge into a single sample stream. A failed probe emits
//! nothing; a dead self-probe connection is skipped for that tick.

use crate::load::ConnectionHandle;
use crate::probe::{ForeignProber, ProbeKind, ProbeSample};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Start the combined prober. The returned stream carries every probe
/// sample; ordering within a tick is unspecified, timestamps are
/// monotonic.
pub fn start_prober(
    probe_interval: Duration,
    foreign: Arc<ForeignProber>,
    small_url: Url,
    download_connection: Arc<ConnectionHandle>,
    upload_connection: Arc<ConnectionHandle>,
    operator: CancellationToken,
    network: CancellationToken,
) -> mpsc::UnboundedReceiver<ProbeSample> {
    let (sample_tx, sample_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(probe_interval);
        ticker.set_missed_tick_behavior(
            tokio::time::MissedTickBehavior::Delay,
        );

        loop {
            tokio::select! {
                _ = operator.cancelled() => break,
                _ = ticker.tick() => {
                    launch_foreign_probe(
                        foreign.clone(),
                        sample_tx.clone(),
                        network.clone(),
                    );
                    launch_self_probe(
                        ProbeKind::SelfDown,
                        download_connection.clone(),
                        small_url.clone(),
                        sample_tx.clone(),
                        network.clone(),
                    );
                    launch_self_probe(
                        ProbeKind::SelfUp,
                        upload_connection.clone(),
                        small_url.clone(),
                        sample_tx.clone(),
                        network.clone(),
                    );
                }
            }
        }
    });

    sample_rx
}

fn launch_foreign_probe(
    foreign: Arc<ForeignProber>,
    sample_tx: mpsc::UnboundedSender<ProbeSample>,
    network: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = network.cancelled() => {}
            result = foreign.probe() => match result {
                Ok(sample) => {
                    let _ = sample_tx.send(sample);
                }
                Err(e) => debug!("foreign probe failed: {}", e),
            }
        }
    });
}

fn launch_self_probe(
    kind: ProbeKind,
    connection: Arc<ConnectionHandle>,
    url: Url,
    sample_tx: mpsc::UnboundedSender<ProbeSample>,
    network: CancellationToken,
) {
    // A connection whose bulk transfer already finished cannot carry a
    // meaningful self probe; skip the tick rather than emit a zero.
    if !connection.is_usable() {
        debug!("{:?} self probe skipped: connection not usable", kind);
        return;
    }

    tokio::spawn(async move {
        tokio::select! {
            _ = network.cancelled() => {}
            result = self_probe(&connection, url) => match result {
                Ok(elapsed_seconds) => {
                    let sample = match kind {
                        ProbeKind::SelfUp => {
                            ProbeSample::self_up(elapsed_seconds)
                        }
                        _ => ProbeSample::self_down(elapsed_seconds),
                    };
                    let _ = sample_tx.send(sample);
                }
                Err(e) => debug!("{:?} self probe failed: {}", kind, e),
            }
        }
    });
}

/// One request over the saturated connection's client, timed from send to
/// the arrival of the response head.
async fn self_probe(
    connection: &ConnectionHandle,
    url: Url,
) -> Result<f64, reqwest::Error> {
    let start = Instant::now();
    let response = connection
        .client()
        .get(url)
        .send()
        .await?
        .error_for_status()?;
    let elapsed = start.elapsed();

    // Drain the small payload, untimed, to leave the connection clean.
    let _ = response.bytes().await;

    Ok(elapsed.as_secs_f64())
}
