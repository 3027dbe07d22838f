//! Latency probing: self probes ride the saturated load-generating
//! connections, foreign probes open fresh connections and time each setup
//! stage separately.

pub mod foreign;
pub mod prober;

pub use foreign::ForeignProber;
pub use prober::start_prober;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What kind of connection a probe travelled over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeKind {
    SelfDown,
    SelfUp,
    Foreign,
}

/// One latency probe result.
///
/// A foreign probe bundles TCP setup, TLS handshake, and HTTP GET as one
/// sample with `round_trip_count = 3`; the per-stage fields carry the
/// breakdown. Self probes are a single round trip and leave the stage
/// fields at zero.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeSample {
    pub time: DateTime<Utc>,
    pub kind: ProbeKind,
    pub total_seconds: f64,
    pub round_trip_count: u32,
    pub tcp_seconds: f64,
    pub tls_seconds: f64,
    pub http_seconds: f64,
}

impl ProbeSample {
    pub fn self_down(total_seconds: f64) -> Self {
        Self {
            time: Utc::now(),
            kind: ProbeKind::SelfDown,
            total_seconds,
            round_trip_count: 1,
            tcp_seconds: 0.0,
            tls_seconds: 0.0,
            http_seconds: 0.0,
        }
    }

    pub fn self_up(total_seconds: f64) -> Self {
        Self { kind: ProbeKind::SelfUp, ..Self::self_down(total_seconds) }
    }

    pub fn foreign(
        tcp_seconds: f64,
        tls_seconds: f64,
        http_seconds: f64,
    ) -> Self {
        Self {
            time: Utc::now(),
            kind: ProbeKind::Foreign,
            total_seconds: tcp_seconds + tls_seconds + http_seconds,
            round_trip_count: 3,
            tcp_seconds,
            tls_seconds,
            http_seconds,
        }
    }

    /// The latency of a single round trip within this sample.
    pub fn rtt_seconds(&self) -> f64 {
        self.total_seconds / self.round_trip_count as f64
    }
}
