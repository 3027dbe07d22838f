//! Measures the responsiveness of an Internet connection under working
//! load: saturate the link in both directions, probe round-trip latency
//! on the saturated and on fresh connections, and report Round-trips Per
//! Minute once the measurements stabilize or the deadline fires.

mod config;
mod constants;
mod datalogger;
mod errors;
mod keylog;
mod load;
mod orchestrate;
mod probe;
mod qa;
mod report;
mod series;
mod sketch;
mod stabilizer;
mod stats;
mod tls;

use crate::config::TestConfig;
use crate::constants::{
    DEFAULT_CONFIG_HOST, DEFAULT_CONFIG_PATH, DEFAULT_CONFIG_PORT,
    DEFAULT_PROBE_INTERVAL_MS, DEFAULT_TEST_TIMEOUT_SECS,
    THROUGHPUT_SAMPLING_INTERVAL,
};
use crate::datalogger::{
    filename_append, CsvDataLogger, DataLogger, NullDataLogger,
};
use crate::errors::TestError;
use crate::keylog::KeyLogWriter;
use crate::load::{
    start_load_generator, ClientFactory, ConnectionPool, Direction,
    DownloadConnector, UploadConnector,
};
use crate::orchestrate::{Loggers, Orchestrator};
use crate::probe::{foreign::resolve_host, start_prober, ForeignProber};
use crate::report::TestReport;
use chrono::Utc;
use clap::Parser;
use log::debug;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// name/IP of the responsiveness configuration server.
    #[arg(long = "config", default_value = DEFAULT_CONFIG_HOST)]
    config_host: String,

    /// port number on which to access the configuration server.
    #[arg(long = "port", default_value_t = DEFAULT_CONFIG_PORT)]
    config_port: u16,

    /// path on the server to the configuration endpoint.
    #[arg(long = "path", default_value = DEFAULT_CONFIG_PATH)]
    config_path: String,

    /// configuration URL (takes precedence over the other configuration
    /// parts).
    #[arg(long = "url")]
    config_url: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Maximum time to spend calculating RPM (total test time, seconds).
    #[arg(long = "rpmtimeout", default_value_t = DEFAULT_TEST_TIMEOUT_SECS)]
    rpm_timeout: u64,

    /// Time (in ms) between probes (foreign and self).
    #[arg(
        long = "probe-interval-time",
        default_value_t = DEFAULT_PROBE_INTERVAL_MS
    )]
    probe_interval_time: u64,

    /// Enable the collection and display of extended statistics -- may
    /// not be available on certain platforms.
    #[arg(long = "extended-stats")]
    extended_stats: bool,

    /// Print quality attenuation information.
    #[arg(long = "quality-attenuation")]
    quality_attenuation: bool,

    /// Store granular test results in files with this basename. Time and
    /// information type are appended (before the first .) to create
    /// separate log files.
    #[arg(long = "logger-filename")]
    logger_filename: Option<String>,

    /// If specified, prometheus stats are written to this file,
    /// overwriting it when it exists.
    #[arg(long = "prometheus-stats-filename")]
    prometheus_stats_filename: Option<String>,

    /// address (hostname or IP) to connect to, overriding DNS.
    #[arg(long = "connect-to")]
    connect_to: Option<String>,

    /// Skip server certificate verification.
    #[arg(long = "insecure-skip-verify")]
    insecure_skip_verify: bool,

    /// Store per-session SSL keys in this file.
    #[arg(long = "ssl-key-file")]
    ssl_key_file: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new().filter_level(level).init();

    if let Err(error) = run(cli).await {
        eprintln!("{}", error);
        std::process::exit(error.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), TestError> {
    let deadline = tokio::time::Instant::now()
        + Duration::from_secs(cli.rpm_timeout);

    debug!(
        "netquality {} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("NETQUALITY_BUILD_GIT_HASH").unwrap_or("dev")
    );

    // The discovery endpoint is either the assembled host/port/path or a
    // full URL that overrides all three.
    let (host_port, config_path) = match &cli.config_url {
        Some(raw) => {
            let parsed = Url::parse(raw).map_err(|e| {
                TestError::config(format!("could not parse {:?}", raw))
                    .with_source(e)
            })?;
            let host = parsed
                .host_str()
                .ok_or_else(|| {
                    TestError::config(format!("{:?} has no host", raw))
                })?
                .to_string();
            let host_port = match parsed.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host,
            };
            (host_port, parsed.path().trim_start_matches('/').to_string())
        }
        None => (
            format!("{}:{}", cli.config_host, cli.config_port),
            cli.config_path.clone(),
        ),
    };

    let config = TestConfig::fetch(
        &host_port,
        &config_path,
        cli.insecure_skip_verify,
    )
    .await?;
    let targets = config.validate()?;
    debug!("configuration from {}: {:?}", config.source, config.urls);

    println!(
        "{} UTC Network responsiveness to {}...",
        Utc::now().format("%m-%d-%Y %H:%M:%S"),
        host_port,
    );

    if cli.extended_stats {
        // The pooled HTTP clients own the transfer sockets, so
        // kernel-level TCP statistics are not reachable from here.
        eprintln!(
            "Warning: {}",
            TestError::platform(
                "extended statistics were requested but are not supported on this platform"
            )
        );
    }

    let key_log = match &cli.ssl_key_file {
        Some(path) => match KeyLogWriter::create(path) {
            Ok(writer) => Some(Arc::new(writer)),
            Err(e) => {
                eprintln!(
                    "Warning: Could not open the requested SSL key logging file for writing: {}!",
                    e
                );
                None
            }
        },
        None => None,
    };

    let connect_to: Option<IpAddr> = match &cli.connect_to {
        Some(raw) if !raw.is_empty() => Some(match raw.parse() {
            Ok(address) => address,
            Err(_) => resolve_host(raw).await?,
        }),
        _ => None,
    };

    let client_tls =
        tls::client_tls_config(cli.insecure_skip_verify, key_log.clone(), true);
    let probe_tls =
        tls::client_tls_config(cli.insecure_skip_verify, key_log, false);

    let foreign_prober = Arc::new(
        ForeignProber::new(&targets.small_download, connect_to, probe_tls)
            .await?,
    );

    let loggers = build_loggers(cli.logger_filename.as_deref());

    // Cancellation scopes. The operator tokens stop the loops that manage
    // network activity; the network-activity token closes the activity
    // itself. Teardown order matters and is spelled out below.
    let operating = CancellationToken::new();
    let network_activity = operating.child_token();
    let download_operator = operating.child_token();
    let upload_operator = operating.child_token();
    let prober_operator = operating.child_token();

    let factory = ClientFactory::new(client_tls, connect_to);
    let download_pool = Arc::new(ConnectionPool::new());
    let upload_pool = Arc::new(ConnectionPool::new());

    let download_streams = start_load_generator(
        Direction::Download,
        Arc::new(DownloadConnector::new(
            factory.clone(),
            targets.large_download.clone(),
        )),
        download_pool.clone(),
        THROUGHPUT_SAMPLING_INTERVAL,
        download_operator.clone(),
        network_activity.clone(),
    );
    let upload_streams = start_load_generator(
        Direction::Upload,
        Arc::new(UploadConnector::new(
            factory.clone(),
            targets.upload.clone(),
        )),
        upload_pool.clone(),
        THROUGHPUT_SAMPLING_INTERVAL,
        upload_operator.clone(),
        network_activity.clone(),
    );

    let load::generator::LoadGeneratorStreams {
        self_probe_rx: mut download_probe_rx,
        throughput_rx: download_throughput_rx,
    } = download_streams;
    let load::generator::LoadGeneratorStreams {
        self_probe_rx: mut upload_probe_rx,
        throughput_rx: upload_throughput_rx,
    } = upload_streams;

    // The prober starts once both designated self-probe connections are
    // carrying data. If that never happens, the test runs out the clock
    // and reports what it has.
    let download_probe_connection = tokio::select! {
        handle = download_probe_rx.recv() => handle,
        _ = tokio::time::sleep_until(deadline) => None,
    };
    let upload_probe_connection = tokio::select! {
        handle = upload_probe_rx.recv() => handle,
        _ = tokio::time::sleep_until(deadline) => None,
    };

    let probe_rx = match (download_probe_connection, upload_probe_connection)
    {
        (Some(download_connection), Some(upload_connection)) => start_prober(
            Duration::from_millis(cli.probe_interval_time),
            foreign_prober,
            targets.small_download.clone(),
            download_connection,
            upload_connection,
            prober_operator.clone(),
            network_activity.clone(),
        ),
        _ => {
            eprintln!(
                "Warning: load generation did not begin before the deadline; probes disabled."
            );
            let (_probe_tx, probe_rx) = mpsc::unbounded_channel();
            probe_rx
        }
    };

    let mut orchestrator =
        Orchestrator::new(cli.quality_attenuation, loggers);
    let reached_stability = orchestrator
        .run(
            download_throughput_rx,
            upload_throughput_rx,
            probe_rx,
            deadline,
        )
        .await;

    debug!(
        "stopping the load generators (stability: {})",
        if reached_stability { "success" } else { "failure" }
    );

    // Teardown, in order: stop producing new work, then close the network
    // activity, then the whole test. Extended stats would be gathered
    // between the first and second steps, while the sockets are open.
    prober_operator.cancel();
    download_operator.cancel();
    upload_operator.cancel();
    network_activity.cancel();
    operating.cancel();

    let outcome = orchestrator.finish();
    debug!(
        "self probes: {} (P90 {:?}, trimmed mean {:?}); foreign probes: {} (P90 {:?}, trimmed mean {:?})",
        outcome.self_probe_count,
        outcome.self_p90,
        outcome.self_trimmed_mean,
        outcome.foreign_probe_count,
        outcome.foreign_p90,
        outcome.foreign_trimmed_mean,
    );

    let report = TestReport::from_outcome(outcome);
    print!("{}", report.human_summary());

    if let Some(path) = &cli.prometheus_stats_filename {
        if let Err(e) =
            std::fs::write(path, report.prometheus_exposition())
        {
            eprintln!("Warning: could not write {}: {}", path, e);
        }
    }

    Ok(())
}

/// Build the five data loggers from the user's base filename, falling
/// back to null loggers when logging is off or a file cannot be created.
fn build_loggers(base_filename: Option<&str>) -> Loggers {
    let Some(base) = base_filename else {
        return Loggers::disabled();
    };
    let unique = Utc::now().format("%m-%d-%Y-%H-%M-%S").to_string();

    Loggers {
        self_probes: csv_or_null(&filename_append(
            base,
            &format!("-self-{}", unique),
        )),
        foreign_probes: csv_or_null(&filename_append(
            base,
            &format!("-foreign-{}", unique),
        )),
        download_throughput: csv_or_null(&filename_append(
            base,
            &format!("-throughput-download-{}", unique),
        )),
        upload_throughput: csv_or_null(&filename_append(
            base,
            &format!("-throughput-upload-{}", unique),
        )),
        granular_throughput: csv_or_null(&filename_append(
            base,
            &format!("-throughput-granular-{}", unique),
        )),
    }
}

fn csv_or_null<T: Serialize + Send + 'static>(
    path: &str,
) -> Box<dyn DataLogger<T>> {
    match CsvDataLogger::create(path) {
        Ok(logger) => Box::new(logger),
        Err(e) => {
            eprintln!(
                "Warning: Could not create the log file {} ({}). Disabling that log.",
                path, e
            );
            Box::new(NullDataLogger)
        }
    }
}
