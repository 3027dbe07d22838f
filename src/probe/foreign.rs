//! The foreign tri-probe.
//!
//! A foreign probe opens a brand-new connection to the small-payload
//! target and times the three setup stages separately: TCP connect, TLS
//! handshake, and the HTTP GET up to the first response byte. The raw
//! socket path exists because those stage boundaries are the measurement;
//! a pooled client would hide them.

use crate::constants::USER_AGENT;
use crate::errors::TestError;
use crate::probe::ProbeSample;
use hickory_resolver::TokioResolver;
use log::debug;
use rustls_connector::RustlsConnector;
use std::error::Error;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Ceiling on any single blocking socket operation inside a probe.
const PROBE_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve a hostname, preferring IPv4 addresses.
pub async fn resolve_host(host: &str) -> Result<IpAddr, TestError> {
    let resolver = TokioResolver::builder_tokio()
        .map_err(|e| {
            TestError::config(format!("could not build resolver: {}", e))
        })?
        .build();

    let response = resolver.lookup_ip(host).await.map_err(|e| {
        TestError::config(format!("could not resolve {}: {}", host, e))
    })?;

    let addresses: Vec<IpAddr> = response.iter().collect();
    addresses
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or_else(|| {
            TestError::config(format!("{} resolved to no addresses", host))
        })
}

/// Issues foreign probes against a fixed, pre-resolved target.
pub struct ForeignProber {
    address: IpAddr,
    port: u16,
    host: String,
    path_and_query: String,
    tls: Arc<rustls::ClientConfig>,
}

impl ForeignProber {
    /// Prepare a prober for the small-payload URL. Resolution happens
    /// once, here, so per-probe timings contain no DNS component.
    pub async fn new(
        url: &Url,
        connect_to: Option<IpAddr>,
        tls: rustls::ClientConfig,
    ) -> Result<Self, TestError> {
        let host = url
            .host_str()
            .ok_or_else(|| {
                TestError::config(format!("{} has no host", url))
            })?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);
        let address = match connect_to {
            Some(address) => address,
            None => resolve_host(&host).await?,
        };

        let mut path_and_query = url.path().to_string();
        if let Some(query) = url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        Ok(Self {
            address,
            port,
            host,
            path_and_query,
            tls: Arc::new(tls),
        })
    }

    /// Run one tri-probe.
    ///
    /// Blocking socket work runs on the blocking thread pool so the async
    /// runtime is never starved.
    pub async fn probe(
        &self,
    ) -> Result<ProbeSample, Box<dyn Error + Send + Sync>> {
        let address = self.address;
        let port = self.port;
        let host = self.host.clone();
        let path_and_query = self.path_and_query.clone();
        let tls = self.tls.clone();

        let (tcp, tls_handshake, http) =
            tokio::task::spawn_blocking(move || {
                blocking_probe(address, port, &host, &path_and_query, &tls)
            })
            .await??;

        Ok(ProbeSample::foreign(
            tcp.as_secs_f64(),
            tls_handshake.as_secs_f64(),
            http.as_secs_f64(),
        ))
    }
}

fn blocking_probe(
    address: IpAddr,
    port: u16,
    host: &str,
    path_and_query: &str,
    tls: &rustls::ClientConfig,
) -> Result<(Duration, Duration, Duration), Box<dyn Error + Send + Sync>> {
    let now = Instant::now();
    let mut stream = TcpStream::connect_timeout(
        &SocketAddr::new(address, port),
        PROBE_IO_TIMEOUT,
    )?;
    stream.flush()?;
    let tcp_duration = now.elapsed();

    stream.set_read_timeout(Some(PROBE_IO_TIMEOUT))?;
    stream.set_write_timeout(Some(PROBE_IO_TIMEOUT))?;

    let connector = RustlsConnector::from(tls.clone());
    let now = Instant::now();
    let mut stream = connector
        .connect(host, stream)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    stream.flush()?;
    let tls_duration = now.elapsed();

    let request = build_http_get_header(host, path_and_query);
    debug!("\r\n{}", request);
    let now = Instant::now();
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut one_byte_buffer = [0_u8];
    stream.read_exact(&mut one_byte_buffer)?;
    let http_duration = now.elapsed();

    // Drain the rest of the response, untimed; the payload is small and
    // the server closes the connection.
    let mut headers: Vec<u8> = vec![one_byte_buffer[0]];
    while stream.read(&mut one_byte_buffer)? > 0 {
        headers.push(one_byte_buffer[0]);
        if headers.len() >= 4
            && headers[headers.len() - 4..] == [b'\r', b'\n', b'\r', b'\n']
        {
            break;
        }
    }
    let mut body = Vec::new();
    let _ = stream.read_to_end(&mut body);

    Ok((tcp_duration, tls_duration, http_duration))
}

fn build_http_get_header(host: &str, path_and_query: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
        Host: {}\r\n\
        User-Agent: {}\r\n\
        Accept: */*\r\n\
        Connection: close\r\n\
        \r\n",
        path_and_query, host, USER_AGENT
    )
}
