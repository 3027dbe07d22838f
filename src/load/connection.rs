//! Load-generating connections.
//!
//! Each connection owns its HTTP client and a transfer task that moves
//! bulk data until the network-activity scope is cancelled. The byte
//! counter is updated from the transfer task and read by the sampler
//! without a lock, so it is atomic.

use crate::constants::{UPLOAD_CHUNK_SIZE, USER_AGENT};
use crate::errors::TestError;
use bytes::Bytes;
use futures_util::StreamExt;
use log::debug;
use reqwest::Client;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One live bulk transfer.
///
/// The handle stays in the pool after its transfer finishes; its byte
/// delta is simply zero on later sampling ticks.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: u64,
    client: Client,
    started: AtomicBool,
    done: AtomicBool,
    bytes_transferred: AtomicU64,
}

impl ConnectionHandle {
    pub fn new(client: Client) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            client,
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
            bytes_transferred: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The client that owns this connection, usable for sibling requests
    /// (self probes) over the same saturated transport.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Whether the bulk transfer has begun moving data.
    pub fn started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Cumulative bytes moved by this connection. Monotone non-decreasing.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    /// Whether the connection can still carry self probes.
    pub fn is_usable(&self) -> bool {
        self.started() && !self.done.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Relaxed);
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes(&self, count: u64) {
        self.bytes_transferred.fetch_add(count, Ordering::Relaxed);
    }
}

/// Builds the per-connection HTTP clients, applying the shared TLS
/// configuration and the optional DNS override.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    tls: rustls::ClientConfig,
    connect_to: Option<IpAddr>,
}

impl ClientFactory {
    pub fn new(tls: rustls::ClientConfig, connect_to: Option<IpAddr>) -> Self {
        Self { tls, connect_to }
    }

    pub fn build(&self, url: &Url) -> Result<Client, TestError> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .use_preconfigured_tls(self.tls.clone());

        if let Some(address) = self.connect_to {
            let host = url.host_str().ok_or_else(|| {
                TestError::config(format!("{} has no host", url))
            })?;
            let port = url.port_or_known_default().unwrap_or(443);
            builder = builder.resolve(host, SocketAddr::new(address, port));
        }

        builder.build().map_err(|e| {
            TestError::transport("could not build HTTP client").with_source(e)
        })
    }
}

/// Opens load-generating connections on demand.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        network: CancellationToken,
    ) -> Result<Arc<ConnectionHandle>, TestError>;
}

/// Opens connections that GET the large-download target and drain its
/// body, counting bytes as they arrive.
pub struct DownloadConnector {
    factory: ClientFactory,
    url: Url,
}

impl DownloadConnector {
    pub fn new(factory: ClientFactory, url: Url) -> Self {
        Self { factory, url }
    }
}

impl Connector for DownloadConnector {
    fn open(
        &self,
        network: CancellationToken,
    ) -> Result<Arc<ConnectionHandle>, TestError> {
        let client = self.factory.build(&self.url)?;
        let handle = ConnectionHandle::new(client);
        spawn_download_transfer(handle.clone(), self.url.clone(), network);
        Ok(handle)
    }
}

/// Opens connections that POST an unbounded body to the upload target,
/// counting bytes as the transport pulls them.
pub struct UploadConnector {
    factory: ClientFactory,
    url: Url,
}

impl UploadConnector {
    pub fn new(factory: ClientFactory, url: Url) -> Self {
        Self { factory, url }
    }
}

impl Connector for UploadConnector {
    fn open(
        &self,
        network: CancellationToken,
    ) -> Result<Arc<ConnectionHandle>, TestError> {
        let client = self.factory.build(&self.url)?;
        let handle = ConnectionHandle::new(client);
        spawn_upload_transfer(handle.clone(), self.url.clone(), network);
        Ok(handle)
    }
}

fn spawn_download_transfer(
    handle: Arc<ConnectionHandle>,
    url: Url,
    network: CancellationToken,
) {
    tokio::spawn(async move {
        let transfer = async {
            let response = handle
                .client()
                .get(url.clone())
                .send()
                .await?
                .error_for_status()?;
            handle.mark_started();

            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                handle.add_bytes(chunk.len() as u64);
            }
            Ok::<(), reqwest::Error>(())
        };

        tokio::select! {
            _ = network.cancelled() => {}
            result = transfer => {
                if let Err(e) = result {
                    debug!("download connection {} ended: {}", handle.id(), e);
                }
            }
        }
        handle.mark_done();
    });
}

fn spawn_upload_transfer(
    handle: Arc<ConnectionHandle>,
    url: Url,
    network: CancellationToken,
) {
    tokio::spawn(async move {
        // The body yields zero-filled chunks until the network-activity
        // scope closes; counting happens as the transport pulls chunks.
        let chunk = Bytes::from(vec![b'0'; UPLOAD_CHUNK_SIZE]);
        let body_handle = handle.clone();
        let body_token = network.clone();
        let body = futures_util::stream::unfold((), move |()| {
            let chunk = chunk.clone();
            let handle = body_handle.clone();
            let token = body_token.clone();
            async move {
                if token.is_cancelled() {
                    return None;
                }
                handle.mark_started();
                handle.add_bytes(chunk.len() as u64);
                Some((Ok::<Bytes, std::io::Error>(chunk), ()))
            }
        });

        let transfer = async {
            let response = handle
                .client()
                .post(url.clone())
                .body(reqwest::Body::wrap_stream(body))
                .send()
                .await?
                .error_for_status()?;
            let _ = response.bytes().await;
            Ok::<(), reqwest::Error>(())
        };

        tokio::select! {
            _ = network.cancelled() => {}
            result = transfer => {
                if let Err(e) = result {
                    debug!("upload connection {} ended: {}", handle.id(), e);
                }
            }
        }
        handle.mark_done();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionHandle::new(Client::new());
        let b = ConnectionHandle::new(Client::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_byte_counter_is_monotone() {
        let handle = ConnectionHandle::new(Client::new());
        assert_eq!(handle.bytes_transferred(), 0);
        handle.add_bytes(100);
        handle.add_bytes(50);
        assert_eq!(handle.bytes_transferred(), 150);
    }

    #[test]
    fn test_usability_follows_transfer_state() {
        let handle = ConnectionHandle::new(Client::new());
        assert!(!handle.is_usable());
        handle.mark_started();
        assert!(handle.is_usable());
        handle.mark_done();
        assert!(!handle.is_usable());
    }
}
