//! HTTP fetch over a plain TCP socket.
//!
//! Resolves a destination from the table, connects, sends a fixed
//! `GET / HTTP/1.0` request and drains the reply until the server closes
//! the connection. The reply is split into headers and content; the content
//! is saved as `{hostname}.html` and returned.

use crate::buffer::{receive, send_all};
use crate::destinations::Destinations;
use crate::response::{split_response, MalformedResponse};
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// The only request ever sent.
pub const REQUEST: &[u8] = b"GET / HTTP/1.0\r\n\r\n";

/// Default bound on name lookup, on connecting, and on each single read or
/// write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that turns a destination index into page content.
pub trait Fetch: Send + Sync + 'static {
    fn fetch(&self, index: usize) -> impl Future<Output = Result<Bytes, FetchError>> + Send;
}

/// Where fetched pages end up.
pub trait ContentStore: Send + Sync + 'static {
    /// Save `content` under the given host name.
    fn save(&self, host: &str, content: &[u8])
        -> impl Future<Output = io::Result<PathBuf>> + Send;
}

/// Writes pages to `{dir}/{host}.html`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ContentStore for FileStore {
    async fn save(&self, host: &str, content: &[u8]) -> io::Result<PathBuf> {
        let path = self.dir.join(format!("{host}.html"));
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }
}

/// Address family used when resolving destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
        }
    }
}

/// Fetch failures
#[derive(Debug)]
pub enum FetchError {
    /// Index is not in the destination table, or not served
    NotImplemented(usize),
    /// Name lookup failed
    Resolution(String, io::Error),
    /// Name lookup gave no address of the wanted family
    NoAddress(String, AddressFamily),
    Connect(SocketAddr, io::Error),
    Send(io::Error),
    Receive(io::Error),
    /// A network stage did not finish in time
    Timeout(&'static str),
    /// The server closed without sending anything
    EmptyResponse,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::NotImplemented(index) => write!(f, "Not implemented: command {}", index),
            FetchError::Resolution(host, e) => write!(f, "Could not resolve {}: {}", host, e),
            FetchError::NoAddress(host, family) => {
                write!(f, "Could not resolve {}: no {:?} address found", host, family)
            }
            FetchError::Connect(addr, e) => write!(f, "Could not connect to {}: {}", addr, e),
            FetchError::Send(e) => write!(f, "Sending HTTP request failed: {}", e),
            FetchError::Receive(e) => write!(f, "Receiving HTTP response failed: {}", e),
            FetchError::Timeout(stage) => write!(f, "Timed out during {}", stage),
            FetchError::EmptyResponse => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Resolution(_, e)
            | FetchError::Connect(_, e)
            | FetchError::Send(e)
            | FetchError::Receive(e) => Some(e),
            _ => None,
        }
    }
}

/// Result of one successful fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub host: String,
    /// `None` when the reply had no header delimiter
    pub headers: Option<Bytes>,
    pub content: Bytes,
}

/// Fetches pages over HTTP/1.0.
#[derive(Debug, Clone)]
pub struct HttpFetcher<S = FileStore> {
    destinations: Arc<Destinations>,
    store: S,
    port: u16,
    family: AddressFamily,
    timeout: Duration,
}

impl<S: ContentStore> HttpFetcher<S> {
    pub fn new(destinations: Arc<Destinations>, store: S) -> Self {
        Self {
            destinations,
            store,
            port: 80,
            family: AddressFamily::V4,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch destination `index`, keeping the headers.
    ///
    /// A reply without a header delimiter is returned whole as content and
    /// is not saved.
    pub async fn fetch_page(&self, index: usize) -> Result<Fetched, FetchError> {
        let host = self
            .destinations
            .get(index)
            .ok_or(FetchError::NotImplemented(index))?
            .to_string();

        let addr = self.resolve(&host).await?;
        debug!(host = %host, addr = %addr, "Resolved destination");

        let mut stream = self.connect(addr).await?;
        debug!(addr = %addr, "Connection established");

        // Reads and writes are bounded one call at a time, so a slow page
        // that keeps arriving is received in full.
        let io_timeout = Some(self.timeout);
        send_all(&mut stream, REQUEST, io_timeout)
            .await
            .map_err(|e| stage_error(e, "send", FetchError::Send))?;

        let buf = receive(&mut stream, 0, io_timeout)
            .await
            .map_err(|e| stage_error(e, "receive", FetchError::Receive))?;

        // Done with the socket
        drop(stream);

        debug!(
            host = %host,
            length = buf.len(),
            capacity = buf.capacity(),
            "Response received"
        );
        if buf.is_empty() {
            return Err(FetchError::EmptyResponse);
        }

        match split_response(buf.into_vec()) {
            Ok(response) => {
                debug!(
                    host = %host,
                    headers = %String::from_utf8_lossy(&response.headers),
                    "Response headers"
                );
                match self.store.save(&host, &response.content).await {
                    Ok(path) => info!(path = %path.display(), "Saved content"),
                    Err(e) => warn!(host = %host, error = %e, "Failed to save content"),
                }
                Ok(Fetched {
                    host,
                    headers: Some(response.headers),
                    content: response.content,
                })
            }
            Err(MalformedResponse { raw }) => {
                warn!(host = %host, length = raw.len(), "No header delimiter, returning raw response");
                Ok(Fetched {
                    host,
                    headers: None,
                    content: raw,
                })
            }
        }
    }

    async fn resolve(&self, host: &str) -> Result<SocketAddr, FetchError> {
        let addrs = timeout(self.timeout, tokio::net::lookup_host((host, self.port)))
            .await
            .map_err(|_| FetchError::Timeout("resolve"))?
            .map_err(|e| FetchError::Resolution(host.to_string(), e))?;

        let family = self.family;
        addrs
            .into_iter()
            .find(|addr| family.matches(addr))
            .ok_or_else(|| FetchError::NoAddress(host.to_string(), family))
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, FetchError> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|e| FetchError::Connect(addr, e))?;

        timeout(self.timeout, socket.connect(addr))
            .await
            .map_err(|_| FetchError::Timeout("connect"))?
            .map_err(|e| FetchError::Connect(addr, e))
    }
}

fn stage_error(
    e: io::Error,
    stage: &'static str,
    wrap: fn(io::Error) -> FetchError,
) -> FetchError {
    if e.kind() == io::ErrorKind::TimedOut {
        FetchError::Timeout(stage)
    } else {
        wrap(e)
    }
}

impl<S: ContentStore> Fetch for HttpFetcher<S> {
    async fn fetch(&self, index: usize) -> Result<Bytes, FetchError> {
        self.fetch_page(index).await.map(|fetched| fetched.content)
    }
}
