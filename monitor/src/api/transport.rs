//! TCP transport for command requests
//!
//! One JSON request per connection. The caller's address is checked against
//! the allow-list before anything is read, the response is written compactly
//! and the connection is closed.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::commands::{Request, Response};
use crate::api::router::CommandRouter;
use crate::errors::MonitorError;

const READ_CHUNK: usize = 1024;

/// Errors scoped to a single connection
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("no data received")]
    Empty,

    #[error("request exceeds {0} bytes")]
    TooLarge(usize),

    #[error("bad JSON data: {0}")]
    Unpackage(#[from] serde_json::Error),

    #[error("request is missing cmd, auths or args")]
    Malformed,

    #[error("timed out waiting for request")]
    TimedOut,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Response sent to the caller, if any
    pub fn response(&self) -> Option<Response> {
        match self {
            ProtocolError::Unpackage(_) | ProtocolError::TooLarge(_) => {
                Some(Response::err("Unable to unpackage data."))
            }
            ProtocolError::Malformed => Some(Response::err("Malformed data received.")),
            ProtocolError::Empty | ProtocolError::TimedOut | ProtocolError::Io(_) => None,
        }
    }
}

/// Addresses permitted to send requests
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    nets: Vec<IpNet>,
}

impl AllowList {
    /// Parse plain addresses and CIDR ranges
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, String> {
        let mut nets = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.as_ref().trim();
            let net = match entry.parse::<IpNet>() {
                Ok(net) => net,
                Err(_) => entry
                    .parse::<IpAddr>()
                    .map(IpNet::from)
                    .map_err(|_| format!("invalid allowed host '{}'", entry))?,
            };
            nets.push(net);
        }
        Ok(Self { nets })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        self.nets.iter().any(|net| net.contains(&addr))
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }
}

/// API listener options
#[derive(Debug, Clone)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub allowed_hosts: AllowList,

    /// Largest request accepted
    pub max_request_bytes: usize,

    /// Time allowed for a client to send its request
    pub read_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1337,
            allowed_hosts: AllowList::default(),
            max_request_bytes: 64 * 1024,
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// Bind the API listener
pub async fn bind(options: &Options) -> Result<TcpListener, MonitorError> {
    let addr = format!("{}:{}", options.host, options.port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| MonitorError::ServerError(format!("unable to bind {}: {}", addr, e)))
}

/// Serve command requests until the shutdown signal fires
pub fn serve(
    listener: TcpListener,
    options: Options,
    router: Arc<CommandRouter>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> JoinHandle<Result<(), MonitorError>> {
    let options = Arc::new(options);

    tokio::spawn(async move {
        if let Ok(addr) = listener.local_addr() {
            info!("Command API listening on {}", addr);
        }
        tokio::pin!(shutdown_signal);

        loop {
            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Command API shutting down...");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let options = options.clone();
                            let router = router.clone();
                            tokio::spawn(async move {
                                handle_connection(stream, peer, &options, router).await;
                            });
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }
    })
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    options: &Options,
    router: Arc<CommandRouter>,
) {
    if !options.allowed_hosts.contains(peer.ip()) {
        debug!(address = %peer.ip(), "Request address not whitelisted");
        send(&mut stream, &Response::err("Address not whitelisted.")).await;
        return;
    }

    let request = match read_request(&mut stream, options).await {
        Ok(request) => request,
        Err(e) => {
            match &e {
                ProtocolError::Empty => debug!(address = %peer.ip(), "No data received"),
                ProtocolError::Malformed => info!(address = %peer.ip(), "Malformed data received"),
                _ => error!(address = %peer.ip(), "Request error: {}", e),
            }
            if let Some(response) = e.response() {
                send(&mut stream, &response).await;
            }
            return;
        }
    };

    let command = request.cmd.clone();
    let response = match tokio::spawn(async move { router.respond(&request).await }).await {
        Ok(response) => response,
        Err(e) => {
            error!(command = %command, "Error caught while processing command: {}", e);
            Response::err("Error caught while processing command.")
        }
    };

    send(&mut stream, &response).await;
}

/// Read and validate one request from the stream
pub async fn read_request<S>(stream: &mut S, options: &Options) -> Result<Request, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let value = tokio::time::timeout(options.read_timeout, read_value(stream, options.max_request_bytes))
        .await
        .map_err(|_| ProtocolError::TimedOut)??;

    let object = value.as_object().ok_or(ProtocolError::Malformed)?;
    if !["cmd", "auths", "args"].iter().all(|key| object.contains_key(*key)) {
        return Err(ProtocolError::Malformed);
    }

    serde_json::from_value(value).map_err(|_| ProtocolError::Malformed)
}

// Reads until the buffer holds a complete JSON value or the peer closes
async fn read_value<S>(stream: &mut S, max_bytes: usize) -> Result<Value, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if data.is_empty() {
                return Err(ProtocolError::Empty);
            }
            return Ok(serde_json::from_slice(&data)?);
        }

        data.extend_from_slice(&chunk[..n]);
        if data.len() > max_bytes {
            return Err(ProtocolError::TooLarge(max_bytes));
        }

        match serde_json::from_slice::<Value>(&data) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_eof() => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

async fn send(stream: &mut TcpStream, response: &Response) {
    let body = match serde_json::to_vec(response) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to encode response: {}", e);
            return;
        }
    };

    if let Err(e) = stream.write_all(&body).await {
        warn!("Failed to send response: {}", e);
        return;
    }
    let _ = stream.shutdown().await;
}
