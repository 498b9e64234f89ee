//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and runs every HTTP/1.1 request through one shared
//! [`Handler`], usually a [`Pipeline`](crate::pipeline::Pipeline). Each connection
//! gets its own task; requests on a connection are answered in order, and the
//! connection stays open while the client asks for keep-alive.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::bandwidth::BandwidthMeter;
use crate::config::{DEFAULT_MAX_REQUEST_SIZE, ServerConfig};
use crate::handler::Handler;
use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

// Per-connection settings copied out of the server before it starts accepting.
#[derive(Clone)]
struct ConnectionSettings {
    max_request_size: usize,
    meter: Option<Arc<BandwidthMeter>>,
}

/// The HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_chain::bandwidth::BandwidthMeter;
/// use rttp_chain::handler::Responder;
/// use rttp_chain::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let meter = Arc::new(BandwidthMeter::new());
///     let server = Server::bind("127.0.0.1:8080").await?.with_meter(Arc::clone(&meter));
///     server.run(Responder::new("Hello!")).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    settings: ConnectionSettings,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            settings: ConnectionSettings {
                max_request_size: DEFAULT_MAX_REQUEST_SIZE,
                meter: None,
            },
        })
    }

    /// Binds to `config.address` and applies the configured request size limit.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        Ok(Self::bind(&config.address)
            .await?
            .max_request_size(config.max_request_size))
    }

    /// Largest request (headers plus body) accepted before answering `413`.
    #[must_use]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.settings.max_request_size = bytes;
        self
    }

    /// Count every byte read from and written to client sockets on `meter`.
    #[must_use]
    pub fn with_meter(mut self, meter: Arc<BandwidthMeter>) -> Self {
        self.settings.meter = Some(meter);
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections and dispatch their requests to `handler` until the
    /// process exits or the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self, handler: impl Handler) -> Result<(), ServerError> {
        self.run_until(handler, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but stop accepting once `shutdown` resolves.
    ///
    /// Connections already accepted keep running until their clients disconnect.
    pub async fn run_until(
        self,
        handler: impl Handler,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ServerError> {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "listening");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => {
                    info!(address = %self.local_addr, "shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);
            let settings = self.settings.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler, settings).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Serve one connection until the peer closes it or asks for `Connection: close`.
async fn handle_connection<H: Handler>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    settings: ConnectionSettings,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let request = match take_request(&mut buf, settings.max_request_size) {
            Ok(Some(request)) => request,
            Ok(None) => {
                let bytes_read = stream.read_buf(&mut buf).await?;
                if let Some(meter) = &settings.meter {
                    meter.record_received(bytes_read);
                }
                if bytes_read == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Err(e) => {
                let status = match e {
                    RequestError::TooLarge { .. } => StatusCode::PayloadTooLarge,
                    RequestError::UnsupportedTransferEncoding { .. } => StatusCode::NotImplemented,
                    _ => StatusCode::BadRequest,
                };
                warn!(peer = %peer_addr, error = %e, status = status.as_u16(), "rejecting request");
                let response = Response::new(status)
                    .body(format!("{}: {e}", status.canonical_reason()))
                    .keep_alive(false);
                write_response(&mut stream, response, settings.meter.as_deref()).await?;
                break;
            }
        };

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            uri = %request.uri(),
            "dispatching request"
        );

        let response = handler.call(request).await.keep_alive(keep_alive);
        write_response(&mut stream, response, settings.meter.as_deref()).await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close — shutting down");
            break;
        }
    }

    Ok(())
}

/// Split one complete request off the front of `buf`.
///
/// Returns `Ok(None)` while the headers or the declared body are still arriving.
/// A request whose body length cannot be determined is an error, never a
/// zero-length body, so its bytes are never read as a following request.
fn take_request(buf: &mut BytesMut, max_request_size: usize) -> Result<Option<Request>, RequestError> {
    let too_large = RequestError::TooLarge {
        max_bytes: max_request_size,
    };

    let (mut request, body_offset) = match Request::parse_head(buf) {
        Ok(pair) => pair,
        Err(RequestError::Incomplete) if buf.len() > max_request_size => return Err(too_large),
        Err(RequestError::Incomplete) => return Ok(None),
        Err(e) => return Err(e),
    };

    let body_len = request.content_length()?.unwrap_or(0);
    let total = body_offset.saturating_add(body_len);
    if total > max_request_size {
        return Err(too_large);
    }
    if buf.len() < total {
        return Ok(None);
    }

    let frame = buf.split_to(total).freeze();
    request.set_body(frame.slice(body_offset..));
    Ok(Some(request))
}

async fn write_response(
    stream: &mut TcpStream,
    response: Response,
    meter: Option<&BandwidthMeter>,
) -> Result<(), std::io::Error> {
    let bytes = response.into_bytes();
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    if let Some(meter) = meter {
        meter.record_sent(bytes.len());
    }
    Ok(())
}
