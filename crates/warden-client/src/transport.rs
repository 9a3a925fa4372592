//! Carriers: byte-oriented connections to the daemon.
//!
//! One capability trait, two flavours: a named filesystem socket and plain
//! TCP (optionally TLS-wrapped behind the `tls` feature).  The HTTP client
//! and the websocket dialler both draw streams from the same carrier, so a
//! session's requests and its websockets always share transport and trust
//! configuration.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use http::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::debug;
use url::Url;

use crate::error::ClientError;

/// Fixed handshake timeout for every websocket dial.
pub(crate) const WS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte stream to the daemon with the concrete flavour erased.
pub(crate) trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub(crate) type RawStream = Box<dyn Transport>;

pub(crate) type WsStream = WebSocketStream<RawStream>;

/// Dial-time failure, kept separate from [`ClientError`] so the requester
/// can recover it from hyper's error chain and classify retries.
#[derive(Debug, thiserror::Error)]
pub(crate) enum DialError {
    #[error("socket {path:?} not found")]
    SocketNotFound { path: PathBuf },
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl DialError {
    pub(crate) fn into_client_error(self) -> ClientError {
        match self {
            DialError::SocketNotFound { path } => ClientError::SocketNotFound { path },
            DialError::Io(e) => ClientError::Connection(format!("cannot connect to daemon: {e}")),
        }
    }
}

/// Opens connections to the daemon and knows the base URLs requests and
/// websockets resolve against.
pub(crate) trait Carrier: Send + Sync {
    /// Dial a fresh byte stream.  The future owns everything it needs so the
    /// connector can run it detached from `self`'s lifetime.
    fn dial(&self) -> BoxFuture<'static, Result<RawStream, DialError>>;

    /// Base for HTTP request URIs (synthetic `http://localhost` for the
    /// socket flavour).
    fn http_base(&self) -> &Url;

    /// Base for websocket URLs: same authority, `ws`/`wss` scheme.
    fn ws_base(&self) -> &Url;

    /// Identity certificate (DER) observed during the latest TLS handshake,
    /// recorded by the verifier.  `None` for non-TLS carriers.
    fn seen_identity(&self) -> Option<Vec<u8>> {
        None
    }
}

// ---------------------------------------------------------------------------
// Socket flavour
// ---------------------------------------------------------------------------

/// Dials a named filesystem socket; requests ride a synthetic
/// `http://localhost` base.
#[cfg(unix)]
pub(crate) struct SocketCarrier {
    path: PathBuf,
    http_base: Url,
    ws_base: Url,
}

#[cfg(unix)]
impl SocketCarrier {
    pub(crate) fn new(path: PathBuf) -> Self {
        // Infallible literals.
        let http_base = Url::parse("http://localhost").unwrap();
        let ws_base = Url::parse("ws://localhost").unwrap();
        SocketCarrier {
            path,
            http_base,
            ws_base,
        }
    }
}

#[cfg(unix)]
impl Carrier for SocketCarrier {
    fn dial(&self) -> BoxFuture<'static, Result<RawStream, DialError>> {
        let path = self.path.clone();
        Box::pin(async move {
            // Probe first: a missing socket gets its own error so callers can
            // tell "daemon not running" from a flaky connection.
            match tokio::fs::metadata(&path).await {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(DialError::SocketNotFound { path });
                }
                Err(e) => return Err(DialError::Io(e)),
            }
            let stream = tokio::net::UnixStream::connect(&path).await?;
            debug!(path = %path.display(), "dialled daemon socket");
            Ok(Box::new(stream) as RawStream)
        })
    }

    fn http_base(&self) -> &Url {
        &self.http_base
    }

    fn ws_base(&self) -> &Url {
        &self.ws_base
    }
}

// ---------------------------------------------------------------------------
// Network flavour
// ---------------------------------------------------------------------------

/// Dials TCP to the host in the caller's base URL; a non-`http` scheme wraps
/// the stream in the pinning TLS configuration.
pub(crate) struct TcpCarrier {
    host: String,
    port: u16,
    http_base: Url,
    ws_base: Url,
    #[cfg(feature = "tls")]
    tls: Option<Arc<crate::tls::TlsContext>>,
}

impl TcpCarrier {
    pub(crate) fn plain(base_url: &str) -> Result<Self, ClientError> {
        Self::build(base_url, "ws")
    }

    #[cfg(feature = "tls")]
    pub(crate) fn tls(base_url: &str, tls: Arc<crate::tls::TlsContext>) -> Result<Self, ClientError> {
        let mut carrier = Self::build(base_url, "wss")?;
        carrier.tls = Some(tls);
        Ok(carrier)
    }

    fn build(base_url: &str, ws_scheme: &str) -> Result<Self, ClientError> {
        let http_base = Url::parse(base_url)
            .map_err(|e| ClientError::RequestBuild(format!("invalid base URL {base_url:?}: {e}")))?;
        let host = http_base
            .host_str()
            .ok_or_else(|| ClientError::RequestBuild(format!("base URL {base_url:?} has no host")))?
            .to_owned();
        let port = http_base.port_or_known_default().ok_or_else(|| {
            ClientError::RequestBuild(format!("base URL {base_url:?} has no usable port"))
        })?;
        let mut ws_base = http_base.clone();
        ws_base
            .set_scheme(ws_scheme)
            .map_err(|()| ClientError::RequestBuild("cannot derive websocket URL".to_owned()))?;
        Ok(TcpCarrier {
            host,
            port,
            http_base,
            ws_base,
            #[cfg(feature = "tls")]
            tls: None,
        })
    }
}

impl Carrier for TcpCarrier {
    fn dial(&self) -> BoxFuture<'static, Result<RawStream, DialError>> {
        let host = self.host.clone();
        let port = self.port;
        #[cfg(feature = "tls")]
        let tls = self.tls.clone();
        Box::pin(async move {
            let stream = TcpStream::connect((host.as_str(), port)).await?;
            #[cfg(feature = "tls")]
            if let Some(tls) = tls {
                let stream = tls.connect(stream).await?;
                return Ok(Box::new(stream) as RawStream);
            }
            Ok(Box::new(stream) as RawStream)
        })
    }

    fn http_base(&self) -> &Url {
        &self.http_base
    }

    fn ws_base(&self) -> &Url {
        &self.ws_base
    }

    #[cfg(feature = "tls")]
    fn seen_identity(&self) -> Option<Vec<u8>> {
        self.tls.as_ref().and_then(|t| t.seen_identity())
    }
}

// ---------------------------------------------------------------------------
// hyper connector glue
// ---------------------------------------------------------------------------

/// Adapter that lets the pooled hyper client draw its connections from a
/// carrier.  The destination URI is ignored; the carrier already knows where
/// the daemon lives.
#[derive(Clone)]
pub(crate) struct CarrierConnector {
    carrier: Arc<dyn Carrier>,
}

impl CarrierConnector {
    pub(crate) fn new(carrier: Arc<dyn Carrier>) -> Self {
        CarrierConnector { carrier }
    }
}

impl tower_service::Service<Uri> for CarrierConnector {
    type Response = CarrierIo;
    type Error = DialError;
    type Future = BoxFuture<'static, Result<CarrierIo, DialError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _dst: Uri) -> Self::Future {
        let dial = self.carrier.dial();
        Box::pin(async move { Ok(CarrierIo(TokioIo::new(dial.await?))) })
    }
}

pub(crate) struct CarrierIo(TokioIo<RawStream>);

impl hyper::rt::Read for CarrierIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl hyper::rt::Write for CarrierIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

impl Connection for CarrierIo {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

// ---------------------------------------------------------------------------
// Websocket dial
// ---------------------------------------------------------------------------

/// Open a websocket at `path` over a fresh carrier stream.  The handshake is
/// bounded by [`WS_HANDSHAKE_TIMEOUT`].
pub(crate) async fn dial_websocket(
    carrier: &dyn Carrier,
    path: &str,
) -> Result<WsStream, ClientError> {
    let url = join_url(carrier.ws_base(), path);
    let request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::RequestBuild(format!("invalid websocket URL {url}: {e}")))?;
    let stream = carrier
        .dial()
        .await
        .map_err(DialError::into_client_error)?;
    let handshake = tokio_tungstenite::client_async(request, stream);
    let (ws, _response) = tokio::time::timeout(WS_HANDSHAKE_TIMEOUT, handshake)
        .await
        .map_err(|_| ClientError::Connection(format!("websocket handshake timed out for {url}")))?
        .map_err(|e| ClientError::Connection(format!("websocket handshake failed for {url}: {e}")))?;
    debug!(%url, "websocket open");
    Ok(ws)
}

/// Append `path` to the base URL's path prefix.
pub(crate) fn join_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}{path}"));
    url.set_query(None);
    url
}
