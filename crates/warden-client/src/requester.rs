//! The request/response engine.
//!
//! Builds HTTP requests against the carrier's base, retries transient dial
//! failures for GETs on a ticker, and post-processes replies into one of
//! three shapes: decoded sync result, decoded async change, or the raw body
//! stream.  The maintenance/warning side-channel is recorded here, at the
//! single point every envelope passes through.

use std::error::Error as StdError;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use http::header::{CONTENT_TYPE, HeaderName, LOCATION, USER_AGENT};
use http::{HeaderMap, Method, StatusCode, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyDataStream, BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client as PooledClient;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;
use warden_protocol::{Envelope, EnvelopeType};

use crate::envelope::{lift_error, parse_envelope};
use crate::error::{ClientError, ServerError};
use crate::transport::{Carrier, CarrierConnector, DialError, join_url};

pub(crate) const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(250);
pub(crate) const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Redirects are followed at most this many times per request.
const REDIRECT_LIMIT: usize = 10;

pub(crate) type RequestBody = BoxBody<Bytes, io::Error>;

// ---------------------------------------------------------------------------
// Request options
// ---------------------------------------------------------------------------

pub(crate) enum ReqBody {
    Empty,
    Json(Bytes),
    /// Single-shot streaming body (multipart push).  Never retried.
    Stream(RequestBody),
}

pub(crate) struct RequestOptions {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(HeaderName, String)>,
    pub body: ReqBody,
}

impl RequestOptions {
    pub(crate) fn get(path: impl Into<String>) -> Self {
        RequestOptions {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: ReqBody::Empty,
        }
    }

    pub(crate) fn post_json<T: Serialize>(
        path: impl Into<String>,
        payload: &T,
    ) -> Result<Self, ClientError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| ClientError::RequestBuild(format!("cannot encode request body: {e}")))?;
        Ok(RequestOptions {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: ReqBody::Json(body.into()),
        })
    }

    pub(crate) fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_owned(), value.into()));
        self
    }

    pub(crate) fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

// ---------------------------------------------------------------------------
// Raw responses
// ---------------------------------------------------------------------------

/// An untouched response body.  The caller owns consumption; dropping it
/// releases the connection.
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

impl RawResponse {
    pub(crate) fn into_reader(self) -> StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes> {
        StreamReader::new(self.stream)
    }

    pub(crate) async fn collect(mut self) -> Result<Vec<u8>, ClientError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.stream.next().await {
            let chunk = chunk
                .map_err(|e| ClientError::Connection(format!("cannot read response body: {e}")))?;
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Side-channel daemon state
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct DaemonState {
    pub maintenance: Option<ServerError>,
    pub warning_count: u64,
    pub warning_timestamp: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Requester
// ---------------------------------------------------------------------------

pub(crate) struct Requester {
    http: PooledClient<CarrierConnector, RequestBody>,
    carrier: Arc<dyn Carrier>,
    user_agent: String,
    retry_interval: Duration,
    retry_timeout: Duration,
    state: Mutex<DaemonState>,
}

impl Requester {
    pub(crate) fn new(
        carrier: Arc<dyn Carrier>,
        user_agent: String,
        keep_alive: bool,
        retry_interval: Option<Duration>,
        retry_timeout: Option<Duration>,
    ) -> Self {
        let mut builder = PooledClient::builder(TokioExecutor::new());
        if !keep_alive {
            builder.pool_max_idle_per_host(0);
        }
        let http = builder.build(CarrierConnector::new(carrier.clone()));
        Requester {
            http,
            carrier,
            user_agent,
            retry_interval: retry_interval.unwrap_or(DEFAULT_RETRY_INTERVAL),
            retry_timeout: retry_timeout.unwrap_or(DEFAULT_RETRY_TIMEOUT),
            state: Mutex::new(DaemonState::default()),
        }
    }

    pub(crate) fn carrier(&self) -> &Arc<dyn Carrier> {
        &self.carrier
    }

    // -- post-processed entry points --

    /// Issue a request and require a `sync` envelope; returns the raw result.
    pub(crate) async fn do_sync(
        &self,
        opts: RequestOptions,
    ) -> Result<Option<Box<RawValue>>, ClientError> {
        let (result, _change) = self.do_envelope(opts, EnvelopeType::Sync).await?;
        Ok(result)
    }

    /// Issue a request and require an `async` envelope with a 202 status and
    /// a change id; returns `(change_id, raw_result)`.
    pub(crate) async fn do_async(
        &self,
        opts: RequestOptions,
    ) -> Result<(String, Option<Box<RawValue>>), ClientError> {
        let (result, change) = self.do_envelope(opts, EnvelopeType::Async).await?;
        Ok((change, result))
    }

    /// Issue a request and hand the body back untouched.  Error statuses are
    /// still lifted from their envelope so raw endpoints share the taxonomy.
    pub(crate) async fn do_raw(&self, opts: RequestOptions) -> Result<RawResponse, ClientError> {
        let resp = self.dispatch(opts).await?;
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        if status.is_client_error() || status.is_server_error() {
            let body = read_body(resp.into_body()).await?;
            let env = parse_envelope(&body)?;
            self.record_side_channel(&env);
            return Err(lift_error(&env, status.as_u16()));
        }
        let stream = BodyDataStream::new(resp.into_body())
            .map_err(io::Error::other)
            .boxed();
        Ok(RawResponse {
            status,
            content_type,
            stream,
        })
    }

    // -- internals --

    async fn do_envelope(
        &self,
        opts: RequestOptions,
        expect: EnvelopeType,
    ) -> Result<(Option<Box<RawValue>>, String), ClientError> {
        let resp = self.dispatch(opts).await?;
        let http_status = resp.status().as_u16();
        let body = read_body(resp.into_body()).await?;
        let env = parse_envelope(&body)?;
        self.record_side_channel(&env);
        match env.kind {
            EnvelopeType::Error => Err(lift_error(&env, http_status)),
            kind if kind == expect => {
                if expect == EnvelopeType::Async {
                    if env.status_code != 202 {
                        return Err(ClientError::ProtocolShape(format!(
                            "expected 202 status for async response, got {}",
                            env.status_code
                        )));
                    }
                    if env.change.is_empty() {
                        return Err(ClientError::ProtocolShape(
                            "async response without change id".to_owned(),
                        ));
                    }
                }
                Ok((env.result, env.change))
            }
            other => Err(ClientError::ProtocolShape(format!(
                "expected {expect} response, got {other}"
            ))),
        }
    }

    /// Send the request, retrying transient dial failures for GETs on a
    /// ticker until the deadline (other methods get exactly one attempt),
    /// and following same-origin redirects up to [`REDIRECT_LIMIT`] hops.
    async fn dispatch(
        &self,
        opts: RequestOptions,
    ) -> Result<http::Response<Incoming>, ClientError> {
        let RequestOptions {
            mut method,
            path,
            query,
            headers,
            body,
        } = opts;
        let deadline = Instant::now() + self.retry_timeout;
        let mut body_slot = Some(body);
        let mut target = self.request_url(&path, &query);
        let mut redirects = 0usize;
        loop {
            let body = match body_slot.take() {
                None | Some(ReqBody::Empty) => {
                    body_slot = Some(ReqBody::Empty);
                    Empty::<Bytes>::new().map_err(io_never).boxed()
                }
                Some(ReqBody::Json(bytes)) => {
                    let built = Full::new(bytes.clone()).map_err(io_never).boxed();
                    body_slot = Some(ReqBody::Json(bytes));
                    built
                }
                Some(ReqBody::Stream(stream)) => stream,
            };
            let request = self.build_request(&method, &target, &headers, body)?;
            match self.http.request(request).await {
                Ok(resp) if matches!(resp.status().as_u16(), 301 | 302 | 303 | 307 | 308) => {
                    let next = self.redirect_target(&target, resp.headers())?;
                    redirects += 1;
                    if redirects > REDIRECT_LIMIT {
                        return Err(ClientError::ProtocolShape(format!(
                            "stopped after {REDIRECT_LIMIT} redirects"
                        )));
                    }
                    let status = resp.status();
                    if status == StatusCode::SEE_OTHER
                        || (status != StatusCode::TEMPORARY_REDIRECT
                            && status != StatusCode::PERMANENT_REDIRECT
                            && method != Method::GET)
                    {
                        // 303, and 301/302 on a non-GET, re-issue as GET.
                        method = Method::GET;
                        body_slot = Some(ReqBody::Empty);
                    } else if body_slot.is_none() {
                        return Err(ClientError::ProtocolShape(
                            "cannot replay streaming request body across redirect".to_owned(),
                        ));
                    }
                    debug!(status = status.as_u16(), location = %next, "following redirect");
                    target = next;
                }
                Ok(resp) => return Ok(resp),
                Err(e)
                    if method == Method::GET && e.is_connect() && Instant::now() < deadline =>
                {
                    debug!(error = %e, path = %path, "transient connection failure, will retry");
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(e) => return Err(map_transport_error(&e)),
            }
        }
    }

    /// Resolve and police a redirect location: same scheme and authority as
    /// the carrier's base, and never an https target in a build without TLS
    /// support.
    fn redirect_target(&self, current: &Url, headers: &HeaderMap) -> Result<Url, ClientError> {
        let location = headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ClientError::ProtocolShape("redirect without a location header".to_owned())
            })?;
        let next = current.join(location).map_err(|e| {
            ClientError::ProtocolShape(format!("invalid redirect location {location:?}: {e}"))
        })?;
        if cfg!(not(feature = "tls")) && next.scheme() == "https" {
            return Err(ClientError::ProtocolShape(format!(
                "refusing redirect to {next}: HTTPS is not supported in this build"
            )));
        }
        let base = self.carrier.http_base();
        let same_origin = next.scheme() == base.scheme()
            && next.host_str() == base.host_str()
            && next.port_or_known_default() == base.port_or_known_default();
        if !same_origin {
            return Err(ClientError::ProtocolShape(format!(
                "refusing redirect outside {base}: {next}"
            )));
        }
        Ok(next)
    }

    fn build_request(
        &self,
        method: &Method,
        target: &Url,
        headers: &[(HeaderName, String)],
        body: RequestBody,
    ) -> Result<http::Request<RequestBody>, ClientError> {
        let uri = Uri::try_from(target.as_str())
            .map_err(|e| ClientError::RequestBuild(format!("invalid request URL: {e}")))?;
        let mut builder = http::Request::builder().method(method.clone()).uri(uri);
        let mut has_user_agent = false;
        let mut has_content_type = false;
        for (name, value) in headers {
            has_user_agent = has_user_agent || *name == USER_AGENT;
            has_content_type = has_content_type || *name == CONTENT_TYPE;
            builder = builder.header(name, value.as_str());
        }
        if !has_user_agent {
            builder = builder.header(USER_AGENT, self.user_agent.as_str());
        }
        if !has_content_type && method != Method::GET {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        builder
            .body(body)
            .map_err(|e| ClientError::RequestBuild(format!("cannot build request: {e}")))
    }

    fn request_url(&self, path: &str, query: &[(String, String)]) -> Url {
        let mut url = join_url(self.carrier.http_base(), path);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Mirror the envelope's maintenance and warning fields into the
    /// per-client state.  Maintenance clears whenever a reply omits it.
    pub(crate) fn record_side_channel(&self, env: &Envelope) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.maintenance = env
            .maintenance
            .as_ref()
            .map(|wire| ServerError::from_wire(wire.clone(), 0));
        state.warning_count = env.warning_count;
        state.warning_timestamp = env.warning_timestamp;
    }

    pub(crate) fn maintenance(&self) -> Option<ServerError> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .maintenance
            .clone()
    }

    pub(crate) fn warning_count(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .warning_count
    }

    pub(crate) fn latest_warning_time(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .warning_timestamp
    }
}

fn io_never(never: std::convert::Infallible) -> io::Error {
    match never {}
}

async fn read_body(body: Incoming) -> Result<Bytes, ClientError> {
    Ok(body
        .collect()
        .await
        .map_err(|e| ClientError::Connection(format!("cannot read response body: {e}")))?
        .to_bytes())
}

/// Recover the dial error from hyper's wrapped chain so socket-not-found
/// keeps its distinct shape; everything else is a generic connection error.
fn map_transport_error(err: &hyper_util::client::legacy::Error) -> ClientError {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(e) = source {
        if let Some(dial) = e.downcast_ref::<DialError>() {
            return match dial {
                DialError::SocketNotFound { path } => ClientError::SocketNotFound {
                    path: path.clone(),
                },
                DialError::Io(io_err) => {
                    ClientError::Connection(format!("cannot connect to daemon: {io_err}"))
                }
            };
        }
        source = e.source();
    }
    ClientError::Connection(format!("cannot communicate with daemon: {err}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
