//! The client façade.
//!
//! One [`Client`] per daemon; all operations share its connection pool and
//! its side-channel state (maintenance error, warning high-water mark).
//! Cloning is cheap and clones share everything.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{Config, DEFAULT_SOCKET_PATH};
use crate::error::{ClientError, ServerError};
use crate::requester::Requester;
use crate::transport::{Carrier, TcpCarrier, WsStream, dial_websocket};

/// Client for the wardend API.
#[derive(Clone)]
pub struct Client {
    requester: Arc<Requester>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client from `config`.  Exactly one of `socket_path` /
    /// `base_url` may be set; with neither, the default socket path is used.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let carrier = build_carrier(config)?;
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("warden-client/{}", env!("CARGO_PKG_VERSION")));
        let requester = Requester::new(
            carrier,
            user_agent,
            !config.disable_keep_alive,
            config.dial_retry_interval,
            config.dial_retry_timeout,
        );
        Ok(Client {
            requester: Arc::new(requester),
        })
    }

    /// Maintenance error from the most recent reply, if the daemon reported
    /// one.  Cleared again by the first reply without a maintenance field.
    pub fn maintenance(&self) -> Option<ServerError> {
        self.requester.maintenance()
    }

    /// Warning count from the most recent reply.
    pub fn warning_count(&self) -> u64 {
        self.requester.warning_count()
    }

    /// Timestamp of the most recently repeated warning, if any.
    pub fn latest_warning_time(&self) -> Option<DateTime<Utc>> {
        self.requester.latest_warning_time()
    }

    pub(crate) fn requester(&self) -> &Requester {
        &self.requester
    }

    /// Open a websocket at `path` over the carrier's transport.
    pub(crate) async fn websocket(&self, path: &str) -> Result<WsStream, ClientError> {
        dial_websocket(self.requester.carrier().as_ref(), path).await
    }
}

fn build_carrier(config: &Config) -> Result<Arc<dyn Carrier>, ClientError> {
    match (&config.base_url, &config.socket_path) {
        (Some(_), Some(_)) => Err(ClientError::RequestBuild(
            "config must set base_url or socket_path, not both".to_owned(),
        )),
        (Some(base_url), None) => {
            let scheme = base_url.split("://").next().unwrap_or_default();
            match scheme {
                "http" => Ok(Arc::new(TcpCarrier::plain(base_url)?)),
                #[cfg(feature = "tls")]
                "https" => {
                    let probe = url::Url::parse(base_url).map_err(|e| {
                        ClientError::RequestBuild(format!("invalid base URL {base_url:?}: {e}"))
                    })?;
                    let host = probe.host_str().ok_or_else(|| {
                        ClientError::RequestBuild(format!("base URL {base_url:?} has no host"))
                    })?;
                    let tls = crate::tls::TlsContext::new(host, config)?;
                    Ok(Arc::new(TcpCarrier::tls(base_url, Arc::new(tls))?))
                }
                other => Err(ClientError::RequestBuild(format!(
                    "unsupported scheme {other:?} in base URL (this build speaks plain http{})",
                    if cfg!(feature = "tls") { " and https" } else { "" }
                ))),
            }
        }
        (None, socket_path) => {
            let path = socket_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));
            socket_carrier(path)
        }
    }
}

#[cfg(unix)]
fn socket_carrier(path: PathBuf) -> Result<Arc<dyn Carrier>, ClientError> {
    Ok(Arc::new(crate::transport::SocketCarrier::new(path)))
}

#[cfg(not(unix))]
fn socket_carrier(path: PathBuf) -> Result<Arc<dyn Carrier>, ClientError> {
    Err(ClientError::RequestBuild(format!(
        "socket transport is not available on this platform ({})",
        path.display()
    )))
}
