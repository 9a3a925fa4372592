//! Daemon-level operations: system info, debug, shutdown, pairing.

use serde::de::DeserializeOwned;
use warden_protocol::SysInfo;

use crate::client::Client;
use crate::envelope::decode_result;
use crate::error::ClientError;
use crate::requester::RequestOptions;

impl Client {
    /// Static details of the daemon this client talks to.
    pub async fn sys_info(&self) -> Result<SysInfo, ClientError> {
        let result = self
            .requester()
            .do_sync(RequestOptions::get("/v1/system-info"))
            .await
            .map_err(|e| match e {
                ClientError::ProtocolShape(msg) => {
                    ClientError::ProtocolShape(format!("cannot obtain system details: {msg}"))
                }
                other => other,
            })?;
        decode_result(result.as_deref(), "system details")
    }

    /// Read a debug aspect.  The payload shape is aspect-specific; callers
    /// pick the target type.
    pub async fn debug_get<T: DeserializeOwned>(&self, aspect: &str) -> Result<T, ClientError> {
        let result = self
            .requester()
            .do_sync(RequestOptions::get("/v1/debug").query("aspect", aspect))
            .await?;
        decode_result(result.as_deref(), "debug result")
    }

    /// Invoke a debug action with an arbitrary JSON payload.
    pub async fn debug_post<T: DeserializeOwned>(
        &self,
        action: &str,
        payload: &serde_json::Value,
    ) -> Result<T, ClientError> {
        let body = serde_json::json!({ "action": action, "payload": payload });
        let result = self
            .requester()
            .do_sync(RequestOptions::post_json("/v1/debug", &body)?)
            .await?;
        decode_result(result.as_deref(), "debug result")
    }

    /// Ask the daemon to shut down.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.requester()
            .do_sync(RequestOptions::post_json(
                "/v1/shutdown",
                &serde_json::json!({}),
            )?)
            .await?;
        Ok(())
    }
}

/// Identity material recorded from a pairing handshake.
#[cfg(feature = "tls")]
#[derive(Debug, Clone)]
pub struct PairedIdentity {
    /// DER of the identity certificate the server presented.
    pub certificate_der: Vec<u8>,
    /// Its fingerprint, usable directly as [`crate::Config::fingerprint`].
    pub fingerprint: String,
}

#[cfg(feature = "tls")]
impl Client {
    /// One-shot pairing handshake: ask the daemon to pair, then record the
    /// identity certificate observed on this connection so later clients can
    /// pin it.  Requires a TLS carrier, normally in insecure mode.
    pub async fn pair(&self) -> Result<PairedIdentity, ClientError> {
        self.requester()
            .do_sync(RequestOptions::post_json(
                "/v1/pairing",
                &serde_json::json!({ "action": "pair" }),
            )?)
            .await?;
        let certificate_der = self.requester().carrier().seen_identity().ok_or_else(|| {
            ClientError::ProtocolShape(
                "no server identity observed; pairing needs a TLS connection".to_owned(),
            )
        })?;
        let fingerprint = crate::tls::identity_fingerprint(&certificate_der)
            .map_err(ClientError::ProtocolShape)?;
        Ok(PairedIdentity {
            certificate_der,
            fingerprint,
        })
    }
}
