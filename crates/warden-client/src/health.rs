//! Health query.

use serde::Deserialize;
use warden_protocol::CheckLevel;

use crate::client::Client;
use crate::envelope::decode_result;
use crate::error::ClientError;
use crate::requester::RequestOptions;

/// Filters for [`Client::health`].
#[derive(Debug, Clone, Default)]
pub struct HealthOptions {
    pub level: Option<CheckLevel>,
    pub names: Vec<String>,
}

#[derive(Deserialize)]
struct HealthResult {
    healthy: bool,
}

impl Client {
    /// Whether the selected checks are all up.  An unhealthy daemon replies
    /// with an error envelope whose value still carries the flag; that case
    /// decodes to `false` rather than an error.
    pub async fn health(&self, opts: &HealthOptions) -> Result<bool, ClientError> {
        let mut request = RequestOptions::get("/v1/health");
        if let Some(level) = opts.level {
            request = request.query("level", level.wire_name());
        }
        if !opts.names.is_empty() {
            request = request.query("names", opts.names.join(","));
        }
        match self.requester().do_sync(request).await {
            Ok(result) => {
                let health: HealthResult = decode_result(result.as_deref(), "health")?;
                Ok(health.healthy)
            }
            Err(ClientError::Server(err)) => {
                let unhealthy = err
                    .value
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<HealthResult>(raw.get()).ok())
                    .map(|h| !h.healthy)
                    .unwrap_or(false);
                if unhealthy {
                    Ok(false)
                } else {
                    Err(ClientError::Server(err))
                }
            }
            Err(e) => Err(e),
        }
    }
}
