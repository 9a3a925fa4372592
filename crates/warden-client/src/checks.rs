//! Health-check operations.

use serde::Deserialize;
use warden_protocol::{CheckInfo, CheckLevel};

use crate::client::Client;
use crate::envelope::decode_result;
use crate::error::ClientError;
use crate::requester::RequestOptions;

/// Filters for [`Client::checks`].
#[derive(Debug, Clone, Default)]
pub struct ChecksOptions {
    pub level: Option<CheckLevel>,
    /// Check names to include; empty means all.
    pub names: Vec<String>,
}

#[derive(Deserialize)]
struct ChecksActionResult {
    #[serde(default)]
    changed: Vec<String>,
}

impl Client {
    /// List checks, optionally filtered by level and names.
    pub async fn checks(&self, opts: &ChecksOptions) -> Result<Vec<CheckInfo>, ClientError> {
        let mut request = RequestOptions::get("/v1/checks");
        if let Some(level) = opts.level {
            request = request.query("level", level.wire_name());
        }
        for name in &opts.names {
            request = request.query("names", name.clone());
        }
        let result = self.requester().do_sync(request).await?;
        decode_result(result.as_deref(), "checks")
    }

    /// Look up a single check by name.
    pub async fn check(&self, name: &str) -> Result<CheckInfo, ClientError> {
        let result = self
            .requester()
            .do_sync(RequestOptions::get("/v1/check").query("name", name))
            .await?;
        decode_result(result.as_deref(), "check")
    }

    /// Start the named checks; returns the names whose state changed.
    pub async fn start_checks(&self, names: &[String]) -> Result<Vec<String>, ClientError> {
        self.checks_action("start", names).await
    }

    /// Stop the named checks; returns the names whose state changed.
    pub async fn stop_checks(&self, names: &[String]) -> Result<Vec<String>, ClientError> {
        self.checks_action("stop", names).await
    }

    async fn checks_action(
        &self,
        action: &str,
        names: &[String],
    ) -> Result<Vec<String>, ClientError> {
        let body = serde_json::json!({ "action": action, "checks": names });
        let result = self
            .requester()
            .do_sync(RequestOptions::post_json("/v1/checks", &body)?)
            .await?;
        let outcome: ChecksActionResult = decode_result(result.as_deref(), "checks action")?;
        Ok(outcome.changed)
    }
}
