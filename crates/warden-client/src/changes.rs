//! Asynchronous change tracking: get, list, wait, abort.

use std::time::Duration;

use warden_protocol::{Change, duration_wire};

use crate::client::Client;
use crate::envelope::decode_result;
use crate::error::ClientError;
use crate::requester::RequestOptions;

/// Which changes [`Client::changes`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeSelector {
    #[default]
    InProgress,
    Ready,
    All,
}

impl ChangeSelector {
    fn wire_name(self) -> &'static str {
        match self {
            ChangeSelector::InProgress => "in-progress",
            ChangeSelector::Ready => "ready",
            ChangeSelector::All => "all",
        }
    }
}

/// Filters for [`Client::changes`].
#[derive(Debug, Clone, Default)]
pub struct ChangesOptions {
    pub selector: ChangeSelector,
    /// Only changes touching this service.
    pub service: Option<String>,
}

/// Change ids are lowercase alphanumerics; anything else fails locally
/// before any network traffic.
fn validate_change_id(id: &str) -> Result<(), ClientError> {
    let valid =
        !id.is_empty() && id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(ClientError::RequestBuild(format!("invalid change id {id:?}")))
    }
}

impl Client {
    /// Fetch a snapshot of one change.
    pub async fn change(&self, id: &str) -> Result<Change, ClientError> {
        validate_change_id(id)?;
        let result = self
            .requester()
            .do_sync(RequestOptions::get(format!("/v1/changes/{id}")))
            .await?;
        decode_result(result.as_deref(), "change")
    }

    /// List changes matching the selector.
    pub async fn changes(&self, opts: &ChangesOptions) -> Result<Vec<Change>, ClientError> {
        let mut request =
            RequestOptions::get("/v1/changes").query("select", opts.selector.wire_name());
        if let Some(service) = &opts.service {
            request = request.query("for", service.clone());
        }
        let result = self.requester().do_sync(request).await?;
        decode_result(result.as_deref(), "changes")
    }

    /// Abort a change; returns the updated snapshot.
    pub async fn abort_change(&self, id: &str) -> Result<Change, ClientError> {
        validate_change_id(id)?;
        let body = serde_json::json!({ "action": "abort" });
        let result = self
            .requester()
            .do_sync(RequestOptions::post_json(format!("/v1/changes/{id}"), &body)?)
            .await?;
        decode_result(result.as_deref(), "change")
    }

    /// Long-poll until the change is ready, forwarding `timeout` to the
    /// server.  A 504 reply means "nothing yet" and polls again.
    pub async fn wait_change(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<Change, ClientError> {
        validate_change_id(id)?;
        self.wait_change_internal(id, timeout).await
    }

    pub(crate) async fn wait_change_internal(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<Change, ClientError> {
        loop {
            let mut request = RequestOptions::get(format!("/v1/changes/{id}/wait"));
            if let Some(timeout) = timeout {
                request = request.query("timeout", duration_wire(timeout));
            }
            match self.requester().do_sync(request).await {
                Ok(result) => return decode_result(result.as_deref(), "change"),
                Err(ClientError::Server(err)) if err.status_code == 504 => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
