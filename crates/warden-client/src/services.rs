//! Service listing and lifecycle actions.
//!
//! All lifecycle actions are asynchronous on the daemon side; they return
//! the change id to follow with [`Client::wait_change`].

use serde::Serialize;
use warden_protocol::ServiceInfo;

use crate::client::Client;
use crate::envelope::decode_result;
use crate::error::ClientError;
use crate::requester::RequestOptions;

/// Filters for [`Client::services`].
#[derive(Debug, Clone, Default)]
pub struct ServicesOptions {
    /// Service names to include; empty means all.
    pub names: Vec<String>,
}

#[derive(Serialize)]
struct ServiceActionPayload<'a> {
    action: &'a str,
    services: &'a [String],
}

impl Client {
    /// List services and their current status.
    pub async fn services(&self, opts: &ServicesOptions) -> Result<Vec<ServiceInfo>, ClientError> {
        let mut request = RequestOptions::get("/v1/services");
        if !opts.names.is_empty() {
            request = request.query("names", opts.names.join(","));
        }
        let result = self.requester().do_sync(request).await?;
        decode_result(result.as_deref(), "services")
    }

    /// Start the services marked for automatic startup.
    pub async fn autostart(&self) -> Result<String, ClientError> {
        self.service_action("autostart", &[]).await
    }

    /// Start the named services.
    pub async fn start(&self, services: &[String]) -> Result<String, ClientError> {
        self.service_action("start", services).await
    }

    /// Stop the named services.
    pub async fn stop(&self, services: &[String]) -> Result<String, ClientError> {
        self.service_action("stop", services).await
    }

    /// Restart the named services.
    pub async fn restart(&self, services: &[String]) -> Result<String, ClientError> {
        self.service_action("restart", services).await
    }

    /// Stop and restart whatever the current plan requires.
    pub async fn replan(&self) -> Result<String, ClientError> {
        self.service_action("replan", &[]).await
    }

    async fn service_action(
        &self,
        action: &str,
        services: &[String],
    ) -> Result<String, ClientError> {
        let payload = ServiceActionPayload { action, services };
        let (change_id, _result) = self
            .requester()
            .do_async(RequestOptions::post_json("/v1/services", &payload)?)
            .await?;
        Ok(change_id)
    }
}
