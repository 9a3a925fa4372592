//! Plan retrieval and layer management.

use serde::Serialize;

use crate::client::Client;
use crate::envelope::decode_result;
use crate::error::ClientError;
use crate::requester::RequestOptions;

/// Options for [`Client::add_layer`].
#[derive(Debug, Clone, Default)]
pub struct AddLayerOptions {
    /// Merge into an existing layer with the same label instead of appending.
    pub combine: bool,
    /// Insert before existing layers rather than after; server-side
    /// semantics, forwarded verbatim.
    pub inner: bool,
    pub label: String,
    /// YAML text of the layer.
    pub layer_data: String,
}

#[derive(Serialize)]
struct AddLayerPayload<'a> {
    action: &'a str,
    combine: bool,
    inner: bool,
    label: &'a str,
    format: &'a str,
    layer: &'a str,
}

impl Client {
    /// The combined plan as raw YAML bytes.
    pub async fn plan_bytes(&self) -> Result<Vec<u8>, ClientError> {
        let result = self
            .requester()
            .do_sync(RequestOptions::get("/v1/plan").query("format", "yaml"))
            .await?;
        let yaml: String = decode_result(result.as_deref(), "plan")?;
        Ok(yaml.into_bytes())
    }

    /// The combined plan, parsed into a YAML document.
    pub async fn plan(&self) -> Result<serde_yaml::Value, ClientError> {
        let bytes = self.plan_bytes().await?;
        serde_yaml::from_slice(&bytes)
            .map_err(|e| ClientError::ProtocolShape(format!("cannot parse plan YAML: {e}")))
    }

    /// Append (or combine) a configuration layer.
    pub async fn add_layer(&self, opts: &AddLayerOptions) -> Result<(), ClientError> {
        let payload = AddLayerPayload {
            action: "add",
            combine: opts.combine,
            inner: opts.inner,
            label: &opts.label,
            format: "yaml",
            layer: &opts.layer_data,
        };
        self.requester()
            .do_sync(RequestOptions::post_json("/v1/layers", &payload)?)
            .await?;
        Ok(())
    }
}
