//! Signal delivery to running services.

use serde::Serialize;

use crate::client::Client;
use crate::error::ClientError;
use crate::requester::RequestOptions;

#[derive(Serialize)]
struct SignalPayload<'a> {
    signal: &'a str,
    services: &'a [String],
}

impl Client {
    /// Send a POSIX signal, by name, to each of the named services.
    pub async fn send_signal(&self, signal: &str, services: &[String]) -> Result<(), ClientError> {
        let payload = SignalPayload { signal, services };
        self.requester()
            .do_sync(RequestOptions::post_json("/v1/signals", &payload)?)
            .await?;
        Ok(())
    }
}
