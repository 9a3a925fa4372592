//! Notice operations: list, get, add, long-poll.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use warden_protocol::{Notice, NoticeType, duration_wire};

use crate::client::Client;
use crate::envelope::decode_result;
use crate::error::ClientError;
use crate::requester::RequestOptions;

/// Filters for [`Client::notices`] and [`Client::wait_notices`].
#[derive(Debug, Clone, Default)]
pub struct NoticesOptions {
    pub types: Vec<NoticeType>,
    pub keys: Vec<String>,
    /// Restrict to notices owned by this user id.
    pub user_id: Option<u64>,
    /// Set to request notices from all users (admin only).
    pub all_users: bool,
    /// Only notices that occurred after this instant.
    pub after: Option<DateTime<Utc>>,
}

impl NoticesOptions {
    fn apply(&self, mut request: RequestOptions) -> RequestOptions {
        for notice_type in &self.types {
            request = request.query("types", notice_type.wire_name());
        }
        for key in &self.keys {
            request = request.query("keys", key.clone());
        }
        if let Some(user_id) = self.user_id {
            request = request.query("user-id", user_id.to_string());
        }
        if self.all_users {
            request = request.query("users", "all");
        }
        if let Some(after) = self.after {
            request = request.query("after", after.to_rfc3339_opts(SecondsFormat::Nanos, true));
        }
        request
    }
}

/// Options for [`Client::notify`].
#[derive(Debug, Clone, Default)]
pub struct NotifyOptions {
    pub key: String,
    /// Suppress re-occurrence bumps for this long.
    pub repeat_after: Option<Duration>,
    pub data: Option<HashMap<String, String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct NotifyPayload<'a> {
    action: &'a str,
    #[serde(rename = "type")]
    notice_type: &'a str,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a HashMap<String, String>>,
}

#[derive(Deserialize)]
struct NotifyResult {
    id: String,
}

impl Client {
    /// Fetch one notice by id.
    pub async fn notice(&self, id: &str) -> Result<Notice, ClientError> {
        let result = self
            .requester()
            .do_sync(RequestOptions::get(format!("/v1/notices/{id}")))
            .await?;
        decode_result(result.as_deref(), "notice")
    }

    /// List notices matching the filters.
    pub async fn notices(&self, opts: &NoticesOptions) -> Result<Vec<Notice>, ClientError> {
        let request = opts.apply(RequestOptions::get("/v1/notices"));
        let result = self.requester().do_sync(request).await?;
        decode_result(result.as_deref(), "notices")
    }

    /// Record an occurrence of a custom (client) notice; returns the notice
    /// id the daemon assigned.
    pub async fn notify(&self, opts: &NotifyOptions) -> Result<String, ClientError> {
        let payload = NotifyPayload {
            action: "add",
            notice_type: NoticeType::Client.wire_name(),
            key: &opts.key,
            repeat_after: opts.repeat_after.map(duration_wire),
            data: opts.data.as_ref(),
        };
        let result = self
            .requester()
            .do_sync(RequestOptions::post_json("/v1/notices", &payload)?)
            .await?;
        let outcome: NotifyResult = decode_result(result.as_deref(), "notice id")?;
        Ok(outcome.id)
    }

    /// Long-poll for notices matching the filters.  The server answering
    /// 504 means nothing arrived within `timeout`; that is an empty result,
    /// not an error.
    pub async fn wait_notices(
        &self,
        opts: &NoticesOptions,
        timeout: Duration,
    ) -> Result<Vec<Notice>, ClientError> {
        let request = opts
            .apply(RequestOptions::get("/v1/notices"))
            .query("timeout", duration_wire(timeout));
        match self.requester().do_sync(request).await {
            Ok(result) => decode_result(result.as_deref(), "notices"),
            Err(ClientError::Server(err)) if err.status_code == 504 => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
