//! Framed log stream decoding.
//!
//! Wire format: one line of JSON metadata terminated by a newline, followed
//! by exactly `length` payload bytes, then the next metadata line or
//! end-of-stream.  The decoder enforces the declared length itself; a short
//! payload is a de-framing error, never silently tolerated.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use warden_protocol::{LogMeta, LogStream};

use crate::client::Client;
use crate::error::ClientError;
use crate::requester::RequestOptions;

/// Options for [`Client::logs`] and [`Client::follow_logs`].
#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    /// Only logs from these services; empty means all.
    pub services: Vec<String>,
    /// Return at most this many lines.  `None` leaves the server default.
    pub n: Option<i32>,
}

/// One decoded log record.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub service: String,
    pub stream: LogStream,
    pub message: Bytes,
}

impl Client {
    /// Fetch buffered logs and hand each record to `write_log` in daemon
    /// emission order.
    pub async fn logs<F>(&self, opts: &LogsOptions, write_log: F) -> Result<(), ClientError>
    where
        F: FnMut(LogEntry),
    {
        self.logs_inner(opts, false, write_log).await
    }

    /// Like [`Client::logs`] but keeps the stream open, delivering records
    /// as services emit them.  Runs until the daemon closes the stream or
    /// the future is dropped.
    pub async fn follow_logs<F>(&self, opts: &LogsOptions, write_log: F) -> Result<(), ClientError>
    where
        F: FnMut(LogEntry),
    {
        self.logs_inner(opts, true, write_log).await
    }

    async fn logs_inner<F>(
        &self,
        opts: &LogsOptions,
        follow: bool,
        write_log: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(LogEntry),
    {
        let mut request = RequestOptions::get("/v1/logs");
        for service in &opts.services {
            request = request.query("services", service.clone());
        }
        if let Some(n) = opts.n {
            if n != 0 {
                request = request.query("n", n.to_string());
            }
        }
        if follow {
            request = request.query("follow", "true");
        }
        let raw = self.requester().do_raw(request).await?;
        decode_log_stream(raw.into_reader(), write_log).await
    }
}

/// Decode frames until end-of-stream, invoking `write_log` per record.
async fn decode_log_stream<R, F>(mut reader: R, mut write_log: F) -> Result<(), ClientError>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(LogEntry),
{
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| ClientError::Connection(format!("cannot read log metadata: {e}")))?;
        if n == 0 {
            return Ok(());
        }
        let meta: LogMeta = serde_json::from_str(line.trim_end_matches(['\r', '\n']))
            .map_err(|e| {
                ClientError::ProtocolShape(format!(
                    "cannot decode log metadata: {e} (line: {line:?})"
                ))
            })?;
        let length = usize::try_from(meta.length).map_err(|_| {
            ClientError::ProtocolShape(format!("log payload length {} too large", meta.length))
        })?;
        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload).await.map_err(|e| {
            ClientError::ProtocolShape(format!(
                "log payload shorter than declared length {length}: {e}"
            ))
        })?;
        write_log(LogEntry {
            time: meta.time,
            service: meta.service,
            stream: meta.stream,
            message: payload.into(),
        });
    }
}
