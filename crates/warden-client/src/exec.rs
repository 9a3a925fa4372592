//! Interactive command execution.
//!
//! One exec call starts an asynchronous change, opens the `control` and
//! `stdio` websockets (plus `stderr` when the caller wants it split), and
//! runs a byte pump per direction.  An orchestrator task awaits the output
//! pumps, closes every websocket, and releases a writes-done latch that
//! [`ExecProcess::wait`] blocks on so no output is lost.  The stdin pump is
//! never joined on that path: a reader blocked in `read` must not wedge
//! teardown, so its completion signal is absorbed by a detached task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};
use warden_protocol::{DataError, ExecCommand, ExecResize, ExecSignal, duration_wire};

use crate::client::Client;
use crate::envelope::decode_result;
use crate::error::ClientError;
use crate::requester::RequestOptions;
use crate::transport::WsStream;

/// Stdin is shipped in chunks of at least this size.
const STDIN_CHUNK: usize = 128 * 1024;

type WsSink = SplitSink<WsStream, Message>;
type SharedSink = Arc<Mutex<WsSink>>;

pub type ExecReader = Box<dyn AsyncRead + Send + Unpin>;
pub type ExecWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Options for [`Client::exec`].
#[derive(Default)]
pub struct ExecOptions {
    /// Command and arguments; must be non-empty.
    pub command: Vec<String>,
    /// Run inside the environment of this service.
    pub service_context: Option<String>,
    pub environment: HashMap<String, String>,
    pub working_dir: Option<String>,
    /// Server-side time limit for the process.
    pub timeout: Option<Duration>,
    pub user_id: Option<u32>,
    pub user: Option<String>,
    pub group_id: Option<u32>,
    pub group: Option<String>,
    /// Allocate a pseudo-terminal.
    pub terminal: bool,
    /// Keep stdin open for interaction.
    pub interactive: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Bytes to feed the process; end-of-stream closes its stdin.
    pub stdin: Option<ExecReader>,
    pub stdout: Option<ExecWriter>,
    /// Supplying a distinct stderr writer requests split-stderr transport.
    pub stderr: Option<ExecWriter>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ExecPayload<'a> {
    command: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    service_context: Option<&'a str>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    environment: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<&'a str>,
    terminal: bool,
    interactive: bool,
    split_stderr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ExecResult {
    task_id: String,
}

/// Terminal state of a session, cached so `wait` is idempotent.
#[derive(Debug, Clone)]
enum Outcome {
    Exited(i32),
    Failed(String),
}

/// A running remote process.
///
/// Lives from a successful [`Client::exec`] until [`ExecProcess::wait`]
/// returns; the websockets are owned by the session and closed during
/// teardown.
pub struct ExecProcess {
    client: Client,
    change_id: String,
    task_id: String,
    timeout: Option<Duration>,
    control: SharedSink,
    writes_done: watch::Receiver<bool>,
    outcome: Option<Outcome>,
}

impl std::fmt::Debug for ExecProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecProcess")
            .field("change_id", &self.change_id)
            .field("task_id", &self.task_id)
            .field("timeout", &self.timeout)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Start a remote process and wire its stdio to the caller's streams.
    ///
    /// Structural failures (request, websocket opening) surface here; the
    /// process outcome surfaces from [`ExecProcess::wait`].
    pub async fn exec(&self, opts: ExecOptions) -> Result<ExecProcess, ClientError> {
        if opts.command.is_empty() {
            return Err(ClientError::RequestBuild(
                "exec command must not be empty".to_owned(),
            ));
        }
        let split_stderr = opts.stderr.is_some();
        let payload = ExecPayload {
            command: &opts.command,
            service_context: opts.service_context.as_deref(),
            environment: &opts.environment,
            working_dir: opts.working_dir.as_deref(),
            timeout: opts.timeout.map(duration_wire),
            user_id: opts.user_id,
            user: opts.user.as_deref(),
            group_id: opts.group_id,
            group: opts.group.as_deref(),
            terminal: opts.terminal,
            interactive: opts.interactive,
            split_stderr,
            width: opts.width,
            height: opts.height,
        };
        let (change_id, result) = self
            .requester()
            .do_async(RequestOptions::post_json("/v1/exec", &payload)?)
            .await?;
        let exec_result: ExecResult = decode_result(result.as_deref(), "exec result")?;
        let task_id = exec_result.task_id;
        debug!(%change_id, %task_id, split_stderr, "exec change started");

        // All websockets must open or the whole start fails.
        let control_ws = self.task_websocket(&task_id, "control").await?;
        let stdio_ws = self.task_websocket(&task_id, "stdio").await?;
        let stderr_ws = if split_stderr {
            Some(self.task_websocket(&task_id, "stderr").await?)
        } else {
            None
        };

        let (control_sink, _control_stream) = control_ws.split();
        let control: SharedSink = Arc::new(Mutex::new(control_sink));
        let (stdio_sink, stdio_stream) = stdio_ws.split();
        let stdio_sink: SharedSink = Arc::new(Mutex::new(stdio_sink));

        // Stdin pump: caller reader -> stdio websocket, end marker on EOF.
        let (stdin_done_tx, stdin_done_rx) = oneshot::channel();
        let stdin = opts.stdin.unwrap_or_else(|| Box::new(tokio::io::empty()));
        tokio::spawn(pump_stdin(stdin, stdio_sink.clone(), stdin_done_tx));

        // Output pumps: websocket -> caller writers.
        let stdout = opts.stdout.unwrap_or_else(|| Box::new(tokio::io::sink()));
        let stdout_task = tokio::spawn(pump_output("stdout", stdio_stream, stdout));
        let (stderr_task, stderr_sink) = match (stderr_ws, opts.stderr) {
            (Some(ws), Some(writer)) => {
                let (sink, stream) = ws.split();
                let task = tokio::spawn(pump_output("stderr", stream, writer));
                (Some(task), Some(Arc::new(Mutex::new(sink))))
            }
            _ => (None, None),
        };

        let (done_tx, writes_done) = watch::channel(false);
        tokio::spawn(orchestrate(
            stdout_task,
            stderr_task,
            stdio_sink,
            stderr_sink,
            control.clone(),
            stdin_done_rx,
            done_tx,
        ));

        Ok(ExecProcess {
            client: self.clone(),
            change_id,
            task_id,
            timeout: opts.timeout,
            control,
            writes_done,
            outcome: None,
        })
    }

    async fn task_websocket(&self, task_id: &str, name: &str) -> Result<WsStream, ClientError> {
        self.websocket(&format!("/v1/tasks/{task_id}/websocket/{name}"))
            .await
    }
}

impl ExecProcess {
    /// The change driving this process.
    pub fn change_id(&self) -> &str {
        &self.change_id
    }

    /// The task whose websockets this session owns.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Wait for the process to finish and its output to drain.
    ///
    /// The change is polled with a server-side timeout one second past the
    /// exec timeout, so the server's own limit always fires first.  A change
    /// error surfaces as [`ClientError::ChangeFailed`]; a non-zero exit code
    /// as [`ClientError::ExitNonZero`].  Idempotent once the process exited.
    pub async fn wait(&mut self) -> Result<(), ClientError> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone().into_result();
        }
        let server_timeout = self.timeout.map(|t| t + Duration::from_secs(1));
        let change = self
            .client
            .wait_change_internal(&self.change_id, server_timeout)
            .await?;

        // All output written before the call returns.
        let mut writes_done = self.writes_done.clone();
        let _ = writes_done.wait_for(|done| *done).await;

        if let Some(err) = change.err.as_deref().filter(|e| !e.is_empty()) {
            let outcome = Outcome::Failed(err.to_owned());
            self.outcome = Some(outcome.clone());
            return outcome.into_result();
        }
        let task = change.tasks.first().ok_or_else(|| {
            ClientError::ProtocolShape("exec change has no tasks".to_owned())
        })?;
        let code: i32 = match task.get("exit-code") {
            Ok(code) => code,
            Err(DataError::NoSuchData { .. }) => {
                return Err(ClientError::ProtocolShape(
                    "exec task carries no exit code".to_owned(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        let outcome = Outcome::Exited(code);
        self.outcome = Some(outcome.clone());
        outcome.into_result()
    }

    /// Deliver a POSIX signal, by name, to the running process.
    /// Fire-and-forget.
    pub async fn send_signal(&mut self, name: &str) -> Result<(), ClientError> {
        self.send_control(&ExecCommand {
            command: "signal".to_owned(),
            signal: Some(ExecSignal {
                name: name.to_owned(),
            }),
            resize: None,
        })
        .await
    }

    /// Resize the remote pseudo-terminal.  Fire-and-forget.
    pub async fn send_resize(&mut self, width: u32, height: u32) -> Result<(), ClientError> {
        self.send_control(&ExecCommand {
            command: "resize".to_owned(),
            signal: None,
            resize: Some(ExecResize { width, height }),
        })
        .await
    }

    // Takes &mut self: control writes are strictly ordered as submitted and
    // callers must not interleave them.
    async fn send_control(&mut self, command: &ExecCommand) -> Result<(), ClientError> {
        let json = serde_json::to_string(command)
            .map_err(|e| ClientError::RequestBuild(format!("cannot encode control message: {e}")))?;
        self.control
            .lock()
            .await
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ClientError::Connection(format!("cannot write control message: {e}")))
    }
}

impl Outcome {
    fn into_result(self) -> Result<(), ClientError> {
        match self {
            Outcome::Exited(0) => Ok(()),
            Outcome::Exited(code) => Err(ClientError::ExitNonZero { code }),
            Outcome::Failed(message) => Err(ClientError::ChangeFailed { message }),
        }
    }
}

// ---------------------------------------------------------------------------
// Pumps
// ---------------------------------------------------------------------------

/// Caller reader -> binary messages on `stdio`; one empty text message marks
/// end-of-stdin.  The sink lock is held only per send, never across a read,
/// so teardown can always close the socket under a blocked reader.
async fn pump_stdin(mut src: ExecReader, sink: SharedSink, done: oneshot::Sender<()>) {
    let mut buf = vec![0u8; STDIN_CHUNK];
    loop {
        match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if let Err(e) = sink.lock().await.send(Message::Binary(chunk)).await {
                    debug!(error = %e, "stdin pump: websocket write ended");
                    let _ = done.send(());
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "stdin pump: read failed, abandoning");
                break;
            }
        }
    }
    let _ = sink.lock().await.send(Message::Text("".into())).await;
    let _ = done.send(());
}

/// Websocket -> caller writer.  A text message is the end-of-stream barrier;
/// a close frame ends the pump too.
async fn pump_output(name: &'static str, mut src: SplitStream<WsStream>, mut dst: ExecWriter) {
    while let Some(message) = src.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                if let Err(e) = dst.write_all(&data).await {
                    warn!(error = %e, pump = name, "write failed, abandoning pump");
                    return;
                }
            }
            Ok(Message::Text(_)) => break,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, pump = name, "websocket ended");
                break;
            }
        }
    }
    let _ = dst.flush().await;
    debug!(pump = name, "output pump done");
}

/// Await the output pumps, close every websocket (best effort), release the
/// writes-done latch.  Stdin is deliberately not joined: its completion
/// signal is absorbed by a detached task so a blocked reader cannot wedge
/// teardown.
async fn orchestrate(
    stdout_task: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
    stdio_sink: SharedSink,
    stderr_sink: Option<SharedSink>,
    control_sink: SharedSink,
    stdin_done: oneshot::Receiver<()>,
    done: watch::Sender<bool>,
) {
    let _ = stdout_task.await;
    if let Some(task) = stderr_task {
        let _ = task.await;
    }
    close_sink(&stdio_sink).await;
    if let Some(sink) = &stderr_sink {
        close_sink(sink).await;
    }
    close_sink(&control_sink).await;
    tokio::spawn(async move {
        let _ = stdin_done.await;
    });
    let _ = done.send(true);
    debug!("exec session writes done");
}

async fn close_sink(sink: &SharedSink) {
    let mut sink = sink.lock().await;
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.flush().await;
}
