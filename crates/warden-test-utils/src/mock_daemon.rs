// mock_daemon: a scripted wardend for client integration tests.
//
// Every non-websocket request is recorded and answered from a FIFO queue of
// scripted replies (404 error envelope when the queue is empty).  The exec
// websocket routes implement just enough behaviour to drive a full session:
// stdin capture up to the end marker, scripted stdout/stderr chunks followed
// by the end-of-stream barrier, and control message capture.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as RoutePath, Request, State};
use axum::response::Response;
use axum::routing::any;
use bytes::Bytes;
use tokio::net::TcpListener;

// ---------------------------------------------------------------------------
// Scripted replies
// ---------------------------------------------------------------------------

/// One canned HTTP reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Extra response headers, e.g. `location` for redirects.
    pub headers: Vec<(String, String)>,
}

impl Reply {
    /// A `sync` envelope with the given result.
    pub fn sync(result: serde_json::Value) -> Self {
        Self::envelope(serde_json::json!({
            "type": "sync",
            "status-code": 200,
            "status": "OK",
            "result": result,
        }))
    }

    /// An `async` envelope carrying a change id and result.
    pub fn change(change_id: &str, result: serde_json::Value) -> Self {
        let mut reply = Self::envelope(serde_json::json!({
            "type": "async",
            "status-code": 202,
            "status": "Accepted",
            "change": change_id,
            "result": result,
        }));
        reply.status = 202;
        reply
    }

    /// An `error` envelope.
    pub fn error(status: u16, kind: Option<&str>, message: &str) -> Self {
        let mut result = serde_json::json!({ "message": message });
        if let Some(kind) = kind {
            result["kind"] = serde_json::Value::String(kind.to_owned());
        }
        let mut reply = Self::envelope(serde_json::json!({
            "type": "error",
            "status-code": status,
            "status": "",
            "result": result,
        }));
        reply.status = status;
        reply
    }

    /// The long-poll "nothing yet" reply.
    pub fn gateway_timeout() -> Self {
        Self::error(504, None, "timed out waiting for change")
    }

    /// Any full envelope, verbatim.
    pub fn envelope(envelope: serde_json::Value) -> Self {
        Reply {
            status: 200,
            content_type: "application/json".to_owned(),
            body: serde_json::to_vec(&envelope).expect("serialize envelope"),
            headers: Vec::new(),
        }
    }

    /// A raw body with an arbitrary content type (log streams, multipart).
    pub fn raw(content_type: &str, body: Vec<u8>) -> Self {
        Reply {
            status: 200,
            content_type: content_type.to_owned(),
            body,
            headers: Vec::new(),
        }
    }

    /// An empty-bodied redirect to `location`.
    pub fn redirect(status: u16, location: &str) -> Self {
        Reply {
            status,
            content_type: "text/plain".to_owned(),
            body: Vec::new(),
            headers: vec![("location".to_owned(), location.to_owned())],
        }
    }
}

/// One recorded request.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Recorded {
    /// Path plus query, as the client sent it.
    pub fn uri(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ExecState {
    stdout: Vec<Vec<u8>>,
    stderr: Vec<Vec<u8>>,
    opened: Vec<String>,
    closed: Vec<String>,
    stdin: Vec<u8>,
    control: Vec<String>,
}

#[derive(Default)]
struct MockState {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
    exec: Mutex<ExecState>,
}

/// A mock daemon for integration testing.
///
/// Binds to port 0 (or a unix socket path) and exposes the bound address;
/// each test spins up its own isolated instance.
pub struct MockDaemon {
    state: Arc<MockState>,
    addr: Option<SocketAddr>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockDaemon {
    /// Start a TCP instance on a random port.
    pub async fn start() -> std::io::Result<Self> {
        let state = Arc::new(MockState::default());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = router(state.clone());
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(MockDaemon {
            state,
            addr: Some(addr),
            _task: task,
        })
    }

    /// Start an instance serving a unix socket at `path`.
    #[cfg(unix)]
    pub async fn start_unix(path: &Path) -> std::io::Result<Self> {
        let state = Arc::new(MockState::default());
        let listener = tokio::net::UnixListener::bind(path)?;
        let app = router(state.clone());
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(MockDaemon {
            state,
            addr: None,
            _task: task,
        })
    }

    /// `http://…` base URL of a TCP instance.
    pub fn base_url(&self) -> String {
        let addr = self.addr.expect("base_url only for TCP instances");
        format!("http://{addr}")
    }

    /// Queue the next scripted reply.
    pub fn enqueue(&self, reply: Reply) {
        self.state
            .replies
            .lock()
            .expect("lock")
            .push_back(reply);
    }

    /// All requests recorded so far, in arrival order.
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().expect("lock").clone()
    }

    /// Scripted bytes the stdio websocket sends before its end barrier.
    pub fn set_exec_stdout(&self, chunks: Vec<Vec<u8>>) {
        self.state.exec.lock().expect("lock").stdout = chunks;
    }

    /// Scripted bytes the stderr websocket sends before its end barrier.
    pub fn set_exec_stderr(&self, chunks: Vec<Vec<u8>>) {
        self.state.exec.lock().expect("lock").stderr = chunks;
    }

    /// Names of exec websockets opened so far.
    pub fn exec_opened(&self) -> Vec<String> {
        self.state.exec.lock().expect("lock").opened.clone()
    }

    /// Names of exec websockets that have fully closed.
    pub fn exec_closed(&self) -> Vec<String> {
        self.state.exec.lock().expect("lock").closed.clone()
    }

    /// Stdin bytes received before the end marker.
    pub fn exec_stdin(&self) -> Vec<u8> {
        self.state.exec.lock().expect("lock").stdin.clone()
    }

    /// JSON text messages received on the control websocket.
    pub fn control_messages(&self) -> Vec<String> {
        self.state.exec.lock().expect("lock").control.clone()
    }

    /// Poll until at least `count` exec websockets have closed.
    pub async fn wait_exec_closed(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.exec_closed().len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/v1/tasks/{task}/websocket/{name}", any(ws_handler))
        .fallback(record_and_reply)
        .with_state(state)
}

async fn record_and_reply(State(state): State<Arc<MockState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, 16 * 1024 * 1024)
        .await
        .unwrap_or_default();
    state.requests.lock().expect("lock").push(Recorded {
        method: parts.method.to_string(),
        path: parts.uri.path().to_owned(),
        query: parts.uri.query().map(ToOwned::to_owned),
        headers: parts
            .headers
            .iter()
            .map(|(n, v)| (n.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect(),
        body: bytes.to_vec(),
    });

    let reply = state
        .replies
        .lock()
        .expect("lock")
        .pop_front()
        .unwrap_or_else(|| Reply::error(404, Some("not-found"), "no scripted reply"));
    let mut builder = Response::builder()
        .status(reply.status)
        .header("content-type", reply.content_type);
    for (name, value) in &reply.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(reply.body))
        .expect("build response")
}

async fn ws_handler(
    State(state): State<Arc<MockState>>,
    RoutePath((_task, name)): RoutePath<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    state.exec.lock().expect("lock").opened.push(name.clone());
    ws.on_upgrade(move |socket| handle_exec_socket(state, name, socket))
}

async fn handle_exec_socket(state: Arc<MockState>, name: String, mut socket: WebSocket) {
    match name.as_str() {
        "control" => {
            while let Some(Ok(message)) = socket.recv().await {
                match message {
                    Message::Text(text) => {
                        state
                            .exec
                            .lock()
                            .expect("lock")
                            .control
                            .push(text.to_string());
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
        "stdio" => {
            // Capture stdin until the client's end marker, then play the
            // scripted stdout and the end barrier.
            loop {
                match socket.recv().await {
                    Some(Ok(Message::Binary(data))) => {
                        state.exec.lock().expect("lock").stdin.extend_from_slice(&data);
                    }
                    Some(Ok(Message::Text(text))) if text.as_str().is_empty() => break,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            let chunks = state.exec.lock().expect("lock").stdout.clone();
            for chunk in chunks {
                if socket.send(Message::Binary(Bytes::from(chunk))).await.is_err() {
                    break;
                }
            }
            let _ = socket.send(Message::Text("".into())).await;
            drain_until_close(&mut socket).await;
        }
        "stderr" => {
            let chunks = state.exec.lock().expect("lock").stderr.clone();
            for chunk in chunks {
                if socket.send(Message::Binary(Bytes::from(chunk))).await.is_err() {
                    break;
                }
            }
            let _ = socket.send(Message::Text("".into())).await;
            drain_until_close(&mut socket).await;
        }
        _ => {}
    }
    state.exec.lock().expect("lock").closed.push(name);
}

async fn drain_until_close(socket: &mut WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
}
