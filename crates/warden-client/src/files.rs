//! File transfer and manipulation over the files endpoint.
//!
//! Uploads are multipart with two strictly ordered parts: a JSON `request`
//! describing the write, then the `files` payload streamed straight from the
//! caller's reader.  Downloads reverse the order: the `files` payload
//! streams to the caller's writer, then a trailing `response` part carries
//! the per-path outcome envelope.

use std::io;

use bytes::Bytes;
use http::Method;
use http::header::{ACCEPT, CONTENT_TYPE};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use uuid::Uuid;
use warden_protocol::{FileInfo, WireError};

use crate::client::Client;
use crate::envelope::{decode_result, lift_error, parse_envelope};
use crate::error::{ClientError, ServerError};
use crate::requester::{RawResponse, ReqBody, RequestOptions};

const UPLOAD_CHUNK: usize = 128 * 1024;

/// Options for [`Client::push`].
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Remote path to write.
    pub path: String,
    /// Create intermediate directories as needed.
    pub make_dirs: bool,
    /// Permission bits for the file.  Zero/`None` lets the daemon apply its
    /// default (0644 for files, 0755 for directories).
    pub permissions: Option<u32>,
    pub user_id: Option<u32>,
    pub user: Option<String>,
    pub group_id: Option<u32>,
    pub group: Option<String>,
}

/// Options for [`Client::make_dir`].
#[derive(Debug, Clone, Default)]
pub struct MakeDirOptions {
    pub path: String,
    /// Create parent directories as needed.
    pub make_parents: bool,
    pub permissions: Option<u32>,
    pub user_id: Option<u32>,
    pub user: Option<String>,
    pub group_id: Option<u32>,
    pub group: Option<String>,
}

/// Options for [`Client::list_files`].
#[derive(Debug, Clone, Default)]
pub struct ListFilesOptions {
    pub path: String,
    /// Glob applied to directory entries.
    pub pattern: Option<String>,
    /// Describe the path itself instead of its entries.
    pub itself: bool,
}

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct WritePayload<'a> {
    action: &'a str,
    files: Vec<WriteFileItem<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct WriteFileItem<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    make_dirs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct MakeDirsPayload<'a> {
    action: &'a str,
    dirs: Vec<MakeDirItem<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct MakeDirItem<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    make_parents: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<&'a str>,
}

#[derive(Serialize)]
struct RemovePayload<'a> {
    action: &'a str,
    paths: Vec<RemoveItem<'a>>,
}

#[derive(Serialize)]
struct RemoveItem<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    recursive: bool,
}

/// Per-path outcome reported in file operation results.
#[derive(Deserialize)]
struct FileResult {
    #[allow(dead_code)]
    path: String,
    #[serde(default)]
    error: Option<WireError>,
}

/// Non-zero permissions travel as a three-digit octal string; zero is
/// omitted so the daemon picks its default.
fn permissions_wire(permissions: Option<u32>) -> Option<String> {
    match permissions {
        Some(p) if p != 0 => Some(format!("{p:03o}")),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl Client {
    /// List the contents of a directory (or describe one path with
    /// `itself`).
    pub async fn list_files(&self, opts: &ListFilesOptions) -> Result<Vec<FileInfo>, ClientError> {
        let mut request = RequestOptions::get("/v1/files")
            .query("action", "list")
            .query("path", opts.path.clone());
        if let Some(pattern) = &opts.pattern {
            request = request.query("pattern", pattern.clone());
        }
        if opts.itself {
            request = request.query("itself", "true");
        }
        let result = self.requester().do_sync(request).await?;
        decode_result(result.as_deref(), "files")
    }

    /// Create a directory.
    pub async fn make_dir(&self, opts: &MakeDirOptions) -> Result<(), ClientError> {
        let payload = MakeDirsPayload {
            action: "make-dirs",
            dirs: vec![MakeDirItem {
                path: &opts.path,
                make_parents: opts.make_parents,
                permissions: permissions_wire(opts.permissions),
                user_id: opts.user_id,
                user: opts.user.as_deref(),
                group_id: opts.group_id,
                group: opts.group.as_deref(),
            }],
        };
        let result = self
            .requester()
            .do_sync(RequestOptions::post_json("/v1/files", &payload)?)
            .await?;
        single_file_outcome(result.as_deref())
    }

    /// Remove a path, optionally recursively.
    pub async fn remove_path(&self, path: &str, recursive: bool) -> Result<(), ClientError> {
        let payload = RemovePayload {
            action: "remove",
            paths: vec![RemoveItem { path, recursive }],
        };
        let result = self
            .requester()
            .do_sync(RequestOptions::post_json("/v1/files", &payload)?)
            .await?;
        single_file_outcome(result.as_deref())
    }

    /// Stream `source` into the remote file at `opts.path`.  The body is
    /// never buffered whole; chunks go out as they are read.
    pub async fn push<R>(&self, opts: &PushOptions, source: R) -> Result<(), ClientError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let payload = WritePayload {
            action: "write",
            files: vec![WriteFileItem {
                path: &opts.path,
                make_dirs: opts.make_dirs,
                permissions: permissions_wire(opts.permissions),
                user_id: opts.user_id,
                user: opts.user.as_deref(),
                group_id: opts.group_id,
                group: opts.group.as_deref(),
            }],
        };
        let meta = serde_json::to_vec(&payload)
            .map_err(|e| ClientError::RequestBuild(format!("cannot encode write request: {e}")))?;

        let boundary = format!("wardenform{}", Uuid::new_v4().simple());
        let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, io::Error>>(4);
        tokio::spawn(stream_upload(
            tx,
            boundary.clone(),
            meta,
            opts.path.clone(),
            source,
        ));
        let body = StreamBody::new(ReceiverStream::new(rx)).boxed();

        let request = RequestOptions {
            method: Method::POST,
            path: "/v1/files".to_owned(),
            query: Vec::new(),
            headers: vec![(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )],
            body: ReqBody::Stream(body),
        };
        let result = self.requester().do_sync(request).await?;
        single_file_outcome(result.as_deref())
    }

    /// Stream the remote file at `path` into `target`.  On a non-multipart
    /// reply the body is re-read as an error envelope and `target` sees no
    /// bytes.
    pub async fn pull<W>(&self, path: &str, target: &mut W) -> Result<(), ClientError>
    where
        W: AsyncWrite + Send + Unpin + ?Sized,
    {
        let request = RequestOptions::get("/v1/files")
            .query("action", "read")
            .query("path", path)
            .header(ACCEPT, "multipart/form-data");
        let raw = self.requester().do_raw(request).await?;

        let boundary = match raw
            .content_type
            .as_deref()
            .and_then(|ct| multer::parse_boundary(ct).ok())
        {
            Some(boundary) => boundary,
            None => return Err(self.pull_error_from_plain_body(raw).await),
        };

        let mut multipart = multer::Multipart::new(raw.stream, boundary);

        // Part 1: the file payload, streamed to the caller.
        let mut files_part = multipart
            .next_field()
            .await
            .map_err(|e| ClientError::ProtocolShape(format!("cannot read multipart body: {e}")))?
            .ok_or_else(|| ClientError::ProtocolShape("reply has no files part".to_owned()))?;
        if files_part.name() != Some("files") {
            return Err(ClientError::ProtocolShape(format!(
                "expected files part first, got {:?}",
                files_part.name()
            )));
        }
        let mut written = 0u64;
        while let Some(chunk) = files_part.chunk().await.map_err(|e| {
            ClientError::Connection(format!("cannot read file data: {e}"))
        })? {
            target
                .write_all(&chunk)
                .await
                .map_err(|e| ClientError::LocalIo(format!("cannot write file data: {e}")))?;
            written += chunk.len() as u64;
        }
        target
            .flush()
            .await
            .map_err(|e| ClientError::LocalIo(format!("cannot flush file data: {e}")))?;
        debug!(path, written, "pulled file");
        drop(files_part);

        // Part 2: the trailing response envelope with per-path outcomes.
        let response_part = multipart
            .next_field()
            .await
            .map_err(|e| ClientError::ProtocolShape(format!("cannot read multipart body: {e}")))?
            .ok_or_else(|| ClientError::ProtocolShape("reply has no response part".to_owned()))?;
        if response_part.name() != Some("response") {
            return Err(ClientError::ProtocolShape(format!(
                "expected response part second, got {:?}",
                response_part.name()
            )));
        }
        let response_bytes = response_part.bytes().await.map_err(|e| {
            ClientError::ProtocolShape(format!("cannot read response part: {e}"))
        })?;
        let env = parse_envelope(&response_bytes)?;
        self.requester().record_side_channel(&env);
        match env.kind {
            warden_protocol::EnvelopeType::Sync => single_file_outcome(env.result.as_deref()),
            _ => Err(lift_error(&env, 0)),
        }
    }

    /// A non-multipart pull reply is a plain envelope; surface its error.
    async fn pull_error_from_plain_body(&self, raw: RawResponse) -> ClientError {
        let http_status = raw.status.as_u16();
        let body = match raw.collect().await {
            Ok(body) => body,
            Err(e) => return e,
        };
        match parse_envelope(&body) {
            Ok(env) => {
                self.requester().record_side_channel(&env);
                lift_error(&env, http_status)
            }
            Err(e) => e,
        }
    }
}

/// Exactly one per-file outcome is expected; its error, if any, is the
/// operation's error.
fn single_file_outcome(
    result: Option<&serde_json::value::RawValue>,
) -> Result<(), ClientError> {
    let outcomes: Vec<FileResult> = decode_result(result, "file results")?;
    if outcomes.len() != 1 {
        return Err(ClientError::ProtocolShape(
            "expected exactly one result from API".to_owned(),
        ));
    }
    let outcome = outcomes.into_iter().next().and_then(|o| o.error);
    match outcome {
        Some(wire) if !wire.message.is_empty() => {
            Err(ClientError::Server(ServerError::from_wire(wire, 0)))
        }
        Some(_) => Err(ClientError::ProtocolShape(
            "file error with empty message".to_owned(),
        )),
        None => Ok(()),
    }
}

/// Remote paths land in a Content-Disposition filename; backslash and quote
/// must be escaped.
fn escape_filename(path: &str) -> String {
    path.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Producer task for the upload body: request part, then file chunks, then
/// the closing boundary.
async fn stream_upload<R>(
    tx: mpsc::Sender<Result<Frame<Bytes>, io::Error>>,
    boundary: String,
    meta: Vec<u8>,
    path: String,
    mut source: R,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut head = Vec::new();
    head.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"request\"\r\n\
             Content-Type: application/json\r\n\r\n"
        )
        .as_bytes(),
    );
    head.extend_from_slice(&meta);
    head.extend_from_slice(
        format!(
            "\r\n--{boundary}\r\nContent-Disposition: form-data; name=\"files\"; \
             filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            escape_filename(&path)
        )
        .as_bytes(),
    );
    if tx.send(Ok(Frame::data(head.into()))).await.is_err() {
        return;
    }

    let mut buf = vec![0u8; UPLOAD_CHUNK];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if tx.send(Ok(Frame::data(chunk))).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }

    let tail = format!("\r\n--{boundary}--\r\n");
    let _ = tx.send(Ok(Frame::data(tail.into()))).await;
}
