/// Tests for the multipart file channel: push, pull, list, make-dirs,
/// remove, and the strict per-file outcome invariants.
use std::io::Cursor;

use warden_client::{Client, ClientError, Config, ErrorKind};
use warden_client::{FileType, ListFilesOptions, MakeDirOptions, PushOptions};
use warden_test_utils::{MockDaemon, Reply};

fn client_for(daemon: &MockDaemon) -> Client {
    let config = Config {
        base_url: Some(daemon.base_url()),
        ..Config::default()
    };
    Client::new(&config).expect("client")
}

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

fn pull_body(boundary: &str, content: &[u8], response: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"files\"; \
             filename=\"/x\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(
        format!(
            "\r\n--{boundary}\r\nContent-Disposition: form-data; name=\"response\"\r\n\
             Content-Type: application/json\r\n\r\n{response}\r\n--{boundary}--\r\n"
        )
        .as_bytes(),
    );
    body
}

/// Test: a single-file pull streams the payload to the target writer and
/// reads the trailing response part.
#[tokio::test]
async fn pull_single_file() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    let body = pull_body(
        "wardentestboundary",
        b"hello",
        r#"{"type":"sync","status-code":200,"status":"OK","result":[{"path":"/x"}]}"#,
    );
    daemon.enqueue(Reply::raw(
        "multipart/form-data; boundary=wardentestboundary",
        body,
    ));

    let client = client_for(&daemon);
    let mut target = Cursor::new(Vec::new());
    client.pull("/x", &mut target).await.expect("pull");
    assert_eq!(target.into_inner(), b"hello");

    let recorded = daemon.requests();
    assert_eq!(recorded[0].uri(), "/v1/files?action=read&path=%2Fx");
    assert_eq!(recorded[0].header("accept"), Some("multipart/form-data"));
}

/// Test: a non-multipart reply is re-read as a plain error envelope; the
/// target writer sees zero bytes.
#[tokio::test]
async fn pull_non_multipart_is_error_and_writes_nothing() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::raw(
        "application/json",
        serde_json::to_vec(&serde_json::json!({
            "type": "error",
            "status-code": 400,
            "status": "Bad Request",
            "result": {"message": "cannot read file", "kind": "generic-file-error"}
        }))
        .expect("encode"),
    ));

    let client = client_for(&daemon);
    let mut target = Cursor::new(Vec::new());
    let err = client
        .pull("/x", &mut target)
        .await
        .expect_err("non-multipart");
    match err {
        ClientError::Server(server) => {
            assert_eq!(server.message, "cannot read file");
            assert_eq!(server.kind, Some(ErrorKind::GenericFileError));
        }
        other => panic!("expected Server error, got {other:?}"),
    }
    assert!(target.into_inner().is_empty(), "no bytes written");
}

/// Test: a per-file error in the trailing response part surfaces typed.
#[tokio::test]
async fn pull_per_file_error() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    let body = pull_body(
        "wardentestboundary",
        b"",
        r#"{"type":"sync","status-code":200,"status":"OK","result":[{"path":"/x","error":{"message":"permission denied","kind":"permission-denied"}}]}"#,
    );
    daemon.enqueue(Reply::raw(
        "multipart/form-data; boundary=wardentestboundary",
        body,
    ));

    let client = client_for(&daemon);
    let mut target = Cursor::new(Vec::new());
    let err = client.pull("/x", &mut target).await.expect_err("file error");
    match err {
        ClientError::Server(server) => {
            assert_eq!(server.kind, Some(ErrorKind::PermissionDenied));
        }
        other => panic!("expected Server error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// Test: push streams a two-part multipart body: the JSON write request,
/// then the file bytes under the escaped remote path.
#[tokio::test]
async fn push_builds_two_part_multipart() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!([{"path": "/x"}])));

    let client = client_for(&daemon);
    let opts = PushOptions {
        path: "/x".to_owned(),
        make_dirs: true,
        permissions: Some(0o600),
        user: Some("bob".to_owned()),
        ..PushOptions::default()
    };
    client
        .push(&opts, &b"file contents"[..])
        .await
        .expect("push");

    let recorded = daemon.requests();
    assert_eq!(recorded[0].method, "POST");
    assert_eq!(recorded[0].path, "/v1/files");
    let content_type = recorded[0].header("content-type").expect("content type");
    assert!(
        content_type.starts_with("multipart/form-data; boundary="),
        "content type: {content_type}"
    );

    let body = String::from_utf8(recorded[0].body.clone()).expect("utf8 body");
    assert!(body.contains("name=\"request\""), "body: {body}");
    assert!(
        body.contains(r#"{"action":"write","files":[{"path":"/x","make-dirs":true,"permissions":"600","user":"bob"}]}"#),
        "body: {body}"
    );
    assert!(body.contains("name=\"files\"; filename=\"/x\""), "body: {body}");
    assert!(body.contains("file contents"), "body: {body}");
    let boundary = content_type
        .split("boundary=")
        .nth(1)
        .expect("boundary param");
    assert!(
        body.trim_end().ends_with(&format!("--{boundary}--")),
        "closing boundary present"
    );
}

/// Test: more than one per-file result for a single push is a protocol
/// violation.
#[tokio::test]
async fn push_rejects_multiple_results() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(
        serde_json::json!([{"path": "/x"}, {"path": "/y"}]),
    ));

    let client = client_for(&daemon);
    let opts = PushOptions {
        path: "/x".to_owned(),
        ..PushOptions::default()
    };
    let err = client
        .push(&opts, &b"data"[..])
        .await
        .expect_err("two results for one file");
    assert!(
        err.to_string().contains("expected exactly one result from API"),
        "got {err}"
    );
}

// ---------------------------------------------------------------------------
// List / make-dirs / remove
// ---------------------------------------------------------------------------

/// Test: list forwards pattern and itself, and decodes type qualifiers and
/// precise sizes.
#[tokio::test]
async fn list_files_query_and_decode() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!([
        {
            "path": "/var/big",
            "name": "big",
            "type": "file",
            "size": 9007199254740993u64,
            "permissions": "644",
            "last-modified": "2023-09-05T15:04:05Z"
        },
        {
            "path": "/var/fifo",
            "name": "fifo",
            "type": "named-pipe",
            "permissions": "600",
            "last-modified": "2023-09-05T15:04:05Z"
        }
    ])));

    let client = client_for(&daemon);
    let opts = ListFilesOptions {
        path: "/var".to_owned(),
        pattern: Some("*.log".to_owned()),
        itself: false,
    };
    let files = client.list_files(&opts).await.expect("list");
    assert_eq!(
        daemon.requests()[0].uri(),
        "/v1/files?action=list&path=%2Fvar&pattern=*.log"
    );
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].size, Some(9_007_199_254_740_993));
    assert_eq!(files[1].file_type, FileType::NamedPipe);
}

/// Test: make-dir posts the dirs action with octal permissions.
#[tokio::test]
async fn make_dir_posts_action() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!([{"path": "/var/new"}])));

    let client = client_for(&daemon);
    let opts = MakeDirOptions {
        path: "/var/new".to_owned(),
        make_parents: true,
        permissions: Some(0o755),
        ..MakeDirOptions::default()
    };
    client.make_dir(&opts).await.expect("make dir");
    assert_eq!(
        daemon.requests()[0].body_json(),
        serde_json::json!({
            "action": "make-dirs",
            "dirs": [{"path": "/var/new", "make-parents": true, "permissions": "755"}]
        })
    );
}

/// Test: remove posts the recursive flag per path.
#[tokio::test]
async fn remove_path_posts_recursive() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!([{"path": "/var/old"}])));

    let client = client_for(&daemon);
    client.remove_path("/var/old", true).await.expect("remove");
    assert_eq!(
        daemon.requests()[0].body_json(),
        serde_json::json!({
            "action": "remove",
            "paths": [{"path": "/var/old", "recursive": true}]
        })
    );
}
