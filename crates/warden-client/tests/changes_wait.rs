/// Tests for the change tracker: get, list, wait long-poll, abort, and the
/// local id validation that must fail before any network traffic.
use warden_client::{ChangeSelector, ChangesOptions, Client, ClientError, Config};
use warden_test_utils::{MockDaemon, Reply};

fn client_for(daemon: &MockDaemon) -> Client {
    let config = Config {
        base_url: Some(daemon.base_url()),
        ..Config::default()
    };
    Client::new(&config).expect("client")
}

fn ready_change(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "kind": "start",
        "summary": "Start service \"web\"",
        "status": "Done",
        "ready": true,
        "spawn-time": "2021-05-03T03:55:49Z",
        "ready-time": "2021-05-03T03:55:50Z",
        "tasks": [{
            "id": "T1",
            "kind": "start",
            "summary": "",
            "status": "Done",
            "spawn-time": "2021-05-03T03:55:49Z",
            "progress": {"label": "", "done": 1, "total": 1}
        }]
    })
}

/// Test: change get validates the id shape locally; no request is recorded.
#[tokio::test]
async fn invalid_change_id_fails_without_network() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    let client = client_for(&daemon);

    for bad in ["", "UPPER", "has space", "semi;colon", "../../etc"] {
        let err = client.change(bad).await.expect_err("invalid id");
        assert!(
            matches!(err, ClientError::RequestBuild(_)),
            "id {bad:?} gave {err:?}"
        );
    }
    assert!(daemon.requests().is_empty(), "no network traffic");
}

/// Test: list forwards the selector and service filter.
#[tokio::test]
async fn changes_list_query() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!([ready_change("1")])));

    let client = client_for(&daemon);
    let opts = ChangesOptions {
        selector: ChangeSelector::All,
        service: Some("web".to_owned()),
    };
    let changes = client.changes(&opts).await.expect("changes");
    assert_eq!(changes.len(), 1);
    assert_eq!(daemon.requests()[0].uri(), "/v1/changes?select=all&for=web");
}

/// Test: wait polls again on 504 gateway timeout and forwards the timeout
/// query parameter on every attempt.
#[tokio::test]
async fn wait_change_polls_through_gateway_timeout() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::gateway_timeout());
    daemon.enqueue(Reply::sync(ready_change("42")));

    let client = client_for(&daemon);
    let change = client
        .wait_change("42", Some(std::time::Duration::from_secs(4)))
        .await
        .expect("ready after one timeout");
    assert!(change.ready);
    assert_eq!(change.id, "42");

    let recorded = daemon.requests();
    assert_eq!(recorded.len(), 2, "one 504, one success");
    for request in &recorded {
        assert_eq!(request.path, "/v1/changes/42/wait");
        assert_eq!(request.query.as_deref(), Some("timeout=4s"));
    }
}

/// Test: abort posts the action and returns the updated snapshot.
#[tokio::test]
async fn abort_change_posts_action() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    let mut aborted = ready_change("9");
    aborted["status"] = serde_json::json!("Abort");
    daemon.enqueue(Reply::sync(aborted));

    let client = client_for(&daemon);
    let change = client.abort_change("9").await.expect("abort");
    assert_eq!(change.status, "Abort");
    let recorded = daemon.requests();
    assert_eq!(recorded[0].method, "POST");
    assert_eq!(recorded[0].path, "/v1/changes/9");
    assert_eq!(
        recorded[0].body_json(),
        serde_json::json!({"action": "abort"})
    );
}

/// Test: a change that is ready with an error string keeps the error
/// available; kind-specific data stays decodable with full precision.
#[tokio::test]
async fn change_error_and_data() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!({
        "id": "7",
        "kind": "exec",
        "ready": true,
        "err": "command timed out",
        "spawn-time": "2021-05-03T03:55:49Z",
        "data": {"large-token": 9007199254740993u64}
    })));

    let client = client_for(&daemon);
    let change = client.change("7").await.expect("change");
    assert_eq!(change.err.as_deref(), Some("command timed out"));
    let token: u64 = change.get("large-token").expect("data");
    assert_eq!(token, 9_007_199_254_740_993, "no double rounding");
}
