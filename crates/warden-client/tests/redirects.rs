/// Tests for bounded redirect following: same-origin hops up to the cap of
/// ten, method demotion on 303 (and non-GET 301/302), body replay on
/// 307/308, and refusal of anything that leaves the daemon's origin.
use warden_client::{Client, ClientError, Config};
use warden_test_utils::{MockDaemon, Reply};

fn client_for(daemon: &MockDaemon) -> Client {
    let config = Config {
        base_url: Some(daemon.base_url()),
        ..Config::default()
    };
    Client::new(&config).expect("client")
}

fn sysinfo_result() -> serde_json::Value {
    serde_json::json!({"version": "1.4.0", "boot-id": "b1"})
}

/// Test: a same-origin redirect is followed and the operation succeeds
/// against the new path.
#[tokio::test]
async fn get_follows_same_origin_redirect() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::redirect(302, "/v1/system-info-moved"));
    daemon.enqueue(Reply::sync(sysinfo_result()));

    let client = client_for(&daemon);
    let info = client.sys_info().await.expect("sys info after redirect");
    assert_eq!(info.version, "1.4.0");

    let recorded = daemon.requests();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].path, "/v1/system-info");
    assert_eq!(recorded[1].path, "/v1/system-info-moved");
}

/// Test: 303 re-issues the request as GET with an empty body.
#[tokio::test]
async fn see_other_demotes_post_to_get() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::redirect(303, "/v1/shutdown-status"));
    daemon.enqueue(Reply::sync(serde_json::json!(null)));

    let client = client_for(&daemon);
    client.shutdown().await.expect("shutdown");

    let recorded = daemon.requests();
    assert_eq!(recorded[0].method, "POST");
    assert_eq!(recorded[1].method, "GET");
    assert!(recorded[1].body.is_empty(), "no body after demotion");
}

/// Test: 307 preserves the method and replays a JSON body verbatim.
#[tokio::test]
async fn temporary_redirect_replays_json_body() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::redirect(307, "/v1/shutdown"));
    daemon.enqueue(Reply::sync(serde_json::json!(null)));

    let client = client_for(&daemon);
    client.shutdown().await.expect("shutdown");

    let recorded = daemon.requests();
    assert_eq!(recorded[1].method, "POST");
    assert_eq!(recorded[0].body, recorded[1].body, "body replayed");
}

/// Test: a streamed upload cannot be replayed, so a 307 on push fails
/// rather than silently truncating the transfer.
#[tokio::test]
async fn temporary_redirect_cannot_replay_streamed_upload() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::redirect(307, "/v1/files"));

    let client = client_for(&daemon);
    let opts = warden_client::PushOptions {
        path: "/x".to_owned(),
        ..warden_client::PushOptions::default()
    };
    let err = client
        .push(&opts, &b"data"[..])
        .await
        .expect_err("streamed body cannot be replayed");
    assert!(
        err.to_string().contains("streaming"),
        "got {err}"
    );
}

/// Test: the eleventh redirect in a row fails; ten hops were made.
#[tokio::test]
async fn redirects_are_capped_at_ten() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    for _ in 0..11 {
        daemon.enqueue(Reply::redirect(302, "/v1/loop"));
    }

    let client = client_for(&daemon);
    let err = client.sys_info().await.expect_err("redirect loop");
    assert!(
        err.to_string().contains("redirects"),
        "got {err}"
    );
    assert_eq!(
        daemon.requests().len(),
        11,
        "the initial request plus ten followed hops"
    );
}

/// Test: a redirect that leaves the daemon's origin is refused, since the
/// carrier pins the daemon's address and trust material.
#[tokio::test]
async fn cross_origin_redirect_is_refused() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::redirect(302, "http://elsewhere.example.com/v1/system-info"));

    let client = client_for(&daemon);
    let err = client.sys_info().await.expect_err("cross-origin redirect");
    match err {
        ClientError::ProtocolShape(message) => {
            assert!(message.contains("refusing redirect"), "message: {message}");
        }
        other => panic!("expected ProtocolShape, got {other:?}"),
    }
    assert_eq!(daemon.requests().len(), 1, "nothing dialled elsewhere");
}
