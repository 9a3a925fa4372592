/// Tests for check listing, batch actions, and the health query.
///
/// Uses MockDaemon from warden-test-utils: scripted replies, recorded
/// requests.
use warden_client::{ChecksOptions, Client, Config, HealthOptions};
use warden_client::{CheckLevel, CheckStatus};
use warden_test_utils::{MockDaemon, Reply};

fn client_for(daemon: &MockDaemon) -> Client {
    let config = Config {
        base_url: Some(daemon.base_url()),
        ..Config::default()
    };
    Client::new(&config).expect("client")
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Test: level and name filters travel as query parameters and the typed
/// check infos come back in order.
#[tokio::test]
async fn checks_list_with_level_and_names() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!([
        {"name": "chk1", "status": "up"},
        {"name": "chk3", "status": "down", "failures": 42},
        {"name": "chk5", "status": "inactive"}
    ])));

    let client = client_for(&daemon);
    let opts = ChecksOptions {
        level: Some(CheckLevel::Alive),
        names: vec!["chk1".to_owned(), "chk3".to_owned(), "chk5".to_owned()],
    };
    let checks = client.checks(&opts).await.expect("checks");

    let recorded = daemon.requests();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].method, "GET");
    assert_eq!(
        recorded[0].uri(),
        "/v1/checks?level=alive&names=chk1&names=chk3&names=chk5"
    );

    assert_eq!(checks.len(), 3);
    assert_eq!(checks[0].name, "chk1");
    assert_eq!(checks[0].status, CheckStatus::Up);
    assert_eq!(checks[1].status, CheckStatus::Down);
    assert_eq!(checks[1].failures, 42);
    assert_eq!(checks[2].status, CheckStatus::Inactive);
}

/// Test: single check lookup hits the singular endpoint with a name query.
#[tokio::test]
async fn single_check_lookup() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!(
        {"name": "svc-ready", "level": "ready", "status": "up", "threshold": 3}
    )));

    let client = client_for(&daemon);
    let check = client.check("svc-ready").await.expect("check");
    assert_eq!(check.name, "svc-ready");
    assert_eq!(check.level, Some(CheckLevel::Ready));
    assert_eq!(check.threshold, 3);

    let recorded = daemon.requests();
    assert_eq!(recorded[0].uri(), "/v1/check?name=svc-ready");
}

/// Test: start-checks posts the batch action and returns the changed names.
#[tokio::test]
async fn start_checks_returns_changed_names() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!({"changed": ["chk1"]})));

    let client = client_for(&daemon);
    let changed = client
        .start_checks(&["chk1".to_owned(), "chk2".to_owned()])
        .await
        .expect("start checks");
    assert_eq!(changed, vec!["chk1".to_owned()]);

    let recorded = daemon.requests();
    assert_eq!(recorded[0].method, "POST");
    assert_eq!(recorded[0].path, "/v1/checks");
    assert_eq!(
        recorded[0].body_json(),
        serde_json::json!({"action": "start", "checks": ["chk1", "chk2"]})
    );
}

/// Test: stop-checks posts the stop action.
#[tokio::test]
async fn stop_checks_posts_stop_action() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!({"changed": []})));

    let client = client_for(&daemon);
    let changed = client
        .stop_checks(&["chk9".to_owned()])
        .await
        .expect("stop checks");
    assert!(changed.is_empty());
    assert_eq!(
        daemon.requests()[0].body_json(),
        serde_json::json!({"action": "stop", "checks": ["chk9"]})
    );
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Test: healthy daemon answers a sync envelope and the query carries the
/// comma-joined names.
#[tokio::test]
async fn health_true_with_filters() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!({"healthy": true})));

    let client = client_for(&daemon);
    let opts = HealthOptions {
        level: Some(CheckLevel::Alive),
        names: vec!["chk1".to_owned(), "chk2".to_owned()],
    };
    assert!(client.health(&opts).await.expect("health"));
    assert_eq!(
        daemon.requests()[0].uri(),
        "/v1/health?level=alive&names=chk1%2Cchk2"
    );
}

/// Test: an unhealthy daemon replies with an error envelope whose value
/// still carries the flag; that decodes to false, not an error.
#[tokio::test]
async fn health_false_from_error_envelope() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::envelope(serde_json::json!({
        "type": "error",
        "status-code": 502,
        "status": "Bad Gateway",
        "result": {
            "message": "health check failed",
            "value": {"healthy": false}
        }
    })));

    let client = client_for(&daemon);
    let healthy = client
        .health(&HealthOptions::default())
        .await
        .expect("unhealthy is a value, not an error");
    assert!(!healthy);
}
