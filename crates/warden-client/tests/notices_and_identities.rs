/// Tests for notices (list, add, long-poll) and identity management.
use std::collections::HashMap;
use std::time::Duration;

use warden_client::{Client, Config, NoticesOptions, NotifyOptions};
use warden_client::{Identity, IdentityAccess, NoticeType};
use warden_test_utils::{MockDaemon, Reply};

fn client_for(daemon: &MockDaemon) -> Client {
    let config = Config {
        base_url: Some(daemon.base_url()),
        ..Config::default()
    };
    Client::new(&config).expect("client")
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

fn sample_notice(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "user-id": 1000,
        "type": "custom",
        "key": "example.com/refresh",
        "first-occurred": "2023-09-05T15:04:05Z",
        "last-occurred": "2023-09-05T17:04:05Z",
        "last-repeated": "2023-09-05T16:04:05Z",
        "occurrences": 3
    })
}

/// Test: notice filters travel as repeated query keys.
#[tokio::test]
async fn notices_list_filters() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!([sample_notice("5")])));

    let client = client_for(&daemon);
    let opts = NoticesOptions {
        types: vec![NoticeType::ChangeUpdate, NoticeType::Warning],
        keys: vec!["42".to_owned()],
        all_users: true,
        ..NoticesOptions::default()
    };
    let notices = client.notices(&opts).await.expect("notices");
    assert_eq!(notices.len(), 1);

    let query = daemon.requests()[0].query.clone().expect("query");
    assert!(query.contains("types=change-update"), "query: {query}");
    assert!(query.contains("types=warning"), "query: {query}");
    assert!(query.contains("keys=42"), "query: {query}");
    assert!(query.contains("users=all"), "query: {query}");
}

/// Test: notify posts the id-returning add action and hands the id back.
#[tokio::test]
async fn notify_returns_assigned_id() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!({"id": "123"})));

    let client = client_for(&daemon);
    let mut data = HashMap::new();
    data.insert("job".to_owned(), "backup".to_owned());
    let opts = NotifyOptions {
        key: "example.com/backup-done".to_owned(),
        repeat_after: Some(Duration::from_secs(3600)),
        data: Some(data),
    };
    let id = client.notify(&opts).await.expect("notify");
    assert_eq!(id, "123");

    assert_eq!(
        daemon.requests()[0].body_json(),
        serde_json::json!({
            "action": "add",
            "type": "client",
            "key": "example.com/backup-done",
            "repeat-after": "1h",
            "data": {"job": "backup"}
        })
    );
}

/// Test: wait-notices treats 504 as "nothing yet", not an error.
#[tokio::test]
async fn wait_notices_maps_gateway_timeout_to_empty() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::gateway_timeout());

    let client = client_for(&daemon);
    let notices = client
        .wait_notices(&NoticesOptions::default(), Duration::from_secs(1))
        .await
        .expect("504 is empty, not an error");
    assert!(notices.is_empty());
    assert!(
        daemon.requests()[0]
            .query
            .as_deref()
            .unwrap_or_default()
            .contains("timeout=1s")
    );
}

/// Test: an unknown notice type survives decoding.
#[tokio::test]
async fn single_notice_get() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(sample_notice("5")));

    let client = client_for(&daemon);
    let notice = client.notice("5").await.expect("notice");
    assert_eq!(notice.id, "5");
    assert_eq!(notice.kind, NoticeType::Unknown, "unrecognized type tag");
    assert_eq!(notice.occurrences, 3);
    assert_eq!(daemon.requests()[0].path, "/v1/notices/5");
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Test: the identities map decodes typed access levels and sub-records.
#[tokio::test]
async fn identities_map_get() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!({
        "bob": {"access": "admin", "local": {"user-id": 42}},
        "alice": {"access": "read", "basic": {"password": "hashed"}}
    })));

    let client = client_for(&daemon);
    let identities = client.identities().await.expect("identities");
    assert_eq!(identities.len(), 2);
    assert_eq!(identities["bob"].access, IdentityAccess::Admin);
    assert_eq!(
        identities["bob"].local.as_ref().expect("local").user_id,
        42
    );
    assert_eq!(identities["alice"].access, IdentityAccess::Read);
}

/// Test: replace serializes a None entry as null (delete semantics).
#[tokio::test]
async fn replace_identities_sends_null_for_delete() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!(true)));

    let client = client_for(&daemon);
    let mut identities: HashMap<String, Option<Identity>> = HashMap::new();
    identities.insert(
        "bob".to_owned(),
        Some(Identity {
            access: IdentityAccess::Admin,
            local: Some(warden_client::protocol::LocalIdentity { user_id: 42 }),
            basic: None,
        }),
    );
    identities.insert("stale".to_owned(), None);
    client
        .replace_identities(&identities)
        .await
        .expect("replace");

    let body = daemon.requests()[0].body_json();
    assert_eq!(body["action"], "replace");
    assert_eq!(
        body["identities"]["bob"],
        serde_json::json!({"access": "admin", "local": {"user-id": 42}})
    );
    assert!(body["identities"]["stale"].is_null(), "null deletes");
}

/// Test: remove builds the null map from names.
#[tokio::test]
async fn remove_identities_sends_nulls() {
    let daemon = MockDaemon::start().await.expect("mock daemon");
    daemon.enqueue(Reply::sync(serde_json::json!(true)));

    let client = client_for(&daemon);
    client
        .remove_identities(&["bob".to_owned()])
        .await
        .expect("remove");
    let body = daemon.requests()[0].body_json();
    assert_eq!(body["action"], "remove");
    assert!(body["identities"]["bob"].is_null());
}
