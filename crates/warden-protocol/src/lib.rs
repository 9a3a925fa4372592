// warden-protocol: wire types for the wardend HTTP API.
//
// Every daemon reply is wrapped in an `Envelope`; the `result` payload and
// the per-change/per-task `data` bags are kept as raw JSON so callers decode
// them on demand without losing numeric precision.  Field names are frozen
// kebab-case; the Rust side stays snake_case via serde renames.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Reply discriminator.  `sync` carries the result inline, `async` hands back
/// a change id to follow, `error` carries a [`WireError`] in `result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeType {
    Sync,
    Async,
    Error,
}

impl std::fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeType::Sync => write!(f, "sync"),
            EnvelopeType::Async => write!(f, "async"),
            EnvelopeType::Error => write!(f, "error"),
        }
    }
}

/// The uniform JSON wrapper around every daemon reply.
///
/// `warning-count` / `warning-timestamp` and the optional `maintenance`
/// error ride along on every reply; clients mirror them into per-client
/// state on each decode.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: Option<Box<RawValue>>,
    /// Change id; only present on `async` replies.
    #[serde(default)]
    pub change: String,
    #[serde(default)]
    pub warning_count: u64,
    #[serde(default)]
    pub warning_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub maintenance: Option<WireError>,
}

/// Error payload carried by `error` envelopes and the `maintenance` field.
///
/// `kind` stays a plain string on the wire; unknown kinds must survive a
/// decode/re-encode cycle verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Box<RawValue>>,
}

// ---------------------------------------------------------------------------
// Changes and tasks
// ---------------------------------------------------------------------------

/// Failure to read a kind-specific data bag entry.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// The key is absent.  Distinct from "present but undecodable" so callers
    /// can treat missing data as a sentinel rather than a zero value.
    #[error("no data found for {key:?}")]
    NoSuchData { key: String },
    #[error("cannot decode data for {key:?}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

fn get_data<T: DeserializeOwned>(
    data: &HashMap<String, Box<RawValue>>,
    key: &str,
) -> Result<T, DataError> {
    let raw = data.get(key).ok_or_else(|| DataError::NoSuchData {
        key: key.to_owned(),
    })?;
    serde_json::from_str(raw.get()).map_err(|source| DataError::Decode {
        key: key.to_owned(),
        source,
    })
}

/// A server-side unit of asynchronous work.
///
/// Snapshot semantics: the daemon owns the record; a decoded `Change` never
/// updates itself.  When `ready` is true, either `err` is set or every task
/// carries a terminal status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Change {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub err: Option<String>,
    pub spawn_time: DateTime<Utc>,
    #[serde(default)]
    pub ready_time: Option<DateTime<Utc>>,
    #[serde(default)]
    data: HashMap<String, Box<RawValue>>,
}

impl Change {
    /// Decode the kind-specific datum stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, DataError> {
        get_data(&self.data, key)
    }
}

/// One step within a [`Change`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Task {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub progress: TaskProgress,
    pub spawn_time: DateTime<Utc>,
    #[serde(default)]
    pub ready_time: Option<DateTime<Utc>>,
    #[serde(default)]
    data: HashMap<String, Box<RawValue>>,
}

impl Task {
    /// Decode the kind-specific datum stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, DataError> {
        get_data(&self.data, key)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskProgress {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub done: u64,
    #[serde(default)]
    pub total: u64,
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// Notice type tag.  `(type, key)` pairs are unique for occurrence counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeType {
    ChangeUpdate,
    Client,
    Warning,
    #[serde(other)]
    Unknown,
}

impl NoticeType {
    pub fn wire_name(self) -> &'static str {
        match self {
            NoticeType::ChangeUpdate => "change-update",
            NoticeType::Client => "client",
            NoticeType::Warning => "warning",
            NoticeType::Unknown => "unknown",
        }
    }
}

/// A server-side event record, coalesced across occurrences of the same
/// `(type, key)` pair.  `last_occurred >= first_occurred` and
/// `last_repeated <= last_occurred` hold for any daemon-produced notice.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Notice {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: NoticeType,
    pub key: String,
    pub first_occurred: DateTime<Utc>,
    pub last_occurred: DateTime<Utc>,
    pub last_repeated: DateTime<Utc>,
    #[serde(default)]
    pub occurrences: u64,
    #[serde(default)]
    pub last_data: Option<HashMap<String, String>>,
    #[serde(default)]
    repeat_after: Option<String>,
    #[serde(default)]
    expire_after: Option<String>,
}

impl Notice {
    /// Minimum interval before a repeated occurrence bumps `last_repeated`.
    pub fn repeat_after(&self) -> Option<Duration> {
        self.repeat_after
            .as_deref()
            .and_then(|s| humantime::parse_duration(s).ok())
    }

    /// How long after the last occurrence the notice expires.
    pub fn expire_after(&self) -> Option<Duration> {
        self.expire_after
            .as_deref()
            .and_then(|s| humantime::parse_duration(s).ok())
    }
}

// ---------------------------------------------------------------------------
// Checks and health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckLevel {
    Alive,
    Ready,
}

impl CheckLevel {
    pub fn wire_name(self) -> &'static str {
        match self {
            CheckLevel::Alive => "alive",
            CheckLevel::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckStatus {
    Up,
    Down,
    Inactive,
}

/// State of one configured health check.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckInfo {
    pub name: String,
    #[serde(default)]
    pub level: Option<CheckLevel>,
    pub status: CheckStatus,
    #[serde(default)]
    pub successes: u64,
    #[serde(default)]
    pub failures: u64,
    #[serde(default)]
    pub threshold: u32,
    /// Change driving the check's recovery, when one is running.
    #[serde(default)]
    pub change_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceStartup {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceStatus {
    Active,
    Inactive,
    Backoff,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceInfo {
    pub name: String,
    pub startup: ServiceStartup,
    pub current: ServiceStatus,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Type qualifier reported for a listed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Socket,
    NamedPipe,
    Device,
    #[serde(other)]
    Unknown,
}

/// One entry of a file listing.  Sizes are only reported for regular files;
/// numeric and symbolic owner/group are each optional on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(default)]
    pub size: Option<u64>,
    /// Three-digit octal string, e.g. `"644"`.
    #[serde(default)]
    pub permissions: String,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<u32>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group_id: Option<u32>,
    #[serde(default)]
    pub group: Option<String>,
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityAccess {
    Admin,
    Read,
    Untrusted,
}

/// A principal record.  At least one of the type-specific sub-records is
/// present; sending `null` in place of an identity under the `replace`
/// action deletes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Identity {
    pub access: IdentityAccess,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicIdentity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LocalIdentity {
    pub user_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BasicIdentity {
    pub password: String,
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogStream {
    Stdout,
    Stderr,
    #[serde(other)]
    #[default]
    Unknown,
}

/// Metadata line preceding each framed log payload.  Exactly `length` bytes
/// of payload follow the newline that terminates this object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMeta {
    pub time: DateTime<Utc>,
    pub service: String,
    #[serde(default)]
    pub stream: LogStream,
    pub length: u64,
}

// ---------------------------------------------------------------------------
// System info
// ---------------------------------------------------------------------------

/// Static daemon details reported by the system-info endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SysInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub boot_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Exec control messages
// ---------------------------------------------------------------------------

/// Out-of-band command sent as a JSON text message on an exec session's
/// `control` websocket.  Exactly one of `signal` / `resize` accompanies the
/// corresponding command string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecCommand {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<ExecSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<ExecResize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSignal {
    /// POSIX signal name, e.g. `"SIGHUP"`.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResize {
    pub width: u32,
    pub height: u32,
}

// ---------------------------------------------------------------------------
// Durations on the wire
// ---------------------------------------------------------------------------

/// Render a duration the way the daemon parses it (humantime syntax,
/// millisecond resolution).  Sub-millisecond remainders are dropped so the
/// output stays readable in query strings.
pub fn duration_wire(d: Duration) -> String {
    let truncated = Duration::from_millis(d.as_millis() as u64);
    humantime::format_duration(truncated).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_decodes_all_side_channel_fields() {
        let body = r#"{
            "type": "sync",
            "status-code": 200,
            "status": "OK",
            "result": {"version": "1.4.0", "boot-id": "b1"},
            "warning-count": 3,
            "warning-timestamp": "2021-05-03T03:55:49Z",
            "maintenance": {"message": "system is restarting", "kind": "system-restart"}
        }"#;
        let env: Envelope = serde_json::from_str(body).expect("decode envelope");
        assert_eq!(env.kind, EnvelopeType::Sync);
        assert_eq!(env.status_code, 200);
        assert_eq!(env.warning_count, 3);
        let maint = env.maintenance.expect("maintenance present");
        assert_eq!(maint.kind.as_deref(), Some("system-restart"));
        let info: SysInfo = serde_json::from_str(env.result.unwrap().get()).expect("result");
        assert_eq!(info.version, "1.4.0");
        assert_eq!(info.boot_id, "b1");
    }

    #[test]
    fn change_data_get_distinguishes_missing_from_undecodable() {
        let body = r#"{
            "id": "42",
            "kind": "exec",
            "spawn-time": "2021-05-03T03:55:49Z",
            "ready": true,
            "data": {"exit-code": 3, "garbage": "not-a-number"}
        }"#;
        let change: Change = serde_json::from_str(body).expect("decode change");
        let code: i32 = change.get("exit-code").expect("exit-code present");
        assert_eq!(code, 3);
        assert!(matches!(
            change.get::<i32>("missing"),
            Err(DataError::NoSuchData { .. })
        ));
        assert!(matches!(
            change.get::<i32>("garbage"),
            Err(DataError::Decode { .. })
        ));
    }

    #[test]
    fn change_data_preserves_large_integers() {
        // Above 2^53: a double round-trip would corrupt this.
        let body = r#"{
            "id": "1",
            "kind": "exec",
            "spawn-time": "2021-05-03T03:55:49Z",
            "data": {"big": 9007199254740993}
        }"#;
        let change: Change = serde_json::from_str(body).expect("decode change");
        let big: u64 = change.get("big").expect("big");
        assert_eq!(big, 9_007_199_254_740_993);
    }

    #[test]
    fn notice_type_key_and_occurrence_ordering() {
        let body = r#"{
            "id": "123456789012345678",
            "user-id": 1000,
            "type": "change-update",
            "key": "42",
            "first-occurred": "2023-09-05T15:04:05Z",
            "last-occurred": "2023-09-05T17:04:05Z",
            "last-repeated": "2023-09-05T16:04:05Z",
            "occurrences": 7,
            "repeat-after": "30m",
            "expire-after": "168h"
        }"#;
        let notice: Notice = serde_json::from_str(body).expect("decode notice");
        assert_eq!(notice.kind, NoticeType::ChangeUpdate);
        assert!(notice.last_occurred >= notice.first_occurred);
        assert!(notice.last_repeated <= notice.last_occurred);
        assert_eq!(notice.repeat_after(), Some(Duration::from_secs(30 * 60)));
        assert_eq!(
            notice.expire_after(),
            Some(Duration::from_secs(168 * 60 * 60))
        );
    }

    #[test]
    fn unknown_notice_type_does_not_fail_decode() {
        let body = r#"{
            "id": "1",
            "type": "experimental-extension",
            "key": "k",
            "first-occurred": "2023-09-05T15:04:05Z",
            "last-occurred": "2023-09-05T15:04:05Z",
            "last-repeated": "2023-09-05T15:04:05Z"
        }"#;
        let notice: Notice = serde_json::from_str(body).expect("decode notice");
        assert_eq!(notice.kind, NoticeType::Unknown);
    }

    #[test]
    fn file_info_type_qualifiers() {
        let body = r#"{
            "path": "/dev/null",
            "name": "null",
            "type": "device",
            "permissions": "666",
            "last-modified": "2023-09-05T15:04:05Z",
            "user-id": 0,
            "user": "root",
            "group-id": 0,
            "group": "root"
        }"#;
        let info: FileInfo = serde_json::from_str(body).expect("decode file info");
        assert_eq!(info.file_type, FileType::Device);
        assert_eq!(info.size, None);
        assert_eq!(info.user.as_deref(), Some("root"));
    }

    #[test]
    fn exec_command_wire_shape() {
        let signal = ExecCommand {
            command: "signal".to_owned(),
            signal: Some(ExecSignal {
                name: "SIGHUP".to_owned(),
            }),
            resize: None,
        };
        let json = serde_json::to_string(&signal).expect("serialize");
        assert_eq!(json, r#"{"command":"signal","signal":{"name":"SIGHUP"}}"#);

        let resize = ExecCommand {
            command: "resize".to_owned(),
            signal: None,
            resize: Some(ExecResize {
                width: 80,
                height: 24,
            }),
        };
        let json = serde_json::to_string(&resize).expect("serialize");
        assert_eq!(
            json,
            r#"{"command":"resize","resize":{"width":80,"height":24}}"#
        );
    }

    #[test]
    fn duration_wire_formats() {
        assert_eq!(duration_wire(Duration::from_secs(5)), "5s");
        assert_eq!(duration_wire(Duration::from_millis(250)), "250ms");
        assert_eq!(duration_wire(Duration::from_millis(1500)), "1s 500ms");
    }
}
