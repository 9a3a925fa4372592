// warden-client: client library for the wardend service-manager daemon.
//
// Speaks the daemon's HTTP API over a filesystem socket or TCP (optionally
// TLS with pinning-based trust), overlays the sync/async/raw reply shapes,
// and bridges to the streaming surfaces: framed logs and interactive exec
// sessions multiplexed over websockets.
//
// Reconnection across daemon restarts is the caller's responsibility; a
// `Client` owns one connection pool and its side-channel daemon state, and
// everything it returns is a snapshot.

mod changes;
mod checks;
mod client;
mod config;
mod daemon;
mod envelope;
mod error;
mod exec;
mod files;
mod health;
mod identities;
mod logs;
mod notices;
mod plan;
mod requester;
mod services;
mod signals;
#[cfg(feature = "tls")]
mod tls;
mod transport;

pub use changes::{ChangeSelector, ChangesOptions};
pub use checks::ChecksOptions;
pub use client::Client;
pub use config::{Config, DEFAULT_SOCKET_PATH};
#[cfg(feature = "tls")]
pub use daemon::PairedIdentity;
pub use error::{ClientError, ErrorKind, ServerError};
pub use exec::{ExecOptions, ExecProcess, ExecReader, ExecWriter};
pub use files::{ListFilesOptions, MakeDirOptions, PushOptions};
pub use health::HealthOptions;
pub use logs::{LogEntry, LogsOptions};
pub use notices::{NoticesOptions, NotifyOptions};
pub use plan::AddLayerOptions;
pub use services::ServicesOptions;

// Wire types are part of the public surface; re-export the protocol crate
// so embedders need only one dependency.
pub use warden_protocol as protocol;
pub use warden_protocol::{
    Change, CheckInfo, CheckLevel, CheckStatus, DataError, FileInfo, FileType, Identity,
    IdentityAccess, LogStream, Notice, NoticeType, ServiceInfo, ServiceStartup, ServiceStatus,
    SysInfo, Task,
};
