//! Client error taxonomy.
//!
//! Every failure a caller can see is one of these variants; transport-level
//! detail is stringified the way the daemon's other clients do it, while
//! server-reported errors stay fully typed so callers can branch on `kind`.

use std::path::PathBuf;

use serde_json::value::RawValue;
use warden_protocol::{DataError, WireError};

/// Error kinds the daemon reports in `error` envelopes.
///
/// Unknown kinds are preserved verbatim in [`ErrorKind::Other`] so a newer
/// daemon never turns into a decode failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    LoginRequired,
    SystemRestart,
    DaemonRestart,
    NoDefaultServices,
    NotFound,
    PermissionDenied,
    GenericFileError,
    Other(String),
}

impl ErrorKind {
    pub(crate) fn from_wire(kind: Option<String>) -> Option<Self> {
        let kind = kind?;
        Some(match kind.as_str() {
            "login-required" => ErrorKind::LoginRequired,
            "system-restart" => ErrorKind::SystemRestart,
            "daemon-restart" => ErrorKind::DaemonRestart,
            "no-default-services" => ErrorKind::NoDefaultServices,
            "not-found" => ErrorKind::NotFound,
            "permission-denied" => ErrorKind::PermissionDenied,
            "generic-file-error" => ErrorKind::GenericFileError,
            _ => ErrorKind::Other(kind),
        })
    }
}

/// A typed error reported by the daemon.
#[derive(Debug, Clone)]
pub struct ServerError {
    pub message: String,
    pub kind: Option<ErrorKind>,
    /// HTTP status echoed by the envelope (0 for maintenance errors, which
    /// ride along outside any particular reply status).
    pub status_code: u16,
    /// Kind-specific payload, retained raw for on-demand decoding.
    pub value: Option<Box<RawValue>>,
}

impl ServerError {
    pub(crate) fn from_wire(wire: WireError, status_code: u16) -> Self {
        ServerError {
            message: wire.message,
            kind: ErrorKind::from_wire(wire.kind),
            status_code,
            value: wire.value,
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// All failures surfaced by [`crate::Client`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// URL or body construction failed before any I/O happened.
    #[error("cannot build request: {0}")]
    RequestBuild(String),

    /// Transport-layer failure: dial, socket/TCP I/O, TLS handshake or pin
    /// mismatch.  Callers may retry.
    #[error("cannot communicate with daemon: {0}")]
    Connection(String),

    /// The daemon's named socket does not exist (daemon not started yet?).
    #[error("socket {path:?} not found")]
    SocketNotFound { path: PathBuf },

    /// The reply did not have the shape this operation requires; indicates
    /// daemon/client skew.
    #[error("{0}")]
    ProtocolShape(String),

    /// The daemon returned a typed `error` envelope.
    #[error("{0}")]
    Server(ServerError),

    /// Local read/write on a caller-supplied stream failed.
    #[error("local I/O error: {0}")]
    LocalIo(String),

    /// The remote process completed with a non-zero exit code.  Not a
    /// protocol failure; carries the code for the caller.
    #[error("exit status {code}")]
    ExitNonZero { code: i32 },

    /// A change completed with a non-empty error string.
    #[error("{message}")]
    ChangeFailed { message: String },

    /// Kind-specific data access on a change or task failed.
    #[error(transparent)]
    Data(#[from] DataError),
}

impl ClientError {
    /// The exit code carried by an [`ClientError::ExitNonZero`], if that is
    /// what this error is.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ClientError::ExitNonZero { code } => Some(*code),
            _ => None,
        }
    }
}
