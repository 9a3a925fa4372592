//! Client configuration.
//!
//! Immutable once handed to [`crate::Client::new`].  Exactly one of
//! `socket_path` / `base_url` is meaningful; leaving both unset selects the
//! default socket path.

use std::path::PathBuf;
use std::time::Duration;

/// Well-known socket under the daemon's state directory.
pub const DEFAULT_SOCKET_PATH: &str = "/var/lib/wardend/wardend.socket";

/// Configuration for a [`crate::Client`].
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Filesystem socket to dial.  Mutually exclusive with `base_url`.
    pub socket_path: Option<PathBuf>,
    /// Absolute base URL (`http://…` or, with the `tls` feature, `https://…`).
    /// Mutually exclusive with `socket_path`.
    pub base_url: Option<String>,
    /// Overrides the default `warden-client/<version>` user agent.
    pub user_agent: Option<String>,
    /// Set to true to disable connection reuse across requests.
    pub disable_keep_alive: bool,

    /// Expected identity fingerprint,
    /// `base32-no-pad(sha384(ed25519-public-key))`.  Checked against the
    /// identity certificate the server presents.
    pub fingerprint: Option<String>,
    /// PEM-encoded identity certificate to pin as the sole trust root.
    pub identity_cert_pem: Option<Vec<u8>>,
    /// Accept any server certificate.  Precondition for pairing; never set
    /// this outside of a pairing flow.
    pub insecure: bool,

    /// Tick interval for transient-failure retry of GET requests.
    /// Defaults to 250 ms; exposed so tests can tighten the loop.
    pub dial_retry_interval: Option<Duration>,
    /// Deadline for the retry loop.  Defaults to 5 s.
    pub dial_retry_timeout: Option<Duration>,
}
