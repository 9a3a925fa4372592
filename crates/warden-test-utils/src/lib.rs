// warden-test-utils: mock wardend daemons for integration testing.
//
// Binds to port 0 (or a caller-supplied unix socket path); each test spins
// up its own isolated instance, enqueues scripted replies, and inspects the
// recorded requests afterwards.

mod mock_daemon;
mod tls_daemon;

pub use mock_daemon::{MockDaemon, Recorded, Reply};
pub use tls_daemon::{MockTlsDaemon, ServerIdentity};
