//! SSH transport: one session per `(host)` pooled connection, reused across
//! commands and probes for that host.

pub mod connection;
pub mod pool;

pub use connection::SshConnection;
pub use pool::{SshPool, SshPoolRegistry};
