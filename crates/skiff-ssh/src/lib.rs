//! # Skiff SSH Transport
//!
//! Pooled SSH transport layer for Skiff.
//!
//! One authenticated connection is kept per `(user, host)` [`Target`]; every
//! remote command gets its own multiplexed session channel on it.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use skiff_ssh::{ConnectionPool, HostIdentityVerifier, PoolConfig, RemoteSession, SshConfig, Target};
//!
//! # async fn run() -> Result<(), skiff_ssh::TransportError> {
//! let verifier = Arc::new(HostIdentityVerifier::strict_default()?);
//! let pool = ConnectionPool::ssh(PoolConfig::default(), SshConfig::new(verifier));
//!
//! let target: Target = "deploy@db1.internal".parse()?;
//! let mut session = pool.session(&target).await?;
//! let uptime = session.output("uptime").await?;
//! println!("{}", String::from_utf8_lossy(&uptime));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Pool keys
pub mod target;

/// Server identity checks
pub mod verifier;

/// Transport abstraction and the russh implementation
pub mod transport;

/// Authenticated SSH connections
pub mod connection;

/// Remote command sessions
pub mod session;

/// Connection pool
pub mod pool;

/// SSH-specific error types
pub mod error;

pub use target::Target;
pub use verifier::HostIdentityVerifier;
pub use transport::{Connection, SshConfig, SshTransport, Transport};
pub use connection::SshConnection;
pub use session::{BoxedReader, BoxedWriter, RemoteSession, SshSession};
pub use pool::{ConnectionPool, PoolConfig, PoolSession, PoolStats, PooledConnection, ReconnectPolicy};
pub use error::TransportError;
