//! # Skiff
//!
//! Parallel remote execution and file transfer over pooled SSH connections.
//!
//! - [`FanOut`] runs one operation per host across an index range and
//!   aggregates the outcome.
//! - [`FileTransfer`] moves single files with the scp protocol on a session
//!   channel, reporting progress as it goes.
//! - [`ConnectionPool`] (from `skiff-ssh`) supplies the sessions.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use skiff::{ConnectionPool, FanOut, HostIdentityVerifier, PoolConfig, RemoteSession, SshConfig, Target};
//!
//! # async fn run() -> skiff::Result<()> {
//! let verifier = Arc::new(HostIdentityVerifier::strict_default()?);
//! let pool = Arc::new(ConnectionPool::ssh(PoolConfig::default(), SshConfig::new(verifier)));
//!
//! let fanout = FanOut::new(|index| format!("node{}", index));
//! let report = fanout
//!     .execute(1, 6, move |host| {
//!         let pool = Arc::clone(&pool);
//!         async move {
//!             let mut session = pool.session(&Target::new("root", host)).await?;
//!             Ok::<Bytes, skiff::SkiffError>(session.output("uptime").await?)
//!         }
//!     })
//!     .await?;
//! println!("{} hosts done", report.completed.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use skiff_proto as proto;
pub use skiff_ssh as ssh;

/// Error types for the Skiff library
pub mod error;

/// Parallel execution over host index ranges
pub mod fanout;

/// scp upload and download
pub mod transfer;

pub use error::SkiffError;
pub use fanout::{ExecutionResult, FanOut, FanOutObserver, FanOutReport, TracingObserver};
pub use transfer::{FileTransfer, TransferDescriptor, TransferOutcome};
pub use skiff_proto::{ProgressFn, ProtocolError};
pub use skiff_ssh::{
    ConnectionPool, HostIdentityVerifier, PoolConfig, ReconnectPolicy, RemoteSession, SshConfig,
    Target, TransportError,
};

/// Result type alias for Skiff operations
pub type Result<T> = std::result::Result<T, SkiffError>;
