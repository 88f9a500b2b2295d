//! Error types for the Skiff library

use crate::ExecutionResult;
use skiff_proto::ProtocolError;
use skiff_ssh::TransportError;
use thiserror::Error;

/// Main error type for Skiff operations
#[derive(Debug, Error)]
pub enum SkiffError {
    /// Could not reach or authenticate to a host
    #[error("Connection error: {0}")]
    Connect(TransportError),

    /// Session channel could not be opened or used
    #[error("Session error: {0}")]
    Session(String),

    /// A remote command exited unsuccessfully
    #[error("Remote command error: {0}")]
    RemoteCommand(TransportError),

    /// The scp exchange went wrong
    #[error("Transfer protocol error: {0}")]
    TransferProtocol(#[from] ProtocolError),

    /// One or more fan-out units failed
    #[error("{} of {total} units failed", failures.len())]
    FanOut {
        /// Failed units in arrival order
        failures: Vec<ExecutionResult>,
        /// Number of units dispatched
        total: usize,
    },

    /// Invalid caller input
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A spawned task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl SkiffError {
    /// True when a remote command was terminated by `SIGKILL`
    pub fn is_sigkill(&self) -> bool {
        matches!(self, Self::RemoteCommand(e) if e.is_sigkill())
    }

    /// True when a remote command exited non-zero on its own
    pub fn exited_without_signal(&self) -> bool {
        matches!(self, Self::RemoteCommand(e) if e.exited_without_signal())
    }
}

impl From<TransportError> for SkiffError {
    fn from(err: TransportError) -> Self {
        match err {
            e if e.is_connect() => Self::Connect(e),
            e @ TransportError::CommandFailed { .. } => Self::RemoteCommand(e),
            TransportError::Session(msg) => Self::Session(msg),
            TransportError::Io(e) => Self::Io(e),
            TransportError::Configuration(msg) => Self::Configuration(msg),
            e @ TransportError::Ssh(_) => Self::Session(e.to_string()),
            e => Self::Connect(e),
        }
    }
}

impl From<tokio::task::JoinError> for SkiffError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
