//! SSH-specific error types

use bytes::Bytes;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// No usable SSH agent
    #[error("SSH agent unavailable: {0}")]
    AgentUnavailable(String),

    /// TCP dial or SSH handshake failed
    #[error("SSH connection to {target} failed: {message}")]
    Connect {
        /// `user@host` being dialed
        target: String,
        /// Failure detail
        message: String,
    },

    /// Dial did not complete in time
    #[error("Connection to {target} timed out after {duration:?}")]
    Timeout {
        /// `user@host` being dialed
        target: String,
        /// Configured limit
        duration: Duration,
    },

    /// Server key is unknown or does not match the trust store
    #[error("Host key for {host} rejected: {reason}")]
    HostKeyRejected {
        /// Host name presented to the verifier
        host: String,
        /// Why the key was rejected
        reason: String,
    },

    /// No agent identity was accepted
    #[error("Authentication failed for {target}: {message}")]
    Authentication {
        /// `user@host` being authenticated
        target: String,
        /// Failure detail
        message: String,
    },

    /// Low-level SSH protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Session channel could not be opened or used
    #[error("Session error: {0}")]
    Session(String),

    /// Remote command exited unsuccessfully
    #[error("Remote command failed ({})", describe_exit(*status, signal.as_deref()))]
    CommandFailed {
        /// Exit status, if the command exited
        status: Option<u32>,
        /// Signal name without the `SIG` prefix, if the command was killed
        signal: Option<String>,
        /// Output captured before the failure, when collected
        output: Bytes,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

fn describe_exit(status: Option<u32>, signal: Option<&str>) -> String {
    match (status, signal) {
        (_, Some(signal)) => format!("killed by signal {}", signal),
        (Some(status), None) => format!("exit status {}", status),
        (None, None) => "no exit status".to_string(),
    }
}

impl TransportError {
    /// True when the error happened while establishing the connection
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            Self::AgentUnavailable(_)
                | Self::Connect { .. }
                | Self::Timeout { .. }
                | Self::HostKeyRejected { .. }
                | Self::Authentication { .. }
        )
    }

    /// True when a remote command was terminated by `SIGKILL`
    pub fn is_sigkill(&self) -> bool {
        matches!(self, Self::CommandFailed { signal: Some(signal), .. } if signal == "KILL")
    }

    /// True when a remote command exited non-zero on its own
    pub fn exited_without_signal(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed {
                status: Some(_),
                signal: None,
                ..
            }
        )
    }

    /// Attach captured output to a command failure
    pub fn with_output(self, captured: Bytes) -> Self {
        match self {
            Self::CommandFailed { status, signal, .. } => Self::CommandFailed {
                status,
                signal,
                output: captured,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(status: Option<u32>, signal: Option<&str>) -> TransportError {
        TransportError::CommandFailed {
            status,
            signal: signal.map(str::to_string),
            output: Bytes::new(),
        }
    }

    #[test]
    fn test_sigkill_classification() {
        assert!(failed(None, Some("KILL")).is_sigkill());
        assert!(!failed(None, Some("TERM")).is_sigkill());
        assert!(!failed(Some(137), None).is_sigkill());
    }

    #[test]
    fn test_exited_without_signal() {
        assert!(failed(Some(1), None).exited_without_signal());
        assert!(!failed(None, Some("KILL")).exited_without_signal());
        assert!(!TransportError::Session("closed".into()).exited_without_signal());
    }

    #[test]
    fn test_connect_classification() {
        assert!(TransportError::AgentUnavailable("unset".into()).is_connect());
        assert!(TransportError::Timeout {
            target: "a@b".into(),
            duration: Duration::from_secs(1),
        }
        .is_connect());
        assert!(!TransportError::Session("x".into()).is_connect());
        assert!(!failed(Some(1), None).is_connect());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            failed(None, Some("KILL")).to_string(),
            "Remote command failed (killed by signal KILL)"
        );
        assert_eq!(
            failed(Some(2), None).to_string(),
            "Remote command failed (exit status 2)"
        );
    }

    #[test]
    fn test_with_output() {
        let err = failed(Some(1), None).with_output(Bytes::from_static(b"boom"));
        match err {
            TransportError::CommandFailed { output, .. } => assert_eq!(output, "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
