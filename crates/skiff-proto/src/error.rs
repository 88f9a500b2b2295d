//! Error types for protocol operations

use std::io;
use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A control line that does not match `C<mode> <size> <name>`.
    ///
    /// Carries the literal line as received.
    #[error("Malformed control line: {0:?}")]
    MalformedControlLine(String),

    /// The remote side reported a warning or error status
    #[error("Remote {}: {message}", if *fatal { "error" } else { "warning" })]
    Remote {
        /// True for a fatal (`0x02`) status, false for a warning (`0x01`)
        fatal: bool,
        /// Message sent by the remote side
        message: String,
    },

    /// A status byte outside the known set
    #[error("Unexpected status byte: {0:#04x}")]
    UnexpectedStatus(u8),

    /// Fewer payload bytes than declared in the control line
    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        /// Declared size
        expected: u64,
        /// Bytes actually moved
        actual: u64,
    },

    /// Stream closed before the protocol step completed
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Control line exceeded the maximum length
    #[error("Control line too long (max {max} bytes)")]
    LineTooLong {
        /// Maximum accepted length
        max: usize,
    },

    /// I/O error on the stream or the local file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True when the error means the peer went away mid-transfer.
    ///
    /// These are usually a consequence of the remote command exiting, so the
    /// command's own status is the better diagnostic.
    pub fn is_peer_gone(&self) -> bool {
        match self {
            Self::UnexpectedEof => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}
