//! # Skiff Protocol
//!
//! Wire format for the remote-copy (scp) protocol used by Skiff transfers.
//!
//! A single file travels as a textual control line followed by the raw
//! payload and a NUL terminator:
//!
//! ```text
//! C0644 10000 data.bin\n<10000 bytes>\0
//! ```
//!
//! Every step is acknowledged by the receiving side with one status byte.

#![warn(missing_docs)]

/// Control line and status bytes
pub mod control;

/// Reader/writer halves of the scp stream
pub mod codec;

/// Progress-observing writer
pub mod progress;

/// Error types for protocol operations
pub mod error;

pub use control::{ControlLine, status};
pub use codec::{ScpReader, ScpWriter, MAX_LINE_LENGTH};
pub use progress::{ProgressFn, ProgressWriter};
pub use error::ProtocolError;
