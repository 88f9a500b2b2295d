//! Control line and status bytes

use crate::ProtocolError;
use std::fmt;

/// Status bytes exchanged between sender and receiver
pub mod status {
    /// Step acknowledged
    pub const OK: u8 = 0;
    /// Non-fatal problem, a message line follows
    pub const WARNING: u8 = 1;
    /// Fatal problem, a message line follows
    pub const ERROR: u8 = 2;
}

/// Permission bits carried on the wire
pub const MODE_MASK: u32 = 0o777;

/// Metadata line announcing a single file: `C<mode> <size> <name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLine {
    /// Permission bits
    pub mode: u32,
    /// Payload size in bytes
    pub size: u64,
    /// Base name of the file
    pub name: String,
}

impl ControlLine {
    /// Create a new control line. Mode bits outside `0o777` are dropped.
    pub fn new(mode: u32, size: u64, name: impl Into<String>) -> Self {
        Self {
            mode: mode & MODE_MASK,
            size,
            name: name.into(),
        }
    }

    /// Encode the line including its trailing newline
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }

    /// Parse a line received from the wire, without its newline.
    ///
    /// Any deviation from the three-field layout is reported as
    /// [`ProtocolError::MalformedControlLine`] carrying `line` verbatim.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedControlLine(line.to_string());

        let body = line.strip_prefix('C').ok_or_else(malformed)?;
        let fields: Vec<&str> = body.splitn(3, ' ').collect();
        if fields.len() != 3 {
            return Err(malformed());
        }

        if !is_digits(fields[0]) || !is_digits(fields[1]) {
            return Err(malformed());
        }
        let mode = u32::from_str_radix(fields[0], 8).map_err(|_| malformed())?;
        let size = fields[1].parse::<u64>().map_err(|_| malformed())?;
        let name = fields[2];
        if name.is_empty() || name.contains('\n') {
            return Err(malformed());
        }

        Ok(Self::new(mode, size, name))
    }
}

fn is_digits(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{:04o} {} {}", self.mode, self.size, self.name)
    }
}
