//! Pool keys

use crate::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Remote account a connection is authenticated as
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Login name
    pub user: String,
    /// Hostname or IP
    pub host: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Target {
    /// Create a target on the default port
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port: DEFAULT_PORT,
        }
    }

    /// Override the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port` for dialing
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)?;
        if self.port != DEFAULT_PORT {
            write!(f, ":{}", self.port)?;
        }
        Ok(())
    }
}

impl FromStr for Target {
    type Err = TransportError;

    /// Parse `user@host` or `user@host:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, rest) = s
            .split_once('@')
            .ok_or_else(|| TransportError::Configuration(format!("Missing user in target: {}", s)))?;
        if user.is_empty() {
            return Err(TransportError::Configuration(format!("Empty user in target: {}", s)));
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    TransportError::Configuration(format!("Invalid port in target: {}", s))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(TransportError::Configuration(format!("Empty host in target: {}", s)));
        }

        Ok(Self::new(user, host).with_port(port))
    }
}
