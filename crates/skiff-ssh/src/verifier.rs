//! Server identity checks

use crate::TransportError;
use russh::keys::{Error as KeyError, HashAlg, PublicKey};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Decides whether a server's host key is trusted.
///
/// Built once at startup and shared with every connection attempt.
#[derive(Debug, Clone)]
pub enum HostIdentityVerifier {
    /// Only keys recorded in an OpenSSH `known_hosts` file are accepted
    Strict {
        /// Trust store path
        known_hosts: PathBuf,
    },
    /// Any key is accepted
    Permissive,
}

impl HostIdentityVerifier {
    /// Verify against the given `known_hosts` file, which must be readable
    pub fn strict(known_hosts: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let known_hosts = known_hosts.into();
        File::open(&known_hosts).map_err(|e| {
            TransportError::Configuration(format!(
                "Cannot read known_hosts {}: {}",
                known_hosts.display(),
                e
            ))
        })?;
        Ok(Self::Strict { known_hosts })
    }

    /// Verify against `$HOME/.ssh/known_hosts`
    pub fn strict_default() -> Result<Self, TransportError> {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| TransportError::Configuration("HOME is not set".to_string()))?;
        Self::strict(Path::new(&home).join(".ssh").join("known_hosts"))
    }

    /// Accept every host key
    pub fn permissive() -> Self {
        Self::Permissive
    }

    /// Check the key presented by `host:port`
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), TransportError> {
        let known_hosts = match self {
            Self::Permissive => {
                warn!(host = %host, port, fingerprint = %fingerprint(key), "Accepting unverified host key");
                return Ok(());
            }
            Self::Strict { known_hosts } => known_hosts,
        };

        let rejected = |reason: String| TransportError::HostKeyRejected {
            host: host.to_string(),
            reason,
        };

        match russh::keys::check_known_hosts_path(host, port, key, known_hosts) {
            Ok(true) => {
                debug!(host = %host, port, "Host key verified");
                Ok(())
            }
            Ok(false) => Err(rejected(format!(
                "unknown host, fingerprint {}",
                fingerprint(key)
            ))),
            Err(KeyError::KeyChanged { line }) => {
                warn!(host = %host, port, line, "Host key mismatch");
                Err(rejected(format!(
                    "key does not match {} line {}",
                    known_hosts.display(),
                    line
                )))
            }
            Err(e) => Err(rejected(format!("cannot check known_hosts: {}", e))),
        }
    }
}

/// SHA-256 fingerprint of a public key
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}
