//! Transport abstraction and the russh implementation

use async_trait::async_trait;
use crate::{HostIdentityVerifier, RemoteSession, SshConnection, Target, TransportError};
use russh::keys::agent::client::AgentClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Establishes authenticated connections to targets
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection type produced by this transport
    type Connection: Connection;

    /// Dial, verify and authenticate against `target`
    async fn connect(&self, target: &Target) -> Result<Self::Connection, TransportError>;
}

/// An authenticated connection able to multiplex sessions
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Session type opened on this connection
    type Session: RemoteSession;

    /// Open a new session channel
    async fn open_session(&self) -> Result<Self::Session, TransportError>;

    /// True once the underlying connection has gone away
    fn is_closed(&self) -> bool;

    /// Disconnect
    async fn close(&self) -> Result<(), TransportError>;
}

/// SSH configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Upper bound on the TCP dial
    pub connect_timeout: Duration,
    /// Environment variable holding the agent socket path
    pub agent_socket_env: String,
    /// Server key policy shared by every connection attempt
    pub host_identity: Arc<HostIdentityVerifier>,
}

impl SshConfig {
    /// Default settings with the given host key policy
    pub fn new(host_identity: Arc<HostIdentityVerifier>) -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            agent_socket_env: "SSH_AUTH_SOCK".to_string(),
            host_identity,
        }
    }

    /// Override the dial timeout
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Read the agent socket path from another variable
    pub fn with_agent_socket_env(mut self, name: impl Into<String>) -> Self {
        self.agent_socket_env = name.into();
        self
    }
}

/// Transport authenticating through the local SSH agent
pub struct SshTransport {
    config: SshConfig,
    client_config: Arc<russh::client::Config>,
}

impl SshTransport {
    /// Create a new SSH transport
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            client_config: Arc::new(russh::client::Config::default()),
        }
    }

    /// Get the transport configuration
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    fn agent_socket(&self) -> Result<PathBuf, TransportError> {
        let name = &self.config.agent_socket_env;
        match std::env::var_os(name) {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Err(TransportError::AgentUnavailable(format!("{} is not set", name))),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    type Connection = SshConnection;

    async fn connect(&self, target: &Target) -> Result<SshConnection, TransportError> {
        let socket = self.agent_socket()?;
        let mut agent = AgentClient::connect_uds(&socket).await.map_err(|e| {
            TransportError::AgentUnavailable(format!("{}: {}", socket.display(), e))
        })?;
        let identities = agent.request_identities().await.map_err(|e| {
            TransportError::AgentUnavailable(format!("cannot list identities: {}", e))
        })?;
        if identities.is_empty() {
            return Err(TransportError::Authentication {
                target: target.to_string(),
                message: "agent holds no identities".to_string(),
            });
        }

        let limit = self.config.connect_timeout;
        let stream = match timeout(limit, TcpStream::connect(target.address())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    target: target.to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TransportError::Timeout {
                    target: target.to_string(),
                    duration: limit,
                })
            }
        };

        let handler = ClientHandler {
            host: target.host.clone(),
            port: target.port,
            verifier: Arc::clone(&self.config.host_identity),
        };
        let mut handle = russh::client::connect_stream(Arc::clone(&self.client_config), stream, handler)
            .await
            .map_err(|e| match e {
                TransportError::Ssh(e) => TransportError::Connect {
                    target: target.to_string(),
                    message: e.to_string(),
                },
                other => other,
            })?;

        let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
        let mut authenticated = false;
        for identity in identities {
            match handle
                .authenticate_publickey_with(target.user.clone(), identity, hash_alg, &mut agent)
                .await
            {
                Ok(result) if result.success() => {
                    authenticated = true;
                    break;
                }
                Ok(_) => debug!(target = %target, "Agent identity refused"),
                Err(e) => warn!(target = %target, error = ?e, "Agent signing failed"),
            }
        }
        if !authenticated {
            return Err(TransportError::Authentication {
                target: target.to_string(),
                message: "no agent identity accepted".to_string(),
            });
        }

        info!(target = %target, "SSH connection established");
        Ok(SshConnection::new(target.clone(), handle))
    }
}

/// russh callbacks for a client connection
pub struct ClientHandler {
    host: String,
    port: u16,
    verifier: Arc<HostIdentityVerifier>,
}

impl russh::client::Handler for ClientHandler {
    type Error = TransportError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        self.verifier.verify(&self.host, self.port, server_public_key)?;
        Ok(true)
    }
}
