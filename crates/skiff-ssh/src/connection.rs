//! Authenticated SSH connections

use async_trait::async_trait;
use crate::transport::ClientHandler;
use crate::{Connection, SshSession, Target, TransportError};
use russh::client::Handle;
use std::fmt;
use tracing::debug;

/// Live SSH connection to one target
pub struct SshConnection {
    target: Target,
    handle: Handle<ClientHandler>,
}

impl SshConnection {
    pub(crate) fn new(target: Target, handle: Handle<ClientHandler>) -> Self {
        Self { target, handle }
    }

    /// Target this connection is authenticated against
    pub fn target(&self) -> &Target {
        &self.target
    }
}

impl fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConnection")
            .field("target", &self.target)
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

#[async_trait]
impl Connection for SshConnection {
    type Session = SshSession;

    async fn open_session(&self) -> Result<SshSession, TransportError> {
        let channel = self.handle.channel_open_session().await.map_err(|e| {
            TransportError::Session(format!("cannot open channel to {}: {}", self.target, e))
        })?;
        debug!(target = %self.target, "Session channel opened");
        Ok(SshSession::new(channel))
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!(target = %self.target, "Disconnecting");
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await?;
        Ok(())
    }
}
