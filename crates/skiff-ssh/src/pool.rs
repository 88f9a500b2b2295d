//! Connection pool

use crate::{Connection, SshConfig, SshTransport, Target, Transport, TransportError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};


/// What to do when a cached connection is found closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Keep the dead connection; session opens fail until the pool is rebuilt
    #[default]
    Never,
    /// Dial again before opening the session
    OnClosed,
}

/// Connection pool configuration
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Handling of closed cached connections
    pub reconnect: ReconnectPolicy,
}

impl PoolConfig {
    /// Set the reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// Snapshot of the pool contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Targets with an entry
    pub targets: usize,
    /// Entries holding a connection
    pub connected: usize,
    /// Entries currently connecting or opening a session
    pub busy: usize,
}

/// Per-target slot holding at most one connection.
///
/// The slot lock serializes connection setup and session opens for the
/// target.
pub struct PooledConnection<C> {
    target: Target,
    slot: tokio::sync::Mutex<Option<C>>,
}

impl<C: Connection> PooledConnection<C> {
    fn new(target: Target) -> Self {
        Self {
            target,
            slot: tokio::sync::Mutex::new(None),
        }
    }

    /// Target this slot belongs to
    pub fn target(&self) -> &Target {
        &self.target
    }
}

/// Lazily connecting pool with one connection per [`Target`]
pub struct ConnectionPool<T: Transport> {
    transport: T,
    config: PoolConfig,
    entries: Mutex<HashMap<Target, Arc<PooledConnection<T::Connection>>>>,
    handshakes: AtomicU64,
}

/// Session type produced by a pool over transport `T`
pub type PoolSession<T> = <<T as Transport>::Connection as Connection>::Session;

impl ConnectionPool<SshTransport> {
    /// Pool over the russh transport
    pub fn ssh(config: PoolConfig, ssh: SshConfig) -> Self {
        Self::new(config, SshTransport::new(ssh))
    }
}

impl<T: Transport> ConnectionPool<T> {
    /// Create a new connection pool
    pub fn new(config: PoolConfig, transport: T) -> Self {
        Self {
            transport,
            config,
            entries: Mutex::new(HashMap::new()),
            handshakes: AtomicU64::new(0),
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open a new session on `target`, connecting first if needed.
    ///
    /// A failed connect leaves the target without a connection; the next call
    /// dials again.
    pub async fn session(&self, target: &Target) -> Result<PoolSession<T>, TransportError> {
        let entry = self.entry(target);
        let mut slot = entry.slot.lock().await;

        if self.config.reconnect == ReconnectPolicy::OnClosed
            && slot.as_ref().is_some_and(|connection| connection.is_closed())
        {
            info!(target = %target, "Cached connection closed, reconnecting");
            *slot = None;
        }

        if slot.is_none() {
            debug!(target = %target, "Connecting");
            let connection = self.transport.connect(target).await.map_err(|e| {
                warn!(target = %target, error = %e, "Connect failed");
                e
            })?;
            self.handshakes.fetch_add(1, Ordering::Relaxed);
            *slot = Some(connection);
        } else {
            debug!(target = %target, "Reusing cached connection");
        }

        let connection = slot.as_ref().ok_or_else(|| {
            TransportError::Session(format!("no connection to {}", target))
        })?;
        connection.open_session().await
    }

    /// Current pool contents
    pub fn stats(&self) -> PoolStats {
        let entries: Vec<_> = self.lock_entries().values().cloned().collect();
        let mut stats = PoolStats {
            targets: entries.len(),
            ..PoolStats::default()
        };
        for entry in entries {
            match entry.slot.try_lock() {
                Ok(slot) if slot.is_some() => stats.connected += 1,
                Ok(_) => {}
                Err(_) => stats.busy += 1,
            }
        }
        stats
    }

    /// Number of successful connects since the pool was created
    pub fn handshakes(&self) -> u64 {
        self.handshakes.load(Ordering::Relaxed)
    }

    /// Disconnect and forget every cached connection
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.lock_entries().drain().map(|(_, entry)| entry).collect();
        info!("Shutting down connection pool ({} targets)", entries.len());

        for entry in entries {
            let connection = entry.slot.lock().await.take();
            if let Some(connection) = connection {
                if let Err(e) = connection.close().await {
                    warn!(target = %entry.target, error = %e, "Error closing connection");
                }
            }
        }
    }

    fn entry(&self, target: &Target) -> Arc<PooledConnection<T::Connection>> {
        let mut entries = self.lock_entries();
        let entry = entries
            .entry(target.clone())
            .or_insert_with(|| Arc::new(PooledConnection::new(target.clone())));
        Arc::clone(entry)
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<Target, Arc<PooledConnection<T::Connection>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
