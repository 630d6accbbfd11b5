//! Registry accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::broadcast;

use swarmdir_core::config::TransferConfig;
use swarmdir_core::wire::DEFAULT_MAX_RECORD_LEN;
use swarmdir_core::DEFAULT_CHUNK_SIZE;
use swarmdir_services::{FileSizeTable, PeerRegistry};

use crate::session::Session;

/// Transfer limits applied by every session.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub chunk_size: u32,
    pub send_turn_timeout: Duration,
    pub max_record_len: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            send_turn_timeout: Duration::from_secs(30),
            max_record_len: DEFAULT_MAX_RECORD_LEN,
        }
    }
}

impl From<&TransferConfig> for TransferSettings {
    fn from(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            send_turn_timeout: config.send_turn_timeout(),
            max_record_len: config.max_record_len,
        }
    }
}

/// State shared by all sessions.
#[derive(Clone)]
pub struct RegistryState {
    pub registry: PeerRegistry,
    pub file_sizes: FileSizeTable,
    pub settings: Arc<TransferSettings>,
}

impl RegistryState {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            registry: PeerRegistry::new(),
            file_sizes: FileSizeTable::new(),
            settings: Arc::new(settings),
        }
    }
}

pub struct RegistryServer {
    listener: TcpListener,
    state: RegistryState,
    shutdown: broadcast::Receiver<()>,
}

impl RegistryServer {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        state: RegistryState,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("failed to bind registry listener")?;
        Ok(Self {
            listener,
            state,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(mut self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "registry listening");
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("registry listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            // Out of descriptors and similar; back off briefly.
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    tracing::debug!(peer_addr = %addr, "connection accepted");
                    tokio::spawn(Session::from_tcp(self.state.clone(), stream, addr).run());
                }
            }
        }
    }
}
