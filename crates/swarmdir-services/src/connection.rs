//! Peer connection handles.
//!
//! A `PeerConnection` is the write side of one accepted TCP connection plus a
//! close signal. The session task owns the read side; every other task that
//! needs to reach the peer (relay copies, EXIT fan-out, teardown) goes
//! through a cloned handle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex, MutexGuard};

/// Boxed write half. Tests substitute in-memory duplex streams.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Process-unique connection identifier.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct PeerConnection {
    id: ConnectionId,
    addr: SocketAddr,
    writer: Arc<Mutex<BoxedWriter>>,
    closed: Arc<watch::Sender<bool>>,
}

impl PeerConnection {
    pub fn new(addr: SocketAddr, writer: BoxedWriter) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(closed),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address as observed by the registry.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Write `bytes` as one unit and flush.
    pub async fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut w = self.writer.lock().await;
        w.write_all(bytes).await?;
        w.flush().await
    }

    /// Exclusive write access for multi-part frames (DATA header + payload).
    pub async fn lock_writer(&self) -> MutexGuard<'_, BoxedWriter> {
        self.writer.lock().await
    }

    /// Signal the owning session to stop reading. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that resolves once [`close`](Self::close) has been called.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Flush and shut down the write half. Errors are ignored; the peer may already be gone.
    pub async fn shutdown(&self) {
        let mut w = self.writer.lock().await;
        let _ = w.shutdown().await;
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Wait until `rx` observes a close. Returns immediately if already closed.
pub async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    // Sender lives as long as any handle; a dropped sender also means closed.
    let _ = rx.wait_for(|closed| *closed).await;
}
