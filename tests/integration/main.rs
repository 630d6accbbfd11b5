//! swarmdir integration test harness.
//!
//! Every test runs its own registry in-process on 127.0.0.1:0 and talks to
//! it over real TCP, either through `swarmdir-peer` clients or through raw
//! connections that write protocol bytes by hand.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use swarmdir_core::RecordReader;
use swarmdird::{RegistryServer, RegistryState, TransferSettings};

mod protocol;
mod scenario;
mod serializer;

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct TestRegistry {
    pub addr: SocketAddr,
    pub state: RegistryState,
    // Dropping the sender stops the accept loop.
    _shutdown: broadcast::Sender<()>,
}

pub async fn start_registry() -> Result<TestRegistry> {
    start_registry_with(TransferSettings::default()).await
}

pub async fn start_registry_with(settings: TransferSettings) -> Result<TestRegistry> {
    let state = RegistryState::new(settings);
    let (shutdown, _) = broadcast::channel(1);
    let server = RegistryServer::bind("127.0.0.1:0", state.clone(), shutdown.subscribe()).await?;
    let addr = server.local_addr()?;
    tokio::spawn(server.run());
    Ok(TestRegistry {
        addr,
        state,
        _shutdown: shutdown,
    })
}

/// Poll `cond` every 10ms until it holds or `secs` elapse.
pub async fn wait_until(secs: u64, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {secs}s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// A hand-driven protocol connection.
pub struct RawConn {
    pub reader: RecordReader<BufReader<OwnedReadHalf>>,
    pub writer: OwnedWriteHalf,
}

impl RawConn {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, writer) = stream.into_split();
        Ok(Self {
            reader: RecordReader::new(BufReader::new(read)),
            writer,
        })
    }

    /// Connect and register `name` in `role` ("CLIENT" or "TRANSIENT").
    pub async fn register(addr: SocketAddr, name: &str, role: &str) -> Result<Self> {
        let mut conn = Self::connect(addr).await?;
        conn.send(format!("NAME\r\n{name}\r\n{role}\r\n").as_bytes())
            .await?;
        conn.expect("ACK").await?;
        Ok(conn)
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    pub async fn record(&mut self) -> Result<String> {
        tokio::time::timeout(Duration::from_secs(5), self.reader.expect_record())
            .await
            .context("timed out waiting for a record")?
            .context("reading record")
    }

    pub async fn expect(&mut self, record: &str) -> Result<()> {
        let got = self.record().await?;
        if got != record {
            bail!("expected {record:?}, got {got:?}");
        }
        Ok(())
    }

    /// Read exactly `n` raw bytes.
    pub async fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        tokio::time::timeout(
            Duration::from_secs(5),
            self.reader.get_mut().read_exact(&mut buf),
        )
        .await
        .context("timed out waiting for bytes")??;
        Ok(buf)
    }

    /// True if nothing arrives within `ms`.
    pub async fn quiet_for(&mut self, ms: u64) -> bool {
        tokio::time::timeout(Duration::from_millis(ms), self.reader.next_record())
            .await
            .is_err()
    }
}
