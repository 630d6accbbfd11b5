//! Per-connection session.
//!
//! Each accepted connection starts unbound, becomes bound to a peer name in
//! one role by NAME, and then dispatches commands strictly in order until
//! EXIT, EOF, a fatal I/O error, or the registry closes it.

use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use swarmdir_core::wire::Instruction;
use swarmdir_core::{Chunk, Command, ErrorReply, RecordReader, Reply, Role};
use swarmdir_services::connection::wait_closed;
use swarmdir_services::{BoxedWriter, PeerConnection, RegistryError};

use crate::relay::{self, DownloadOutcome};
use crate::server::RegistryState;

/// The peer name and role this connection registered as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub role: Role,
}

enum Flow {
    Continue,
    Close,
}

pub struct Session<R> {
    state: RegistryState,
    conn: PeerConnection,
    reader: RecordReader<R>,
    binding: Option<Binding>,
}

impl Session<BufReader<OwnedReadHalf>> {
    pub fn from_tcp(state: RegistryState, stream: TcpStream, addr: SocketAddr) -> Self {
        let (read, write) = stream.into_split();
        Self::new(state, BufReader::new(read), Box::new(write), addr)
    }
}

impl<R: AsyncBufRead + Unpin + Send> Session<R> {
    pub fn new(state: RegistryState, reader: R, writer: BoxedWriter, addr: SocketAddr) -> Self {
        let max = state.settings.max_record_len;
        Self {
            state,
            conn: PeerConnection::new(addr, writer),
            reader: RecordReader::with_max_record_len(reader, max),
            binding: None,
        }
    }

    pub async fn run(mut self) {
        let mut closed = self.conn.close_signal();
        loop {
            let next = tokio::select! {
                _ = wait_closed(&mut closed) => {
                    tracing::debug!(peer_addr = %self.conn.addr(), "connection closed by registry");
                    break;
                }
                next = self.reader.next_command() => next,
            };
            match next {
                Ok(Some(cmd)) => match self.dispatch(cmd).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close) => break,
                    Err(e) => {
                        tracing::warn!(peer_addr = %self.conn.addr(), error = %e, "session failed");
                        break;
                    }
                },
                Ok(None) => {
                    tracing::debug!(peer_addr = %self.conn.addr(), "peer closed connection");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::debug!(peer_addr = %self.conn.addr(), error = %e, "invalid command");
                    if self.reply(Reply::Error(ErrorReply::InvalidCommand)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(peer_addr = %self.conn.addr(), error = %e, "dropping connection");
                    break;
                }
            }
        }
        self.teardown().await;
    }

    async fn reply(&self, reply: Reply) -> std::io::Result<()> {
        self.conn.send(&reply.encode()).await
    }

    fn bound_name(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.name.as_str())
    }

    async fn dispatch(&mut self, cmd: Command) -> Result<Flow> {
        tracing::debug!(
            peer_addr = %self.conn.addr(),
            peer = self.bound_name().unwrap_or("-"),
            command = %cmd.keyword(),
            "command"
        );
        let reply = match cmd {
            Command::Register { name, role } => self.register(name, role),
            Command::Announce(chunk) => self.announce(chunk),
            Command::AnnounceSize { filename, size } => match self.bound_name() {
                Some(_) => {
                    self.state.file_sizes.record(&filename, size);
                    Reply::Ack
                }
                None => Reply::Error(ErrorReply::NotRegistered),
            },
            Command::Query(chunk) => self.query(&chunk),
            Command::QuerySize { filename } => Reply::FileSize(self.state.file_sizes.get(&filename)),
            Command::List => {
                Reply::FileList(self.state.registry.list_filenames().into_iter().collect())
            }
            Command::Download(chunk) => {
                let Some(requester) = self.bound_name() else {
                    self.reply(Reply::Error(ErrorReply::NotRegistered)).await?;
                    return Ok(Flow::Continue);
                };
                match relay::start_download(&self.state, requester, chunk).await {
                    // DATA frame arrives later, forwarded by the owner's relay session.
                    DownloadOutcome::Dispatched => return Ok(Flow::Continue),
                    DownloadOutcome::NotExist => Reply::ChunkNotExist,
                    DownloadOutcome::RelayUnavailable => {
                        Reply::Error(ErrorReply::RelayUnavailable)
                    }
                }
            }
            Command::Upload { target } => {
                return self.upload(&target).await.map(|_| Flow::Continue);
            }
            Command::Exit => {
                self.exit().await;
                return Ok(Flow::Close);
            }
        };
        self.reply(reply).await?;
        Ok(Flow::Continue)
    }

    fn register(&mut self, name: String, role: Role) -> Reply {
        if let Some(b) = &self.binding {
            tracing::warn!(peer = %b.name, requested = %name, "connection already registered");
            return Reply::Error(ErrorReply::AlreadyRegistered);
        }
        match self
            .state
            .registry
            .register_name(&name, self.conn.clone(), role)
        {
            Ok(()) => {
                tracing::info!(peer = %name, %role, peer_addr = %self.conn.addr(), "peer registered");
                self.binding = Some(Binding { name, role });
                Reply::Ack
            }
            Err(e @ RegistryError::AlreadyBound { .. }) => {
                tracing::warn!(error = %e, "registration rejected");
                Reply::Error(ErrorReply::AlreadyRegistered)
            }
            Err(e) => {
                tracing::warn!(error = %e, "registration failed");
                Reply::Error(ErrorReply::NotRegistered)
            }
        }
    }

    fn announce(&self, chunk: Chunk) -> Reply {
        let Some(name) = self.bound_name() else {
            tracing::warn!(peer_addr = %self.conn.addr(), %chunk, "announce from unregistered connection");
            return Reply::Error(ErrorReply::NotRegistered);
        };
        match self.state.registry.announce_chunk(name, chunk.clone()) {
            Ok(_) => {
                tracing::debug!(peer = %name, %chunk, "chunk announced");
                Reply::Ack
            }
            Err(e) => {
                tracing::warn!(peer = %name, %chunk, error = %e, "announce rejected");
                Reply::Error(ErrorReply::NotRegistered)
            }
        }
    }

    fn query(&self, chunk: &Chunk) -> Reply {
        let owner = self
            .state
            .registry
            .pick_owner(&chunk.filename, chunk.number);
        // Prefer the relay address: it is the one the owner's NAT maps.
        match owner.and_then(|e| e.relay.or(e.control)) {
            Some(conn) => Reply::Owner(conn.addr()),
            None => Reply::ChunkNotExist,
        }
    }

    async fn upload(&mut self, target: &str) -> Result<()> {
        let owner = match &self.binding {
            Some(Binding {
                name,
                role: Role::Relay,
            }) => name.clone(),
            Some(_) => {
                tracing::warn!(peer_addr = %self.conn.addr(), "UPLOAD on a control connection");
                self.reply(Reply::Error(ErrorReply::InvalidCommand)).await?;
                return Ok(());
            }
            None => {
                self.reply(Reply::Error(ErrorReply::NotRegistered)).await?;
                return Ok(());
            }
        };
        relay::relay_upload(&self.state, &owner, &mut self.reader, &self.conn, target).await?;
        Ok(())
    }

    async fn exit(&mut self) {
        let _ = self.reply(Reply::Goodbye).await;
        let Some(binding) = self.binding.take() else {
            return;
        };
        if let Some(relay) = self
            .state
            .registry
            .peer(&binding.name)
            .filter(|e| e.holds_connection(self.conn.id()))
            .and_then(|e| e.relay)
            .filter(|r| r.id() != self.conn.id())
        {
            if let Ok(bytes) = Instruction::Exit.encode() {
                let sent = tokio::time::timeout(
                    self.state.settings.send_turn_timeout,
                    relay.send(&bytes),
                )
                .await;
                if !matches!(sent, Ok(Ok(()))) {
                    tracing::debug!(peer = %binding.name, "could not deliver EXIT to relay");
                }
            }
        }
        // A peer that already left and re-registered under this name is not ours to remove.
        if self
            .state
            .registry
            .remove_connection(&binding.name, self.conn.id())
            .is_some()
        {
            tracing::info!(peer = %binding.name, "peer exited");
        }
    }

    async fn teardown(self) {
        if let Some(binding) = &self.binding {
            if self
                .state
                .registry
                .remove_connection(&binding.name, self.conn.id())
                .is_some()
            {
                tracing::info!(peer = %binding.name, role = %binding.role, "peer disconnected");
            }
        }
        self.conn.close();
        self.conn.shutdown().await;
    }
}
