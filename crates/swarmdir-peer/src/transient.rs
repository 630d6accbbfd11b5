//! Transient relay server.
//!
//! Holds the peer's relay connection. For each DOWNLOAD instruction it reads
//! the chunk locally, announces an UPLOAD for the requester and, once the
//! registry acknowledges, sends one DATA frame. A missing chunk is sent as a
//! zero-length frame so the requester is not left waiting.
//!
//! The registry may write the next DOWNLOAD before it has read our UPLOAD,
//! so instructions that arrive ahead of the ACK are queued and served next.

use std::collections::VecDeque;
use std::net::SocketAddr;

use tokio::net::ToSocketAddrs;

use swarmdir_core::wire::{DataHeader, Instruction};
use swarmdir_core::{Chunk, Command, RelayInbound, Role};

use crate::client::{ClientError, Link};
use crate::store::ChunkSource;

pub struct TransientServer<S> {
    name: String,
    link: Link,
    source: S,
    chunk_size: u32,
    queued: VecDeque<Instruction>,
}

impl<S: ChunkSource> TransientServer<S> {
    /// Connect and register `name` as a relay connection.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        name: &str,
        source: S,
        chunk_size: u32,
    ) -> Result<Self, ClientError> {
        let link = Link::register(addr, name, Role::Relay).await?;
        tracing::debug!(peer = %name, "relay connection registered");
        Ok(Self {
            name: name.to_string(),
            link,
            source,
            chunk_size,
            queued: VecDeque::new(),
        })
    }

    /// The address the registry sees for this relay.
    pub fn local_addr(&self) -> SocketAddr {
        self.link.local_addr
    }

    /// Serve instructions until EXIT or the registry closes the connection.
    pub async fn run(mut self) -> Result<(), ClientError> {
        loop {
            let next = match self.queued.pop_front() {
                Some(instruction) => Ok(Some(instruction)),
                None => self.link.reader.next_instruction().await,
            };
            match next {
                Ok(Some(Instruction::Download { chunk, requester })) => {
                    if !self.serve(chunk, &requester).await? {
                        break;
                    }
                }
                Ok(Some(Instruction::Exit)) => {
                    tracing::info!(peer = %self.name, "registry sent EXIT");
                    break;
                }
                Ok(None) => {
                    tracing::info!(peer = %self.name, "registry closed relay connection");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(peer = %self.name, error = %e, "ignoring unknown instruction");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Push one chunk. Returns false if the registry asked us to stop meanwhile.
    async fn serve(&mut self, chunk: Chunk, requester: &str) -> Result<bool, ClientError> {
        let payload = self
            .source
            .read_chunk(&chunk.filename, chunk.number, self.chunk_size)
            .unwrap_or_default();
        if payload.is_empty() {
            tracing::warn!(peer = %self.name, %chunk, "requested chunk not held locally");
        }

        let upload = Command::Upload {
            target: requester.to_string(),
        };
        self.link.send(&upload.encode()?).await?;
        loop {
            match self.link.reader.read_relay_inbound().await? {
                RelayInbound::Ack => break,
                RelayInbound::Error(e) => return Err(ClientError::Refused(e)),
                RelayInbound::Instruction(Instruction::Exit) => return Ok(false),
                RelayInbound::Instruction(next) => {
                    tracing::debug!(peer = %self.name, "instruction arrived before ACK; queued");
                    self.queued.push_back(next);
                }
            }
        }

        let header = DataHeader {
            chunk: chunk.clone(),
            len: payload.len() as u32,
        };
        let mut frame = header.encode()?;
        frame.extend_from_slice(&payload);
        self.link.send(&frame).await?;
        tracing::debug!(peer = %self.name, %chunk, requester, bytes = payload.len(), "chunk uploaded");
        Ok(true)
    }
}
