//! Control-connection client.

use std::net::SocketAddr;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use swarmdir_core::{
    Chunk, CodecError, Command, DownloadReply, ErrorReply, RecordReader, Reply, ReplyKind, Role,
    WireError,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("registry refused: {0}")]
    Refused(ErrorReply),
    #[error("unexpected reply {0:?}")]
    Unexpected(Reply),
}

/// One registered connection to the registry.
pub(crate) struct Link {
    pub(crate) reader: RecordReader<BufReader<OwnedReadHalf>>,
    pub(crate) writer: OwnedWriteHalf,
    pub(crate) local_addr: SocketAddr,
}

impl Link {
    pub(crate) async fn register(
        addr: impl ToSocketAddrs,
        name: &str,
        role: Role,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let local_addr = stream.local_addr()?;
        let (read, writer) = stream.into_split();
        let mut link = Self {
            reader: RecordReader::new(BufReader::new(read)),
            writer,
            local_addr,
        };
        let register = Command::Register {
            name: name.to_string(),
            role,
        };
        match link.call(&register, ReplyKind::Ack).await? {
            Reply::Ack => Ok(link),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    pub(crate) async fn send(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send `cmd` and read one reply of `kind`. Error lines become [`ClientError::Refused`].
    pub(crate) async fn call(&mut self, cmd: &Command, kind: ReplyKind) -> Result<Reply, ClientError> {
        self.send(&cmd.encode()?).await?;
        match self.reader.read_reply(kind).await? {
            Reply::Error(e) => Err(ClientError::Refused(e)),
            reply => Ok(reply),
        }
    }
}

/// A peer's control connection: issues commands and receives relayed chunks.
pub struct ControlClient {
    name: String,
    link: Link,
}

impl ControlClient {
    /// Connect and register `name` as a control connection.
    pub async fn connect(addr: impl ToSocketAddrs, name: &str) -> Result<Self, ClientError> {
        let link = Link::register(addr, name, Role::Control).await?;
        tracing::debug!(peer = %name, "control connection registered");
        Ok(Self {
            name: name.to_string(),
            link,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.link.local_addr
    }

    async fn expect_ack(&mut self, cmd: Command) -> Result<(), ClientError> {
        match self.link.call(&cmd, ReplyKind::Ack).await? {
            Reply::Ack => Ok(()),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    pub async fn announce(&mut self, filename: &str, number: u32) -> Result<(), ClientError> {
        self.expect_ack(Command::Announce(Chunk::new(filename, number)))
            .await
    }

    pub async fn announce_size(&mut self, filename: &str, size: u64) -> Result<(), ClientError> {
        self.expect_ack(Command::AnnounceSize {
            filename: filename.to_string(),
            size,
        })
        .await
    }

    /// Relay address of a random owner, or `None` if nobody owns the chunk.
    pub async fn query(&mut self, filename: &str, number: u32) -> Result<Option<SocketAddr>, ClientError> {
        let cmd = Command::Query(Chunk::new(filename, number));
        match self.link.call(&cmd, ReplyKind::Owner).await? {
            Reply::Owner(addr) => Ok(Some(addr)),
            Reply::ChunkNotExist => Ok(None),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    /// Announced size of `filename`; 0 if unknown.
    pub async fn query_size(&mut self, filename: &str) -> Result<u64, ClientError> {
        let cmd = Command::QuerySize {
            filename: filename.to_string(),
        };
        match self.link.call(&cmd, ReplyKind::FileSize).await? {
            Reply::FileSize(n) => Ok(n),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    pub async fn list(&mut self) -> Result<Vec<String>, ClientError> {
        match self.link.call(&Command::List, ReplyKind::FileList).await? {
            Reply::FileList(names) => Ok(names),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    /// Fetch one chunk through the registry's relay.
    ///
    /// `None` when no peer owns the chunk, or the chosen owner had nothing to send.
    pub async fn download(&mut self, filename: &str, number: u32) -> Result<Option<Vec<u8>>, ClientError> {
        let cmd = Command::Download(Chunk::new(filename, number));
        self.link.send(&cmd.encode()?).await?;
        match self.link.reader.read_download_reply().await? {
            DownloadReply::Data(header) => {
                let payload = self.link.reader.read_payload(header.len).await?;
                if header.chunk != Chunk::new(filename, number) {
                    tracing::warn!(expected = %filename, got = %header.chunk, "relayed chunk differs from request");
                }
                Ok((!payload.is_empty()).then_some(payload))
            }
            DownloadReply::NotExist => Ok(None),
            DownloadReply::Error(e) => Err(ClientError::Refused(e)),
        }
    }

    /// Deregister. The registry also tells this peer's relay server to stop.
    pub async fn exit(mut self) -> Result<(), ClientError> {
        match self.link.call(&Command::Exit, ReplyKind::Goodbye).await? {
            Reply::Goodbye => Ok(()),
            other => Err(ClientError::Unexpected(other)),
        }
    }
}
