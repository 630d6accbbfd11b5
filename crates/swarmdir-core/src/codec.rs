//! Async record reader for the swarmdir wire format.
//!
//! Reads one record at a time with a hard length bound, then assembles
//! commands, instructions, DATA headers and replies from the fixed field
//! counts defined in [`crate::wire`]. Payload bytes are read straight from
//! the inner reader via [`RecordReader::get_mut`].

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::wire::{
    self, Command, DataHeader, ErrorReply, Instruction, Keyword, Reply, WireError,
    CHUNK_NOT_EXIST, DATA, FILE_LIST_EMPTY, REPLY,
};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("record exceeds {0} bytes")]
    RecordTooLong(usize),
    #[error("record is not valid UTF-8")]
    InvalidUtf8,
    #[error("stream ended inside a message")]
    UnexpectedEof,
    #[error("protocol: {0}")]
    Protocol(#[from] WireError),
}

impl CodecError {
    /// A protocol error leaves the stream at a message boundary. Anything else
    /// means the connection is unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CodecError::Protocol(_))
    }
}

/// Which reply shape the caller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Ack,
    Owner,
    FileList,
    FileSize,
    Goodbye,
}

/// What the registry sends back for a DOWNLOAD on a control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadReply {
    /// A DATA frame; `len` payload bytes follow on the stream.
    Data(DataHeader),
    NotExist,
    Error(ErrorReply),
}

/// What a relay connection may see while its UPLOAD awaits the ACK.
/// Instructions written by the registry before the ACK arrive first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayInbound {
    Ack,
    Instruction(Instruction),
    Error(ErrorReply),
}

pub struct RecordReader<R> {
    inner: R,
    max_record_len: usize,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_record_len(inner, wire::DEFAULT_MAX_RECORD_LEN)
    }

    pub fn with_max_record_len(inner: R, max_record_len: usize) -> Self {
        Self {
            inner,
            max_record_len,
            buf: Vec::with_capacity(128),
        }
    }

    /// Inner reader, for consuming DATA payloads.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Next record without its separator. `None` on a clean EOF between records.
    pub async fn next_record(&mut self) -> Result<Option<String>, CodecError> {
        self.buf.clear();
        // Separator may be two bytes.
        let limit = (self.max_record_len + 2) as u64;
        let n = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if self.buf.last() != Some(&b'\n') {
            if n as u64 >= limit {
                return Err(CodecError::RecordTooLong(self.max_record_len));
            }
            return Err(CodecError::UnexpectedEof);
        }
        let record = wire::strip_delimiter(&self.buf);
        if record.len() > self.max_record_len {
            return Err(CodecError::RecordTooLong(self.max_record_len));
        }
        std::str::from_utf8(record)
            .map(str::to_owned)
            .map(Some)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    /// Next record, treating EOF as an error.
    pub async fn expect_record(&mut self) -> Result<String, CodecError> {
        self.next_record().await?.ok_or(CodecError::UnexpectedEof)
    }

    async fn read_fields(&mut self, count: usize) -> Result<Vec<String>, CodecError> {
        let mut fields = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            fields.push(self.expect_record().await?);
        }
        Ok(fields)
    }

    /// Like `read_fields`, but a field that is not UTF-8 is still consumed
    /// and reported only after the whole message has been read.
    async fn read_command_fields(&mut self, count: usize) -> Result<Vec<String>, CodecError> {
        let mut fields = Vec::with_capacity(count.min(64));
        let mut not_utf8 = false;
        for _ in 0..count {
            match self.next_record().await {
                Ok(Some(field)) => fields.push(field),
                Ok(None) => return Err(CodecError::UnexpectedEof),
                Err(CodecError::InvalidUtf8) => not_utf8 = true,
                Err(e) => return Err(e),
            }
        }
        if not_utf8 {
            return Err(WireError::NotUtf8.into());
        }
        Ok(fields)
    }

    /// Next command from a peer.
    ///
    /// An unknown keyword consumes only its own record; a known keyword
    /// always consumes its full field count before validation. Records that
    /// are not UTF-8 are protocol errors, not stream failures.
    pub async fn next_command(&mut self) -> Result<Option<Command>, CodecError> {
        let record = match self.next_record().await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(CodecError::InvalidUtf8) => return Err(WireError::NotUtf8.into()),
            Err(e) => return Err(e),
        };
        let keyword =
            Keyword::parse(&record).ok_or(CodecError::Protocol(WireError::UnknownCommand(record)))?;
        let fields = self.read_command_fields(keyword.arity()).await?;
        Ok(Some(Command::from_fields(keyword, &fields)?))
    }

    /// Next instruction on a relay connection.
    pub async fn next_instruction(&mut self) -> Result<Option<Instruction>, CodecError> {
        let Some(record) = self.next_record().await? else {
            return Ok(None);
        };
        let arity = Instruction::arity(&record)
            .ok_or_else(|| CodecError::Protocol(WireError::UnknownCommand(record.clone())))?;
        let fields = self.read_fields(arity).await?;
        Ok(Some(Instruction::from_fields(&record, &fields)?))
    }

    /// Next ACK, error line or instruction on a relay connection.
    pub async fn read_relay_inbound(&mut self) -> Result<RelayInbound, CodecError> {
        let record = self.expect_record().await?;
        if record == wire::ACK {
            return Ok(RelayInbound::Ack);
        }
        if let Some(err) = ErrorReply::parse(&record) {
            return Ok(RelayInbound::Error(err));
        }
        let arity = Instruction::arity(&record)
            .ok_or_else(|| CodecError::Protocol(WireError::UnexpectedReply(record.clone())))?;
        let fields = self.read_fields(arity).await?;
        Ok(RelayInbound::Instruction(Instruction::from_fields(&record, &fields)?))
    }

    /// A DATA header. The keyword record must be `DATA`.
    pub async fn read_data_header(&mut self) -> Result<DataHeader, CodecError> {
        let record = self.expect_record().await?;
        if record != DATA {
            return Err(WireError::UnexpectedReply(record).into());
        }
        let fields = self.read_fields(DataHeader::ARITY).await?;
        Ok(DataHeader::from_fields(&fields)?)
    }

    /// Read exactly `len` payload bytes.
    pub async fn read_payload(&mut self, len: u32) -> Result<Vec<u8>, CodecError> {
        let mut payload = vec![0u8; len as usize];
        match self.inner.read_exact(&mut payload).await {
            Ok(_) => Ok(payload),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(CodecError::UnexpectedEof)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read a reply of the expected shape. Error lines are accepted for every kind.
    pub async fn read_reply(&mut self, kind: ReplyKind) -> Result<Reply, CodecError> {
        let first = self.expect_record().await?;
        if let Some(err) = ErrorReply::parse(&first) {
            return Ok(Reply::Error(err));
        }
        let reply = match kind {
            ReplyKind::Ack if first == wire::ACK => Reply::Ack,
            ReplyKind::Goodbye if first == wire::GOODBYE => Reply::Goodbye,
            ReplyKind::FileSize => Reply::FileSize(wire::parse_number(REPLY, "size", &first)?),
            ReplyKind::Owner if first == REPLY => {
                let ip = self.expect_record().await?;
                if ip == CHUNK_NOT_EXIST {
                    Reply::ChunkNotExist
                } else {
                    let port = self.expect_record().await?;
                    Reply::Owner(wire::parse_owner(&ip, &port)?)
                }
            }
            ReplyKind::FileList if first == REPLY => {
                let count = self.expect_record().await?;
                if count == FILE_LIST_EMPTY {
                    Reply::FileList(Vec::new())
                } else {
                    let n: usize = wire::parse_number(REPLY, "count", &count)?;
                    Reply::FileList(self.read_fields(n).await?)
                }
            }
            _ => return Err(WireError::UnexpectedReply(first).into()),
        };
        Ok(reply)
    }

    /// Reply to a DOWNLOAD: a DATA header, the not-exist sentinel, or an error line.
    pub async fn read_download_reply(&mut self) -> Result<DownloadReply, CodecError> {
        let first = self.expect_record().await?;
        if let Some(err) = ErrorReply::parse(&first) {
            return Ok(DownloadReply::Error(err));
        }
        if first == DATA {
            let fields = self.read_fields(DataHeader::ARITY).await?;
            return Ok(DownloadReply::Data(DataHeader::from_fields(&fields)?));
        }
        if first == REPLY {
            let sentinel = self.expect_record().await?;
            if sentinel == CHUNK_NOT_EXIST {
                return Ok(DownloadReply::NotExist);
            }
            return Err(WireError::UnexpectedReply(sentinel).into());
        }
        Err(WireError::UnexpectedReply(first).into())
    }
}
