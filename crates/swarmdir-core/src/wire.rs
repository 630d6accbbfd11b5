//! Wire format: positional text records separated by CRLF.
//!
//! These types ARE the protocol. A message is a keyword record followed by a
//! fixed number of field records ([`Keyword::arity`]), so the reader knows
//! where every message ends without probing the socket for more data.
//!
//! Chunk payloads never appear inside records. They travel as a DATA frame:
//! a [`DataHeader`] (`DATA¶filename¶number¶length¶`) followed by exactly
//! `length` raw bytes. The same frame is sent by a relay server to the
//! registry and forwarded unchanged by the registry to the requesting peer.
//!
//! Everything here is pure: async reading lives in [`crate::codec`].

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::chunk::Chunk;

/// Record separator.
pub const DELIMITER: &str = "\r\n";

/// Longest record (excluding the separator) a reader accepts by default.
pub const DEFAULT_MAX_RECORD_LEN: usize = 4096;

// ── Keywords ──────────────────────────────────────────────────────────────────

pub const ACK: &str = "ACK";
pub const REPLY: &str = "REPLY";
pub const GOODBYE: &str = "GOODBYE";
pub const DATA: &str = "DATA";
pub const CHUNK_NOT_EXIST: &str = "CHUNK NOT EXIST";
pub const FILE_LIST_EMPTY: &str = "FILE LIST EMPTY";

/// Role names carried by the NAME command.
pub const ROLE_CONTROL: &str = "CLIENT";
pub const ROLE_RELAY: &str = "TRANSIENT";

/// Command keywords understood by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Name,
    Inform,
    FileSize,
    QueryFileSize,
    Query,
    Download,
    Upload,
    List,
    Exit,
}

impl Keyword {
    pub const ALL: [Keyword; 9] = [
        Keyword::Name,
        Keyword::Inform,
        Keyword::FileSize,
        Keyword::QueryFileSize,
        Keyword::Query,
        Keyword::Download,
        Keyword::Upload,
        Keyword::List,
        Keyword::Exit,
    ];

    pub fn parse(record: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == record)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Name => "NAME",
            Keyword::Inform => "INFORM",
            Keyword::FileSize => "FILESIZE",
            Keyword::QueryFileSize => "QUERYFILESIZE",
            Keyword::Query => "QUERY",
            Keyword::Download => "DOWNLOAD",
            Keyword::Upload => "UPLOAD",
            Keyword::List => "LIST",
            Keyword::Exit => "EXIT",
        }
    }

    /// Number of field records that follow the keyword record.
    pub fn arity(self) -> usize {
        match self {
            Keyword::Name | Keyword::Inform | Keyword::FileSize => 2,
            Keyword::Query | Keyword::Download => 2,
            Keyword::QueryFileSize | Keyword::Upload => 1,
            Keyword::List | Keyword::Exit => 0,
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Roles ─────────────────────────────────────────────────────────────────────

/// Which of a peer's two connections a NAME command binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Peer Client: issues commands, receives relayed DATA frames.
    Control,
    /// Transient Relay Server: receives DOWNLOAD instructions, pushes UPLOADs.
    Relay,
}

impl Role {
    pub fn as_wire(self) -> &'static str {
        match self {
            Role::Control => ROLE_CONTROL,
            Role::Relay => ROLE_RELAY,
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            ROLE_CONTROL => Some(Role::Control),
            ROLE_RELAY => Some(Role::Relay),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Control => f.write_str("control"),
            Role::Relay => f.write_str("relay"),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A message that could not be encoded or decoded.
///
/// Decode errors are recoverable: the offending message has been consumed in
/// full and the stream is still positioned at a message boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("{keyword}: expected {expected} fields, got {got}")]
    FieldCount {
        keyword: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{keyword}: malformed {field} {value:?}")]
    Malformed {
        keyword: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("field contains a record separator: {0:?}")]
    FieldHasSeparator(String),
    #[error("record is not valid UTF-8")]
    NotUtf8,
    #[error("unexpected reply {0:?}")]
    UnexpectedReply(String),
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// A command sent to the registry by a Peer Client or Transient Relay Server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `NAME¶name¶role¶`
    Register { name: String, role: Role },
    /// `INFORM¶filename¶number¶`
    Announce(Chunk),
    /// `FILESIZE¶filename¶size¶`
    AnnounceSize { filename: String, size: u64 },
    /// `QUERY¶filename¶number¶`
    Query(Chunk),
    /// `QUERYFILESIZE¶filename¶`
    QuerySize { filename: String },
    /// `LIST¶`
    List,
    /// `DOWNLOAD¶filename¶number¶`
    Download(Chunk),
    /// `UPLOAD¶target¶`, followed by a DATA frame once the registry ACKs.
    Upload { target: String },
    /// `EXIT¶`
    Exit,
}

impl Command {
    pub fn keyword(&self) -> Keyword {
        match self {
            Command::Register { .. } => Keyword::Name,
            Command::Announce(_) => Keyword::Inform,
            Command::AnnounceSize { .. } => Keyword::FileSize,
            Command::Query(_) => Keyword::Query,
            Command::QuerySize { .. } => Keyword::QueryFileSize,
            Command::List => Keyword::List,
            Command::Download(_) => Keyword::Download,
            Command::Upload { .. } => Keyword::Upload,
            Command::Exit => Keyword::Exit,
        }
    }

    /// Build a command from its keyword and the field records that followed it.
    pub fn from_fields(keyword: Keyword, fields: &[String]) -> Result<Self, WireError> {
        let kw = keyword.as_str();
        expect_fields(kw, keyword.arity(), fields)?;
        let cmd = match keyword {
            Keyword::Name => {
                let name = non_empty(kw, "name", &fields[0])?;
                let role = Role::from_wire(&fields[1]).ok_or_else(|| WireError::Malformed {
                    keyword: kw,
                    field: "role",
                    value: fields[1].clone(),
                })?;
                Command::Register { name, role }
            }
            Keyword::Inform => Command::Announce(parse_chunk(kw, &fields[0], &fields[1])?),
            Keyword::FileSize => Command::AnnounceSize {
                filename: non_empty(kw, "filename", &fields[0])?,
                size: parse_number(kw, "size", &fields[1])?,
            },
            Keyword::QueryFileSize => Command::QuerySize {
                filename: non_empty(kw, "filename", &fields[0])?,
            },
            Keyword::Query => Command::Query(parse_chunk(kw, &fields[0], &fields[1])?),
            Keyword::Download => Command::Download(parse_chunk(kw, &fields[0], &fields[1])?),
            Keyword::Upload => Command::Upload {
                target: non_empty(kw, "target", &fields[0])?,
            },
            Keyword::List => Command::List,
            Keyword::Exit => Command::Exit,
        };
        Ok(cmd)
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(64);
        push(&mut out, self.keyword().as_str())?;
        match self {
            Command::Register { name, role } => {
                push(&mut out, name)?;
                push(&mut out, role.as_wire())?;
            }
            Command::Announce(chunk) | Command::Query(chunk) | Command::Download(chunk) => {
                push_chunk(&mut out, chunk)?;
            }
            Command::AnnounceSize { filename, size } => {
                push(&mut out, filename)?;
                push(&mut out, &size.to_string())?;
            }
            Command::QuerySize { filename } => push(&mut out, filename)?,
            Command::Upload { target } => push(&mut out, target)?,
            Command::List | Command::Exit => {}
        }
        Ok(out)
    }
}

// ── Registry → relay instructions ─────────────────────────────────────────────

/// A message the registry writes on a peer's relay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `DOWNLOAD¶filename¶number¶requester¶`: push this chunk for `requester`.
    Download { chunk: Chunk, requester: String },
    /// `EXIT¶`: the owning peer has left; shut down.
    Exit,
}

impl Instruction {
    /// Field count for an instruction keyword, `None` if the keyword is not an instruction.
    pub fn arity(keyword: &str) -> Option<usize> {
        match keyword {
            "DOWNLOAD" => Some(3),
            "EXIT" => Some(0),
            _ => None,
        }
    }

    pub fn from_fields(keyword: &str, fields: &[String]) -> Result<Self, WireError> {
        match keyword {
            "DOWNLOAD" => {
                expect_fields("DOWNLOAD", 3, fields)?;
                Ok(Instruction::Download {
                    chunk: parse_chunk("DOWNLOAD", &fields[0], &fields[1])?,
                    requester: non_empty("DOWNLOAD", "requester", &fields[2])?,
                })
            }
            "EXIT" => {
                expect_fields("EXIT", 0, fields)?;
                Ok(Instruction::Exit)
            }
            other => Err(WireError::UnknownCommand(other.to_string())),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(64);
        match self {
            Instruction::Download { chunk, requester } => {
                push(&mut out, Keyword::Download.as_str())?;
                push_chunk(&mut out, chunk)?;
                push(&mut out, requester)?;
            }
            Instruction::Exit => push(&mut out, Keyword::Exit.as_str())?,
        }
        Ok(out)
    }
}

// ── DATA frames ───────────────────────────────────────────────────────────────

/// Header of a DATA frame. Exactly `len` raw payload bytes follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataHeader {
    pub chunk: Chunk,
    pub len: u32,
}

impl DataHeader {
    /// Field records after the `DATA` keyword.
    pub const ARITY: usize = 3;

    pub fn from_fields(fields: &[String]) -> Result<Self, WireError> {
        expect_fields(DATA, Self::ARITY, fields)?;
        Ok(Self {
            chunk: parse_chunk(DATA, &fields[0], &fields[1])?,
            len: parse_number(DATA, "length", &fields[2])?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(48);
        push(&mut out, DATA)?;
        push_chunk(&mut out, &self.chunk)?;
        push(&mut out, &self.len.to_string())?;
        Ok(out)
    }
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// One-line error replies. The session stays open after each of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorReply {
    InvalidCommand,
    NotRegistered,
    AlreadyRegistered,
    RelayUnavailable,
}

impl ErrorReply {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReply::InvalidCommand => "Invalid command",
            ErrorReply::NotRegistered => "Not registered",
            ErrorReply::AlreadyRegistered => "Already registered",
            ErrorReply::RelayUnavailable => "Relay unavailable",
        }
    }

    pub fn parse(record: &str) -> Option<Self> {
        [
            ErrorReply::InvalidCommand,
            ErrorReply::NotRegistered,
            ErrorReply::AlreadyRegistered,
            ErrorReply::RelayUnavailable,
        ]
        .into_iter()
        .find(|e| e.as_str() == record)
    }
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reply written by the registry on the connection that sent the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `ACK¶`
    Ack,
    /// `REPLY¶ip¶port¶`: relay address of the chosen owner.
    Owner(SocketAddr),
    /// `REPLY¶CHUNK NOT EXIST¶`
    ChunkNotExist,
    /// `REPLY¶count¶name…¶` or `REPLY¶FILE LIST EMPTY¶`
    FileList(Vec<String>),
    /// `size¶`
    FileSize(u64),
    /// `GOODBYE¶`
    Goodbye,
    Error(ErrorReply),
}

impl Reply {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        match self {
            Reply::Ack => push_raw(&mut out, ACK),
            Reply::Owner(addr) => {
                push_raw(&mut out, REPLY);
                push_raw(&mut out, &addr.ip().to_string());
                push_raw(&mut out, &addr.port().to_string());
            }
            Reply::ChunkNotExist => {
                push_raw(&mut out, REPLY);
                push_raw(&mut out, CHUNK_NOT_EXIST);
            }
            Reply::FileList(names) if names.is_empty() => {
                push_raw(&mut out, REPLY);
                push_raw(&mut out, FILE_LIST_EMPTY);
            }
            Reply::FileList(names) => {
                push_raw(&mut out, REPLY);
                push_raw(&mut out, &names.len().to_string());
                for name in names {
                    push_raw(&mut out, name);
                }
            }
            Reply::FileSize(size) => push_raw(&mut out, &size.to_string()),
            Reply::Goodbye => push_raw(&mut out, GOODBYE),
            Reply::Error(e) => push_raw(&mut out, e.as_str()),
        }
        out
    }
}

/// Parse the two records of a `REPLY¶ip¶port¶` owner address.
pub fn parse_owner(ip: &str, port: &str) -> Result<SocketAddr, WireError> {
    let ip: IpAddr = ip.parse().map_err(|_| WireError::Malformed {
        keyword: REPLY,
        field: "ip",
        value: ip.to_string(),
    })?;
    let port: u16 = parse_number(REPLY, "port", port)?;
    Ok(SocketAddr::new(ip, port))
}

/// Strip the trailing separator from a raw line. A bare `\n` is tolerated.
pub fn strip_delimiter(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn expect_fields(keyword: &'static str, expected: usize, fields: &[String]) -> Result<(), WireError> {
    if fields.len() != expected {
        return Err(WireError::FieldCount {
            keyword,
            expected,
            got: fields.len(),
        });
    }
    Ok(())
}

fn non_empty(keyword: &'static str, field: &'static str, value: &str) -> Result<String, WireError> {
    if value.is_empty() {
        return Err(WireError::Malformed {
            keyword,
            field,
            value: String::new(),
        });
    }
    Ok(value.to_string())
}

pub(crate) fn parse_number<T: std::str::FromStr>(
    keyword: &'static str,
    field: &'static str,
    value: &str,
) -> Result<T, WireError> {
    value.trim().parse().map_err(|_| WireError::Malformed {
        keyword,
        field,
        value: value.to_string(),
    })
}

fn parse_chunk(keyword: &'static str, filename: &str, number: &str) -> Result<Chunk, WireError> {
    let filename = non_empty(keyword, "filename", filename)?;
    let n: u32 = parse_number(keyword, "chunk number", number)?;
    if n == 0 {
        // chunk numbering is 1-based
        return Err(WireError::Malformed {
            keyword,
            field: "chunk number",
            value: number.to_string(),
        });
    }
    Ok(Chunk::new(filename, n))
}

fn push(out: &mut Vec<u8>, field: &str) -> Result<(), WireError> {
    if field.contains(['\r', '\n']) {
        return Err(WireError::FieldHasSeparator(field.to_string()));
    }
    push_raw(out, field);
    Ok(())
}

fn push_chunk(out: &mut Vec<u8>, chunk: &Chunk) -> Result<(), WireError> {
    push(out, &chunk.filename)?;
    push(out, &chunk.number.to_string())
}

// Reply fields originate from decoded records and cannot contain separators.
fn push_raw(out: &mut Vec<u8>, field: &str) {
    out.extend_from_slice(field.as_bytes());
    out.extend_from_slice(DELIMITER.as_bytes());
}
