//! Chunk identity, wire format, record codec and configuration.
//! All other swarmdir crates depend on this one.

pub mod chunk;
pub mod codec;
pub mod config;
pub mod wire;

pub use chunk::{Chunk, DEFAULT_CHUNK_SIZE};
pub use codec::{CodecError, DownloadReply, RecordReader, RelayInbound, ReplyKind};
pub use wire::{Command, DataHeader, ErrorReply, Instruction, Reply, Role, WireError};
