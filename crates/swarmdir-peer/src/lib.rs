//! Peer side of the registry protocol.
//!
//! [`ControlClient`] speaks the command vocabulary on a peer's control
//! connection. [`TransientServer`] runs the peer's relay connection,
//! answering DOWNLOAD instructions from a [`ChunkSource`].

pub mod client;
pub mod store;
pub mod transient;

pub use client::{ClientError, ControlClient};
pub use store::{ChunkSource, MemoryChunks};
pub use transient::TransientServer;
