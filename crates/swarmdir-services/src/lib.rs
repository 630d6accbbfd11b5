//! Registry state shared by every session task.

pub mod connection;
pub mod file_sizes;
pub mod registry;
pub mod send_turn;

pub use connection::{BoxedWriter, ConnectionId, PeerConnection};
pub use file_sizes::FileSizeTable;
pub use registry::{FileSummary, PeerEntry, PeerRegistry, PeerSummary, RegistryError, RegistryStats};
pub use send_turn::{InFlight, RelayTicket, SendTurn, TurnError, TurnPermit};
