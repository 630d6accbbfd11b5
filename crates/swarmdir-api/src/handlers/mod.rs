//! HTTP API handlers. Read-only JSON views of registry state.

pub mod files;
pub mod status;

use std::time::Instant;

use swarmdir_services::{FileSizeTable, PeerRegistry};

#[derive(Clone)]
pub struct ApiState {
    pub registry: PeerRegistry,
    pub file_sizes: FileSizeTable,
    /// When the daemon started, for uptime reporting.
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(registry: PeerRegistry, file_sizes: FileSizeTable) -> Self {
        Self {
            registry,
            file_sizes,
            started_at: Instant::now(),
        }
    }
}

// Re-export handler functions for use in router setup.
pub use files::handle_files;
pub use status::{handle_peer, handle_peers, handle_status};
