//! The swarmdir registry service.
//!
//! Exposed as a library so the integration tests can run a registry
//! in-process.

pub mod relay;
pub mod server;
pub mod session;

pub use relay::{DownloadOutcome, RelayError};
pub use server::{RegistryServer, RegistryState, TransferSettings};
pub use session::{Binding, Session};
