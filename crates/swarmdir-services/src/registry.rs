//! Peer registry: who holds which chunk, and how to reach them.
//!
//! One mutex guards the chunk → owners index, the peer → chunks index and
//! the peer directory together, so every operation is linearizable and the
//! two indexes can never disagree. The lock is never held across `.await`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use rand::seq::IteratorRandom;
use serde::Serialize;

use swarmdir_core::{Chunk, Role};

use crate::connection::{ConnectionId, PeerConnection};
use crate::send_turn::SendTurn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("peer {name} already has a {role} connection")]
    AlreadyBound { name: String, role: Role },
    #[error("unknown peer {0}")]
    UnknownPeer(String),
}

/// Directory entry for one registered peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub name: String,
    pub control: Option<PeerConnection>,
    pub relay: Option<PeerConnection>,
    pub send_turn: SendTurn,
    pub registered_at: Instant,
}

impl PeerEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            control: None,
            relay: None,
            send_turn: SendTurn::new(),
            registered_at: Instant::now(),
        }
    }

    fn slot(&mut self, role: Role) -> &mut Option<PeerConnection> {
        match role {
            Role::Control => &mut self.control,
            Role::Relay => &mut self.relay,
        }
    }

    /// True if `id` is this peer's control or relay connection.
    pub fn holds_connection(&self, id: ConnectionId) -> bool {
        self.control.as_ref().is_some_and(|c| c.id() == id)
            || self.relay.as_ref().is_some_and(|c| c.id() == id)
    }

    fn close_all(&self) {
        for conn in self.control.iter().chain(self.relay.iter()) {
            conn.close();
        }
        self.send_turn.close();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    pub name: String,
    pub control_addr: Option<String>,
    pub relay_addr: Option<String>,
    pub chunks: usize,
    pub relay_in_flight: bool,
    pub registered_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub filename: String,
    /// Contiguous chunks available starting at 1.
    pub chunks: u32,
    /// Distinct peers owning at least one chunk.
    pub owners: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub peers: usize,
    pub chunks: usize,
    pub files: usize,
    pub relays_in_flight: usize,
}

#[derive(Default)]
struct Index {
    chunk_owners: HashMap<Chunk, HashSet<String>>,
    peer_chunks: HashMap<String, HashSet<Chunk>>,
    peers: HashMap<String, PeerEntry>,
}

impl Index {
    /// Drop the peer and sweep its chunk edges, leaving no empty owner sets.
    fn remove(&mut self, name: &str) -> Option<PeerEntry> {
        let removed = self.peers.remove(name);
        if let Some(chunks) = self.peer_chunks.remove(name) {
            for chunk in chunks {
                if let Some(owners) = self.chunk_owners.get_mut(&chunk) {
                    owners.remove(name);
                    if owners.is_empty() {
                        self.chunk_owners.remove(&chunk);
                    }
                }
            }
        }
        removed
    }

    fn chunk_count(&self, filename: &str) -> u32 {
        let mut n = 0u32;
        loop {
            let next = Chunk::new(filename, n + 1);
            if !self.chunk_owners.contains_key(&next) {
                return n;
            }
            n += 1;
        }
    }
}

/// Shared handle to the registry. Clones are cheap and see the same state.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<Mutex<Index>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Index> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind `conn` to `name` in `role`, creating the peer on first use.
    pub fn register_name(
        &self,
        name: &str,
        conn: PeerConnection,
        role: Role,
    ) -> Result<(), RegistryError> {
        let mut index = self.lock();
        let entry = index
            .peers
            .entry(name.to_string())
            .or_insert_with(|| PeerEntry::new(name));
        let slot = entry.slot(role);
        if slot.is_some() {
            return Err(RegistryError::AlreadyBound {
                name: name.to_string(),
                role,
            });
        }
        *slot = Some(conn);
        Ok(())
    }

    /// Record that `name` owns `chunk`. Returns false if it already did.
    pub fn announce_chunk(&self, name: &str, chunk: Chunk) -> Result<bool, RegistryError> {
        let mut index = self.lock();
        if !index.peers.contains_key(name) {
            return Err(RegistryError::UnknownPeer(name.to_string()));
        }
        let added = index
            .peer_chunks
            .entry(name.to_string())
            .or_default()
            .insert(chunk.clone());
        index
            .chunk_owners
            .entry(chunk)
            .or_default()
            .insert(name.to_string());
        Ok(added)
    }

    pub fn lookup_owners(&self, chunk: &Chunk) -> HashSet<String> {
        self.lock()
            .chunk_owners
            .get(chunk)
            .cloned()
            .unwrap_or_default()
    }

    /// A uniformly random current owner of the chunk.
    pub fn pick_owner(&self, filename: &str, number: u32) -> Option<PeerEntry> {
        let index = self.lock();
        let owners = index.chunk_owners.get(&Chunk::new(filename, number))?;
        let name = owners.iter().choose(&mut rand::thread_rng())?;
        index.peers.get(name).cloned()
    }

    pub fn list_filenames(&self) -> BTreeSet<String> {
        self.lock()
            .chunk_owners
            .keys()
            .map(|c| c.filename.clone())
            .collect()
    }

    /// Number of chunks of `filename` present without a gap, counting from 1.
    pub fn chunk_count(&self, filename: &str) -> u32 {
        self.lock().chunk_count(filename)
    }

    /// Remove the peer and every chunk edge it owns, then close its
    /// connections and send-turn. Idempotent.
    pub fn remove_peer(&self, name: &str) -> Option<PeerEntry> {
        let removed = self.lock().remove(name);
        Self::retire(name, removed)
    }

    /// Remove the peer only if `conn_id` is still one of its bound connections.
    /// The check and the removal happen under one lock, so a stale connection
    /// can never remove a newer peer that reused the name.
    pub fn remove_connection(&self, name: &str, conn_id: ConnectionId) -> Option<PeerEntry> {
        let removed = {
            let mut index = self.lock();
            let bound = index
                .peers
                .get(name)
                .is_some_and(|e| e.holds_connection(conn_id));
            if !bound {
                return None;
            }
            index.remove(name)
        };
        Self::retire(name, removed)
    }

    fn retire(name: &str, removed: Option<PeerEntry>) -> Option<PeerEntry> {
        if let Some(entry) = &removed {
            entry.close_all();
            tracing::info!(peer = %name, "peer removed");
        }
        removed
    }

    pub fn peer(&self, name: &str) -> Option<PeerEntry> {
        self.lock().peers.get(name).cloned()
    }

    pub fn peers(&self) -> Vec<PeerSummary> {
        let index = self.lock();
        let mut out: Vec<PeerSummary> = index
            .peers
            .values()
            .map(|e| PeerSummary {
                name: e.name.clone(),
                control_addr: e.control.as_ref().map(|c| c.addr().to_string()),
                relay_addr: e.relay.as_ref().map(|c| c.addr().to_string()),
                chunks: index.peer_chunks.get(&e.name).map_or(0, HashSet::len),
                relay_in_flight: !e.send_turn.is_available(),
                registered_secs: e.registered_at.elapsed().as_secs(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn files(&self) -> Vec<FileSummary> {
        let index = self.lock();
        let mut owners: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (chunk, set) in &index.chunk_owners {
            owners
                .entry(chunk.filename.as_str())
                .or_default()
                .extend(set.iter().map(String::as_str));
        }
        let mut out: Vec<FileSummary> = owners
            .into_iter()
            .map(|(filename, set)| FileSummary {
                filename: filename.to_string(),
                chunks: index.chunk_count(filename),
                owners: set.len(),
            })
            .collect();
        out.sort_by(|a, b| a.filename.cmp(&b.filename));
        out
    }

    pub fn stats(&self) -> RegistryStats {
        let index = self.lock();
        let files: HashSet<&str> = index
            .chunk_owners
            .keys()
            .map(|c| c.filename.as_str())
            .collect();
        RegistryStats {
            peers: index.peers.len(),
            chunks: index.chunk_owners.len(),
            files: files.len(),
            relays_in_flight: index
                .peers
                .values()
                .filter(|e| !e.send_turn.is_available())
                .count(),
        }
    }

    /// Verify that both indexes mirror each other and hold no empty sets.
    pub fn check_invariants(&self) -> Result<(), String> {
        let index = self.lock();
        for (chunk, owners) in &index.chunk_owners {
            if owners.is_empty() {
                return Err(format!("{chunk} has an empty owner set"));
            }
            for owner in owners {
                if !index.peer_chunks.get(owner).is_some_and(|s| s.contains(chunk)) {
                    return Err(format!("{owner} owns {chunk} but peer index disagrees"));
                }
                if !index.peers.contains_key(owner) {
                    return Err(format!("{owner} owns {chunk} but is not registered"));
                }
            }
        }
        for (peer, chunks) in &index.peer_chunks {
            for chunk in chunks {
                if !index.chunk_owners.get(chunk).is_some_and(|s| s.contains(peer)) {
                    return Err(format!("{peer} lists {chunk} but chunk index disagrees"));
                }
            }
        }
        Ok(())
    }
}
