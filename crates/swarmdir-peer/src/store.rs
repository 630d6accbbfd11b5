//! Chunk storage seen by the relay server.

use std::sync::Arc;

use dashmap::DashMap;

use swarmdir_core::Chunk;

/// Source of local chunk bytes.
pub trait ChunkSource: Send + Sync {
    /// Bytes of chunk `number` of `filename`, at most `chunk_size` long.
    fn read_chunk(&self, filename: &str, number: u32, chunk_size: u32) -> Option<Vec<u8>>;
}

/// In-memory chunk store.
#[derive(Clone, Default)]
pub struct MemoryChunks(Arc<DashMap<Chunk, Vec<u8>>>);

impl MemoryChunks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chunk: Chunk, bytes: impl Into<Vec<u8>>) {
        self.0.insert(chunk, bytes.into());
    }

    /// Split `data` into `chunk_size` pieces numbered from 1. Returns the chunk count.
    pub fn insert_file(&self, filename: &str, data: &[u8], chunk_size: u32) -> u32 {
        let mut count = 0;
        for (i, piece) in data.chunks(chunk_size.max(1) as usize).enumerate() {
            self.insert(Chunk::new(filename, i as u32 + 1), piece);
            count += 1;
        }
        count
    }
}

impl ChunkSource for MemoryChunks {
    fn read_chunk(&self, filename: &str, number: u32, chunk_size: u32) -> Option<Vec<u8>> {
        let bytes = self.0.get(&Chunk::new(filename, number))?;
        Some(bytes[..bytes.len().min(chunk_size as usize)].to_vec())
    }
}
