//! Announced file sizes, keyed by filename.
//!
//! Independent of chunk ownership: sizes survive their announcer's exit and
//! the latest announcement wins.

use std::sync::Arc;

use dashmap::DashMap;

#[derive(Clone, Default)]
pub struct FileSizeTable(Arc<DashMap<String, u64>>);

impl FileSizeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, filename: &str, size: u64) {
        self.0.insert(filename.to_string(), size);
    }

    /// Announced size, or 0 if nobody announced one.
    pub fn get(&self, filename: &str) -> u64 {
        self.0.get(filename).map_or(0, |v| *v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
