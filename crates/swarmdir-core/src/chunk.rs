//! Chunk identity: one fixed-size slice of one named file.

use std::fmt;

/// Default payload size of a chunk in bytes. The final chunk of a file may be shorter.
pub const DEFAULT_CHUNK_SIZE: u32 = 1024;

/// Identifies chunk `number` of `filename`.
///
/// Numbering is 1-based and assumed contiguous per file. Equality and
/// hashing cover both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Chunk {
    pub filename: String,
    pub number: u32,
}

impl Chunk {
    pub fn new(filename: impl Into<String>, number: u32) -> Self {
        Self {
            filename: filename.into(),
            number,
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.filename, self.number)
    }
}
