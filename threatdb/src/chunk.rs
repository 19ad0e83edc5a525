//! Parsed update-protocol chunk data, as handed to the database by the
//! protocol layer.

use threatdb_hash::{FullHash, Prefix};

/// The payload of one chunk.
///
/// Sub entries name the add chunk (plain per-list chunk number) they
/// retract from.
#[derive(Debug, Clone)]
pub enum ChunkContent {
    AddPrefixes(Vec<Prefix>),
    AddFullHashes(Vec<FullHash>),
    SubPrefixes(Vec<(u32, Prefix)>),
    SubFullHashes(Vec<(u32, FullHash)>),
}

impl ChunkContent {
    pub fn is_sub(&self) -> bool {
        matches!(
            self,
            ChunkContent::SubPrefixes(_) | ChunkContent::SubFullHashes(_)
        )
    }
}

/// One chunk of one list.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Per-list chunk number
    pub chunk_number: u32,
    pub content: ChunkContent,
}

/// A request to drop chunks from a list.
#[derive(Debug, Clone)]
pub struct ChunkDelete {
    /// Public wire name of the list
    pub list_name: String,
    /// Whether sub chunks (rather than add chunks) are being deleted
    pub is_sub_del: bool,
    /// Chunk numbers as a range string, e.g. `"1-5,7"`
    pub chunk_del: String,
}

/// The chunks a list currently holds, reported to the update protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListChunkRanges {
    /// Public wire name of the list
    pub name: String,
    /// Applied add chunks as a range string
    pub adds: String,
    /// Applied sub chunks as a range string
    pub subs: String,
}
