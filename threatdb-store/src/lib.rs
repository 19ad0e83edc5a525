//! Chunk-level threat-list storage for threatdb
//!
//! List data arrives as numbered chunks: add chunks carry prefixes or
//! full hashes to blacklist, sub chunks retract entries from specific
//! add chunks. A [`ChunkStore`] accumulates chunk writes inside an
//! update transaction; [`ChunkStore::finish_update`] resolves deletes
//! and sub-knockouts and emits the surviving data for index
//! construction.
//!
//! Chunk numbers are scoped per list, but a store may serve two lists.
//! [`encode_chunk_id`] folds the list's parity bit into the low bit of
//! the stored chunk id, giving each list of a pair a disjoint id space.

use thiserror::Error;
use threatdb_hash::{FullHash, Prefix};
use threatdb_prefixset::PrefixSetBuilder;

mod list;
mod memory;
mod ranges;

pub use list::ListId;
pub use memory::MemoryChunkStore;
pub use ranges::{chunks_to_range_string, range_string_to_chunks};

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error against the backing file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store's data failed an integrity check
    #[error("Store corrupt: {0}")]
    Corrupt(String),

    /// A write or finish was attempted outside an update transaction
    #[error("No update in progress")]
    NoUpdateInProgress,

    /// begin_update was called while a transaction was already open
    #[error("Update already in progress")]
    UpdateInProgress,

    /// A chunk-range string could not be parsed
    #[error("Invalid chunk range: {0}")]
    InvalidRange(String),
}

impl StoreError {
    /// Whether this error indicates corrupted store data, as opposed to
    /// a transient or usage error. Corruption obligates the owner to
    /// reset the database.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt(_))
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Fold a list's parity bit into a chunk id.
///
/// Stores serving a list pair keep both lists' chunks in one id space;
/// the low bit records which list a chunk belongs to.
pub fn encode_chunk_id(chunk: u32, list_id: ListId) -> u32 {
    (chunk << 1) | (list_id as u32 & 1)
}

/// Recover the original chunk number from an encoded chunk id.
pub fn decode_chunk_id(encoded: u32) -> u32 {
    encoded >> 1
}

/// The list-parity bit of an encoded chunk id.
pub fn chunk_id_bit(encoded: u32) -> u32 {
    encoded & 1
}

/// A blacklisted prefix together with the add chunk that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddPrefix {
    /// Encoded id of the add chunk
    pub chunk_id: u32,
    pub prefix: Prefix,
}

/// A blacklisted full hash together with the add chunk that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddFullHash {
    /// Encoded id of the add chunk
    pub chunk_id: u32,
    pub hash: FullHash,
}

/// A retraction of one prefix from one add chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubPrefix {
    /// Encoded id of the sub chunk
    pub chunk_id: u32,
    /// Encoded id of the add chunk being retracted from
    pub add_chunk_id: u32,
    pub prefix: Prefix,
}

/// A retraction of one full hash from one add chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubFullHash {
    /// Encoded id of the sub chunk
    pub chunk_id: u32,
    /// Encoded id of the add chunk being retracted from
    pub add_chunk_id: u32,
    pub hash: FullHash,
}

/// Transactional chunk storage for one store file.
///
/// Writes are only legal between [`begin_update`](Self::begin_update)
/// and [`finish_update`](Self::finish_update) /
/// [`cancel_update`](Self::cancel_update). Chunk ids everywhere in this
/// interface are encoded ids (see [`encode_chunk_id`]).
///
/// A [`StoreError::Corrupt`] return from any operation means the
/// store's data can no longer be trusted; callers are expected to
/// schedule a full reset.
pub trait ChunkStore: Send {
    /// Open an update transaction. All committed data remains visible
    /// to readers until the transaction finishes.
    fn begin_update(&mut self) -> Result<()>;

    /// Stage one prefix from an add chunk.
    fn write_add_prefix(&mut self, chunk_id: u32, prefix: Prefix) -> Result<()>;

    /// Stage one full hash from an add chunk.
    fn write_add_hash(&mut self, chunk_id: u32, hash: FullHash) -> Result<()>;

    /// Stage one prefix retraction from a sub chunk.
    fn write_sub_prefix(&mut self, chunk_id: u32, add_chunk_id: u32, prefix: Prefix)
        -> Result<()>;

    /// Stage one full-hash retraction from a sub chunk.
    fn write_sub_hash(&mut self, chunk_id: u32, add_chunk_id: u32, hash: FullHash) -> Result<()>;

    /// Record that an add chunk has been applied.
    fn set_add_chunk(&mut self, chunk_id: u32);

    /// Whether an add chunk has already been applied. Used to make
    /// repeated application of the same chunk a no-op.
    fn check_add_chunk(&self, chunk_id: u32) -> bool;

    /// Mark an add chunk for deletion; its entries are dropped when the
    /// transaction finishes.
    fn delete_add_chunk(&mut self, chunk_id: u32);

    /// Record that a sub chunk has been applied.
    fn set_sub_chunk(&mut self, chunk_id: u32);

    /// Whether a sub chunk has already been applied.
    fn check_sub_chunk(&self, chunk_id: u32) -> bool;

    /// Mark a sub chunk for deletion.
    fn delete_sub_chunk(&mut self, chunk_id: u32);

    /// Sorted encoded ids of all applied add chunks.
    fn add_chunks(&self) -> Vec<u32>;

    /// Sorted encoded ids of all applied sub chunks.
    fn sub_chunks(&self) -> Vec<u32>;

    /// All committed add prefixes.
    fn add_prefixes(&self) -> Result<Vec<AddPrefix>>;

    /// All committed add full hashes.
    fn add_full_hashes(&self) -> Result<Vec<AddFullHash>>;

    /// Commit the transaction: drop deleted chunks, cancel add entries
    /// matched by sub entries, feed every surviving prefix (including
    /// the prefixes of surviving full hashes) to `builder`, and append
    /// the surviving full hashes to `full_hashes`.
    fn finish_update(
        &mut self,
        builder: &mut PrefixSetBuilder,
        full_hashes: &mut Vec<AddFullHash>,
    ) -> Result<()>;

    /// Abandon the transaction, discarding all staged writes.
    fn cancel_update(&mut self);

    /// Verify the integrity of the committed data.
    fn check_validity(&self) -> Result<()>;

    /// Delete all committed data and any backing file.
    fn delete(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_encoding() {
        // Even-id lists use bit 0, odd-id lists bit 1.
        assert_eq!(encode_chunk_id(10, ListId::Phish), 20);
        assert_eq!(encode_chunk_id(10, ListId::Malware), 21);

        assert_eq!(decode_chunk_id(20), 10);
        assert_eq!(decode_chunk_id(21), 10);
        assert_eq!(chunk_id_bit(20), 0);
        assert_eq!(chunk_id_bit(21), 1);
    }

    #[test]
    fn test_chunk_id_encoding_all_lists() {
        for list_id in ListId::ALL {
            let encoded = encode_chunk_id(7, list_id);
            assert_eq!(decode_chunk_id(encoded), 7);
            assert_eq!(chunk_id_bit(encoded), list_id as u32 % 2);
        }
    }
}
