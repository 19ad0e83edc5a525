//! Cached verified full-hash results.
//!
//! Positive full-hash results fetched for a prefix are remembered for a
//! limited lifetime so that repeated hits on the same prefix do not
//! trigger repeated fetches. The cache is a flat vector kept sorted by
//! (prefix, hash) so lookups can merge-walk it against a sorted prefix
//! list.

use std::time::Instant;
use threatdb_hash::{FullHash, Prefix};
use threatdb_store::ListId;

/// A verified full-hash hit on a specific list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullHashResult {
    pub hash: FullHash,
    pub list_id: ListId,
}

/// A cached [`FullHashResult`] with its expiry time.
#[derive(Debug, Clone, Copy)]
pub struct CachedFullHash {
    pub result: FullHashResult,
    pub expire_after: Instant,
}

impl CachedFullHash {
    fn prefix(&self) -> Prefix {
        self.result.hash.prefix()
    }
}

/// Insert `results` into `cache`, keeping it sorted by (prefix, hash).
pub fn insert_cached(
    cache: &mut Vec<CachedFullHash>,
    results: impl IntoIterator<Item = FullHashResult>,
    expire_after: Instant,
) {
    cache.extend(results.into_iter().map(|result| CachedFullHash {
        result,
        expire_after,
    }));
    cache.sort_by(|a, b| {
        (a.prefix(), a.result.hash)
            .cmp(&(b.prefix(), b.result.hash))
    });
}

/// Collect unexpired cached results whose prefix appears in
/// `prefix_hits` (sorted ascending), by a parallel walk over both
/// sorted sequences.
pub fn find_cached(
    cache: &[CachedFullHash],
    prefix_hits: &[Prefix],
    now: Instant,
) -> Vec<FullHashResult> {
    debug_assert!(prefix_hits.windows(2).all(|w| w[0] <= w[1]));

    let mut hits = Vec::new();
    let mut entries = cache.iter().peekable();

    for &prefix in prefix_hits {
        while entries.next_if(|e| e.prefix() < prefix).is_some() {}
        while let Some(entry) = entries.next_if(|e| e.prefix() == prefix) {
            if entry.expire_after > now {
                hits.push(entry.result);
            }
        }
    }
    hits
}
