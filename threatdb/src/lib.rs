//! Local threat-list database.
//!
//! threatdb maintains locally-stored threat lists (phishing and
//! malware URLs, malicious downloads, whitelists, a malware IP
//! blacklist) that are kept current by an external update protocol
//! driver and queried synchronously by lookup callers.
//!
//! The lookup surface answers from in-memory snapshots guarded by a
//! single short-held mutex; it never reports errors and never blocks
//! on store I/O. Browse lookups are probabilistic: a hit means a
//! matching 32-bit prefix and must be confirmed against full hashes
//! (the database caches verified results to limit confirmations).
//!
//! The update surface is a transaction spanning all stores:
//! [`Database::update_started`] through [`Database::update_finished`],
//! with chunk inserts and deletes in between. Snapshots are rebuilt
//! from the committed stores and swapped in atomically; a failed or
//! empty update leaves the previous snapshots untouched. Detected
//! corruption schedules a full reset for the next update cycle.
//!
//! ```no_run
//! use threatdb::{Database, DatabaseConfig, MemoryChunkStore};
//! use url::Url;
//!
//! let db = Database::new(
//!     "/path/to/Threat Database",
//!     DatabaseConfig::default(),
//!     |_| Box::new(MemoryChunkStore::new()),
//! );
//!
//! let url = Url::parse("http://example.com/").unwrap();
//! if let Some(hit) = db.contains_browse_url(&url) {
//!     // Confirm hit.prefix_hits with a full-hash fetch.
//! }
//! ```

mod cache;
mod chunk;
mod database;
mod ip_blacklist;
mod whitelist;

pub use cache::{CachedFullHash, FullHashResult};
pub use chunk::{Chunk, ChunkContent, ChunkDelete, ListChunkRanges};
pub use database::{BrowseMatch, Database, DatabaseConfig, StoreKind};
pub use ip_blacklist::IpBlacklist;
pub use whitelist::{
    Whitelist, MALWARE_IP_KILL_SWITCH_PATTERN, MAX_WHITELIST_SIZE, WHITELIST_KILL_SWITCH_PATTERN,
};

pub use threatdb_hash::{FullHash, Prefix};
pub use threatdb_store::{ChunkStore, ListId, MemoryChunkStore};
