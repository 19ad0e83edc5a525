//! The threat-list database coordinator.
//!
//! One [`Database`] owns a chunk store per store kind, the in-memory
//! lookup snapshots built from them, and the update state machine that
//! rebuilds those snapshots. Lookup calls touch a single mutex-guarded
//! snapshot struct and never wait on store I/O; expensive index
//! rebuilds happen outside the lock and are swapped in atomically as
//! `Arc`s.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use threatdb_hash::{FullHash, Prefix};
use threatdb_prefixset::{PrefixSet, PrefixSetBuilder};
use threatdb_store::{
    chunk_id_bit, chunks_to_range_string, decode_chunk_id, encode_chunk_id,
    range_string_to_chunks, ChunkStore, ListId, StoreError,
};
use threatdb_url::{browse_expressions, canonicalize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{find_cached, insert_cached, CachedFullHash, FullHashResult};
use crate::chunk::{Chunk, ChunkContent, ChunkDelete, ListChunkRanges};
use crate::ip_blacklist::IpBlacklist;
use crate::whitelist::{Whitelist, MALWARE_IP_KILL_SWITCH_PATTERN};

/// The store files a database can be composed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Phishing + malware URL prefixes (always present)
    Browse,
    /// Malicious binary-download URL prefixes
    Download,
    /// Client-side-detection whitelist full hashes
    CsdWhitelist,
    /// Download whitelist full hashes
    DownloadWhitelist,
    /// Blacklisted extension-id prefixes
    ExtensionBlacklist,
    /// Side-effect-free navigation whitelist prefixes
    SideEffectFreeWhitelist,
    /// Malware IP subnet records
    IpBlacklist,
}

impl StoreKind {
    pub const ALL: [StoreKind; 7] = [
        StoreKind::Browse,
        StoreKind::Download,
        StoreKind::CsdWhitelist,
        StoreKind::DownloadWhitelist,
        StoreKind::ExtensionBlacklist,
        StoreKind::SideEffectFreeWhitelist,
        StoreKind::IpBlacklist,
    ];

    /// The lists this store holds chunks for.
    pub fn lists(self) -> &'static [ListId] {
        match self {
            StoreKind::Browse => &[ListId::Phish, ListId::Malware],
            StoreKind::Download => &[ListId::BinUrl],
            StoreKind::CsdWhitelist => &[ListId::CsdWhitelist],
            StoreKind::DownloadWhitelist => &[ListId::DownloadWhitelist],
            StoreKind::ExtensionBlacklist => &[ListId::ExtensionBlacklist],
            StoreKind::SideEffectFreeWhitelist => &[ListId::SideEffectFreeWhitelist],
            StoreKind::IpBlacklist => &[ListId::IpBlacklist],
        }
    }

    /// Suffix appended to the database base path for this store's file.
    /// The browse suffix is historical and kept for compatibility with
    /// existing profiles.
    pub fn file_suffix(self) -> &'static str {
        match self {
            StoreKind::Browse => " Bloom",
            StoreKind::Download => " Download",
            StoreKind::CsdWhitelist => " Csd Whitelist",
            StoreKind::DownloadWhitelist => " Download Whitelist",
            StoreKind::ExtensionBlacklist => " Extension Blacklist",
            StoreKind::SideEffectFreeWhitelist => " Side-Effect Free Whitelist",
            StoreKind::IpBlacklist => " IP Blacklist",
        }
    }

    /// Whether this store kind persists a prefix-set index file.
    fn has_prefix_set_file(self) -> bool {
        matches!(self, StoreKind::Browse | StoreKind::SideEffectFreeWhitelist)
    }
}

/// Which optional stores a [`Database`] carries, and caching policy.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub enable_download_protection: bool,
    pub enable_csd_whitelist: bool,
    pub enable_download_whitelist: bool,
    pub enable_extension_blacklist: bool,
    pub enable_side_effect_free_whitelist: bool,
    pub enable_ip_blacklist: bool,
    /// Lists whose verified full-hash results are kept in the cache.
    pub cached_lists: Vec<ListId>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enable_download_protection: true,
            enable_csd_whitelist: true,
            enable_download_whitelist: true,
            enable_extension_blacklist: true,
            enable_side_effect_free_whitelist: true,
            enable_ip_blacklist: true,
            cached_lists: vec![ListId::Malware, ListId::Phish],
        }
    }
}

impl DatabaseConfig {
    fn enabled(&self, kind: StoreKind) -> bool {
        match kind {
            StoreKind::Browse => true,
            StoreKind::Download => self.enable_download_protection,
            StoreKind::CsdWhitelist => self.enable_csd_whitelist,
            StoreKind::DownloadWhitelist => self.enable_download_whitelist,
            StoreKind::ExtensionBlacklist => self.enable_extension_blacklist,
            StoreKind::SideEffectFreeWhitelist => self.enable_side_effect_free_whitelist,
            StoreKind::IpBlacklist => self.enable_ip_blacklist,
        }
    }
}

/// A browse-list hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseMatch {
    /// Matching prefixes, sorted and deduplicated; these require
    /// full-hash confirmation.
    pub prefix_hits: Vec<Prefix>,
    /// Unexpired cached full-hash results for the matching prefixes.
    pub cached_hits: Vec<FullHashResult>,
}

struct StoreSlot {
    kind: StoreKind,
    store: Mutex<Box<dyn ChunkStore>>,
}

/// Everything lookups read, behind one mutex. Prefix sets are shared
/// `Arc`s so rebuilds swap a pointer instead of mutating in place.
#[derive(Default)]
struct LookupState {
    browse_prefixes: Arc<PrefixSet>,
    side_effect_free_prefixes: Arc<PrefixSet>,
    csd_whitelist: Whitelist,
    download_whitelist: Whitelist,
    ip_blacklist: IpBlacklist,
    /// Sorted by (prefix, hash).
    cached_browse_hashes: Vec<CachedFullHash>,
    /// Prefixes known to have no full-hash results.
    prefix_miss_cache: HashSet<Prefix>,
}

pub struct Database {
    base_path: PathBuf,
    config: DatabaseConfig,
    stores: Vec<StoreSlot>,
    state: Mutex<LookupState>,
    update_in_progress: AtomicBool,
    change_detected: AtomicBool,
    corruption_detected: AtomicBool,
    /// Set when corruption is detected mid-call; honored at the start
    /// of the next update cycle, after the detecting call has unwound.
    reset_requested: AtomicBool,
}

fn append_to_path(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Range string for one list's chunks within a store's encoded id
/// space.
fn ranges_for_list(encoded: &[u32], list_id: ListId) -> String {
    let chunks: Vec<u32> = encoded
        .iter()
        .copied()
        .filter(|&c| chunk_id_bit(c) == list_id.list_bit())
        .map(decode_chunk_id)
        .collect();
    chunks_to_range_string(&chunks)
}

fn apply_chunk(
    store: &mut dyn ChunkStore,
    list_id: ListId,
    encoded: u32,
    content: &ChunkContent,
) -> Result<(), StoreError> {
    match content {
        ChunkContent::AddPrefixes(prefixes) => {
            for &prefix in prefixes {
                store.write_add_prefix(encoded, prefix)?;
            }
            store.set_add_chunk(encoded);
        }
        ChunkContent::AddFullHashes(hashes) => {
            for &hash in hashes {
                store.write_add_hash(encoded, hash)?;
            }
            store.set_add_chunk(encoded);
        }
        ChunkContent::SubPrefixes(entries) => {
            for &(add_chunk, prefix) in entries {
                store.write_sub_prefix(encoded, encode_chunk_id(add_chunk, list_id), prefix)?;
            }
            store.set_sub_chunk(encoded);
        }
        ChunkContent::SubFullHashes(entries) => {
            for &(add_chunk, hash) in entries {
                store.write_sub_hash(encoded, encode_chunk_id(add_chunk, list_id), hash)?;
            }
            store.set_sub_chunk(encoded);
        }
    }
    Ok(())
}

impl Database {
    /// Build a database over the injected stores and load any existing
    /// data.
    ///
    /// `make_store` is called once per store kind enabled by `config`;
    /// the browse store is always present. On-disk files live at
    /// `base_path` plus a per-store suffix.
    pub fn new<F>(base_path: impl Into<PathBuf>, config: DatabaseConfig, mut make_store: F) -> Self
    where
        F: FnMut(StoreKind) -> Box<dyn ChunkStore>,
    {
        let stores = StoreKind::ALL
            .iter()
            .copied()
            .filter(|&kind| config.enabled(kind))
            .map(|kind| StoreSlot {
                kind,
                store: Mutex::new(make_store(kind)),
            })
            .collect();

        let db = Self {
            base_path: base_path.into(),
            config,
            stores,
            state: Mutex::new(LookupState::default()),
            update_in_progress: AtomicBool::new(false),
            change_detected: AtomicBool::new(false),
            corruption_detected: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
        };
        db.init();
        db
    }

    fn store_path(&self, kind: StoreKind) -> PathBuf {
        append_to_path(&self.base_path, kind.file_suffix())
    }

    fn prefix_set_path(&self, kind: StoreKind) -> PathBuf {
        append_to_path(&self.store_path(kind), " Prefix Set")
    }

    fn slot(&self, kind: StoreKind) -> Option<&StoreSlot> {
        self.stores.iter().find(|s| s.kind == kind)
    }

    fn slot_for_list(&self, list_id: ListId) -> Option<&StoreSlot> {
        self.stores.iter().find(|s| s.kind.lists().contains(&list_id))
    }

    fn init(&self) {
        // A missing or invalid index file just means no data yet; the
        // next successful update rewrites it.
        let browse = PrefixSet::load_file(&self.prefix_set_path(StoreKind::Browse))
            .map(Arc::new)
            .unwrap_or_default();

        let side_effect_free = if self.slot(StoreKind::SideEffectFreeWhitelist).is_some() {
            PrefixSet::load_file(&self.prefix_set_path(StoreKind::SideEffectFreeWhitelist))
                .map(Arc::new)
                .unwrap_or_default()
        } else {
            Arc::default()
        };

        let csd_whitelist = self.load_whitelist(StoreKind::CsdWhitelist);
        let download_whitelist = self.load_whitelist(StoreKind::DownloadWhitelist);
        let ip_blacklist = self.load_ip_blacklist();

        let mut state = self.state.lock();
        state.browse_prefixes = browse;
        state.side_effect_free_prefixes = side_effect_free;
        state.csd_whitelist = csd_whitelist;
        state.download_whitelist = download_whitelist;
        state.ip_blacklist = ip_blacklist;
    }

    /// Absent or unreadable whitelist stores fail open.
    fn load_whitelist(&self, kind: StoreKind) -> Whitelist {
        let Some(slot) = self.slot(kind) else {
            return Whitelist::everything();
        };
        match slot.store.lock().add_full_hashes() {
            Ok(hashes) => Whitelist::from_hashes(hashes.into_iter().map(|a| a.hash).collect()),
            Err(e) => {
                error!(store = ?kind, error = %e, "failed to load whitelist, failing open");
                self.on_store_error(&e);
                Whitelist::everything()
            }
        }
    }

    fn load_ip_blacklist(&self) -> IpBlacklist {
        let Some(slot) = self.slot(StoreKind::IpBlacklist) else {
            return IpBlacklist::default();
        };
        match slot.store.lock().add_full_hashes() {
            Ok(hashes) => {
                let records: Vec<FullHash> = hashes.into_iter().map(|a| a.hash).collect();
                IpBlacklist::from_records(&records)
            }
            Err(e) => {
                error!(error = %e, "failed to load IP blacklist");
                self.on_store_error(&e);
                IpBlacklist::default()
            }
        }
    }

    fn on_store_error(&self, err: &StoreError) {
        if err.is_corrupt() {
            self.handle_corrupt_database();
        }
    }

    /// Flag the database for a full reset. The reset itself runs at the
    /// start of the next update cycle so the detecting call can unwind
    /// first.
    fn handle_corrupt_database(&self) {
        error!("threat database corrupt, scheduling reset");
        self.corruption_detected.store(true, Ordering::SeqCst);
        self.reset_requested.store(true, Ordering::SeqCst);
    }

    // ----- lookup surface ------------------------------------------------

    /// Check `url` against the browse (phishing + malware) lists.
    ///
    /// A `Some` return means at least one prefix matched and a full-hash
    /// fetch (or the returned cached results) is needed to confirm.
    pub fn contains_browse_url(&self, url: &Url) -> Option<BrowseMatch> {
        let expressions = match browse_expressions(url, false) {
            Ok(expressions) => expressions,
            Err(e) => {
                debug!(url = %url, error = %e, "cannot generate browse expressions");
                return None;
            }
        };
        let full_hashes: Vec<FullHash> = expressions
            .iter()
            .map(|e| FullHash::from_expression(e))
            .collect();

        let now = Instant::now();
        let state = self.state.lock();

        let mut prefix_hits: Vec<Prefix> = full_hashes
            .iter()
            .filter(|h| state.browse_prefixes.contains(h))
            .map(|h| h.prefix())
            .collect();
        if prefix_hits.is_empty() {
            return None;
        }
        prefix_hits.sort_unstable();
        prefix_hits.dedup();

        // If every matching prefix is a known miss, there is nothing to
        // confirm and no hit to report.
        let misses = prefix_hits
            .iter()
            .filter(|p| state.prefix_miss_cache.contains(p))
            .count();
        if misses == prefix_hits.len() {
            return None;
        }

        let cached_hits = find_cached(&state.cached_browse_hashes, &prefix_hits, now);
        Some(BrowseMatch {
            prefix_hits,
            cached_hits,
        })
    }

    /// Check a download URL redirect chain against the binary-download
    /// blacklist. Returns the matching prefixes.
    pub fn contains_download_url(&self, urls: &[Url]) -> Option<Vec<Prefix>> {
        let slot = self.slot(StoreKind::Download)?;

        let mut prefixes = Vec::new();
        for url in urls {
            if let Ok(expressions) = browse_expressions(url, false) {
                prefixes.extend(
                    expressions
                        .iter()
                        .map(|e| FullHash::from_expression(e).prefix()),
                );
            }
        }
        self.match_add_prefixes(slot, ListId::BinUrl, prefixes)
    }

    /// Check extension-id prefixes against the extension blacklist.
    pub fn contains_extension_prefixes(&self, prefixes: &[Prefix]) -> Option<Vec<Prefix>> {
        let slot = self.slot(StoreKind::ExtensionBlacklist)?;
        self.match_add_prefixes(slot, ListId::ExtensionBlacklist, prefixes.to_vec())
    }

    /// Scan a store's committed add prefixes for `prefixes`, filtered
    /// to entries belonging to `list_id`.
    fn match_add_prefixes(
        &self,
        slot: &StoreSlot,
        list_id: ListId,
        mut prefixes: Vec<Prefix>,
    ) -> Option<Vec<Prefix>> {
        prefixes.sort_unstable();
        prefixes.dedup();

        let adds = match slot.store.lock().add_prefixes() {
            Ok(adds) => adds,
            Err(e) => {
                error!(store = ?slot.kind, error = %e, "failed to read add prefixes");
                self.on_store_error(&e);
                return None;
            }
        };

        let mut hits: Vec<Prefix> = adds
            .iter()
            .filter(|a| {
                chunk_id_bit(a.chunk_id) == list_id.list_bit()
                    && prefixes.binary_search(&a.prefix).is_ok()
            })
            .map(|a| a.prefix)
            .collect();
        hits.sort_unstable();
        hits.dedup();

        if hits.is_empty() {
            None
        } else {
            Some(hits)
        }
    }

    /// Whether `url` is covered by the client-side-detection whitelist.
    pub fn contains_csd_whitelisted_url(&self, url: &Url) -> bool {
        let hashes = whitelist_hashes(url);
        self.state.lock().csd_whitelist.contains_any(&hashes)
    }

    /// Whether `url` is covered by the download whitelist.
    pub fn contains_download_whitelisted_url(&self, url: &Url) -> bool {
        let hashes = whitelist_hashes(url);
        self.state.lock().download_whitelist.contains_any(&hashes)
    }

    /// Whether an exact string (e.g. a signing certificate descriptor)
    /// is on the download whitelist.
    pub fn contains_download_whitelisted_string(&self, s: &str) -> bool {
        let hash = FullHash::from_expression(s);
        self.state.lock().download_whitelist.contains_any(&[hash])
    }

    /// Whether `url` is on the side-effect-free navigation whitelist.
    /// This list is probed with a single exact host+path expression.
    pub fn contains_side_effect_free_whitelist_url(&self, url: &Url) -> bool {
        let Ok(canonical) = canonicalize(url) else {
            return false;
        };
        let hash = FullHash::from_expression(&canonical.to_string());
        self.state
            .lock()
            .side_effect_free_prefixes
            .contains_prefix(hash.prefix())
    }

    /// Whether `ip` falls in a blacklisted malware subnet.
    pub fn contains_malware_ip(&self, ip: IpAddr) -> bool {
        self.state.lock().ip_blacklist.contains(ip)
    }

    /// Whether the client-side-detection whitelist is in
    /// whitelist-everything mode (its kill switch).
    pub fn is_csd_whitelist_kill_switch_on(&self) -> bool {
        self.state.lock().csd_whitelist.is_everything()
    }

    /// Whether malware IP matching is disabled by its kill-switch entry
    /// in the client-side-detection whitelist.
    pub fn is_malware_ip_match_kill_switch_on(&self) -> bool {
        let hash = FullHash::from_expression(MALWARE_IP_KILL_SWITCH_PATTERN);
        self.state.lock().csd_whitelist.contains_any(&[hash])
    }

    // ----- update surface ------------------------------------------------

    /// Open an update cycle: begin a transaction on every store and
    /// report the chunk ranges each list already holds.
    ///
    /// Returns `None` (with all transactions closed) if any store fails
    /// to begin or an update is already running.
    pub fn update_started(&self) -> Option<Vec<ListChunkRanges>> {
        if self.reset_requested.swap(false, Ordering::SeqCst) {
            info!("performing deferred reset before update");
            self.reset();
        }

        if self.update_in_progress.swap(true, Ordering::SeqCst) {
            error!("update already in progress");
            return None;
        }
        self.change_detected.store(false, Ordering::SeqCst);
        self.corruption_detected.store(false, Ordering::SeqCst);

        let mut begun = 0;
        for slot in &self.stores {
            let result = slot.store.lock().begin_update();
            if let Err(e) = result {
                error!(store = ?slot.kind, error = %e, "failed to begin update");
                self.on_store_error(&e);
                for opened in &self.stores[..begun] {
                    opened.store.lock().cancel_update();
                }
                self.update_in_progress.store(false, Ordering::SeqCst);
                return None;
            }
            begun += 1;
        }

        let mut lists = Vec::new();
        for slot in &self.stores {
            let store = slot.store.lock();
            let add_chunks = store.add_chunks();
            let sub_chunks = store.sub_chunks();
            for &list_id in slot.kind.lists() {
                lists.push(ListChunkRanges {
                    name: list_id.name().to_string(),
                    adds: ranges_for_list(&add_chunks, list_id),
                    subs: ranges_for_list(&sub_chunks, list_id),
                });
            }
        }
        Some(lists)
    }

    /// Apply chunks for one list. Chunks already applied are skipped;
    /// malformed chunks are skipped without aborting the batch.
    pub fn insert_chunks(&self, list_name: &str, chunks: &[Chunk]) {
        if self.corruption_detected.load(Ordering::SeqCst) || chunks.is_empty() {
            return;
        }
        let Some(list_id) = ListId::from_name(list_name) else {
            warn!(list = list_name, "ignoring chunks for unknown list");
            return;
        };
        let Some(slot) = self.slot_for_list(list_id) else {
            return;
        };

        let mut store = slot.store.lock();
        for chunk in chunks {
            // Chunk numbers with the top bit set cannot be encoded.
            if chunk.chunk_number > u32::MAX >> 1 {
                warn!(chunk = chunk.chunk_number, "skipping malformed chunk");
                continue;
            }
            let encoded = encode_chunk_id(chunk.chunk_number, list_id);

            let already_applied = if chunk.content.is_sub() {
                store.check_sub_chunk(encoded)
            } else {
                store.check_add_chunk(encoded)
            };
            if already_applied {
                debug!(list = %list_id, chunk = chunk.chunk_number, "chunk already applied");
                continue;
            }

            if let Err(e) = apply_chunk(store.as_mut(), list_id, encoded, &chunk.content) {
                error!(list = %list_id, chunk = chunk.chunk_number, error = %e,
                       "failed to apply chunk");
                self.on_store_error(&e);
                return;
            }
            self.change_detected.store(true, Ordering::SeqCst);
        }
    }

    /// Drop chunks named by the update protocol.
    pub fn delete_chunks(&self, deletes: &[ChunkDelete]) {
        if self.corruption_detected.load(Ordering::SeqCst) {
            return;
        }
        for delete in deletes {
            let Some(list_id) = ListId::from_name(&delete.list_name) else {
                warn!(list = %delete.list_name, "ignoring delete for unknown list");
                continue;
            };
            let Some(slot) = self.slot_for_list(list_id) else {
                continue;
            };
            let chunks = match range_string_to_chunks(&delete.chunk_del) {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(list = %list_id, error = %e, "ignoring malformed chunk delete");
                    continue;
                }
            };
            if chunks.is_empty() {
                continue;
            }

            let mut store = slot.store.lock();
            for chunk in chunks {
                // Same encoding bound as insert_chunks; a wrapped id
                // would alias another chunk.
                if chunk > u32::MAX >> 1 {
                    warn!(list = %list_id, chunk, "skipping malformed chunk delete");
                    continue;
                }
                let encoded = encode_chunk_id(chunk, list_id);
                if delete.is_sub_del {
                    store.delete_sub_chunk(encoded);
                } else {
                    store.delete_add_chunk(encoded);
                }
                self.change_detected.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Close the update cycle. On success with changes, commits every
    /// store and swaps rebuilt snapshots in; otherwise cancels all
    /// transactions, leaving the previous data authoritative.
    pub fn update_finished(&self, update_succeeded: bool) {
        if !self.update_in_progress.swap(false, Ordering::SeqCst) {
            warn!("update_finished without update_started");
            return;
        }

        if self.corruption_detected.load(Ordering::SeqCst) {
            for slot in &self.stores {
                slot.store.lock().cancel_update();
            }
            return;
        }

        if !update_succeeded || !self.change_detected.load(Ordering::SeqCst) {
            info!(
                succeeded = update_succeeded,
                "update canceled, keeping existing data"
            );
            for slot in &self.stores {
                let mut store = slot.store.lock();
                if let Err(e) = store.check_validity() {
                    error!(store = ?slot.kind, error = %e, "store failed validity check");
                    self.on_store_error(&e);
                }
                store.cancel_update();
            }
            return;
        }

        for slot in &self.stores {
            match slot.kind {
                StoreKind::Browse => self.update_browse_store(slot),
                StoreKind::Download | StoreKind::ExtensionBlacklist => {
                    self.update_prefix_store(slot)
                }
                StoreKind::CsdWhitelist | StoreKind::DownloadWhitelist => {
                    self.update_whitelist_store(slot)
                }
                StoreKind::SideEffectFreeWhitelist => self.update_side_effect_free_store(slot),
                StoreKind::IpBlacklist => self.update_ip_blacklist_store(slot),
            }
        }
    }

    fn update_browse_store(&self, slot: &StoreSlot) {
        let mut builder = PrefixSetBuilder::new();
        let mut add_full_hashes = Vec::new();
        {
            let mut store = slot.store.lock();
            if let Err(e) = store.finish_update(&mut builder, &mut add_full_hashes) {
                error!(error = %e, "failed to finish browse update");
                self.on_store_error(&e);
                return;
            }
        }

        // The rebuild is the expensive part; it runs with no locks held.
        let started = Instant::now();
        let full_hashes: Vec<FullHash> = add_full_hashes.iter().map(|a| a.hash).collect();
        let prefix_set = Arc::new(builder.build(full_hashes));
        info!(
            prefixes = prefix_set.prefix_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rebuilt browse prefix set"
        );

        {
            let mut state = self.state.lock();
            state.browse_prefixes = Arc::clone(&prefix_set);
            state.cached_browse_hashes.clear();
            state.prefix_miss_cache.clear();
        }

        if let Err(e) = prefix_set.write_file(&self.prefix_set_path(StoreKind::Browse)) {
            error!(error = %e, "failed to persist browse prefix set, keeping in-memory data");
        }
    }

    /// Download and extension stores keep their prefix lists in the
    /// store itself; finishing the transaction is all that is needed.
    fn update_prefix_store(&self, slot: &StoreSlot) {
        let mut builder = PrefixSetBuilder::new();
        let mut full_hashes = Vec::new();
        let result = slot
            .store
            .lock()
            .finish_update(&mut builder, &mut full_hashes);
        if let Err(e) = result {
            error!(store = ?slot.kind, error = %e, "failed to finish update");
            self.on_store_error(&e);
        }
    }

    fn update_whitelist_store(&self, slot: &StoreSlot) {
        let mut builder = PrefixSetBuilder::new();
        let mut full_hashes = Vec::new();
        let result = slot
            .store
            .lock()
            .finish_update(&mut builder, &mut full_hashes);

        let whitelist = match result {
            Ok(()) => Whitelist::from_hashes(full_hashes.into_iter().map(|a| a.hash).collect()),
            Err(e) => {
                error!(store = ?slot.kind, error = %e, "failed to finish whitelist update, failing open");
                self.on_store_error(&e);
                Whitelist::everything()
            }
        };

        let mut state = self.state.lock();
        match slot.kind {
            StoreKind::CsdWhitelist => state.csd_whitelist = whitelist,
            _ => state.download_whitelist = whitelist,
        }
    }

    fn update_side_effect_free_store(&self, slot: &StoreSlot) {
        let mut builder = PrefixSetBuilder::new();
        let mut full_hashes = Vec::new();
        {
            let mut store = slot.store.lock();
            if let Err(e) = store.finish_update(&mut builder, &mut full_hashes) {
                error!(error = %e, "failed to finish side-effect-free whitelist update");
                self.on_store_error(&e);
                return;
            }
        }

        let prefix_set = Arc::new(builder.build_no_hashes());
        self.state.lock().side_effect_free_prefixes = Arc::clone(&prefix_set);

        if let Err(e) =
            prefix_set.write_file(&self.prefix_set_path(StoreKind::SideEffectFreeWhitelist))
        {
            error!(error = %e, "failed to persist side-effect-free prefix set");
        }
    }

    fn update_ip_blacklist_store(&self, slot: &StoreSlot) {
        let mut builder = PrefixSetBuilder::new();
        let mut full_hashes = Vec::new();
        let result = slot
            .store
            .lock()
            .finish_update(&mut builder, &mut full_hashes);

        let blacklist = match result {
            Ok(()) => {
                let records: Vec<FullHash> = full_hashes.into_iter().map(|a| a.hash).collect();
                IpBlacklist::from_records(&records)
            }
            Err(e) => {
                error!(error = %e, "failed to finish IP blacklist update, clearing list");
                self.on_store_error(&e);
                IpBlacklist::default()
            }
        };
        self.state.lock().ip_blacklist = blacklist;
    }

    /// Record the outcome of a full-hash fetch for `prefixes`.
    ///
    /// An empty result set marks the prefixes as known misses; positive
    /// results for lists in the caching policy are cached until
    /// `cache_lifetime` elapses.
    pub fn cache_hash_results(
        &self,
        prefixes: &[Prefix],
        results: &[FullHashResult],
        cache_lifetime: Duration,
    ) {
        let mut state = self.state.lock();
        if results.is_empty() {
            state.prefix_miss_cache.extend(prefixes.iter().copied());
            return;
        }

        let cacheable = results
            .iter()
            .copied()
            .filter(|r| self.config.cached_lists.contains(&r.list_id));
        insert_cached(
            &mut state.cached_browse_hashes,
            cacheable,
            Instant::now() + cache_lifetime,
        );
    }

    /// Drop everything: store contents, on-disk index files, in-memory
    /// snapshots and caches. Whitelists fail open until data returns.
    ///
    /// Returns false if any on-disk artifact could not be removed.
    pub fn reset(&self) -> bool {
        info!("resetting threat database");
        let mut ok = true;

        for slot in &self.stores {
            if let Err(e) = slot.store.lock().delete() {
                error!(store = ?slot.kind, error = %e, "failed to delete store");
                ok = false;
            }
            let mut paths = vec![self.store_path(slot.kind)];
            if slot.kind.has_prefix_set_file() {
                paths.push(self.prefix_set_path(slot.kind));
            }
            for path in paths {
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        error!(path = %path.display(), error = %e, "failed to remove file");
                        ok = false;
                    }
                }
            }
        }

        *self.state.lock() = LookupState::default();
        self.corruption_detected.store(false, Ordering::SeqCst);
        ok
    }
}

/// Full hashes for every whitelist expression of a URL. An
/// uncanonicalizable URL yields no hashes, so only a
/// whitelist-everything list matches it.
fn whitelist_hashes(url: &Url) -> Vec<FullHash> {
    browse_expressions(url, true)
        .unwrap_or_default()
        .iter()
        .map(|e| FullHash::from_expression(e))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_for_list_filters_by_bit() {
        // Encoded ids for phish chunks 1-3 and malware chunks 1,2.
        let encoded = vec![
            encode_chunk_id(1, ListId::Phish),
            encode_chunk_id(2, ListId::Phish),
            encode_chunk_id(3, ListId::Phish),
            encode_chunk_id(1, ListId::Malware),
            encode_chunk_id(2, ListId::Malware),
        ];
        assert_eq!(ranges_for_list(&encoded, ListId::Phish), "1-3");
        assert_eq!(ranges_for_list(&encoded, ListId::Malware), "1-2");
    }

    #[test]
    fn test_store_paths() {
        let db = Database::new(
            "/tmp/Threat Database",
            DatabaseConfig::default(),
            |_| Box::new(threatdb_store::MemoryChunkStore::new()),
        );
        assert_eq!(
            db.store_path(StoreKind::Download),
            PathBuf::from("/tmp/Threat Database Download")
        );
        assert_eq!(
            db.prefix_set_path(StoreKind::Browse),
            PathBuf::from("/tmp/Threat Database Bloom Prefix Set")
        );
    }

    #[test]
    fn test_every_list_has_a_store_kind() {
        for list_id in ListId::ALL {
            assert!(
                StoreKind::ALL.iter().any(|k| k.lists().contains(&list_id)),
                "no store serves {list_id}"
            );
        }
    }
}
