//! Full-hash whitelists.
//!
//! Whitelists fail open: when a whitelist cannot be trusted (load
//! failure, implausible size, explicit kill switch) it reports every
//! query as whitelisted rather than letting the blacklist side act on
//! bad data.

use threatdb_hash::FullHash;
use tracing::warn;

/// Whitelists larger than this are considered bogus and fail open.
pub const MAX_WHITELIST_SIZE: usize = 5000;

/// Pattern whose hash, when present in a whitelist, switches that
/// whitelist to whitelist-everything mode.
pub const WHITELIST_KILL_SWITCH_PATTERN: &str = "sb-ssl.google.com/safebrowsing/csd/killswitch";

/// Pattern whose hash, when present in the client-side-detection
/// whitelist, disables malware IP matching.
pub const MALWARE_IP_KILL_SWITCH_PATTERN: &str =
    "sb-ssl.google.com/safebrowsing/csd/killswitch_malware";

#[derive(Debug, Clone)]
pub struct Whitelist {
    /// Sorted whitelisted hashes. Empty when `all_whitelisted` is set.
    hashes: Vec<FullHash>,
    all_whitelisted: bool,
}

impl Default for Whitelist {
    /// The safe default before any data has loaded: everything
    /// whitelisted.
    fn default() -> Self {
        Self::everything()
    }
}

impl Whitelist {
    /// A whitelist that matches every query.
    pub fn everything() -> Self {
        Self {
            hashes: Vec::new(),
            all_whitelisted: true,
        }
    }

    /// An empty whitelist that matches nothing.
    pub fn empty() -> Self {
        Self {
            hashes: Vec::new(),
            all_whitelisted: false,
        }
    }

    /// Build a whitelist from loaded hashes, applying the size cap and
    /// the kill switch.
    pub fn from_hashes(mut hashes: Vec<FullHash>) -> Self {
        if hashes.len() > MAX_WHITELIST_SIZE {
            warn!(size = hashes.len(), "whitelist implausibly large, failing open");
            return Self::everything();
        }

        let kill_switch = FullHash::from_expression(WHITELIST_KILL_SWITCH_PATTERN);
        if hashes.contains(&kill_switch) {
            warn!("whitelist kill switch present, failing open");
            return Self::everything();
        }

        hashes.sort_unstable();
        hashes.dedup();
        Self {
            hashes,
            all_whitelisted: false,
        }
    }

    /// Whether any of `hashes` is whitelisted.
    pub fn contains_any(&self, hashes: &[FullHash]) -> bool {
        self.all_whitelisted
            || hashes
                .iter()
                .any(|h| self.hashes.binary_search(h).is_ok())
    }

    /// Whether the whitelist is in whitelist-everything mode.
    pub fn is_everything(&self) -> bool {
        self.all_whitelisted
    }
}
