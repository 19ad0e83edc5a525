//! Compact sorted prefix index for threatdb
//!
//! A [`PrefixSet`] holds the 32-bit prefixes of one threat list in a
//! sorted, delta-compressed form. Most neighboring prefixes in a sorted
//! list are close together, so instead of storing every prefix as a
//! `u32`, the set stores occasional anchor prefixes plus 16-bit deltas
//! to the following prefixes. A new anchor starts whenever the gap to
//! the previous prefix does not fit in 16 bits, or after
//! [`MAX_RUN`] deltas so a membership probe never walks far.
//!
//! Full-length hashes that must match exactly (rather than by prefix)
//! ride along as a sorted exception list.
//!
//! A `PrefixSet` is immutable once built; updates construct a brand new
//! set through [`PrefixSetBuilder`] and swap it in wholesale.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use thiserror::Error;
use threatdb_hash::{FullHash, Prefix, FULL_HASH_LEN};
use tracing::{debug, warn};

/// Magic number identifying a serialized prefix set.
const MAGIC: u32 = 0x8675_3482;

/// Current on-disk format version.
const VERSION: u32 = 1;

/// Fixed header size: magic, version, and the three array counts.
const HEADER_LEN: usize = 20;

/// Length of the trailing SHA-256 validity digest.
const DIGEST_LEN: usize = 32;

/// Maximum number of deltas in a run before a new anchor is forced.
pub const MAX_RUN: usize = 100;

/// Error type for prefix set operations
#[derive(Debug, Error)]
pub enum PrefixSetError {
    /// I/O error reading or writing a prefix set file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents failed a validity check
    #[error("Corrupt prefix set file: {0}")]
    Corrupt(String),
}

/// Result type for prefix set operations
pub type Result<T> = std::result::Result<T, PrefixSetError>;

/// Immutable, sorted, delta-encoded set of 32-bit prefixes with an
/// exception list of verbatim full hashes.
#[derive(Debug, Clone, Default)]
pub struct PrefixSet {
    /// Anchor prefixes paired with their offset into `deltas`.
    index: Vec<(Prefix, u32)>,

    /// 16-bit gaps between consecutive prefixes within a run.
    deltas: Vec<u16>,

    /// Sorted full hashes kept verbatim.
    full_hashes: Vec<FullHash>,
}

impl PrefixSet {
    fn from_sorted(prefixes: &[Prefix], mut full_hashes: Vec<FullHash>) -> Self {
        debug_assert!(prefixes.windows(2).all(|w| w[0] < w[1]));

        let mut index = Vec::new();
        let mut deltas = Vec::new();
        let mut run_len = 0usize;
        let mut prev: Option<Prefix> = None;

        for &prefix in prefixes {
            match prev {
                None => {
                    index.push((prefix, deltas.len() as u32));
                    run_len = 0;
                }
                Some(last) => {
                    let gap = prefix - last;
                    if gap > u32::from(u16::MAX) || run_len == MAX_RUN {
                        index.push((prefix, deltas.len() as u32));
                        run_len = 0;
                    } else {
                        deltas.push(gap as u16);
                        run_len += 1;
                    }
                }
            }
            prev = Some(prefix);
        }

        full_hashes.sort_unstable();
        full_hashes.dedup();

        Self {
            index,
            deltas,
            full_hashes,
        }
    }

    /// Test whether a 32-bit prefix is in the set.
    pub fn contains_prefix(&self, prefix: Prefix) -> bool {
        let run = match self.index.binary_search_by_key(&prefix, |e| e.0) {
            Ok(_) => return true,
            Err(0) => return false,
            Err(i) => i - 1,
        };

        let start = self.index[run].1 as usize;
        let end = self
            .index
            .get(run + 1)
            .map_or(self.deltas.len(), |e| e.1 as usize);

        let mut current = self.index[run].0;
        for &delta in &self.deltas[start..end] {
            current += u32::from(delta);
            if current >= prefix {
                return current == prefix;
            }
        }
        false
    }

    /// Test whether a full hash matches the set, either because its
    /// 32-bit prefix is present or because the exact hash is on the
    /// exception list.
    pub fn contains(&self, hash: &FullHash) -> bool {
        self.full_hashes.binary_search(hash).is_ok() || self.contains_prefix(hash.prefix())
    }

    /// Number of prefixes stored.
    pub fn prefix_count(&self) -> usize {
        self.index.len() + self.deltas.len()
    }

    /// Whether the set holds no prefixes and no exception hashes.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() && self.full_hashes.is_empty()
    }

    /// Reconstruct the sorted prefix list (testing and diagnostics).
    pub fn to_prefixes(&self) -> Vec<Prefix> {
        let mut prefixes = Vec::with_capacity(self.prefix_count());
        for (run, &(anchor, offset)) in self.index.iter().enumerate() {
            let start = offset as usize;
            let end = self
                .index
                .get(run + 1)
                .map_or(self.deltas.len(), |e| e.1 as usize);

            let mut current = anchor;
            prefixes.push(current);
            for &delta in &self.deltas[start..end] {
                current += u32::from(delta);
                prefixes.push(current);
            }
        }
        prefixes
    }

    fn to_bytes(&self) -> Vec<u8> {
        let body_len = HEADER_LEN
            + self.index.len() * 8
            + self.deltas.len() * 2
            + self.full_hashes.len() * FULL_HASH_LEN;
        let mut buf = Vec::with_capacity(body_len + DIGEST_LEN);

        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.index.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.deltas.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.full_hashes.len() as u32).to_le_bytes());

        for &(prefix, offset) in &self.index {
            buf.extend_from_slice(&prefix.to_le_bytes());
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        for &delta in &self.deltas {
            buf.extend_from_slice(&delta.to_le_bytes());
        }
        for hash in &self.full_hashes {
            buf.extend_from_slice(hash.as_bytes());
        }

        let digest = Sha256::digest(&buf);
        buf.extend_from_slice(&digest);
        buf
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN + DIGEST_LEN {
            return Err(PrefixSetError::Corrupt("file too short".to_string()));
        }

        let read_u32 =
            |off: usize| u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);

        if read_u32(0) != MAGIC {
            return Err(PrefixSetError::Corrupt("bad magic".to_string()));
        }
        if read_u32(4) != VERSION {
            return Err(PrefixSetError::Corrupt(format!(
                "unsupported version {}",
                read_u32(4)
            )));
        }

        let index_count = read_u32(8) as u64;
        let delta_count = read_u32(12) as u64;
        let hash_count = read_u32(16) as u64;

        let expected = HEADER_LEN as u64
            + index_count * 8
            + delta_count * 2
            + hash_count * FULL_HASH_LEN as u64
            + DIGEST_LEN as u64;
        if data.len() as u64 != expected {
            return Err(PrefixSetError::Corrupt(format!(
                "declared size {} does not match file size {}",
                expected,
                data.len()
            )));
        }

        let body = &data[..data.len() - DIGEST_LEN];
        let digest = Sha256::digest(body);
        if digest.as_slice() != &data[data.len() - DIGEST_LEN..] {
            return Err(PrefixSetError::Corrupt("digest mismatch".to_string()));
        }

        let mut off = HEADER_LEN;
        let mut index = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            let prefix = read_u32(off);
            let delta_offset = read_u32(off + 4);
            index.push((prefix, delta_offset));
            off += 8;
        }

        let mut deltas = Vec::with_capacity(delta_count as usize);
        for _ in 0..delta_count {
            deltas.push(u16::from_le_bytes([data[off], data[off + 1]]));
            off += 2;
        }

        let mut full_hashes = Vec::with_capacity(hash_count as usize);
        for _ in 0..hash_count {
            // Length already validated, from_slice cannot fail here.
            full_hashes.push(
                FullHash::from_slice(&data[off..off + FULL_HASH_LEN])
                    .map_err(|e| PrefixSetError::Corrupt(e.to_string()))?,
            );
            off += FULL_HASH_LEN;
        }

        // Structural sanity: anchors strictly increasing, offsets
        // nondecreasing and within the delta array, hashes sorted.
        if !index.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 <= w[1].1) {
            return Err(PrefixSetError::Corrupt("index out of order".to_string()));
        }
        if index.iter().any(|e| e.1 as usize > deltas.len()) {
            return Err(PrefixSetError::Corrupt(
                "delta offset out of bounds".to_string(),
            ));
        }
        if !full_hashes.windows(2).all(|w| w[0] <= w[1]) {
            return Err(PrefixSetError::Corrupt(
                "exception hashes out of order".to_string(),
            ));
        }

        Ok(Self {
            index,
            deltas,
            full_hashes,
        })
    }

    /// Serialize the set to `path`.
    ///
    /// The file is written to a temporary sibling and renamed into
    /// place, so a crash mid-write leaves either the old file or no
    /// file, never a torn one.
    pub fn write_file(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes();

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!("{file_name}.new"));

        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, path)?;

        debug!(path = %path.display(), bytes = bytes.len(), "wrote prefix set");
        Ok(())
    }

    /// Load a serialized set from `path`.
    ///
    /// Any failure (missing file, truncation, digest mismatch,
    /// structural damage) returns `None`; a half-written or corrupted
    /// file is treated the same as an absent one.
    pub fn load_file(path: &Path) -> Option<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "prefix set file not readable");
                return None;
            }
        };

        match Self::from_bytes(&data) {
            Ok(set) => Some(set),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "rejecting prefix set file");
                None
            }
        }
    }
}

/// Accumulates prefixes for a new [`PrefixSet`].
///
/// Input order does not matter; duplicates are legal and collapse to a
/// single entry.
#[derive(Debug, Default)]
pub struct PrefixSetBuilder {
    prefixes: Vec<Prefix>,
}

impl PrefixSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one prefix to the pending set.
    pub fn add_prefix(&mut self, prefix: Prefix) {
        self.prefixes.push(prefix);
    }

    /// Whether no prefixes have been added yet.
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Build a set containing the accumulated prefixes plus
    /// `full_hashes` kept verbatim as exceptions.
    pub fn build(mut self, full_hashes: Vec<FullHash>) -> PrefixSet {
        self.prefixes.sort_unstable();
        self.prefixes.dedup();
        PrefixSet::from_sorted(&self.prefixes, full_hashes)
    }

    /// Build a set with no exception hashes.
    pub fn build_no_hashes(self) -> PrefixSet {
        self.build(Vec::new())
    }
}

impl Extend<Prefix> for PrefixSetBuilder {
    fn extend<T: IntoIterator<Item = Prefix>>(&mut self, iter: T) {
        self.prefixes.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(prefixes: &[Prefix]) -> PrefixSet {
        let mut builder = PrefixSetBuilder::new();
        builder.extend(prefixes.iter().copied());
        builder.build_no_hashes()
    }

    #[test]
    fn test_round_trip_build() {
        let prefixes = vec![0u32, 5, 100, 65_535, 65_536, 1_000_000, u32::MAX];
        let set = build(&prefixes);

        for &p in &prefixes {
            assert!(set.contains_prefix(p), "missing {p}");
        }
        assert_eq!(set.to_prefixes(), prefixes);
    }

    #[test]
    fn test_negative_lookups() {
        let set = build(&[10, 20, 30, 1_000_000]);

        assert!(!set.contains_prefix(0));
        assert!(!set.contains_prefix(15));
        assert!(!set.contains_prefix(25));
        assert!(!set.contains_prefix(999_999));
        assert!(!set.contains_prefix(u32::MAX));
    }

    #[test]
    fn test_duplicates_collapse() {
        let set = build(&[7, 7, 7, 9, 9]);
        assert_eq!(set.to_prefixes(), vec![7, 9]);
    }

    #[test]
    fn test_unsorted_input() {
        let set = build(&[1_000_000, 3, 500, 3]);
        assert_eq!(set.to_prefixes(), vec![3, 500, 1_000_000]);
    }

    #[test]
    fn test_wide_gap_starts_new_run() {
        // Gap of exactly u16::MAX stays in-run; one more forces an anchor.
        let set = build(&[0, u32::from(u16::MAX), u32::from(u16::MAX) * 2 + 1]);
        assert_eq!(set.index.len(), 2);
        assert!(set.contains_prefix(0));
        assert!(set.contains_prefix(u32::from(u16::MAX)));
        assert!(set.contains_prefix(u32::from(u16::MAX) * 2 + 1));
    }

    #[test]
    fn test_run_length_cap() {
        let prefixes: Vec<Prefix> = (0..500).map(|i| i * 3).collect();
        let set = build(&prefixes);

        // 500 prefixes at MAX_RUN deltas per anchor needs 5 anchors.
        assert_eq!(set.index.len(), 5);
        for &p in &prefixes {
            assert!(set.contains_prefix(p));
        }
        assert!(!set.contains_prefix(1));
    }

    #[test]
    fn test_empty_set() {
        let set = build(&[]);
        assert!(set.is_empty());
        assert!(!set.contains_prefix(0));
        assert!(!set.contains(&FullHash::from_expression("example.com/")));
    }

    #[test]
    fn test_full_hash_exceptions() {
        let exception = FullHash::from_expression("exact.example.com/");
        let other = FullHash::from_expression("other.example.com/");

        let mut builder = PrefixSetBuilder::new();
        builder.add_prefix(other.prefix());
        let set = builder.build(vec![exception]);

        // The exception matches exactly even though its prefix was
        // never added.
        assert!(set.contains(&exception));
        assert!(!set.contains_prefix(exception.prefix()));

        // Prefix membership still matches any hash sharing the prefix.
        assert!(set.contains(&other));
    }

    #[test]
    fn test_serialize_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("browse prefix set");

        let hashes = vec![
            FullHash::from_expression("a.example.com/"),
            FullHash::from_expression("b.example.com/"),
        ];
        let prefixes: Vec<Prefix> = (0..1000).map(|i| i * 70_000).collect();

        let mut builder = PrefixSetBuilder::new();
        builder.extend(prefixes.iter().copied());
        let set = builder.build(hashes.clone());

        set.write_file(&path).unwrap();
        let loaded = PrefixSet::load_file(&path).expect("load failed");

        for &p in &prefixes {
            assert!(loaded.contains_prefix(p));
        }
        for h in &hashes {
            assert!(loaded.contains(h));
        }
        assert!(!loaded.contains_prefix(35_000));
        assert_eq!(loaded.to_prefixes(), set.to_prefixes());
    }

    #[test]
    fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PrefixSet::load_file(&dir.path().join("nope")).is_none());
    }

    #[test]
    fn test_truncated_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set");

        let set = build(&(0..200).map(|i| i * 1000).collect::<Vec<_>>());
        set.write_file(&path).unwrap();
        let bytes = fs::read(&path).unwrap();

        // Truncation at any offset must be rejected, never panic.
        for cut in [0, 1, HEADER_LEN - 1, HEADER_LEN, bytes.len() / 2, bytes.len() - 1] {
            fs::write(&path, &bytes[..cut]).unwrap();
            assert!(
                PrefixSet::load_file(&path).is_none(),
                "accepted truncation at {cut}"
            );
        }
    }

    #[test]
    fn test_bit_flip_fails_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set");

        let set = build(&[1, 2, 3, 70_000]);
        set.write_file(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        fs::write(&path, &bytes).unwrap();

        assert!(PrefixSet::load_file(&path).is_none());
    }

    #[test]
    fn test_wrong_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set");

        let mut bytes = build(&[1, 2, 3]).to_bytes();
        bytes[4] = 9; // version field
        fs::write(&path, &bytes).unwrap();

        assert!(PrefixSet::load_file(&path).is_none());
    }

    #[test]
    fn test_declared_size_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set");

        let mut bytes = build(&[1, 2, 3]).to_bytes();
        // Claim more deltas than the file holds.
        bytes[12] = 0xff;
        fs::write(&path, &bytes).unwrap();

        assert!(PrefixSet::load_file(&path).is_none());
    }
}
