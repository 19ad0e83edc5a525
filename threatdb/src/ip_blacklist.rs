//! Malware IP blacklist.
//!
//! The IP list ships as 32-byte full-hash records: 20 bytes of
//! SHA-1(masked subnet), one byte of prefix length (1..=128), 11 bytes
//! unused. Addresses are matched in IPv6 form (IPv4 addresses are
//! mapped), masked to each prefix length present in the list, hashed,
//! and looked up.

use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use threatdb_hash::FullHash;
use tracing::warn;

const SUBNET_HASH_LEN: usize = 20;

type SubnetHash = [u8; SUBNET_HASH_LEN];
type Mask = [u8; 16];

#[derive(Debug, Clone, Default)]
pub struct IpBlacklist {
    /// Hashed subnets grouped by the mask they were hashed under.
    masks: HashMap<Mask, HashSet<SubnetHash>>,
}

fn mask_for_prefix_len(prefix_len: u8) -> Mask {
    let mut mask = [0u8; 16];
    let full_bytes = usize::from(prefix_len / 8);
    for byte in mask.iter_mut().take(full_bytes) {
        *byte = 0xff;
    }
    let rest = prefix_len % 8;
    if rest > 0 {
        mask[full_bytes] = 0xff << (8 - rest);
    }
    mask
}

impl IpBlacklist {
    /// Build the blacklist from the list's full-hash records.
    ///
    /// Any record with an out-of-range prefix length poisons the whole
    /// batch: the result is an empty blacklist.
    pub fn from_records(records: &[FullHash]) -> Self {
        let mut masks: HashMap<Mask, HashSet<SubnetHash>> = HashMap::new();

        for record in records {
            let bytes = record.as_bytes();
            let prefix_len = bytes[SUBNET_HASH_LEN];
            if prefix_len == 0 || prefix_len > 128 {
                warn!(prefix_len, "invalid IP blacklist record, dropping list");
                return Self::default();
            }

            let mut subnet_hash = [0u8; SUBNET_HASH_LEN];
            subnet_hash.copy_from_slice(&bytes[..SUBNET_HASH_LEN]);
            masks
                .entry(mask_for_prefix_len(prefix_len))
                .or_default()
                .insert(subnet_hash);
        }

        Self { masks }
    }

    /// Whether `ip` falls in a blacklisted subnet.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let addr = match ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        let bytes = addr.octets();

        for (mask, hashes) in &self.masks {
            let mut masked = [0u8; 16];
            for i in 0..16 {
                masked[i] = bytes[i] & mask[i];
            }

            let digest: SubnetHash = Sha1::digest(masked).into();
            if hashes.contains(&digest) {
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    /// Build the record an update would carry for `subnet/prefix_len`.
    fn record_for(subnet: Ipv6Addr, prefix_len: u8) -> FullHash {
        let mask = mask_for_prefix_len(prefix_len);
        let subnet_bytes = subnet.octets();
        let mut masked = [0u8; 16];
        for i in 0..16 {
            masked[i] = subnet_bytes[i] & mask[i];
        }
        let digest = Sha1::digest(masked);

        let mut record = [0u8; 32];
        record[..SUBNET_HASH_LEN].copy_from_slice(&digest);
        record[SUBNET_HASH_LEN] = prefix_len;
        FullHash::new(record)
    }

    fn v4_mapped(s: &str) -> Ipv6Addr {
        s.parse::<std::net::Ipv4Addr>().unwrap().to_ipv6_mapped()
    }

    #[test]
    fn test_mask_construction() {
        assert_eq!(mask_for_prefix_len(128), [0xff; 16]);

        let m = mask_for_prefix_len(1);
        assert_eq!(m[0], 0x80);
        assert!(m[1..].iter().all(|&b| b == 0));

        let m = mask_for_prefix_len(100);
        assert!(m[..12].iter().all(|&b| b == 0xff));
        assert_eq!(m[12], 0xf0);
        assert!(m[13..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_exact_host_match() {
        let blacklist =
            IpBlacklist::from_records(&[record_for(v4_mapped("192.168.1.1"), 128)]);

        assert!(blacklist.contains("192.168.1.1".parse().unwrap()));
        assert!(!blacklist.contains("192.168.1.2".parse().unwrap()));
    }

    #[test]
    fn test_subnet_match() {
        // 192.168.0.0/16 as an IPv6-mapped /112.
        let blacklist =
            IpBlacklist::from_records(&[record_for(v4_mapped("192.168.0.0"), 112)]);

        assert!(blacklist.contains("192.168.1.1".parse().unwrap()));
        assert!(blacklist.contains("192.168.255.254".parse().unwrap()));
        assert!(!blacklist.contains("192.169.0.1".parse().unwrap()));
    }

    #[test]
    fn test_multiple_mask_lengths() {
        let blacklist = IpBlacklist::from_records(&[
            record_for(v4_mapped("10.0.0.0"), 104),
            record_for("2001:db8::".parse().unwrap(), 32),
        ]);

        assert!(blacklist.contains("10.200.3.4".parse().unwrap()));
        assert!(blacklist.contains("2001:db8::dead:beef".parse().unwrap()));
        assert!(!blacklist.contains("11.0.0.1".parse().unwrap()));
        assert!(!blacklist.contains("2001:db9::1".parse().unwrap()));
    }

    #[test]
    fn test_invalid_prefix_length_discards_list() {
        let good = record_for(v4_mapped("192.168.1.1"), 128);

        let mut bad_bytes = [0u8; 32];
        bad_bytes[SUBNET_HASH_LEN] = 129;
        let bad = FullHash::new(bad_bytes);

        let blacklist = IpBlacklist::from_records(&[good, bad]);
        assert!(blacklist.is_empty());
        assert!(!blacklist.contains("192.168.1.1".parse().unwrap()));

        let mut zero_bytes = [0u8; 32];
        zero_bytes[SUBNET_HASH_LEN] = 0;
        let blacklist = IpBlacklist::from_records(&[FullHash::new(zero_bytes)]);
        assert!(blacklist.is_empty());
    }
}
