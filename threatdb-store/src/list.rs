//! Threat-list identities.

use std::fmt;

/// The threat lists the database can serve.
///
/// Numeric values are part of the chunk-id encoding (the low bit of an
/// encoded chunk id is `id % 2`) and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum ListId {
    /// Phishing URLs, prefix entries
    Phish = 0,
    /// Malware URLs, prefix entries
    Malware = 1,
    /// Malicious binary-download URLs, prefix entries
    BinUrl = 2,
    /// Client-side-detection whitelist, full-hash entries
    CsdWhitelist = 4,
    /// Download whitelist, full-hash entries
    DownloadWhitelist = 5,
    /// Blacklisted extension ids, prefix entries
    ExtensionBlacklist = 6,
    /// Side-effect-free navigation whitelist, prefix entries
    SideEffectFreeWhitelist = 7,
    /// Malware IP subnets, full-hash-record entries
    IpBlacklist = 8,
}

impl ListId {
    /// Every list, in id order.
    pub const ALL: [ListId; 8] = [
        ListId::Phish,
        ListId::Malware,
        ListId::BinUrl,
        ListId::CsdWhitelist,
        ListId::DownloadWhitelist,
        ListId::ExtensionBlacklist,
        ListId::SideEffectFreeWhitelist,
        ListId::IpBlacklist,
    ];

    /// The public wire name of the list.
    pub fn name(self) -> &'static str {
        match self {
            ListId::Phish => "goog-phish-shavar",
            ListId::Malware => "goog-malware-shavar",
            ListId::BinUrl => "goog-badbinurl-shavar",
            ListId::CsdWhitelist => "goog-csdwhite-sha256",
            ListId::DownloadWhitelist => "goog-downloadwhite-digest256",
            ListId::ExtensionBlacklist => "goog-badcrxids-digestvar",
            ListId::SideEffectFreeWhitelist => "goog-sideeffectfree-shavar",
            ListId::IpBlacklist => "goog-badip-digest256",
        }
    }

    /// Look a list up by its public wire name.
    pub fn from_name(name: &str) -> Option<ListId> {
        ListId::ALL.iter().copied().find(|l| l.name() == name)
    }

    /// The parity bit this list contributes to encoded chunk ids.
    pub fn list_bit(self) -> u32 {
        self as u32 % 2
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
