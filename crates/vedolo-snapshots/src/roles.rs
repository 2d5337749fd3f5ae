//! Known address roles for classifying transfer destinations
//!
//! Early-exit penalties are reconstructed from where the escrow sends DOLO:
//! the burn address, the vester (recoup fee), a secondary recoup recipient
//! known only by its prefix, or back to the user.

use alloy_primitives::Address;

use crate::config::Config;
use crate::decode::lower_hex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRole {
    /// address(0)
    Burn,
    /// Primary fee recipient (oDOLO vester)
    FeeRecipient,
    /// Secondary fee recipient, matched by prefix
    SecondaryFeeRecipient,
    /// Anyone else, i.e. the user
    Other,
}

#[derive(Debug, Clone)]
pub enum Matcher {
    Exact(Address),
    /// Lowercase `0x`-prefixed hex prefix
    Prefix(String),
}

impl Matcher {
    fn matches(&self, addr: &Address) -> bool {
        match self {
            Self::Exact(known) => known == addr,
            Self::Prefix(prefix) => lower_hex(addr).starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct RoleEntry {
    matcher: Matcher,
    role: AddressRole,
}

/// Ordered role lookup, first match wins
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    entries: Vec<RoleEntry>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, matcher: Matcher, role: AddressRole) -> Self {
        self.entries.push(RoleEntry { matcher, role });
        self
    }

    /// Destinations of DOLO leaving the escrow on withdraw
    pub fn penalty_recipients(config: &Config) -> Self {
        Self::new()
            .with(Matcher::Exact(Address::ZERO), AddressRole::Burn)
            .with(Matcher::Exact(config.odolo_vester), AddressRole::FeeRecipient)
            .with(
                Matcher::Prefix(config.recoup_secondary_prefix.clone()),
                AddressRole::SecondaryFeeRecipient,
            )
    }

    pub fn classify(&self, addr: &Address) -> AddressRole {
        self.entries
            .iter()
            .find(|e| e.matcher.matches(addr))
            .map(|e| e.role)
            .unwrap_or(AddressRole::Other)
    }
}

/// Render an address for published output. Without checksumming this is the lowercase form.
pub fn format_address(addr: &Address, checksum: bool) -> String {
    if checksum {
        addr.to_checksum(None)
    } else {
        lower_hex(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn table() -> RoleTable {
        let vester = Address::from_str("0x3E9b9A16743551DA49b5e136C716bBa7932d2cEc").unwrap();
        RoleTable::new()
            .with(Matcher::Exact(Address::ZERO), AddressRole::Burn)
            .with(Matcher::Exact(vester), AddressRole::FeeRecipient)
            .with(
                Matcher::Prefix("0xcfc30d38".into()),
                AddressRole::SecondaryFeeRecipient,
            )
    }

    #[test]
    fn test_classify_roles() {
        let t = table();
        assert_eq!(t.classify(&Address::ZERO), AddressRole::Burn);
        assert_eq!(
            t.classify(&Address::from_str("0x3e9b9a16743551da49b5e136c716bba7932d2cec").unwrap()),
            AddressRole::FeeRecipient
        );
        assert_eq!(
            t.classify(&Address::from_str("0xCFC30D38000000000000000000000000000000aa").unwrap()),
            AddressRole::SecondaryFeeRecipient
        );
        assert_eq!(
            t.classify(&Address::from_str("0x1111111111111111111111111111111111111111").unwrap()),
            AddressRole::Other
        );
    }

    #[test]
    fn test_format_address() {
        let addr = Address::from_str("0xcb86b75ee6133d179a12d550b09fb3cdb1e141d4").unwrap();
        assert_eq!(
            format_address(&addr, true),
            "0xCB86B75EE6133d179a12D550b09FB3cdB1e141D4"
        );
        assert_eq!(
            format_address(&addr, false),
            "0xcb86b75ee6133d179a12d550b09fb3cdb1e141d4"
        );
    }
}
