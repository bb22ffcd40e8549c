//! Address families and canonical IP network prefixes.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Returns the family of an address.
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    /// Maps the `ipv6` flag used in configuration to a family.
    pub const fn from_ipv6_flag(ipv6: bool) -> Self {
        if ipv6 { IpFamily::V6 } else { IpFamily::V4 }
    }

    /// Maximum prefix length for this family.
    pub const fn max_prefix_len(&self) -> u8 {
        match self {
            IpFamily::V4 => 32,
            IpFamily::V6 => 128,
        }
    }

    /// Parses `s` as an address of this family only.
    ///
    /// The family is decided purely by syntax: a v4 string never matches
    /// [`IpFamily::V6`] and vice versa.
    pub fn parse_address(&self, s: &str) -> Option<IpAddr> {
        match self {
            IpFamily::V4 => s.parse::<Ipv4Addr>().ok().map(IpAddr::V4),
            IpFamily::V6 => s.parse::<Ipv6Addr>().ok().map(IpAddr::V6),
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("ipv4"),
            IpFamily::V6 => f.write_str("ipv6"),
        }
    }
}

/// An IP network in CIDR notation (e.g. `10.0.0.0/24` or `2001:db8::/32`).
///
/// The stored address is always the network address: host bits are cleared
/// at construction, so `10.0.0.7/24` and `10.0.0.0/24` are the same value
/// and display identically. The [`Display`](fmt::Display) output is the
/// canonical form used as a set key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    network: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a prefix, masking off any host bits in `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length is invalid for the address
    /// family (>32 for IPv4, >128 for IPv6).
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        let family = IpFamily::of(&address);
        if prefix_len > family.max_prefix_len() {
            return Err(ParseError::InvalidPrefixLength {
                prefix_len,
                family,
            });
        }

        Ok(IpPrefix {
            network: mask(address, prefix_len),
            prefix_len,
        })
    }

    /// Returns the prefix length in bits.
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn family(&self) -> IpFamily {
        IpFamily::of(&self.network)
    }
}

fn mask(addr: IpAddr, prefix_len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let netmask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
            IpAddr::V4(Ipv4Addr::from(bits & netmask))
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let netmask = u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(bits & netmask))
        }
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .rsplit_once('/')
            .ok_or_else(|| ParseError::InvalidIpPrefix(s.to_string()))?;

        let address: IpAddr = addr_str
            .parse()
            .map_err(|_| ParseError::InvalidIpAddress(addr_str.to_string()))?;

        // `u8::from_str` would accept "+24" and "024"; CIDR notation does not.
        let digits_ok = !len_str.is_empty()
            && len_str.len() <= 3
            && len_str.bytes().all(|b| b.is_ascii_digit())
            && !(len_str.len() > 1 && len_str.starts_with('0'));
        if !digits_ok {
            return Err(ParseError::InvalidIpPrefix(s.to_string()));
        }
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        IpPrefix::new(address, prefix_len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> Self {
        prefix.to_string()
    }
}
