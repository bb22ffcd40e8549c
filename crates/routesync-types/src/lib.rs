//! Network primitives shared by the routesync crates.
//!
//! - [`IpFamily`]: IPv4 / IPv6 address family selection
//! - [`IpPrefix`]: IP network prefixes, normalized to their network address
//! - [`CidrSet`]: set of prefixes keyed by canonical CIDR notation

mod cidr_set;
mod ip;

pub use cidr_set::CidrSet;
pub use ip::{IpFamily, IpPrefix};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("prefix length {prefix_len} exceeds maximum for {family}")]
    InvalidPrefixLength { prefix_len: u8, family: IpFamily },
}
