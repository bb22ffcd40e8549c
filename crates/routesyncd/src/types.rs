//! Type definitions for routes, router route lists and cluster nodes.

use routesync_types::IpPrefix;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque version token of a whole-resource value.
///
/// Captured on fetch and handed back on replace; the gateway rejects a
/// replace whose revision is no longer current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl Revision {
    pub fn next(self) -> Self {
        Revision(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// One entry of a router's route list, as stored by the control plane.
///
/// Both fields are kept as text: legacy entries may hold values that do
/// not parse, and they must survive a read-modify-write untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouterRoute {
    pub destination: String,
    #[serde(rename = "nexthop")]
    pub next_hop: String,
}

impl RouterRoute {
    pub fn new(destination: impl Into<String>, next_hop: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            next_hop: next_hop.into(),
        }
    }

    /// Parses the destination, if it is a valid CIDR.
    pub fn destination_prefix(&self) -> Option<IpPrefix> {
        self.destination.trim().parse().ok()
    }

    /// Returns true if this entry routes `destination`.
    ///
    /// Matching is by destination only; unparsable entries match nothing.
    pub fn routes(&self, destination: &IpPrefix) -> bool {
        self.destination_prefix().as_ref() == Some(destination)
    }
}

/// A router's complete route list plus the revision it was read at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterRouteList {
    #[serde(default)]
    pub routes: Vec<RouterRoute>,
    #[serde(default)]
    pub revision: Revision,
}

impl RouterRouteList {
    pub fn new(routes: Vec<RouterRoute>, revision: Revision) -> Self {
        Self { routes, revision }
    }

    pub fn contains_destination(&self, destination: &IpPrefix) -> bool {
        self.routes.iter().any(|r| r.routes(destination))
    }

    /// Removes every entry routing `destination`; returns how many were
    /// removed.
    pub fn remove_destination(&mut self, destination: &IpPrefix) -> usize {
        let before = self.routes.len();
        self.routes.retain(|r| !r.routes(destination));
        before - self.routes.len()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// A route as seen by the cluster: a destination network forwarded to a
/// node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Route name; the canonical destination.
    pub name: String,
    pub destination: IpPrefix,
    /// Logical node name. Empty for listed blackhole routes.
    pub target_node: String,
    /// Next hop as stored on the router. `None` on creation intents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop: Option<String>,
    /// True when the next hop does not belong to any known node.
    #[serde(default)]
    pub blackhole: bool,
}

impl Route {
    /// Creates a route intent targeting `target_node`.
    pub fn new(destination: IpPrefix, target_node: impl Into<String>) -> Self {
        Self {
            name: destination.to_string(),
            destination,
            target_node: target_node.into(),
            next_hop: None,
            blackhole: false,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.next_hop {
            Some(hop) if self.blackhole => {
                write!(f, "{} via {} (blackhole)", self.destination, hop)
            }
            Some(hop) => write!(f, "{} via {} ({})", self.destination, hop, self.target_node),
            None => write!(f, "{} -> {}", self.destination, self.target_node),
        }
    }
}

/// Classification of a node address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeAddressType {
    InternalIP,
    ExternalIP,
    Hostname,
    InternalDNS,
    ExternalDNS,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub address_type: NodeAddressType,
    pub address: String,
}

impl NodeAddress {
    pub fn new(address_type: NodeAddressType, address: impl Into<String>) -> Self {
        Self {
            address_type,
            address: address.into(),
        }
    }

    pub fn internal(address: impl Into<String>) -> Self {
        Self::new(NodeAddressType::InternalIP, address)
    }

    pub fn external(address: impl Into<String>) -> Self {
        Self::new(NodeAddressType::ExternalIP, address)
    }

    pub fn is_internal(&self) -> bool {
        self.address_type == NodeAddressType::InternalIP
    }
}

/// A cluster node. Address order is significant: it is the preference
/// order used when picking a next hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
}

impl Node {
    pub fn new(name: impl Into<String>, addresses: Vec<NodeAddress>) -> Self {
        Self {
            name: name.into(),
            addresses,
        }
    }

    /// Node whose addresses are all internal, in the given order.
    pub fn with_internal_addresses<I, S>(name: impl Into<String>, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            addresses.into_iter().map(NodeAddress::internal).collect(),
        )
    }
}

/// An allow-list (security-group style rule set) as stored by the control
/// plane: a flat list of CIDR strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowList {
    #[serde(default)]
    pub cidrs: Vec<String>,
    #[serde(default)]
    pub revision: Revision,
}
