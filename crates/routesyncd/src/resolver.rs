//! Node name to next-hop address resolution.

use routesync_types::IpFamily;
use std::collections::HashMap;
use std::net::IpAddr;

use crate::error::{Result, RouteSyncError};
use crate::types::Node;

/// Resolves node names against one snapshot of the node directory.
///
/// Duplicate node names are not rejected; the first node in directory
/// order wins.
#[derive(Debug, Clone, Copy)]
pub struct AddressResolver<'a> {
    nodes: &'a [Node],
}

impl<'a> AddressResolver<'a> {
    pub fn new(nodes: &'a [Node]) -> Self {
        Self { nodes }
    }

    /// Returns the first internal address of `node_name` that parses as
    /// `family`, scanning addresses in stored order.
    ///
    /// External addresses and addresses of the other family are never
    /// used as a fallback.
    pub fn resolve(&self, node_name: &str, family: IpFamily) -> Result<IpAddr> {
        let node = self
            .nodes
            .iter()
            .find(|n| n.name == node_name)
            .ok_or_else(|| RouteSyncError::node_not_found(node_name))?;

        node.addresses
            .iter()
            .filter(|a| a.is_internal())
            .find_map(|a| family.parse_address(&a.address))
            .ok_or_else(|| RouteSyncError::address_unavailable(node_name, family))
    }

    /// Builds a reverse index from internal address to node name.
    ///
    /// Keys are parsed addresses, so differently written forms of the same
    /// IPv6 address map to the same node.
    pub fn names_by_address(&self) -> HashMap<IpAddr, &'a str> {
        let mut index = HashMap::new();
        for node in self.nodes {
            for addr in node.addresses.iter().filter(|a| a.is_internal()) {
                if let Ok(ip) = addr.address.parse::<IpAddr>() {
                    index.entry(ip).or_insert(node.name.as_str());
                }
            }
        }
        index
    }
}
