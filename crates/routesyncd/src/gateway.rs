//! Control-plane and cluster collaborators consumed by the reconcilers.
//!
//! Implementations are injected as `Arc<dyn ...>` capabilities; nothing in
//! this crate reaches the control plane through ambient state.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{AllowList, Node, RouterRouteList};

/// Whole-resource access to a router's route list.
#[async_trait]
pub trait RouterGateway: Send + Sync {
    /// Fetches the full route list and its current revision.
    async fn fetch_routes(&self, router_id: &str) -> Result<RouterRouteList, GatewayError>;

    /// Replaces the full route list.
    ///
    /// Must fail with [`GatewayError::Conflict`] when `routes.revision` is
    /// not the router's current revision.
    async fn replace_routes(
        &self,
        router_id: &str,
        routes: RouterRouteList,
    ) -> Result<(), GatewayError>;
}

/// Source of cluster nodes and their addresses.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Lists nodes in the order the source provides them.
    async fn list_nodes(&self) -> Result<Vec<Node>, GatewayError>;
}

/// Whole-resource access to CIDR allow-lists.
#[async_trait]
pub trait AllowListGateway: Send + Sync {
    async fn fetch_allow_list(&self, list_id: &str) -> Result<AllowList, GatewayError>;

    /// Replaces the full CIDR list, with the same stale-revision rule as
    /// [`RouterGateway::replace_routes`].
    async fn replace_allow_list(
        &self,
        list_id: &str,
        list: AllowList,
    ) -> Result<(), GatewayError>;
}
