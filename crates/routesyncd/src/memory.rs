//! In-memory control plane.
//!
//! Implements [`RouterGateway`] and [`AllowListGateway`] with the same
//! revision rule a real control plane enforces, plus fault injection for
//! exercising the retry paths. [`StaticNodeDirectory`] serves a fixed,
//! replaceable node list.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use crate::error::{GatewayError, ResourceKind};
use crate::gateway::{AllowListGateway, NodeDirectory, RouterGateway};
use crate::types::{AllowList, Node, Revision, RouterRoute, RouterRouteList};

#[derive(Debug, Default)]
struct Faults {
    /// Replace calls that will be rejected as conflicts before any succeeds.
    conflicts: u32,
    /// Fetch calls that will fail with a transport error.
    fetch_failures: u32,
}

/// Control plane state held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    routers: DashMap<String, RouterRouteList>,
    allow_lists: DashMap<String, AllowList>,
    faults: DashMap<String, Faults>,
    writes: AtomicU64,
    conflicts: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites a router with the given routes at revision 0.
    pub fn add_router(&self, router_id: impl Into<String>, routes: Vec<RouterRoute>) {
        self.routers
            .insert(router_id.into(), RouterRouteList::new(routes, Revision::default()));
    }

    /// Creates or overwrites an allow-list at revision 0.
    pub fn add_allow_list<I, S>(&self, list_id: impl Into<String>, cidrs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_lists.insert(
            list_id.into(),
            AllowList {
                cidrs: cidrs.into_iter().map(Into::into).collect(),
                revision: Revision::default(),
            },
        );
    }

    /// Snapshot of a router's stored state.
    pub fn routes(&self, router_id: &str) -> Option<RouterRouteList> {
        self.routers.get(router_id).map(|r| r.clone())
    }

    /// Snapshot of an allow-list's stored state.
    pub fn allow_list(&self, list_id: &str) -> Option<AllowList> {
        self.allow_lists.get(list_id).map(|l| l.clone())
    }

    /// Makes the next `count` replace calls against `id` fail with a
    /// conflict, regardless of revision.
    pub fn inject_conflicts(&self, id: &str, count: u32) {
        self.faults.entry(id.to_string()).or_default().conflicts = count;
    }

    /// Makes the next `count` fetch calls against `id` fail with a
    /// transport error.
    pub fn inject_fetch_failures(&self, id: &str, count: u32) {
        self.faults.entry(id.to_string()).or_default().fetch_failures = count;
    }

    /// Number of successful replace calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of replace calls rejected as conflicts.
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::SeqCst)
    }

    fn take_fetch_failure(&self, id: &str) -> bool {
        match self.faults.get_mut(id) {
            Some(mut f) if f.fetch_failures > 0 => {
                f.fetch_failures -= 1;
                true
            }
            _ => false,
        }
    }

    fn take_conflict(&self, id: &str) -> bool {
        match self.faults.get_mut(id) {
            Some(mut f) if f.conflicts > 0 => {
                f.conflicts -= 1;
                true
            }
            _ => false,
        }
    }

    fn reject(&self, kind: ResourceKind, id: &str) -> GatewayError {
        self.conflicts.fetch_add(1, Ordering::SeqCst);
        GatewayError::conflict(kind, id)
    }
}

#[async_trait]
impl RouterGateway for InMemoryBackend {
    async fn fetch_routes(&self, router_id: &str) -> Result<RouterRouteList, GatewayError> {
        if self.take_fetch_failure(router_id) {
            return Err(GatewayError::transport("injected fetch failure"));
        }
        self.routes(router_id)
            .ok_or_else(|| GatewayError::not_found(ResourceKind::Router, router_id))
    }

    async fn replace_routes(
        &self,
        router_id: &str,
        routes: RouterRouteList,
    ) -> Result<(), GatewayError> {
        if self.take_conflict(router_id) {
            return Err(self.reject(ResourceKind::Router, router_id));
        }

        let mut stored = self
            .routers
            .get_mut(router_id)
            .ok_or_else(|| GatewayError::not_found(ResourceKind::Router, router_id))?;
        if stored.revision != routes.revision {
            trace!(
                router = router_id,
                stored = %stored.revision,
                offered = %routes.revision,
                "Rejecting stale route list"
            );
            return Err(self.reject(ResourceKind::Router, router_id));
        }

        stored.routes = routes.routes;
        stored.revision = stored.revision.next();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AllowListGateway for InMemoryBackend {
    async fn fetch_allow_list(&self, list_id: &str) -> Result<AllowList, GatewayError> {
        if self.take_fetch_failure(list_id) {
            return Err(GatewayError::transport("injected fetch failure"));
        }
        self.allow_list(list_id)
            .ok_or_else(|| GatewayError::not_found(ResourceKind::AllowList, list_id))
    }

    async fn replace_allow_list(
        &self,
        list_id: &str,
        list: AllowList,
    ) -> Result<(), GatewayError> {
        if self.take_conflict(list_id) {
            return Err(self.reject(ResourceKind::AllowList, list_id));
        }

        let mut stored = self
            .allow_lists
            .get_mut(list_id)
            .ok_or_else(|| GatewayError::not_found(ResourceKind::AllowList, list_id))?;
        if stored.revision != list.revision {
            return Err(self.reject(ResourceKind::AllowList, list_id));
        }

        stored.cidrs = list.cidrs;
        stored.revision = stored.revision.next();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Node directory backed by a fixed list.
#[derive(Debug, Default)]
pub struct StaticNodeDirectory {
    nodes: RwLock<Vec<Node>>,
}

impl StaticNodeDirectory {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Replaces the node list, e.g. to simulate address changes.
    pub fn set_nodes(&self, nodes: Vec<Node>) {
        *self.nodes.write() = nodes;
    }
}

#[async_trait]
impl NodeDirectory for StaticNodeDirectory {
    async fn list_nodes(&self) -> Result<Vec<Node>, GatewayError> {
        Ok(self.nodes.read().clone())
    }
}
