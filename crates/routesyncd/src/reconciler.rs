//! RouteReconciler: per-node route intents against a router's route list.
//!
//! The router only supports replacing its whole route list, so every
//! create or delete is a fetch, a local edit and a conditional write-back,
//! retried from a fresh fetch when another writer got there first.

use async_trait::async_trait;
use routesync_common::{
    CancellationToken, OptimisticUpdater, RetryPolicy, Update, UpdateOutcome, VersionedResource,
};
use routesync_types::{IpFamily, IpPrefix};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::deadline::Deadline;
use crate::error::{GatewayError, Result, RouteSyncError};
use crate::gateway::{NodeDirectory, RouterGateway};
use crate::resolver::AddressResolver;
use crate::types::{Route, RouterRoute, RouterRouteList};

/// Settings for a [`RouteReconciler`].
#[derive(Debug, Clone)]
pub struct RouteReconcilerConfig {
    /// Router whose route list is managed.
    pub router_id: String,
    /// Family used when resolving next hops.
    pub family: IpFamily,
    pub retry: RetryPolicy,
    /// Upper bound for one whole operation, retries included.
    pub operation_timeout: Option<Duration>,
}

impl RouteReconcilerConfig {
    pub fn new(router_id: impl Into<String>) -> Self {
        Self {
            router_id: router_id.into(),
            family: IpFamily::V4,
            retry: RetryPolicy::default(),
            operation_timeout: None,
        }
    }

    pub fn with_family(mut self, family: IpFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

/// One router's route list seen as a [`VersionedResource`].
struct RouterRoutes<'a> {
    gateway: &'a dyn RouterGateway,
    router_id: &'a str,
}

#[async_trait]
impl<'a> VersionedResource for RouterRoutes<'a> {
    type Value = RouterRouteList;
    type Error = GatewayError;

    fn describe(&self) -> String {
        format!("router {}", self.router_id)
    }

    async fn fetch(&self) -> std::result::Result<RouterRouteList, GatewayError> {
        self.gateway.fetch_routes(self.router_id).await
    }

    async fn replace(&self, value: RouterRouteList) -> std::result::Result<(), GatewayError> {
        self.gateway.replace_routes(self.router_id, value).await
    }
}

/// Creates, deletes and lists routes on one router.
///
/// Holds no copy of the route list between calls; every operation starts
/// from a fresh fetch, so any number of reconcilers (in this process or
/// elsewhere) may target the same router.
pub struct RouteReconciler {
    gateway: Arc<dyn RouterGateway>,
    directory: Arc<dyn NodeDirectory>,
    router_id: String,
    family: IpFamily,
    updater: OptimisticUpdater,
    operation_timeout: Option<Duration>,
}

impl RouteReconciler {
    pub fn new(
        gateway: Arc<dyn RouterGateway>,
        directory: Arc<dyn NodeDirectory>,
        config: RouteReconcilerConfig,
    ) -> Self {
        Self {
            gateway,
            directory,
            router_id: config.router_id,
            family: config.family,
            updater: OptimisticUpdater::new(config.retry),
            operation_timeout: config.operation_timeout,
        }
    }

    /// Ensures the router routes `route.destination` to the target node.
    ///
    /// The next hop is resolved once, before the first fetch, and is not
    /// re-resolved on conflict retries. If the router already has an entry
    /// for the destination (whatever its next hop) nothing is written.
    #[instrument(
        skip(self, route, cancel),
        fields(
            router = %self.router_id,
            destination = %route.destination,
            node = %route.target_node
        )
    )]
    pub async fn create_route(
        &self,
        cluster_hint: &str,
        route: &Route,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome> {
        let deadline = Deadline::start(self.operation_timeout);
        let target = self.target(&route.destination);
        debug!(cluster = cluster_hint, "Creating route");

        let next_hop = self
            .resolve_next_hop(&route.target_node, cancel, &deadline)
            .await?;
        let destination = route.destination;
        let entry = RouterRoute::new(destination.to_string(), next_hop.to_string());

        let resource = self.resource();
        let update = self.updater.run(&resource, cancel, |mut list: RouterRouteList| {
            if list.contains_destination(&destination) {
                return Update::Unchanged;
            }
            list.routes.push(entry.clone());
            Update::Replace(list)
        });
        let outcome = deadline
            .run(cancel, &target, update)
            .await?
            .map_err(|e| RouteSyncError::from_retry(e, &target))?;

        match outcome {
            UpdateOutcome::Committed { attempts } => {
                info!(next_hop = %next_hop, attempts, "Created route");
            }
            UpdateOutcome::Unchanged { .. } => {
                debug!("Route already present");
            }
        }
        Ok(outcome)
    }

    /// Ensures the router has no entry for `route.destination`.
    ///
    /// Matches on destination only; the stored next hop is not compared.
    /// Deleting an absent destination succeeds without writing.
    #[instrument(
        skip(self, route, cancel),
        fields(router = %self.router_id, destination = %route.destination)
    )]
    pub async fn delete_route(
        &self,
        cluster_hint: &str,
        route: &Route,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome> {
        let deadline = Deadline::start(self.operation_timeout);
        let target = self.target(&route.destination);
        debug!(cluster = cluster_hint, "Deleting route");

        let destination = route.destination;
        let resource = self.resource();
        let update = self.updater.run(&resource, cancel, |mut list: RouterRouteList| {
            if list.remove_destination(&destination) == 0 {
                return Update::Unchanged;
            }
            Update::Replace(list)
        });
        let outcome = deadline
            .run(cancel, &target, update)
            .await?
            .map_err(|e| RouteSyncError::from_retry(e, &target))?;

        match outcome {
            UpdateOutcome::Committed { attempts } => info!(attempts, "Deleted route"),
            UpdateOutcome::Unchanged { .. } => debug!("Route already absent"),
        }
        Ok(outcome)
    }

    /// Lists the router's routes.
    ///
    /// Entries whose destination does not parse are logged and skipped;
    /// the rest are returned. Next hops are mapped back to node names
    /// where possible. A route whose next hop matches no node is reported
    /// as a blackhole with an empty `target_node`.
    #[instrument(skip(self, cancel), fields(router = %self.router_id))]
    pub async fn list_routes(
        &self,
        cluster_hint: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Route>> {
        let deadline = Deadline::start(self.operation_timeout);
        let target = format!("router {}", self.router_id);
        debug!(cluster = cluster_hint, "Listing routes");

        let list = deadline
            .run(cancel, &target, self.gateway.fetch_routes(&self.router_id))
            .await?
            .map_err(|e| RouteSyncError::from_gateway(e, &target))?;
        let nodes = deadline
            .run(cancel, &target, self.directory.list_nodes())
            .await?
            .map_err(|e| RouteSyncError::from_gateway(e, "node directory"))?;
        let names = AddressResolver::new(&nodes).names_by_address();

        let mut routes = Vec::with_capacity(list.routes.len());
        for item in &list.routes {
            let destination: IpPrefix = match item.destination.trim().parse() {
                Ok(prefix) => prefix,
                Err(e) => {
                    warn!(
                        destination = %item.destination,
                        error = %e,
                        "Ignoring route with unparsable destination"
                    );
                    continue;
                }
            };

            let node = item
                .next_hop
                .parse::<IpAddr>()
                .ok()
                .and_then(|ip| names.get(&ip).copied());
            routes.push(Route {
                name: destination.to_string(),
                destination,
                target_node: node.unwrap_or_default().to_string(),
                next_hop: Some(item.next_hop.clone()),
                blackhole: node.is_none(),
            });
        }
        Ok(routes)
    }

    async fn resolve_next_hop(
        &self,
        node: &str,
        cancel: &CancellationToken,
        deadline: &Deadline,
    ) -> Result<IpAddr> {
        let nodes = deadline
            .run(cancel, "node directory", self.directory.list_nodes())
            .await?
            .map_err(|e| RouteSyncError::from_gateway(e, "node directory"))?;
        AddressResolver::new(&nodes).resolve(node, self.family)
    }

    fn resource(&self) -> RouterRoutes<'_> {
        RouterRoutes {
            gateway: self.gateway.as_ref(),
            router_id: &self.router_id,
        }
    }

    fn target(&self, destination: &IpPrefix) -> String {
        format!("router {} route {}", self.router_id, destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBackend, StaticNodeDirectory};
    use crate::types::{Node, Revision};
    use pretty_assertions::assert_eq;

    const ROUTER: &str = "router-1";

    fn prefix(s: &str) -> IpPrefix {
        s.parse().unwrap()
    }

    fn setup() -> (Arc<InMemoryBackend>, RouteReconciler) {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_router(ROUTER, vec![]);
        let directory = Arc::new(StaticNodeDirectory::new(vec![
            Node::with_internal_addresses("node-a", ["10.0.0.11", "fd00::11"]),
            Node::with_internal_addresses("node-b", ["fd00::12"]),
        ]));
        let reconciler = RouteReconciler::new(
            backend.clone(),
            directory,
            RouteReconcilerConfig::new(ROUTER).with_retry(RetryPolicy::immediate(3)),
        );
        (backend, reconciler)
    }

    #[tokio::test]
    async fn test_create_appends_resolved_next_hop() {
        let (backend, reconciler) = setup();
        let cancel = CancellationToken::new();
        let route = Route::new(prefix("10.244.1.0/24"), "node-a");

        let outcome = reconciler.create_route("hint", &route, &cancel).await.unwrap();
        assert!(outcome.is_committed());

        let stored = backend.routes(ROUTER).unwrap();
        assert_eq!(stored.routes, vec![RouterRoute::new("10.244.1.0/24", "10.0.0.11")]);
        assert_eq!(stored.revision, Revision(1));
    }

    #[tokio::test]
    async fn test_create_unknown_node_writes_nothing() {
        let (backend, reconciler) = setup();
        let route = Route::new(prefix("10.244.1.0/24"), "ghost");
        let err = reconciler
            .create_route("hint", &route, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteSyncError::NodeNotFound { .. }));
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test]
    async fn test_create_missing_family_is_address_unavailable() {
        let (_backend, reconciler) = setup();
        let route = Route::new(prefix("10.244.2.0/24"), "node-b");
        let err = reconciler
            .create_route("hint", &route, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteSyncError::AddressUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_delete_matches_destination_only() {
        let (backend, reconciler) = setup();
        backend.add_router(
            ROUTER,
            vec![
                RouterRoute::new("10.244.1.0/24", "192.0.2.99"),
                RouterRoute::new("10.244.2.0/24", "10.0.0.11"),
            ],
        );
        let route = Route::new(prefix("10.244.1.0/24"), "node-a");
        let outcome = reconciler
            .delete_route("hint", &route, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_committed());
        assert_eq!(
            backend.routes(ROUTER).unwrap().routes,
            vec![RouterRoute::new("10.244.2.0/24", "10.0.0.11")]
        );
    }

    #[tokio::test]
    async fn test_list_marks_unknown_next_hop_as_blackhole() {
        let (backend, reconciler) = setup();
        backend.add_router(
            ROUTER,
            vec![
                RouterRoute::new("10.244.1.0/24", "10.0.0.11"),
                RouterRoute::new("10.244.9.0/24", "192.0.2.1"),
            ],
        );
        let routes = reconciler
            .list_routes("hint", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].target_node, "node-a");
        assert!(!routes[0].blackhole);
        assert_eq!(routes[1].target_node, "");
        assert_eq!(routes[1].next_hop.as_deref(), Some("192.0.2.1"));
        assert!(routes[1].blackhole);
    }

    #[tokio::test]
    async fn test_cancelled_list() {
        let (_backend, reconciler) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reconciler.list_routes("hint", &cancel).await.unwrap_err();
        assert!(matches!(err, RouteSyncError::Cancelled { .. }));
    }
}
