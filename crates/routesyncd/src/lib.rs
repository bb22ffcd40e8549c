//! Route reconciliation against whole-resource-replace routers
//!
//! Keeps a router's route list in line with per-node route intents. The
//! router API only supports replacing the entire list, so every change is
//! a fetch, a local edit and a revision-checked write-back, retried when a
//! concurrent writer wins. Allow-lists of CIDRs are reconciled the same way.

mod allow_list;
mod config;
mod deadline;
mod error;
mod gateway;
mod inventory;
mod memory;
mod reconciler;
mod resolver;
mod types;

pub use allow_list::{AllowListPlan, AllowListReconciler};
pub use config::*;
pub use error::{GatewayError, ResourceKind, Result, RouteSyncError};
pub use gateway::{AllowListGateway, NodeDirectory, RouterGateway};
pub use inventory::{FileInventory, InventoryDocument};
pub use memory::{InMemoryBackend, StaticNodeDirectory};
pub use reconciler::{RouteReconciler, RouteReconcilerConfig};
pub use resolver::AddressResolver;
pub use types::*;

pub use routesync_common::{CancellationToken, RetryPolicy, UpdateOutcome};
pub use routesync_types::{CidrSet, IpFamily, IpPrefix, ParseError};
