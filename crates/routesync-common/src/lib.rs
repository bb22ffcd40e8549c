//! Reconciliation building blocks shared by routesync components.
//!
//! - [`OptimisticUpdater`]: fetch/compute/replace loop for resources that can
//!   only be written as a whole, with conflict detection and retry
//! - [`VersionedResource`]: the seam a whole-resource store implements
//! - [`RetryPolicy`]: attempt bound and backoff schedule for that loop
//!
//! # Example
//!
//! ```ignore
//! use routesync_common::{OptimisticUpdater, RetryPolicy, Update};
//!
//! let updater = OptimisticUpdater::new(RetryPolicy::default());
//! let outcome = updater
//!     .run(&resource, &cancel, |mut list| {
//!         if list.contains(&entry) {
//!             Update::Unchanged
//!         } else {
//!             list.push(entry.clone());
//!             Update::Replace(list)
//!         }
//!     })
//!     .await?;
//! ```

mod optimistic;
mod retry;

pub use optimistic::{
    ConflictAware, OptimisticUpdater, RetryError, Update, UpdateOutcome, VersionedResource,
};
pub use retry::RetryPolicy;

pub use tokio_util::sync::CancellationToken;
