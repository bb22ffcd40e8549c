//! Incremental reconciliation of CIDR allow-lists.
//!
//! Desired and actual state are both built as [`CidrSet`]s; the add and
//! remove work lists are the two set differences. The write goes through
//! the same optimistic loop as route updates.

use async_trait::async_trait;
use routesync_common::{
    CancellationToken, ConflictAware, OptimisticUpdater, RetryError, RetryPolicy, Update,
    UpdateOutcome, VersionedResource,
};
use routesync_types::{CidrSet, ParseError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::deadline::Deadline;
use crate::error::{GatewayError, Result, RouteSyncError};
use crate::gateway::AllowListGateway;
use crate::types::{AllowList, Revision};

/// Minimal edit that turns `actual` into `desired`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowListPlan {
    pub to_add: CidrSet,
    pub to_remove: CidrSet,
}

impl AllowListPlan {
    pub fn compute(desired: &CidrSet, actual: &CidrSet) -> Self {
        Self {
            to_add: desired.difference(actual),
            to_remove: actual.difference(desired),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Applies the plan to `actual`, returning the resulting set.
    pub fn apply(&self, actual: &CidrSet) -> CidrSet {
        let mut next = actual.clone();
        next.delete(self.to_remove.iter());
        next.insert(self.to_add.iter().copied());
        next
    }
}

/// Stored allow-list after strict parsing.
struct ParsedAllowList {
    cidrs: CidrSet,
    revision: Revision,
}

#[derive(Debug)]
enum AllowListFailure {
    Gateway(GatewayError),
    Parse(ParseError),
}

impl ConflictAware for AllowListFailure {
    fn is_conflict(&self) -> bool {
        matches!(self, AllowListFailure::Gateway(e) if e.is_conflict())
    }
}

impl std::fmt::Display for AllowListFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllowListFailure::Gateway(e) => write!(f, "{e}"),
            AllowListFailure::Parse(e) => write!(f, "{e}"),
        }
    }
}

struct AllowListResource<'a> {
    gateway: &'a dyn AllowListGateway,
    list_id: &'a str,
}

#[async_trait]
impl<'a> VersionedResource for AllowListResource<'a> {
    type Value = ParsedAllowList;
    type Error = AllowListFailure;

    fn describe(&self) -> String {
        format!("allow-list {}", self.list_id)
    }

    /// Stored entries are parsed strictly: one malformed entry aborts the
    /// update rather than computing a plan from partial state.
    async fn fetch(&self) -> std::result::Result<ParsedAllowList, AllowListFailure> {
        let stored = self
            .gateway
            .fetch_allow_list(self.list_id)
            .await
            .map_err(AllowListFailure::Gateway)?;
        let cidrs = CidrSet::parse(&stored.cidrs).map_err(AllowListFailure::Parse)?;
        Ok(ParsedAllowList {
            cidrs,
            revision: stored.revision,
        })
    }

    async fn replace(&self, value: ParsedAllowList) -> std::result::Result<(), AllowListFailure> {
        let list = AllowList {
            cidrs: value.cidrs.to_sorted_strings(),
            revision: value.revision,
        };
        self.gateway
            .replace_allow_list(self.list_id, list)
            .await
            .map_err(AllowListFailure::Gateway)
    }
}

/// Drives allow-lists towards a desired CIDR set.
pub struct AllowListReconciler {
    gateway: Arc<dyn AllowListGateway>,
    updater: OptimisticUpdater,
    timeout: Option<Duration>,
}

impl AllowListReconciler {
    pub fn new(gateway: Arc<dyn AllowListGateway>, retry: RetryPolicy) -> Self {
        Self {
            gateway,
            updater: OptimisticUpdater::new(retry),
            timeout: None,
        }
    }

    /// Bounds each `plan` or `sync` call, retries included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Computes the plan against the current stored list without writing.
    pub async fn plan(
        &self,
        list_id: &str,
        desired: &CidrSet,
        cancel: &CancellationToken,
    ) -> Result<AllowListPlan> {
        let deadline = Deadline::start(self.timeout);
        let resource = self.resource(list_id);
        let current = deadline
            .run(cancel, &target(list_id), resource.fetch())
            .await?
            .map_err(|e| failure_to_error(e, list_id))?;
        Ok(AllowListPlan::compute(desired, &current.cidrs))
    }

    /// Makes the stored list equal to `desired`.
    ///
    /// Returns the plan applied by the committed write, or an empty plan
    /// when the list already matched. No write is issued in that case.
    #[instrument(
        skip(self, desired, cancel),
        fields(allow_list = %list_id, desired = desired.len())
    )]
    pub async fn sync(
        &self,
        list_id: &str,
        desired: &CidrSet,
        cancel: &CancellationToken,
    ) -> Result<AllowListPlan> {
        let deadline = Deadline::start(self.timeout);
        let mut applied = AllowListPlan::default();
        let resource = self.resource(list_id);
        let update = self.updater.run(&resource, cancel, |current: ParsedAllowList| {
            let plan = AllowListPlan::compute(desired, &current.cidrs);
            if plan.is_empty() {
                applied = plan;
                return Update::Unchanged;
            }
            let next = ParsedAllowList {
                cidrs: plan.apply(&current.cidrs),
                revision: current.revision,
            };
            applied = plan;
            Update::Replace(next)
        });
        let outcome = deadline
            .run(cancel, &target(list_id), update)
            .await?
            .map_err(|e| retry_to_error(e, list_id))?;

        match outcome {
            UpdateOutcome::Committed { attempts } => info!(
                added = applied.to_add.len(),
                removed = applied.to_remove.len(),
                attempts,
                "Updated allow-list"
            ),
            UpdateOutcome::Unchanged { .. } => debug!("Allow-list already in sync"),
        }
        Ok(applied)
    }

    fn resource<'a>(&'a self, list_id: &'a str) -> AllowListResource<'a> {
        AllowListResource {
            gateway: self.gateway.as_ref(),
            list_id,
        }
    }
}

fn target(list_id: &str) -> String {
    format!("allow-list {list_id}")
}

fn failure_to_error(failure: AllowListFailure, list_id: &str) -> RouteSyncError {
    match failure {
        AllowListFailure::Gateway(e) => RouteSyncError::from_gateway(e, target(list_id)),
        AllowListFailure::Parse(e) => RouteSyncError::Parse(e),
    }
}

fn retry_to_error(err: RetryError<AllowListFailure>, list_id: &str) -> RouteSyncError {
    match err {
        RetryError::Failed(failure) => failure_to_error(failure, list_id),
        RetryError::Exhausted { attempts } => RouteSyncError::Conflict {
            target: target(list_id),
            attempts,
        },
        RetryError::Cancelled => RouteSyncError::Cancelled {
            target: target(list_id),
        },
    }
}
