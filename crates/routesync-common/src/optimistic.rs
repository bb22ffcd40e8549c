//! Optimistic read-modify-write over whole-resource replace APIs.
//!
//! Control planes that only offer "get the whole thing" and "replace the
//! whole thing" force every edit through a fetch, local modification and
//! write-back. Two writers that fetch the same version race; the backing
//! store rejects the stale one with a conflict and that writer must start
//! over from a fresh fetch. [`OptimisticUpdater`] runs that loop with a
//! bounded [`RetryPolicy`] and a cancellation token. Wall-clock limits are
//! left to the caller, which can wrap [`OptimisticUpdater::run`] in its own
//! deadline together with any other steps of the same operation.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;

/// Classifies errors returned by a [`VersionedResource`].
pub trait ConflictAware {
    /// Returns true if the write was rejected because the resource changed
    /// since it was fetched.
    fn is_conflict(&self) -> bool;
}

/// A resource that can only be read and replaced as a whole.
///
/// `Value` carries whatever version token the store needs to detect a stale
/// write; `replace` must fail with a conflict error when the token no longer
/// matches.
#[async_trait]
pub trait VersionedResource: Send + Sync {
    type Value: Send;
    type Error: ConflictAware + Send;

    /// Name used in log records.
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<Self::Value, Self::Error>;

    async fn replace(&self, value: Self::Value) -> Result<(), Self::Error>;
}

/// What the compute step decided for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update<T> {
    /// The fetched value already satisfies the caller; nothing is written.
    Unchanged,
    /// Write this value back.
    Replace(T),
}

/// How a successful update ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The target state already held; no write was issued.
    Unchanged { attempts: u32 },
    /// A write was committed on the given attempt.
    Committed { attempts: u32 },
}

impl UpdateOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            UpdateOutcome::Unchanged { attempts } | UpdateOutcome::Committed { attempts } => {
                *attempts
            }
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, UpdateOutcome::Committed { .. })
    }
}

/// Failure of an optimistic update.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt lost a race to a concurrent writer.
    #[error("write still conflicting after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,

    /// A fetch or a non-conflict write failure, passed through unchanged.
    #[error("{0}")]
    Failed(E),
}

/// Runs fetch/compute/replace rounds until a write sticks.
#[derive(Debug, Clone, Default)]
pub struct OptimisticUpdater {
    policy: RetryPolicy,
}

impl OptimisticUpdater {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Applies `compute` to the current value of `resource` and writes the
    /// result back, starting over from a fresh fetch whenever the write
    /// conflicts.
    ///
    /// Stops at whichever comes first: a committed write, an unchanged
    /// verdict from `compute`, a non-conflict error, the attempt bound, or
    /// cancellation of `cancel`.
    pub async fn run<R, F>(
        &self,
        resource: &R,
        cancel: &CancellationToken,
        mut compute: F,
    ) -> Result<UpdateOutcome, RetryError<R::Error>>
    where
        R: VersionedResource + ?Sized,
        F: FnMut(R::Value) -> Update<R::Value> + Send,
    {
        let rounds = async {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                let current = resource.fetch().await.map_err(RetryError::Failed)?;
                let next = match compute(current) {
                    Update::Unchanged => {
                        return Ok(UpdateOutcome::Unchanged { attempts: attempt });
                    }
                    Update::Replace(next) => next,
                };

                match resource.replace(next).await {
                    Ok(()) => return Ok(UpdateOutcome::Committed { attempts: attempt }),
                    Err(e) if e.is_conflict() => {
                        if !self.policy.allows_retry(attempt) {
                            warn!(
                                resource = %resource.describe(),
                                attempts = attempt,
                                "Giving up after repeated write conflicts"
                            );
                            return Err(RetryError::Exhausted { attempts: attempt });
                        }
                        let delay = self.policy.backoff(attempt);
                        debug!(
                            resource = %resource.describe(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Write conflict, refetching"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => return Err(RetryError::Failed(e)),
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RetryError::Cancelled),
            result = rounds => result,
        }
    }
}
