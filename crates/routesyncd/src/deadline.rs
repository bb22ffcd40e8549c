//! Per-operation deadline.

use routesync_common::CancellationToken;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Result, RouteSyncError};

/// Fixed when an operation starts. Every step of the operation runs
/// against the same instant, so the bound covers the whole call rather
/// than each gateway round trip.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    bound: Option<(Instant, Duration)>,
}

impl Deadline {
    pub(crate) fn start(limit: Option<Duration>) -> Self {
        Self {
            bound: limit.map(|limit| (Instant::now() + limit, limit)),
        }
    }

    /// Runs one step under the cancellation token and the remaining time.
    pub(crate) async fn run<T>(
        &self,
        cancel: &CancellationToken,
        target: &str,
        step: impl Future<Output = T>,
    ) -> Result<T> {
        let timed = async {
            match self.bound {
                Some((at, limit)) => tokio::time::timeout_at(at, step)
                    .await
                    .map_err(|_| RouteSyncError::Timeout {
                        target: target.to_string(),
                        after: limit,
                    }),
                None => Ok(step.await),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RouteSyncError::Cancelled { target: target.to_string() }),
            result = timed => result,
        }
    }
}
