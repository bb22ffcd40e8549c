//! Error types for routesync operations.

use routesync_common::{ConflictAware, RetryError};
use routesync_types::{IpFamily, ParseError};
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for routesync operations.
pub type Result<T> = std::result::Result<T, RouteSyncError>;

/// Kind of control-plane resource a gateway operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Router,
    AllowList,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Router => f.write_str("router"),
            ResourceKind::AllowList => f.write_str("allow-list"),
        }
    }
}

/// Errors reported by gateway implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    /// The write was based on a stale revision.
    #[error("{kind} '{id}' was modified since it was fetched")]
    Conflict { kind: ResourceKind, id: String },

    #[error("transport failure: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn conflict(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            id: id.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

impl ConflictAware for GatewayError {
    fn is_conflict(&self) -> bool {
        matches!(self, GatewayError::Conflict { .. })
    }
}

/// Errors surfaced to routesync callers.
#[derive(Debug, Error)]
pub enum RouteSyncError {
    /// No node with the requested name is known to the directory.
    #[error("node '{node}' not found")]
    NodeNotFound { node: String },

    /// The router or allow-list does not exist in the control plane.
    #[error("{kind} '{id}' not found")]
    ResourceNotFound { kind: ResourceKind, id: String },

    /// The node has no internal address of the requested family.
    #[error("node '{node}' has no internal {family} address")]
    AddressUnavailable { node: String, family: IpFamily },

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Concurrent writers kept winning until the attempt bound ran out.
    #[error("{target}: still conflicting after {attempts} attempts")]
    Conflict { target: String, attempts: u32 },

    #[error("{target}: transport failure: {message}")]
    Transport { target: String, message: String },

    #[error("{target}: cancelled")]
    Cancelled { target: String },

    #[error("{target}: timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl RouteSyncError {
    pub fn node_not_found(node: impl Into<String>) -> Self {
        Self::NodeNotFound { node: node.into() }
    }

    pub fn address_unavailable(node: impl Into<String>, family: IpFamily) -> Self {
        Self::AddressUnavailable {
            node: node.into(),
            family,
        }
    }

    /// Attaches `target` (router, route or allow-list identity) to a
    /// gateway failure.
    pub fn from_gateway(err: GatewayError, target: impl Into<String>) -> Self {
        match err {
            GatewayError::NotFound { kind, id } => Self::ResourceNotFound { kind, id },
            // A bare conflict only escapes the retry loop when no loop ran.
            GatewayError::Conflict { .. } => Self::Conflict {
                target: target.into(),
                attempts: 1,
            },
            GatewayError::Transport(message) => Self::Transport {
                target: target.into(),
                message,
            },
        }
    }

    /// Maps the outcome of an optimistic update onto the caller taxonomy.
    pub fn from_retry(err: RetryError<GatewayError>, target: impl Into<String>) -> Self {
        let target = target.into();
        match err {
            RetryError::Exhausted { attempts } => Self::Conflict { target, attempts },
            RetryError::Cancelled => Self::Cancelled { target },
            RetryError::Failed(e) => Self::from_gateway(e, target),
        }
    }

    /// Returns true if a caller may reasonably retry the whole operation
    /// later. Malformed input and missing addresses never heal by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouteSyncError::Conflict { .. }
                | RouteSyncError::Transport { .. }
                | RouteSyncError::Timeout { .. }
        )
    }
}
