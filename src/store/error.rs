//! Store error taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by store drivers and the failover manager.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// Store node unreachable or the connection dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// A store call exceeded its socket or connect timeout.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// Write rejected by a node that is no longer the primary.
    #[error("node {0} is read-only (demoted primary)")]
    ReadOnly(String),

    /// The store circuit breaker is rejecting calls.
    #[error("circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// No discovery endpoint could name a primary.
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// The store answered, but not with what was expected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `init()` has not completed yet.
    #[error("store connection not initialized")]
    NotInitialized,
}

impl StoreError {
    /// Connection-class failures are retried after re-resolving the primary.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Timeout(_) | StoreError::ReadOnly(_)
        )
    }

    /// True when the store should be treated as unavailable by callers
    /// that degrade instead of failing.
    pub fn is_unavailable(&self) -> bool {
        self.is_connection_error()
            || matches!(
                self,
                StoreError::CircuitOpen { .. } | StoreError::Discovery(_) | StoreError::NotInitialized
            )
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
