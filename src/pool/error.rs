//! Error types reported by the pool collaborators.

use thiserror::Error;

/// Errors raised by a [`PoolManager`](super::PoolManager).
///
/// Acquisition swallows [`PoolError::ScalingInProgress`], turns
/// [`PoolError::MaxCapacityExceeded`] into a fatal
/// [`ProviderError::MaxInstancesReached`](crate::ProviderError::MaxInstancesReached)
/// and propagates everything else unchanged.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PoolError {
    /// Raised when a scaling activity is already running for the pool.
    #[error("scaling activity in progress for pool {name}")]
    ScalingInProgress {
        /// Pool being resized.
        name: String,
    },
    /// Raised when the requested size exceeds the pool's hard maximum.
    #[error("pool {name} cannot grow to {requested} instances: {message}")]
    MaxCapacityExceeded {
        /// Pool being resized.
        name: String,
        /// Desired capacity that was rejected.
        requested: u32,
        /// Message returned by the provider.
        message: String,
    },
    /// Wrapper for any other provider failure (network, auth, malformed
    /// responses).
    #[error("pool provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK.
        message: String,
    },
}

/// Errors raised by an [`InstanceLeases`](super::InstanceLeases) primitive.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LeaseError {
    /// Raised when releasing an execution that holds no lease.
    #[error("no instance is leased to execution {execution_id}")]
    NotLeased {
        /// Execution that was expected to hold a lease.
        execution_id: String,
    },
    /// Wrapper for provider failures while reading or writing lease tags.
    #[error("lease provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK.
        message: String,
    },
}
