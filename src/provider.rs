//! Provider abstraction for acquiring and releasing instances.
//!
//! Acquisition is exposed as an explicit, lazy progress sequence
//! ([`Acquisition`]): each call to [`Acquisition::next_event`] drives the
//! provider up to its next status token. The HTTP layer forwards those
//! tokens to the client so long waits stay observable, and it may stop
//! consuming at any point to abandon the acquisition.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::containers::ContainersError;
use crate::instance::{ExecutionInfo, Instance};
use crate::pool::{LeaseError, PoolError};

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Status token yielded while an instance is being acquired.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Progress {
    /// No instance was available on this trial.
    Pending,
    /// Extra capacity was requested from the pool.
    Allocated,
    /// An instance is bound to the execution.
    Started,
}

impl Progress {
    /// Returns the wire representation of the token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Allocated => "allocated",
            Self::Started => "started",
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller knows about the execution being placed.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExecutionSpec {
    /// Project the execution belongs to.
    pub project: String,
    /// Machine type requested by the user, when any.
    pub instance_type: Option<String>,
}

/// Errors raised by instance providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Raised when a provider is built for a pool that does not exist.
    #[error("auto scaling group doesn't exist: [{name}]")]
    PoolNotFound {
        /// Pool name that was looked up.
        name: String,
    },
    /// Raised when the pool refuses to grow past its maximum size.
    #[error("maximum number of instances reached in pool {pool}: {message}")]
    MaxInstancesReached {
        /// Pool that is at capacity.
        pool: String,
        /// Message reported by the pool manager.
        message: String,
    },
    /// Raised when every trial ran without an instance becoming available.
    #[error("no instance became available for execution {execution_id}")]
    AcquisitionTimeout {
        /// Execution that could not be placed.
        execution_id: String,
    },
    /// Raised when releasing or cleaning up an execution with no instance.
    #[error("no instance is bound to execution {execution_id}")]
    NotLeased {
        /// Execution that was not bound.
        execution_id: String,
    },
    /// Unclassified failure reported by the pool manager.
    #[error(transparent)]
    Pool(PoolError),
    /// Unclassified failure reported by the lease primitive.
    #[error(transparent)]
    Lease(LeaseError),
    /// Failure reported by the container runtime.
    #[error(transparent)]
    Containers(#[from] ContainersError),
    /// Failure reported while pushing an image.
    #[error("image push failed for {tag}: {message}")]
    Images {
        /// Image tag being pushed.
        tag: String,
        /// Message reported by the registry.
        message: String,
    },
}

impl From<PoolError> for ProviderError {
    fn from(value: PoolError) -> Self {
        Self::Pool(value)
    }
}

impl From<LeaseError> for ProviderError {
    fn from(value: LeaseError) -> Self {
        match value {
            LeaseError::NotLeased { execution_id } => Self::NotLeased { execution_id },
            other @ LeaseError::Provider { .. } => Self::Lease(other),
        }
    }
}

/// Progress source driven by an [`Acquisition`].
pub trait AcquisitionEvents: Send {
    /// Runs the acquisition until the next token, returning `None` once
    /// the sequence is exhausted.
    fn next_event(&mut self) -> ProviderFuture<'_, Option<Progress>>;

    /// Whether an instance has been bound to the execution.
    fn is_acquired(&self) -> bool;
}

/// Lazy progress sequence returned by [`InstanceProvider::acquire_instance`].
///
/// Dropping the value abandons the acquisition. Capacity requested by
/// steps that already ran is not rolled back.
pub struct Acquisition<'a> {
    execution_id: String,
    events: Box<dyn AcquisitionEvents + 'a>,
}

impl<'a> Acquisition<'a> {
    /// Wraps a progress source for `execution_id`.
    #[must_use]
    pub fn new(execution_id: impl Into<String>, events: impl AcquisitionEvents + 'a) -> Self {
        Self {
            execution_id: execution_id.into(),
            events: Box::new(events),
        }
    }

    /// An acquisition that already succeeded and yields no tokens.
    #[must_use]
    pub fn immediate(execution_id: impl Into<String>) -> Self {
        Self::new(execution_id, Immediate)
    }

    /// Execution being placed.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Advances to the next progress token.
    ///
    /// # Errors
    ///
    /// Returns the provider's fatal error (for example
    /// [`ProviderError::MaxInstancesReached`]); the sequence ends afterwards.
    pub async fn next_event(&mut self) -> Result<Option<Progress>, ProviderError> {
        self.events.next_event().await
    }

    /// Whether an instance has been bound to the execution.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.events.is_acquired()
    }

    /// Consumes the whole sequence, handing each token to `on_progress`.
    ///
    /// # Errors
    ///
    /// Propagates fatal provider errors and returns
    /// [`ProviderError::AcquisitionTimeout`] when the sequence ends without
    /// binding an instance.
    pub async fn complete<F>(mut self, mut on_progress: F) -> Result<(), ProviderError>
    where
        F: FnMut(Progress) + Send,
    {
        while let Some(progress) = self.next_event().await? {
            on_progress(progress);
        }
        if self.is_acquired() {
            Ok(())
        } else {
            Err(ProviderError::AcquisitionTimeout {
                execution_id: self.execution_id,
            })
        }
    }
}

impl fmt::Debug for Acquisition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquisition")
            .field("execution_id", &self.execution_id)
            .field("acquired", &self.is_acquired())
            .finish_non_exhaustive()
    }
}

struct Immediate;

impl AcquisitionEvents for Immediate {
    fn next_event(&mut self) -> ProviderFuture<'_, Option<Progress>> {
        Box::pin(async { Ok(None) })
    }

    fn is_acquired(&self) -> bool {
        true
    }
}

/// Pushes built images to wherever instances pull them from.
pub trait Images: Send + Sync {
    /// Pushes `image_tag`.
    fn push<'a>(&'a self, image_tag: &'a str) -> ProviderFuture<'a, ()>;
}

/// Lifecycle management of the instances executions run on.
pub trait InstanceProvider: Send + Sync {
    /// Starts acquiring an instance for `execution_id`. Nothing happens
    /// until the returned sequence is consumed.
    fn acquire_instance<'a>(
        &'a self,
        execution_id: &'a str,
        execution_spec: &'a ExecutionSpec,
    ) -> Acquisition<'a>;

    /// Returns the instance bound to `execution_id` to the provider.
    fn release_instance<'a>(&'a self, execution_id: &'a str) -> ProviderFuture<'a, ()>;

    /// Looks up the instance bound to `execution_id`.
    fn instance_for<'a>(
        &'a self,
        execution_id: &'a str,
    ) -> ProviderFuture<'a, Option<Box<dyn Instance>>>;

    /// Makes `image_tag` available to the provider's instances.
    fn push<'a>(&'a self, image_tag: &'a str) -> ProviderFuture<'a, ()>;

    /// Lists the executions currently bound to instances.
    fn get_commands(&self) -> ProviderFuture<'_, Vec<ExecutionInfo>>;
}
