//! Collaborator contracts for tag-leased, auto-scaled instance pools.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::containers::{Containers, ContainersError};

use super::error::{LeaseError, PoolError};

/// Tag holding the execution id an instance is leased to. Instances start
/// with the tag present and empty, which marks them as available.
pub const EXECUTION_ID_TAG: &str = "Execution-Id";

/// Tag the cloud provider propagates to every member of a scaling group.
pub const POOL_NAME_TAG: &str = "aws:autoscaling:groupName";

/// Future returned by [`PoolManager`] operations.
pub type PoolFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PoolError>> + Send + 'a>>;

/// Future returned by [`InstanceLeases`] operations.
pub type LeaseFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LeaseError>> + Send + 'a>>;

/// Selects the physical instances that belong to one pool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceFilter {
    /// Tag key to match.
    pub tag: String,
    /// Accepted tag values.
    pub values: Vec<String>,
}

impl InstanceFilter {
    /// Filter matching members of the named pool.
    #[must_use]
    pub fn for_pool(name: &str) -> Self {
        Self {
            tag: POOL_NAME_TAG.to_owned(),
            values: vec![name.to_owned()],
        }
    }
}

/// Current shape of a pool as reported by the pool manager.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolDescription {
    /// Pool name.
    pub name: String,
    /// Number of instances the pool is converging to.
    pub desired_capacity: u32,
}

/// Physical instance currently carrying a lease tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LeasedInstance {
    /// Provider instance identifier.
    pub instance_id: String,
    /// Execution the instance is leased to.
    pub execution_id: String,
    /// Machine type of the instance.
    pub instance_type: String,
    /// Address the container runtime listens on.
    pub host: String,
}

/// Describes and resizes auto-scaled pools.
pub trait PoolManager: Send + Sync {
    /// Describes the named pool, returning `None` when it does not exist.
    fn describe<'a>(&'a self, name: &'a str) -> PoolFuture<'a, Option<PoolDescription>>;

    /// Requests a new desired capacity for the pool.
    fn set_desired_capacity<'a>(
        &'a self,
        name: &'a str,
        desired_capacity: u32,
        honor_cooldown: bool,
    ) -> PoolFuture<'a, ()>;
}

/// Tag-based lease primitive over the instances selected by an
/// [`InstanceFilter`].
///
/// Implementations must make the available → leased transition atomic:
/// two concurrent [`InstanceLeases::acquire_for`] calls never receive the
/// same instance.
pub trait InstanceLeases: Send + Sync {
    /// Claims one available instance for `execution_id`, if any.
    fn acquire_for<'a>(&'a self, execution_id: &'a str) -> LeaseFuture<'a, Option<LeasedInstance>>;

    /// Clears the lease held by `execution_id`.
    ///
    /// Fails with [`LeaseError::NotLeased`] when no instance carries it.
    fn release_for<'a>(&'a self, execution_id: &'a str) -> LeaseFuture<'a, ()>;

    /// Looks up the instance leased to `execution_id`.
    fn instance_for<'a>(&'a self, execution_id: &'a str) -> LeaseFuture<'a, Option<LeasedInstance>>;

    /// Lists every leased instance.
    fn leased(&self) -> LeaseFuture<'_, Vec<LeasedInstance>>;
}

/// Opens the container runtime of a leased instance.
pub trait ContainerConnector: Send + Sync {
    /// Returns a runtime handle for `instance`.
    ///
    /// # Errors
    ///
    /// Returns [`ContainersError::Connection`] when the host is unreachable.
    fn connect(&self, instance: &LeasedInstance) -> Result<Arc<dyn Containers>, ContainersError>;
}

/// Builds the lease primitive for a pool from its instance filter.
pub type LeasesFactory = Arc<dyn Fn(InstanceFilter) -> Arc<dyn InstanceLeases> + Send + Sync>;
