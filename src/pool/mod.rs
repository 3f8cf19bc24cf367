//! Elastic pool provider: leases instances out of a tag-identified,
//! auto-scaled pool and grows the pool when none is free.

mod acquisition;
mod error;
mod registry;
mod types;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::containers::ContainersError;
use crate::instance::{ContainerInstance, ExecutionInfo, Instance};
use crate::provider::{
    Acquisition, ExecutionSpec, Images, InstanceProvider, ProviderError, ProviderFuture,
};

use acquisition::PoolAcquisition;

pub use error::{LeaseError, PoolError};
pub use registry::PoolRegistry;
pub use types::{
    ContainerConnector, EXECUTION_ID_TAG, InstanceFilter, InstanceLeases, LeaseFuture,
    LeasedInstance, LeasesFactory, POOL_NAME_TAG, PoolDescription, PoolFuture, PoolManager,
};

const DEFAULT_MAX_TRIALS: u32 = 30;
const DEFAULT_WAIT_FOR: Duration = Duration::from_secs(10);

/// Retry bounds for one acquisition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AcquireOptions {
    /// Number of availability checks before giving up.
    pub max_trials: u32,
    /// Pause between consecutive trials.
    pub wait_for: Duration,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            max_trials: DEFAULT_MAX_TRIALS,
            wait_for: DEFAULT_WAIT_FOR,
        }
    }
}

/// Collaborators shared by every pool provider.
#[derive(Clone)]
pub struct PoolBackends {
    /// Describes and resizes pools.
    pub manager: Arc<dyn PoolManager>,
    /// Builds the lease primitive for a pool.
    pub leases: LeasesFactory,
    /// Opens the container runtime of leased instances.
    pub connector: Arc<dyn ContainerConnector>,
    /// Pushes images instances pull from.
    pub images: Arc<dyn Images>,
}

/// Provider leasing instances from one named pool.
///
/// Obtain providers through [`PoolRegistry`] so each pool has exactly one
/// provider, and therefore one lock, per process.
pub struct ElasticPoolProvider {
    name: String,
    manager: Arc<dyn PoolManager>,
    leases: Arc<dyn InstanceLeases>,
    connector: Arc<dyn ContainerConnector>,
    images: Arc<dyn Images>,
    lock: Arc<Mutex<()>>,
    options: AcquireOptions,
}

impl ElasticPoolProvider {
    /// Builds a provider for `name` after checking the pool exists.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::PoolNotFound`] when the pool manager does
    /// not know the pool, or [`ProviderError::Pool`] when the lookup fails.
    pub async fn connect(
        name: &str,
        backends: &PoolBackends,
        options: AcquireOptions,
    ) -> Result<Self, ProviderError> {
        if backends.manager.describe(name).await?.is_none() {
            return Err(ProviderError::PoolNotFound {
                name: name.to_owned(),
            });
        }
        let leases = (backends.leases)(InstanceFilter::for_pool(name));
        debug!(pool = %name, "pool provider created");
        Ok(Self {
            name: name.to_owned(),
            manager: Arc::clone(&backends.manager),
            leases,
            connector: Arc::clone(&backends.connector),
            images: Arc::clone(&backends.images),
            lock: Arc::new(Mutex::new(())),
            options,
        })
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retry bounds used by [`InstanceProvider::acquire_instance`].
    #[must_use]
    pub const fn options(&self) -> AcquireOptions {
        self.options
    }

    /// Starts acquiring an instance with explicit retry bounds.
    ///
    /// The pool lock is taken on the first [`Acquisition::next_event`] and
    /// held until the sequence ends or is dropped, so acquisitions against
    /// one pool queue behind each other.
    #[must_use]
    pub fn acquire_instance_with(
        &self,
        execution_id: &str,
        options: AcquireOptions,
    ) -> Acquisition<'_> {
        Acquisition::new(execution_id, PoolAcquisition::new(self, execution_id, options))
    }

    /// Grows the pool's desired capacity by `amount`, returning the new
    /// desired capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MaxInstancesReached`] when the pool is at its
    /// maximum, or [`ProviderError::Pool`] for any other failure (including
    /// a scaling activity already in progress).
    pub async fn increase_capacity(&self, amount: u32) -> Result<u32, ProviderError> {
        let _guard = self.lock.lock().await;
        self.increase_desired_capacity(amount)
            .await
            .map_err(|err| self.classify(err))
    }

    /// Callers must hold `self.lock`.
    async fn increase_desired_capacity(&self, amount: u32) -> Result<u32, PoolError> {
        let description =
            self.manager
                .describe(&self.name)
                .await?
                .ok_or_else(|| PoolError::Provider {
                    message: format!("pool {} no longer exists", self.name),
                })?;
        let desired = description.desired_capacity.saturating_add(amount);
        self.manager
            .set_desired_capacity(&self.name, desired, true)
            .await?;
        info!(
            pool = %self.name,
            from = description.desired_capacity,
            to = desired,
            "increased desired capacity"
        );
        Ok(desired)
    }

    fn classify(&self, err: PoolError) -> ProviderError {
        match err {
            PoolError::MaxCapacityExceeded { message, .. } => ProviderError::MaxInstancesReached {
                pool: self.name.clone(),
                message,
            },
            other => ProviderError::Pool(other),
        }
    }

    fn wrap(&self, leased: &LeasedInstance) -> Result<Box<dyn Instance>, ContainersError> {
        let containers = self.connector.connect(leased)?;
        Ok(Box::new(ContainerInstance::new(
            leased.execution_id.clone(),
            containers,
        )))
    }
}

impl std::fmt::Debug for ElasticPoolProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticPoolProvider")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl InstanceProvider for ElasticPoolProvider {
    fn acquire_instance<'a>(
        &'a self,
        execution_id: &'a str,
        execution_spec: &'a ExecutionSpec,
    ) -> Acquisition<'a> {
        debug!(
            pool = %self.name,
            %execution_id,
            project = %execution_spec.project,
            "acquisition requested"
        );
        self.acquire_instance_with(execution_id, self.options)
    }

    fn release_instance<'a>(&'a self, execution_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.leases.release_for(execution_id).await?;
            info!(pool = %self.name, %execution_id, "instance released");
            Ok(())
        })
    }

    fn instance_for<'a>(
        &'a self,
        execution_id: &'a str,
    ) -> ProviderFuture<'a, Option<Box<dyn Instance>>> {
        Box::pin(async move {
            let Some(leased) = self.leases.instance_for(execution_id).await? else {
                return Ok(None);
            };
            Ok(Some(self.wrap(&leased)?))
        })
    }

    fn push<'a>(&'a self, image_tag: &'a str) -> ProviderFuture<'a, ()> {
        self.images.push(image_tag)
    }

    fn get_commands(&self) -> ProviderFuture<'_, Vec<ExecutionInfo>> {
        Box::pin(async move {
            let mut infos = Vec::new();
            for leased in self.leases.leased().await? {
                let containers = self.connector.connect(&leased)?;
                let container_status = containers.state(&leased.execution_id).await?;
                infos.push(ExecutionInfo {
                    execution_id: leased.execution_id,
                    container_status,
                    instance_type: leased.instance_type,
                });
            }
            Ok(infos)
        })
    }
}

/// Shared [`ElasticPoolProvider`] viewed through one caller's retry bounds.
///
/// The pool lock and leases stay shared with every other handle on the
/// same provider; only [`InstanceProvider::acquire_instance`] differs.
#[derive(Clone, Debug)]
pub struct BoundedPool {
    provider: Arc<ElasticPoolProvider>,
    options: AcquireOptions,
}

impl BoundedPool {
    /// Pairs `provider` with `options`.
    #[must_use]
    pub const fn new(provider: Arc<ElasticPoolProvider>, options: AcquireOptions) -> Self {
        Self { provider, options }
    }

    /// Underlying shared provider.
    #[must_use]
    pub const fn provider(&self) -> &Arc<ElasticPoolProvider> {
        &self.provider
    }

    /// Retry bounds applied to acquisitions through this handle.
    #[must_use]
    pub const fn options(&self) -> AcquireOptions {
        self.options
    }
}

impl InstanceProvider for BoundedPool {
    fn acquire_instance<'a>(
        &'a self,
        execution_id: &'a str,
        execution_spec: &'a ExecutionSpec,
    ) -> Acquisition<'a> {
        debug!(
            pool = %self.provider.name,
            %execution_id,
            project = %execution_spec.project,
            max_trials = self.options.max_trials,
            "bounded acquisition requested"
        );
        self.provider.acquire_instance_with(execution_id, self.options)
    }

    fn release_instance<'a>(&'a self, execution_id: &'a str) -> ProviderFuture<'a, ()> {
        self.provider.release_instance(execution_id)
    }

    fn instance_for<'a>(
        &'a self,
        execution_id: &'a str,
    ) -> ProviderFuture<'a, Option<Box<dyn Instance>>> {
        self.provider.instance_for(execution_id)
    }

    fn push<'a>(&'a self, image_tag: &'a str) -> ProviderFuture<'a, ()> {
        self.provider.push(image_tag)
    }

    fn get_commands(&self) -> ProviderFuture<'_, Vec<ExecutionInfo>> {
        self.provider.get_commands()
    }
}
