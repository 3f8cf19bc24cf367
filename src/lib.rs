//! Instance provisioning and execution composition for the plz controller.
//!
//! Executions are placed on instances handed out by an [`InstanceProvider`]:
//! either the local machine ([`LocalhostProvider`]) or an auto-scaled pool
//! ([`ElasticPoolProvider`]) that grows on contention. Acquisition is a
//! lazy progress sequence ([`Acquisition`]) so long waits stay observable.
//!
//! Array jobs split one logical execution over an index range.
//! [`ExecutionComposition`] records that tree for reporting, and
//! [`InstanceComposition`] maps it to container volumes and to the output
//! and measures directories fetched back per index.

pub mod composition;
pub mod config;
pub mod containers;
pub mod instance;
pub mod localhost;
pub mod pool;
pub mod provider;
pub mod test_support;
pub mod volumes;

pub use composition::{
    ComposedMeasures, CompositionError, ConfigValue, DirectoryTarball, ExecutionComposition,
    IndexRange, IndicesComposition, InstanceComposition, WorkerStartupConfig,
};
pub use config::{ConfigError, ControllerConfig, ProviderKind, SetupError};
pub use containers::{ByteStream, ContainerRun, Containers, ContainersError, Parameters};
pub use instance::{ContainerInstance, ExecutionInfo, Instance};
pub use localhost::LocalhostProvider;
pub use pool::{
    AcquireOptions, BoundedPool, ElasticPoolProvider, InstanceLeases, LeaseError, PoolBackends,
    PoolError, PoolManager, PoolRegistry,
};
pub use provider::{
    Acquisition, AcquisitionEvents, ExecutionSpec, Images, InstanceProvider, Progress,
    ProviderError,
};
pub use volumes::Volume;
