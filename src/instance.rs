//! Capability object bound to a single execution.

use std::sync::Arc;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::composition::WorkerStartupConfig;
use crate::containers::{ByteStream, ContainerRun, Containers, ContainersFuture, Parameters};
use crate::volumes::OUTPUT_DIRECTORY_PATH;

/// Runtime operations over the compute+container pair of one execution.
///
/// Calling [`Instance::run`] twice for the same execution is not supported;
/// providers only hand out one instance per leased execution id.
pub trait Instance: Send + Sync {
    /// Execution the instance is bound to.
    fn execution_id(&self) -> &str;

    /// Starts the container running `command` from `snapshot_id`.
    fn run<'a>(
        &'a self,
        command: &'a [String],
        snapshot_id: &'a str,
        parameters: &'a Parameters,
        startup_config: &'a WorkerStartupConfig,
    ) -> ContainersFuture<'a, ()>;

    /// Streams the container logs.
    fn logs(&self, stdout: bool, stderr: bool) -> ContainersFuture<'_, ByteStream>;

    /// Streams a tar archive of everything under the output volume.
    fn output_files_tarball(&self) -> ContainersFuture<'_, ByteStream>;

    /// Removes the container and its volumes.
    fn cleanup(&self) -> ContainersFuture<'_, ()>;

    /// Reports the runtime status of the container for `execution_id`.
    fn get_container_state<'a>(&'a self, execution_id: &'a str) -> ContainersFuture<'a, String>;
}

/// Summary row describing one execution known to a provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExecutionInfo {
    /// Execution identifier.
    pub execution_id: String,
    /// Status string reported by the container runtime.
    pub container_status: String,
    /// Kind of machine the execution runs on.
    pub instance_type: String,
}

/// [`Instance`] backed by a container runtime reachable for one host.
#[derive(Clone)]
pub struct ContainerInstance {
    execution_id: String,
    containers: Arc<dyn Containers>,
}

impl ContainerInstance {
    /// Binds `execution_id` to the given runtime.
    #[must_use]
    pub fn new(execution_id: impl Into<String>, containers: Arc<dyn Containers>) -> Self {
        Self {
            execution_id: execution_id.into(),
            containers,
        }
    }
}

impl std::fmt::Debug for ContainerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerInstance")
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}

impl Instance for ContainerInstance {
    fn execution_id(&self) -> &str {
        &self.execution_id
    }

    fn run<'a>(
        &'a self,
        command: &'a [String],
        snapshot_id: &'a str,
        parameters: &'a Parameters,
        startup_config: &'a WorkerStartupConfig,
    ) -> ContainersFuture<'a, ()> {
        self.containers.run(ContainerRun {
            execution_id: &self.execution_id,
            snapshot_id,
            command,
            parameters,
            startup_config,
        })
    }

    fn logs(&self, stdout: bool, stderr: bool) -> ContainersFuture<'_, ByteStream> {
        self.containers.logs(&self.execution_id, stdout, stderr)
    }

    fn output_files_tarball(&self) -> ContainersFuture<'_, ByteStream> {
        self.containers
            .get_files(&self.execution_id, Utf8Path::new(OUTPUT_DIRECTORY_PATH))
    }

    fn cleanup(&self) -> ContainersFuture<'_, ()> {
        self.containers.rm(&self.execution_id)
    }

    fn get_container_state<'a>(&'a self, execution_id: &'a str) -> ContainersFuture<'a, String> {
        self.containers.state(execution_id)
    }
}
