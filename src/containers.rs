//! Narrow view of the container runtime used by instances and
//! compositions.
//!
//! The runtime itself (starting a container from a snapshot image, log
//! retrieval, tarball extraction) lives outside this crate. Implementations
//! adapt a concrete runtime to [`Containers`].

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8Path;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::composition::WorkerStartupConfig;

/// Free-form parameters forwarded to the command running in a container.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Byte stream produced by the runtime (logs or tar archives).
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Future returned by container runtime operations.
pub type ContainersFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ContainersError>> + Send + 'a>>;

/// Everything the runtime needs to start the container of one execution.
#[derive(Clone, Copy, Debug)]
pub struct ContainerRun<'a> {
    /// Execution the container belongs to; also names the container.
    pub execution_id: &'a str,
    /// Snapshot image the container starts from.
    pub snapshot_id: &'a str,
    /// Command and arguments to execute.
    pub command: &'a [String],
    /// User parameters made available to the command.
    pub parameters: &'a Parameters,
    /// Volumes and path tables computed from the execution composition.
    pub startup_config: &'a WorkerStartupConfig,
}

/// Errors raised by the container runtime.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ContainersError {
    /// Raised when no container exists for the execution.
    #[error("no container for execution {execution_id}")]
    NotFound {
        /// Execution whose container is missing.
        execution_id: String,
    },
    /// Raised when a requested path does not exist inside the container.
    #[error("path {path} does not exist in the container of execution {execution_id}")]
    MissingPath {
        /// Execution whose container was queried.
        execution_id: String,
        /// Path requested inside the container.
        path: String,
    },
    /// Raised when the runtime could not be reached for a host.
    #[error("cannot connect to container runtime at {host}: {message}")]
    Connection {
        /// Host that was contacted.
        host: String,
        /// Message describing the failure.
        message: String,
    },
    /// Wrapper for any other runtime failure.
    #[error("container runtime error: {message}")]
    Runtime {
        /// Message reported by the runtime.
        message: String,
    },
}

/// Container runtime operations consumed by this crate.
pub trait Containers: Send + Sync {
    /// Starts the container for an execution.
    fn run<'a>(&'a self, request: ContainerRun<'a>) -> ContainersFuture<'a, ()>;

    /// Streams the container logs.
    fn logs<'a>(
        &'a self,
        execution_id: &'a str,
        stdout: bool,
        stderr: bool,
    ) -> ContainersFuture<'a, ByteStream>;

    /// Streams a tar archive of the files under `path` inside the container.
    fn get_files<'a>(
        &'a self,
        execution_id: &'a str,
        path: &'a Utf8Path,
    ) -> ContainersFuture<'a, ByteStream>;

    /// Removes the container and its volumes.
    fn rm<'a>(&'a self, execution_id: &'a str) -> ContainersFuture<'a, ()>;

    /// Reports the runtime's status string for the container (for example
    /// `running` or `exited`).
    fn state<'a>(&'a self, execution_id: &'a str) -> ContainersFuture<'a, String>;
}
