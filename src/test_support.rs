//! Test support utilities shared across unit and integration tests.
//!
//! The fakes stand in for the cloud and container collaborators. They keep
//! their state behind `std::sync::Mutex` and never hold a guard across an
//! await point.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;

use crate::containers::{ByteStream, ContainerRun, Containers, ContainersError, ContainersFuture};
use crate::pool::{
    ContainerConnector, InstanceFilter, InstanceLeases, LeaseError, LeaseFuture, LeasedInstance,
    PoolBackends, PoolDescription, PoolError, PoolFuture, PoolManager,
};
use crate::provider::{Images, ProviderError, ProviderFuture};

/// Instance type reported by [`FakeLeases`] instances.
pub const FAKE_INSTANCE_TYPE: &str = "t3.small";

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted [`PoolManager`] keeping desired capacities in memory.
///
/// Capacity requests succeed unless an outcome was queued with
/// [`FakePoolManager::push_set_outcome`]. When a fleet is attached, every
/// successful increase adds one available instance to it, mimicking the
/// scaling group launching a machine.
#[derive(Debug, Default)]
pub struct FakePoolManager {
    groups: Mutex<HashMap<String, u32>>,
    set_outcomes: Mutex<VecDeque<Result<(), PoolError>>>,
    capacity_requests: Mutex<Vec<u32>>,
    describe_calls: Mutex<usize>,
    fleet: Mutex<Option<Arc<FakeLeases>>>,
}

impl FakePoolManager {
    /// Creates a manager that knows no pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pool with its current desired capacity.
    #[must_use]
    pub fn with_group(self, name: &str, desired_capacity: u32) -> Self {
        self.add_group(name, desired_capacity);
        self
    }

    /// Registers another pool after construction.
    pub fn add_group(&self, name: &str, desired_capacity: u32) {
        locked(&self.groups).insert(name.to_owned(), desired_capacity);
    }

    /// Queues the outcome of the next capacity request.
    pub fn push_set_outcome(&self, outcome: Result<(), PoolError>) {
        locked(&self.set_outcomes).push_back(outcome);
    }

    /// Launches an instance into `fleet` after each successful increase.
    pub fn attach_fleet(&self, fleet: Arc<FakeLeases>) {
        *locked(&self.fleet) = Some(fleet);
    }

    /// Desired capacities requested so far, in call order.
    #[must_use]
    pub fn capacity_requests(&self) -> Vec<u32> {
        locked(&self.capacity_requests).clone()
    }

    /// Number of `describe` calls served.
    #[must_use]
    pub fn describe_calls(&self) -> usize {
        *locked(&self.describe_calls)
    }

    /// Current desired capacity of `name`.
    #[must_use]
    pub fn desired_capacity(&self, name: &str) -> Option<u32> {
        locked(&self.groups).get(name).copied()
    }
}

impl PoolManager for FakePoolManager {
    fn describe<'a>(&'a self, name: &'a str) -> PoolFuture<'a, Option<PoolDescription>> {
        *locked(&self.describe_calls) += 1;
        let description = locked(&self.groups)
            .get(name)
            .map(|desired_capacity| PoolDescription {
                name: name.to_owned(),
                desired_capacity: *desired_capacity,
            });
        Box::pin(async move {
            // Give concurrent callers a chance to interleave.
            tokio::task::yield_now().await;
            Ok(description)
        })
    }

    fn set_desired_capacity<'a>(
        &'a self,
        name: &'a str,
        desired_capacity: u32,
        _honor_cooldown: bool,
    ) -> PoolFuture<'a, ()> {
        locked(&self.capacity_requests).push(desired_capacity);
        let outcome = locked(&self.set_outcomes).pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            locked(&self.groups).insert(name.to_owned(), desired_capacity);
            if let Some(fleet) = locked(&self.fleet).as_ref() {
                fleet.add_instance();
            }
        }
        Box::pin(async move { outcome })
    }
}

#[derive(Clone, Debug)]
struct FakeHost {
    instance_id: String,
    lease: Option<String>,
}

/// In-memory lease primitive over a fleet of hosts.
///
/// Claims happen under one mutex, so concurrent acquirers never share a
/// host.
#[derive(Debug, Default)]
pub struct FakeLeases {
    hosts: Mutex<Vec<FakeHost>>,
    acquire_checks: Mutex<usize>,
}

impl FakeLeases {
    /// Creates an empty fleet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fleet with `count` available hosts.
    #[must_use]
    pub fn with_available(count: usize) -> Self {
        let leases = Self::new();
        for _ in 0..count {
            leases.add_instance();
        }
        leases
    }

    /// Adds an available host, returning its instance id.
    pub fn add_instance(&self) -> String {
        let mut hosts = locked(&self.hosts);
        let instance_id = format!("i-{}", hosts.len());
        hosts.push(FakeHost {
            instance_id: instance_id.clone(),
            lease: None,
        });
        instance_id
    }

    /// Number of `acquire_for` calls served.
    #[must_use]
    pub fn acquire_checks(&self) -> usize {
        *locked(&self.acquire_checks)
    }

    fn leased_instance(host: &FakeHost, execution_id: &str) -> LeasedInstance {
        LeasedInstance {
            instance_id: host.instance_id.clone(),
            execution_id: execution_id.to_owned(),
            instance_type: FAKE_INSTANCE_TYPE.to_owned(),
            host: format!("{}.internal", host.instance_id),
        }
    }

    fn claim(&self, execution_id: &str) -> Option<LeasedInstance> {
        *locked(&self.acquire_checks) += 1;
        let mut hosts = locked(&self.hosts);
        let host = hosts.iter_mut().find(|host| host.lease.is_none())?;
        host.lease = Some(execution_id.to_owned());
        Some(Self::leased_instance(host, execution_id))
    }

    fn find(&self, execution_id: &str) -> Option<LeasedInstance> {
        locked(&self.hosts)
            .iter()
            .find(|host| host.lease.as_deref() == Some(execution_id))
            .map(|host| Self::leased_instance(host, execution_id))
    }
}

impl InstanceLeases for FakeLeases {
    fn acquire_for<'a>(&'a self, execution_id: &'a str) -> LeaseFuture<'a, Option<LeasedInstance>> {
        let claimed = self.claim(execution_id);
        Box::pin(async move { Ok(claimed) })
    }

    fn release_for<'a>(&'a self, execution_id: &'a str) -> LeaseFuture<'a, ()> {
        let mut hosts = locked(&self.hosts);
        let outcome = match hosts
            .iter_mut()
            .find(|host| host.lease.as_deref() == Some(execution_id))
        {
            Some(host) => {
                host.lease = None;
                Ok(())
            }
            None => Err(LeaseError::NotLeased {
                execution_id: execution_id.to_owned(),
            }),
        };
        drop(hosts);
        Box::pin(async move { outcome })
    }

    fn instance_for<'a>(&'a self, execution_id: &'a str) -> LeaseFuture<'a, Option<LeasedInstance>> {
        let found = self.find(execution_id);
        Box::pin(async move { Ok(found) })
    }

    fn leased(&self) -> LeaseFuture<'_, Vec<LeasedInstance>> {
        let leased = locked(&self.hosts)
            .iter()
            .filter_map(|host| {
                host.lease
                    .as_deref()
                    .map(|execution_id| Self::leased_instance(host, execution_id))
            })
            .collect();
        Box::pin(async move { Ok(leased) })
    }
}

/// Call recorded by [`FakeContainers`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContainerCall {
    /// `run` was invoked.
    Run {
        /// Execution the container belongs to.
        execution_id: String,
        /// Snapshot the container started from.
        snapshot_id: String,
        /// Command passed to the container.
        command: Vec<String>,
        /// Number of volumes declared by the startup configuration.
        volumes: usize,
    },
    /// `logs` was invoked.
    Logs {
        /// Execution whose logs were read.
        execution_id: String,
    },
    /// `get_files` was invoked.
    GetFiles {
        /// Execution whose files were read.
        execution_id: String,
        /// Path requested inside the container.
        path: String,
    },
    /// `rm` was invoked.
    Rm {
        /// Execution whose container was removed.
        execution_id: String,
    },
}

/// Recording [`Containers`] runtime.
///
/// `get_files` streams the requested path back as bytes so tests can tell
/// tarballs apart.
#[derive(Debug, Default)]
pub struct FakeContainers {
    calls: Mutex<Vec<ContainerCall>>,
    missing_paths: Mutex<BTreeSet<String>>,
    failing_rm: bool,
}

impl FakeContainers {
    /// Creates a runtime where every path exists.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `get_files` fail for `path`.
    #[must_use]
    pub fn with_missing_path(self, path: &str) -> Self {
        locked(&self.missing_paths).insert(path.to_owned());
        self
    }

    /// Makes every `rm` fail with a runtime error.
    #[must_use]
    pub const fn with_failing_rm(mut self) -> Self {
        self.failing_rm = true;
        self
    }

    /// Calls recorded so far, excluding state queries.
    #[must_use]
    pub fn calls(&self) -> Vec<ContainerCall> {
        locked(&self.calls).clone()
    }

    fn record(&self, call: ContainerCall) {
        locked(&self.calls).push(call);
    }
}

impl Containers for FakeContainers {
    fn run<'a>(&'a self, request: ContainerRun<'a>) -> ContainersFuture<'a, ()> {
        self.record(ContainerCall::Run {
            execution_id: request.execution_id.to_owned(),
            snapshot_id: request.snapshot_id.to_owned(),
            command: request.command.to_vec(),
            volumes: request.startup_config.volumes().len(),
        });
        Box::pin(async { Ok(()) })
    }

    fn logs<'a>(
        &'a self,
        execution_id: &'a str,
        _stdout: bool,
        _stderr: bool,
    ) -> ContainersFuture<'a, ByteStream> {
        self.record(ContainerCall::Logs {
            execution_id: execution_id.to_owned(),
        });
        let stream: ByteStream = Box::pin(Cursor::new(b"log line\n".to_vec()));
        Box::pin(async move { Ok(stream) })
    }

    fn get_files<'a>(
        &'a self,
        execution_id: &'a str,
        path: &'a Utf8Path,
    ) -> ContainersFuture<'a, ByteStream> {
        self.record(ContainerCall::GetFiles {
            execution_id: execution_id.to_owned(),
            path: path.to_string(),
        });
        let missing = locked(&self.missing_paths).contains(path.as_str());
        Box::pin(async move {
            if missing {
                return Err(ContainersError::MissingPath {
                    execution_id: execution_id.to_owned(),
                    path: path.to_string(),
                });
            }
            let stream: ByteStream = Box::pin(Cursor::new(path.as_str().as_bytes().to_vec()));
            Ok(stream)
        })
    }

    fn rm<'a>(&'a self, execution_id: &'a str) -> ContainersFuture<'a, ()> {
        self.record(ContainerCall::Rm {
            execution_id: execution_id.to_owned(),
        });
        let failing = self.failing_rm;
        Box::pin(async move {
            // Give concurrent callers a chance to interleave.
            tokio::task::yield_now().await;
            if failing {
                return Err(ContainersError::Runtime {
                    message: format!("cannot remove container of {execution_id}"),
                });
            }
            Ok(())
        })
    }

    fn state<'a>(&'a self, _execution_id: &'a str) -> ContainersFuture<'a, String> {
        Box::pin(async { Ok(String::from("running")) })
    }
}

/// Connector handing out one shared [`FakeContainers`] for every host.
#[derive(Debug)]
pub struct FakeConnector {
    containers: Arc<FakeContainers>,
    hosts: Mutex<Vec<String>>,
}

impl FakeConnector {
    /// Wraps `containers`.
    #[must_use]
    pub const fn new(containers: Arc<FakeContainers>) -> Self {
        Self {
            containers,
            hosts: Mutex::new(Vec::new()),
        }
    }

    /// Hosts connected to so far.
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        locked(&self.hosts).clone()
    }
}

impl ContainerConnector for FakeConnector {
    fn connect(&self, instance: &LeasedInstance) -> Result<Arc<dyn Containers>, ContainersError> {
        locked(&self.hosts).push(instance.host.clone());
        Ok(Arc::clone(&self.containers) as Arc<dyn Containers>)
    }
}

/// Image store recording pushed tags.
#[derive(Debug, Default)]
pub struct FakeImages {
    pushed: Mutex<Vec<String>>,
}

impl FakeImages {
    /// Tags pushed so far.
    #[must_use]
    pub fn pushed(&self) -> Vec<String> {
        locked(&self.pushed).clone()
    }
}

impl Images for FakeImages {
    fn push<'a>(&'a self, image_tag: &'a str) -> ProviderFuture<'a, ()> {
        locked(&self.pushed).push(image_tag.to_owned());
        Box::pin(async { Ok::<(), ProviderError>(()) })
    }
}

/// Every fake needed to run an elastic pool, wired together.
#[derive(Debug)]
pub struct FakePool {
    /// Scaling group manager.
    pub manager: Arc<FakePoolManager>,
    /// Lease primitive returned for every filter.
    pub leases: Arc<FakeLeases>,
    /// Runtime behind every leased host.
    pub containers: Arc<FakeContainers>,
    /// Connector over [`FakePool::containers`].
    pub connector: Arc<FakeConnector>,
    /// Image store.
    pub images: Arc<FakeImages>,
    filters: Arc<Mutex<Vec<InstanceFilter>>>,
}

impl FakePool {
    /// Builds a pool named `name` at `desired_capacity` with `available`
    /// free hosts.
    #[must_use]
    pub fn new(name: &str, desired_capacity: u32, available: usize) -> Self {
        let containers = Arc::new(FakeContainers::new());
        Self {
            manager: Arc::new(FakePoolManager::new().with_group(name, desired_capacity)),
            leases: Arc::new(FakeLeases::with_available(available)),
            connector: Arc::new(FakeConnector::new(Arc::clone(&containers))),
            containers,
            images: Arc::new(FakeImages::default()),
            filters: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Backends handing the shared fakes to providers.
    #[must_use]
    pub fn backends(&self) -> PoolBackends {
        let leases = Arc::clone(&self.leases);
        let filters = Arc::clone(&self.filters);
        PoolBackends {
            manager: Arc::clone(&self.manager) as Arc<dyn PoolManager>,
            leases: Arc::new(move |filter: InstanceFilter| -> Arc<dyn InstanceLeases> {
                locked(&filters).push(filter);
                Arc::clone(&leases) as Arc<dyn InstanceLeases>
            }),
            connector: Arc::clone(&self.connector) as Arc<dyn ContainerConnector>,
            images: Arc::clone(&self.images) as Arc<dyn Images>,
        }
    }

    /// Instance filters requested by providers, in creation order.
    #[must_use]
    pub fn requested_filters(&self) -> Vec<InstanceFilter> {
        locked(&self.filters).clone()
    }
}
