//! Single-host provider treating the local machine as one instance that is
//! always available.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::containers::Containers;
use crate::instance::{ContainerInstance, ExecutionInfo, Instance};
use crate::provider::{Acquisition, ExecutionSpec, InstanceProvider, ProviderError, ProviderFuture};

/// Instance type reported for executions bound to the local machine.
pub const LOCALHOST_INSTANCE_TYPE: &str = "localhost";

/// Provider whose only instance is the machine the controller runs on.
///
/// Acquisition is bookkeeping: the execution id joins the bound set
/// immediately and the returned sequence yields no token.
pub struct LocalhostProvider {
    containers: Arc<dyn Containers>,
    execution_ids: Mutex<BTreeSet<String>>,
}

impl LocalhostProvider {
    /// Creates a provider over the local container runtime.
    #[must_use]
    pub const fn new(containers: Arc<dyn Containers>) -> Self {
        Self {
            containers,
            execution_ids: Mutex::new(BTreeSet::new()),
        }
    }

    /// Whether `execution_id` is currently bound.
    #[must_use]
    pub fn is_bound(&self, execution_id: &str) -> bool {
        self.bound().contains(execution_id)
    }

    fn bound(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.execution_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn instance(&self, execution_id: &str) -> ContainerInstance {
        ContainerInstance::new(execution_id, Arc::clone(&self.containers))
    }
}

impl std::fmt::Debug for LocalhostProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalhostProvider")
            .field("execution_ids", &*self.bound())
            .finish_non_exhaustive()
    }
}

impl InstanceProvider for LocalhostProvider {
    fn acquire_instance<'a>(
        &'a self,
        execution_id: &'a str,
        execution_spec: &'a ExecutionSpec,
    ) -> Acquisition<'a> {
        self.bound().insert(execution_id.to_owned());
        debug!(%execution_id, project = %execution_spec.project, "bound to localhost");
        Acquisition::immediate(execution_id)
    }

    fn release_instance<'a>(&'a self, execution_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            // Unbind before cleanup so a concurrent release of the same id
            // sees it as unbound.
            if !self.bound().remove(execution_id) {
                return Err(ProviderError::NotLeased {
                    execution_id: execution_id.to_owned(),
                });
            }
            if let Err(err) = self.instance(execution_id).cleanup().await {
                self.bound().insert(execution_id.to_owned());
                warn!(%execution_id, error = %err, "cleanup failed, execution stays bound");
                return Err(err.into());
            }
            info!(%execution_id, "released localhost");
            Ok(())
        })
    }

    fn instance_for<'a>(
        &'a self,
        execution_id: &'a str,
    ) -> ProviderFuture<'a, Option<Box<dyn Instance>>> {
        let instance = self
            .is_bound(execution_id)
            .then(|| Box::new(self.instance(execution_id)) as Box<dyn Instance>);
        Box::pin(async move { Ok(instance) })
    }

    fn push<'a>(&'a self, image_tag: &'a str) -> ProviderFuture<'a, ()> {
        debug!(%image_tag, "images are local, nothing to push");
        Box::pin(async { Ok(()) })
    }

    fn get_commands(&self) -> ProviderFuture<'_, Vec<ExecutionInfo>> {
        let execution_ids: Vec<String> = self.bound().iter().cloned().collect();
        Box::pin(async move {
            let mut infos = Vec::with_capacity(execution_ids.len());
            for execution_id in execution_ids {
                let container_status = self.containers.state(&execution_id).await?;
                infos.push(ExecutionInfo {
                    execution_id,
                    container_status,
                    instance_type: LOCALHOST_INSTANCE_TYPE.to_owned(),
                });
            }
            Ok(infos)
        })
    }
}
