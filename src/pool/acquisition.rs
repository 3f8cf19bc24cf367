//! Trial loop that leases an instance, growing the pool at most once per
//! acquisition.

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::provider::{AcquisitionEvents, Progress, ProviderError, ProviderFuture};

use super::error::PoolError;
use super::{AcquireOptions, ElasticPoolProvider};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Step {
    CheckAvailability,
    IncreaseCapacity,
    Wait,
    Done,
}

pub(super) struct PoolAcquisition<'a> {
    provider: &'a ElasticPoolProvider,
    execution_id: String,
    options: AcquireOptions,
    trials_remaining: u32,
    did_increase_capacity: bool,
    acquired: bool,
    step: Step,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> PoolAcquisition<'a> {
    pub(super) fn new(
        provider: &'a ElasticPoolProvider,
        execution_id: &str,
        options: AcquireOptions,
    ) -> Self {
        Self {
            provider,
            execution_id: execution_id.to_owned(),
            options,
            trials_remaining: options.max_trials,
            did_increase_capacity: false,
            acquired: false,
            step: Step::CheckAvailability,
            guard: None,
        }
    }

    async fn advance(&mut self) -> Result<Option<Progress>, ProviderError> {
        if self.step == Step::Done {
            return Ok(None);
        }
        if self.guard.is_none() {
            self.guard = Some(Arc::clone(&self.provider.lock).lock_owned().await);
        }

        loop {
            match self.step {
                Step::CheckAvailability => return self.check_availability().await,
                Step::IncreaseCapacity => {
                    self.step = Step::Wait;
                    if self.did_increase_capacity {
                        continue;
                    }
                    if let Some(progress) = self.increase_capacity().await? {
                        return Ok(Some(progress));
                    }
                }
                Step::Wait => {
                    self.step = Step::CheckAvailability;
                    if self.trials_remaining > 0 {
                        sleep(self.options.wait_for).await;
                    }
                }
                Step::Done => return Ok(None),
            }
        }
    }

    async fn check_availability(&mut self) -> Result<Option<Progress>, ProviderError> {
        if self.trials_remaining == 0 {
            debug!(
                pool = %self.provider.name,
                execution_id = %self.execution_id,
                trials = self.options.max_trials,
                "no instance became available"
            );
            self.finish();
            return Ok(None);
        }
        self.trials_remaining -= 1;
        debug!(
            pool = %self.provider.name,
            execution_id = %self.execution_id,
            trials_remaining = self.trials_remaining,
            "checking for an available instance"
        );

        match self.provider.leases.acquire_for(&self.execution_id).await {
            Ok(Some(instance)) => {
                info!(
                    pool = %self.provider.name,
                    execution_id = %self.execution_id,
                    instance_id = %instance.instance_id,
                    "instance leased"
                );
                self.acquired = true;
                self.finish();
                Ok(Some(Progress::Started))
            }
            Ok(None) => {
                self.step = Step::IncreaseCapacity;
                Ok(Some(Progress::Pending))
            }
            Err(err) => {
                self.finish();
                Err(err.into())
            }
        }
    }

    /// Returns `Ok(None)` when the increase was skipped and the loop should
    /// carry on to the next trial.
    async fn increase_capacity(&mut self) -> Result<Option<Progress>, ProviderError> {
        match self.provider.increase_desired_capacity(1).await {
            Ok(_) => {
                self.did_increase_capacity = true;
                Ok(Some(Progress::Allocated))
            }
            Err(PoolError::ScalingInProgress { .. }) => {
                debug!(
                    pool = %self.provider.name,
                    execution_id = %self.execution_id,
                    "scaling activity in progress, retrying on next trial"
                );
                Ok(None)
            }
            Err(err) => {
                if matches!(err, PoolError::MaxCapacityExceeded { .. }) {
                    warn!(
                        pool = %self.provider.name,
                        execution_id = %self.execution_id,
                        "pool is at maximum capacity"
                    );
                }
                self.finish();
                Err(self.provider.classify(err))
            }
        }
    }

    fn finish(&mut self) {
        self.step = Step::Done;
        self.guard = None;
    }
}

impl AcquisitionEvents for PoolAcquisition<'_> {
    fn next_event(&mut self) -> ProviderFuture<'_, Option<Progress>> {
        Box::pin(self.advance())
    }

    fn is_acquired(&self) -> bool {
        self.acquired
    }
}
