//! Process-wide cache of pool providers keyed by pool name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::provider::ProviderError;

use super::{AcquireOptions, ElasticPoolProvider, PoolBackends};

/// Hands out one [`ElasticPoolProvider`] per pool name.
///
/// Lookup, the existence check and insertion all happen under one lock, so
/// concurrent callers asking for the same pool observe the same provider
/// and a missing pool is never cached.
pub struct PoolRegistry {
    backends: PoolBackends,
    options: AcquireOptions,
    providers: Mutex<HashMap<String, Arc<ElasticPoolProvider>>>,
}

impl PoolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(backends: PoolBackends) -> Self {
        Self {
            backends,
            options: AcquireOptions::default(),
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the retry bounds given to newly created providers.
    #[must_use]
    pub fn with_acquire_options(mut self, options: AcquireOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the provider for `name`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::PoolNotFound`] when the pool does not exist,
    /// or [`ProviderError::Pool`] when the existence check fails.
    pub async fn get_or_create(
        &self,
        name: &str,
    ) -> Result<Arc<ElasticPoolProvider>, ProviderError> {
        let mut providers = self.providers.lock().await;
        if let Some(provider) = providers.get(name) {
            return Ok(Arc::clone(provider));
        }

        let provider =
            Arc::new(ElasticPoolProvider::connect(name, &self.backends, self.options).await?);
        providers.insert(name.to_owned(), Arc::clone(&provider));
        info!(pool = %name, "registered pool provider");
        Ok(provider)
    }

    /// Whether a provider for `name` has been created.
    pub async fn contains(&self, name: &str) -> bool {
        self.providers.lock().await.contains_key(name)
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
