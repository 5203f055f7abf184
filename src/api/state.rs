//! Application state for Axum handlers.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::AppConfig;
use crate::error::Result;
use crate::service::{
    AdminService, GenerationService, HttpRemoteProvider, PoolManager, RemoteIdentifierProvider,
    RemoteSourceClient, SequenceAllocator,
};
use crate::storage::traits::Storage;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Storage backend.
    pub storage: Arc<dyn Storage>,
    /// Configuration service.
    pub admin_service: Arc<AdminService>,
    /// Identifier generation service.
    pub generation_service: Arc<GenerationService>,
    /// Pool manager, shared with the expiry sweeper.
    pub pool_manager: Arc<PoolManager>,
    /// Prometheus recorder handle, when metrics are enabled.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create a new application state with the HTTP remote provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Arc<AppConfig>, storage: Arc<dyn Storage>) -> Result<Self> {
        let provider = HttpRemoteProvider::new(config.remote.request_timeout())?;
        Ok(Self::with_remote_provider(config, storage, Arc::new(provider)))
    }

    /// Create a new application state with a custom remote provider.
    #[must_use]
    pub fn with_remote_provider(
        config: Arc<AppConfig>,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn RemoteIdentifierProvider>,
    ) -> Self {
        let pool_manager = Arc::new(PoolManager::new(
            Arc::clone(&storage),
            config.pool.reservation_ttl(),
        ));

        let sequences = SequenceAllocator::new(
            Arc::clone(&storage),
            config.allocation.retry_policy(),
            config.allocation.block_size,
        );

        let generation_service = Arc::new(GenerationService::new(
            Arc::clone(&storage),
            sequences,
            Arc::clone(&pool_manager),
            RemoteSourceClient::new(provider, &config.remote),
        ));

        let admin_service = Arc::new(AdminService::new(
            Arc::clone(&storage),
            Arc::clone(&pool_manager),
        ));

        Self {
            config,
            storage,
            admin_service,
            generation_service,
            pool_manager,
            metrics: None,
        }
    }

    /// Attach the Prometheus handle rendered by `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
