//! # Reconciler Context
//!
//! Shared handles every job needs: the three repositories, job settings, and the
//! circuit breakers guarding both databases. Production wiring goes through
//! [`ReconcilerContext::from_config`]; tests build one over in-memory fakes with
//! [`ReconcilerContext::new`].

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::config::{ConfigManager, JobsConfig};
use crate::database::{
    migrations, CallHistoryRepository, DatabasePools, DependencyGuard, LocalStore,
    PgCallHistoryRepository, PgLocalStore, PgSourceRepository, ProtectedCallHistory,
    ProtectedLocalStore, ProtectedSourceRepository, SourceRepository,
};
use crate::error::Result;
use crate::resilience::{
    CircuitBreakerManager, SystemCircuitBreakerMetrics, LOCAL_STORE_COMPONENT,
    SOURCE_DATABASE_COMPONENT,
};

pub struct ReconcilerContext {
    source: Arc<dyn SourceRepository>,
    store: Arc<dyn LocalStore>,
    call_history: Arc<dyn CallHistoryRepository>,
    jobs: JobsConfig,
    circuit_breakers: Option<CircuitBreakerManager>,
    pools: Option<DatabasePools>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub source_database: ComponentHealth,
    pub local_store: ComponentHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breakers: Option<SystemCircuitBreakerMetrics>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                healthy: true,
                error: None,
            },
            Err(err) => Self {
                healthy: false,
                error: Some(err.to_string()),
            },
        }
    }
}

impl ReconcilerContext {
    /// Unguarded context over arbitrary repository implementations
    pub fn new(
        source: Arc<dyn SourceRepository>,
        store: Arc<dyn LocalStore>,
        call_history: Arc<dyn CallHistoryRepository>,
        jobs: JobsConfig,
    ) -> Self {
        Self {
            source,
            store,
            call_history,
            jobs,
            circuit_breakers: None,
            pools: None,
        }
    }

    /// Wrap the repositories in circuit breakers from `manager`. The call history
    /// lives in the local database and shares its breaker.
    pub async fn with_circuit_breakers(
        source: Arc<dyn SourceRepository>,
        store: Arc<dyn LocalStore>,
        call_history: Arc<dyn CallHistoryRepository>,
        jobs: JobsConfig,
        manager: CircuitBreakerManager,
    ) -> Self {
        let (source_guard, local_guard) = if manager.is_enabled() {
            (
                DependencyGuard::new(manager.get_circuit_breaker(SOURCE_DATABASE_COMPONENT).await),
                DependencyGuard::new(manager.get_circuit_breaker(LOCAL_STORE_COMPONENT).await),
            )
        } else {
            (DependencyGuard::passthrough(), DependencyGuard::passthrough())
        };

        Self {
            source: Arc::new(ProtectedSourceRepository::new(source, source_guard)),
            store: Arc::new(ProtectedLocalStore::new(store, local_guard.clone())),
            call_history: Arc::new(ProtectedCallHistory::new(call_history, local_guard)),
            jobs,
            circuit_breakers: Some(manager),
            pools: None,
        }
    }

    /// Connect both databases, apply local migrations if configured, and guard
    /// every repository with its circuit breaker
    pub async fn from_config(config_manager: Arc<ConfigManager>) -> Result<Arc<Self>> {
        let config = config_manager.config();
        let pools = DatabasePools::connect(&config.database).await?;

        if config.database.run_migrations {
            migrations::run(pools.local()).await?;
        }

        let manager = CircuitBreakerManager::from_config(&config.circuit_breakers);
        let mut context = Self::with_circuit_breakers(
            Arc::new(PgSourceRepository::new(pools.source().clone())),
            Arc::new(PgLocalStore::new(pools.local().clone())),
            Arc::new(PgCallHistoryRepository::new(pools.local().clone())),
            config.jobs.clone(),
            manager,
        )
        .await;
        context.pools = Some(pools);

        info!(
            environment = config_manager.environment(),
            circuit_breakers_enabled = config.circuit_breakers.enabled,
            "Reconciler context initialized"
        );

        Ok(Arc::new(context))
    }

    pub fn source(&self) -> &Arc<dyn SourceRepository> {
        &self.source
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn call_history(&self) -> &Arc<dyn CallHistoryRepository> {
        &self.call_history
    }

    pub fn jobs(&self) -> &JobsConfig {
        &self.jobs
    }

    pub fn circuit_breakers(&self) -> Option<&CircuitBreakerManager> {
        self.circuit_breakers.as_ref()
    }

    /// Ping both databases; the pings go through the breakers like any other call
    pub async fn health_check(&self) -> HealthReport {
        let source_database = ComponentHealth::from_result(self.source.health_check().await);
        let local_store = ComponentHealth::from_result(self.store.health_check().await);

        let circuit_breakers = match &self.circuit_breakers {
            Some(manager) => Some(manager.get_system_metrics().await),
            None => None,
        };

        HealthReport {
            healthy: source_database.healthy && local_store.healthy,
            source_database,
            local_store,
            circuit_breakers,
        }
    }

    pub async fn close(&self) {
        if let Some(pools) = &self.pools {
            pools.close().await;
        }
    }
}
