//! # Circuit Breaker Manager
//!
//! Owns one circuit breaker per guarded component (the operational database and the
//! local store) and aggregates their metrics.

use crate::config::{CircuitBreakerComponentConfig, CircuitBreakerSettings};
use crate::resilience::{CircuitBreaker, CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Manager for circuit breakers across pipeline dependencies
#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
    config: CircuitBreakerSettings,
}

impl CircuitBreakerManager {
    pub fn from_config(config: &CircuitBreakerSettings) -> Self {
        info!(
            enabled = config.enabled,
            components = config.component_configs.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Arc::new(RwLock::new(HashMap::new())),
            config: config.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get or create circuit breaker for a component
    pub async fn get_circuit_breaker(&self, component_name: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.circuit_breakers.read().await;
            if let Some(breaker) = breakers.get(component_name) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write().await;

        // Another task may have created it while we waited for the write lock
        if let Some(breaker) = breakers.get(component_name) {
            return Arc::clone(breaker);
        }

        if breakers.len() >= self.config.global_settings.max_circuit_breakers as usize {
            warn!(
                component = component_name,
                current_count = breakers.len(),
                max_allowed = self.config.global_settings.max_circuit_breakers,
                "🚨 Maximum circuit breaker limit reached"
            );
        }

        let component_config = self
            .config
            .config_for_component(component_name)
            .to_resilience_config();

        let breaker = Arc::new(CircuitBreaker::new(
            component_name.to_string(),
            component_config,
        ));
        breakers.insert(component_name.to_string(), Arc::clone(&breaker));

        info!(
            component = component_name,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    pub async fn list_components(&self) -> Vec<String> {
        let breakers = self.circuit_breakers.read().await;
        let mut names: Vec<String> = breakers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn get_component_metrics(
        &self,
        component_name: &str,
    ) -> Option<CircuitBreakerMetrics> {
        let breaker = {
            let breakers = self.circuit_breakers.read().await;
            breakers.get(component_name).cloned()
        };
        match breaker {
            Some(breaker) => Some(breaker.metrics().await),
            None => None,
        }
    }

    pub async fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();

        let breakers = self.circuit_breakers.read().await;
        for (name, breaker) in breakers.iter() {
            system_metrics.add_circuit_breaker(name.clone(), breaker.metrics().await);
        }

        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub async fn force_open_all(&self) {
        warn!("🚨 Forcing all circuit breakers open");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_open().await;
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub async fn force_close_all(&self) {
        warn!("🚨 Forcing all circuit breakers closed");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_closed().await;
        }
    }

    /// Override the configuration used for breakers created after this call
    pub fn set_component_config(
        &mut self,
        component_name: &str,
        config: CircuitBreakerComponentConfig,
    ) {
        self.config
            .component_configs
            .insert(component_name.to_string(), config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;

    fn create_test_config() -> CircuitBreakerSettings {
        let mut config = CircuitBreakerSettings::default();
        config.component_configs.insert(
            "source_database".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 2,
                timeout_seconds: 10,
                half_open_max_calls: 1,
            },
        );
        config
    }

    #[tokio::test]
    async fn test_circuit_breaker_manager_creation() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());

        assert!(manager.list_components().await.is_empty());
        assert_eq!(manager.get_system_metrics().await.health_score(), 1.0);
    }

    #[tokio::test]
    async fn test_get_or_create_circuit_breaker() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());

        let breaker1 = manager.get_circuit_breaker("source_database").await;
        let breaker2 = manager.get_circuit_breaker("source_database").await;

        assert!(Arc::ptr_eq(&breaker1, &breaker2));
        assert_eq!(breaker1.config().failure_threshold, 2);
        assert_eq!(manager.list_components().await, vec!["source_database"]);
    }

    #[tokio::test]
    async fn test_unknown_component_uses_default_config() {
        let settings = create_test_config();
        let manager = CircuitBreakerManager::from_config(&settings);

        let breaker = manager.get_circuit_breaker("local_store").await;

        assert_eq!(
            breaker.config().failure_threshold,
            settings.default_config.failure_threshold
        );
    }

    #[tokio::test]
    async fn test_force_open_all() {
        let manager = CircuitBreakerManager::from_config(&create_test_config());
        let source = manager.get_circuit_breaker("source_database").await;
        let local = manager.get_circuit_breaker("local_store").await;

        manager.force_open_all().await;
        assert_eq!(source.state(), CircuitState::Open);
        assert_eq!(local.state(), CircuitState::Open);

        let metrics = manager.get_system_metrics().await;
        assert_eq!(metrics.health_score(), 0.0);

        manager.force_close_all().await;
        assert_eq!(source.state(), CircuitState::Closed);
    }
}
