//! # Circuit Breaker Configuration
//!
//! Runtime configuration for a single circuit breaker. The file-backed, per-component
//! settings live in `crate::config::CircuitBreakerSettings` and are converted into this
//! shape when a breaker is created.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before admitting trial calls
    pub timeout: Duration,

    /// Number of trial calls admitted while half-open; that many successes close the circuit
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    /// Configuration for the read-only operational database
    pub fn for_source_database() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            half_open_max_calls: 2,
        }
    }

    /// Configuration for the locally owned scoring/queue store
    pub fn for_local_store() -> Self {
        Self {
            failure_threshold: 3,
            timeout: Duration::from_secs(15),
            half_open_max_calls: 2,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }

        if self.timeout > Duration::from_secs(300) {
            return Err("timeout should not exceed 300 seconds".to_string());
        }

        if self.half_open_max_calls == 0 {
            return Err("half_open_max_calls must be greater than 0".to_string());
        }

        if self.half_open_max_calls > 50 {
            return Err("half_open_max_calls should not exceed 50".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            half_open_max_calls: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        let valid_config = CircuitBreakerConfig::default();
        assert!(valid_config.validate().is_ok());

        let mut invalid_config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            half_open_max_calls: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_preset_configurations() {
        let source = CircuitBreakerConfig::for_source_database();
        assert_eq!(source.failure_threshold, 5);
        assert!(source.validate().is_ok());

        let local = CircuitBreakerConfig::for_local_store();
        assert_eq!(local.failure_threshold, 3);
        assert!(local.validate().is_ok());
    }
}
