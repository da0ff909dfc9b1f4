//! Error types for the reconciliation pipeline.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::resilience::CircuitBreakerError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcilerError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Circuit breaker open for {component}, retry after {}ms", retry_after.as_millis())]
    CircuitOpen {
        component: String,
        retry_after: Duration,
    },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReconcilerError {
    /// True when the failure came from a guard rejecting the call rather than the dependency
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ReconcilerError::CircuitOpen { .. })
    }

    /// How long the caller should back off before the guard admits a trial call
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ReconcilerError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for ReconcilerError {
    fn from(err: sqlx::Error) -> Self {
        ReconcilerError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for ReconcilerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ReconcilerError::Database(format!("migration failed: {err}"))
    }
}

impl From<ConfigurationError> for ReconcilerError {
    fn from(err: ConfigurationError) -> Self {
        ReconcilerError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for ReconcilerError {
    fn from(err: serde_json::Error) -> Self {
        ReconcilerError::Validation(format!("JSON serialization error: {err}"))
    }
}

impl From<CircuitBreakerError<ReconcilerError>> for ReconcilerError {
    fn from(err: CircuitBreakerError<ReconcilerError>) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen {
                component,
                retry_after,
            } => ReconcilerError::CircuitOpen {
                component,
                retry_after,
            },
            CircuitBreakerError::OperationFailed(inner) => inner,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcilerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_is_distinguishable() {
        let err = ReconcilerError::from(CircuitBreakerError::<ReconcilerError>::CircuitOpen {
            component: "source_database".to_string(),
            retry_after: Duration::from_secs(12),
        });

        assert!(err.is_circuit_open());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
        assert!(err.to_string().contains("source_database"));
    }

    #[test]
    fn test_operation_failure_unwraps_inner_error() {
        let err = ReconcilerError::from(CircuitBreakerError::OperationFailed(
            ReconcilerError::Database("connection reset".to_string()),
        ));

        assert!(!err.is_circuit_open());
        assert_eq!(err.retry_after(), None);
        assert_eq!(err, ReconcilerError::Database("connection reset".to_string()));
    }
}
