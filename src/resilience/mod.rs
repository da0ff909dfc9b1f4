//! # Resilience Module
//!
//! Fail-fast guards for the two databases the pipeline depends on. A degraded
//! dependency trips its circuit breaker, and every subsequent call is rejected
//! immediately with a retry-after hint instead of piling up behind slow queries.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use queue_reconciler::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     timeout: Duration::from_secs(30),
//!     half_open_max_calls: 2,
//! };
//!
//! let circuit_breaker = CircuitBreaker::new("source_database".to_string(), config);
//!
//! let rows = circuit_breaker
//!     .execute(|| async { Ok::<_, std::io::Error>(42) }, "count_users")
//!     .await?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};

/// Component name of the guard in front of the operational (source) database
pub const SOURCE_DATABASE_COMPONENT: &str = "source_database";

/// Component name of the guard in front of the local scoring/queue store
pub const LOCAL_STORE_COMPONENT: &str = "local_store";
