// Test Helpers Module - In-Memory Testing Infrastructure
//
// Repository fakes and a ready-wired context so job behavior can be exercised
// without either database. Used by unit tests and by the tests/ integration suite.

pub mod in_memory;

pub use in_memory::{InMemoryCallHistory, InMemoryLocalStore, InMemorySource};

use std::sync::Arc;

use crate::config::JobsConfig;
use crate::context::ReconcilerContext;

/// Fakes plus the job settings to build a [`ReconcilerContext`] over them
pub struct TestEnvironment {
    pub source: Arc<InMemorySource>,
    pub store: Arc<InMemoryLocalStore>,
    pub call_history: Arc<InMemoryCallHistory>,
    pub jobs: JobsConfig,
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnvironment {
    /// Default job settings without the inter-batch pause
    pub fn new() -> Self {
        Self::with_jobs(JobsConfig {
            inter_batch_delay_ms: 0,
            ..JobsConfig::default()
        })
    }

    pub fn with_jobs(jobs: JobsConfig) -> Self {
        Self {
            source: Arc::new(InMemorySource::new()),
            store: Arc::new(InMemoryLocalStore::new()),
            call_history: Arc::new(InMemoryCallHistory::new()),
            jobs,
        }
    }

    /// Fresh context sharing this environment's fakes
    pub fn context(&self) -> Arc<ReconcilerContext> {
        Arc::new(ReconcilerContext::new(
            self.source.clone(),
            self.store.clone(),
            self.call_history.clone(),
            self.jobs.clone(),
        ))
    }
}
