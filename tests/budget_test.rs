mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::*;
use std::sync::Arc;
use std::time::Duration;

use queue_reconciler::config::JobsConfig;
use queue_reconciler::context::ReconcilerContext;
use queue_reconciler::database::SourceRepository;
use queue_reconciler::error::Result;
use queue_reconciler::models::{PendingRequirement, RequirementStatus, SignatureState, SourceUser};
use queue_reconciler::reconciliation::{
    JobOptions, NewUserDiscovery, ProcessingStrategy, SignatureConversionCleanup,
};
use queue_reconciler::test_helpers::{InMemorySource, TestEnvironment};

/// Operational database whose new-user scan takes `delay` to answer
struct SlowSource {
    inner: Arc<InMemorySource>,
    delay: Duration,
}

#[async_trait]
impl SourceRepository for SlowSource {
    async fn users_created_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SourceUser>> {
        tokio::time::sleep(self.delay).await;
        self.inner.users_created_since(cutoff).await
    }

    async fn signature_states(&self, user_ids: &[i64]) -> Result<Vec<SignatureState>> {
        self.inner.signature_states(user_ids).await
    }

    async fn pending_requirements_since(
        &self,
        cutoff: DateTime<Utc>,
        excluded_types: &[String],
    ) -> Result<Vec<PendingRequirement>> {
        self.inner.pending_requirements_since(cutoff, excluded_types).await
    }

    async fn requirement_statuses(
        &self,
        user_ids: &[i64],
        excluded_types: &[String],
    ) -> Result<Vec<RequirementStatus>> {
        self.inner.requirement_statuses(user_ids, excluded_types).await
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }
}

fn slow_source_context(env: &TestEnvironment, delay: Duration) -> Arc<ReconcilerContext> {
    let source = Arc::new(SlowSource {
        inner: env.source.clone(),
        delay,
    });
    Arc::new(ReconcilerContext::new(
        source,
        env.store.clone(),
        env.call_history.clone(),
        env.jobs.clone(),
    ))
}

/// 100ms between batches; the fourth batch would start at 300ms, past the limit
fn tight_budget(batch_size: usize) -> TestEnvironment {
    TestEnvironment::with_jobs(JobsConfig {
        max_execution_time_ms: 250,
        inter_batch_delay_ms: 100,
        default_batch_size: batch_size,
        ..JobsConfig::default()
    })
}

#[tokio::test(start_paused = true)]
async fn test_budget_truncation_reports_priority_processing() {
    let env = tight_budget(2);
    for user_id in 1..=10 {
        unsigned_user(&env, user_id);
        env.source.set_signature(user_id, Some("signatures/x.png"));
    }

    let job = SignatureConversionCleanup::new(env.context());
    let first = job.run(&JobOptions::default()).await;

    assert!(first.success);
    assert!(!first.completed);
    assert_eq!(first.processing_strategy, ProcessingStrategy::PriorityProcessing);
    assert_eq!(first.counters.total_candidates, 10);
    assert_eq!(first.counters.users_checked, 6);
    assert_eq!(first.counters.conversions_logged, 6);

    let second = job.run(&JobOptions::default()).await;
    assert!(second.completed);
    assert_eq!(second.processing_strategy, ProcessingStrategy::CompleteProcessing);
    assert_eq!(second.counters.total_candidates, 4);
    assert_eq!(env.store.conversions().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_truncated_runs_rotate_through_queue() {
    let env = tight_budget(2);
    for user_id in 1..=8 {
        unsigned_user(&env, user_id);
    }

    let job = SignatureConversionCleanup::new(env.context());
    let first = job.run(&JobOptions::default()).await;
    assert_eq!(first.counters.users_checked, 6);

    // never-checked rows sort first, so the next run starts with the remainder
    let unchecked: Vec<i64> = env
        .store
        .scores()
        .into_iter()
        .filter(|row| row.last_queue_check.is_none())
        .map(|row| row.user_id)
        .collect();
    assert_eq!(unchecked, vec![1, 2]);

    let second = job.run(&JobOptions::default()).await;
    assert!(!second.completed);
    assert!(env
        .store
        .scores()
        .iter()
        .all(|row| row.last_queue_check.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_discovery_truncation_is_resumable() {
    let env = tight_budget(1);
    for user_id in 1..=5 {
        env.source.add_user(user_id, minutes_ago(5), None);
    }

    let job = NewUserDiscovery::new(env.context());
    let first = job.run(&JobOptions::default()).await;
    assert!(!first.completed);
    assert_eq!(first.counters.users_created, 3);

    let second = job.run(&JobOptions::default()).await;
    assert!(second.completed);
    assert_eq!(second.counters.already_present, 3);
    assert_eq!(second.counters.users_created, 2);
    assert_eq!(env.store.scores().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_respects_budget() {
    let env = tight_budget(2);
    for user_id in 1..=10 {
        unsigned_user(&env, user_id);
    }

    let result = SignatureConversionCleanup::new(env.context())
        .run(&JobOptions::dry_run())
        .await;

    assert!(result.dry_run);
    assert!(!result.completed);
    assert_eq!(result.counters.users_checked, 6);
    assert!(env
        .store
        .scores()
        .iter()
        .all(|row| row.last_queue_check.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_slow_candidate_read_spends_the_budget() {
    let env = tight_budget(1);
    for user_id in 1..=5 {
        env.source.add_user(user_id, minutes_ago(5), None);
    }

    let result = NewUserDiscovery::new(slow_source_context(&env, Duration::from_millis(300)))
        .run(&JobOptions::default())
        .await;

    assert!(result.success);
    assert!(!result.completed);
    assert_eq!(result.processing_strategy, ProcessingStrategy::PriorityProcessing);
    assert_eq!(result.counters.total_candidates, 5);
    assert_eq!(result.counters.users_checked, 0);
    assert!(env.store.scores().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_read_time_shortens_the_batch_window() {
    let env = tight_budget(1);
    for user_id in 1..=5 {
        env.source.add_user(user_id, minutes_ago(5), None);
    }

    // 200ms read, then batches at 200ms and 300ms; the second is past the limit
    let result = NewUserDiscovery::new(slow_source_context(&env, Duration::from_millis(200)))
        .run(&JobOptions::default())
        .await;

    assert!(!result.completed);
    assert_eq!(result.counters.users_created, 1);
    assert_eq!(env.store.scores().len(), 1);
}
