use chrono::{DateTime, Duration, Utc};
use queue_reconciler::config::JobsConfig;
use queue_reconciler::constants::QueueType;
use queue_reconciler::test_helpers::TestEnvironment;

/// Environment with a small batch size so multi-batch paths are exercised
pub fn small_batch_environment(batch_size: usize) -> TestEnvironment {
    TestEnvironment::with_jobs(JobsConfig {
        default_batch_size: batch_size,
        inter_batch_delay_ms: 0,
        ..JobsConfig::default()
    })
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

/// A signed user with one claim (`user_id * 100`) sitting in the outstanding queue
pub fn outstanding_user(env: &TestEnvironment, user_id: i64) -> i64 {
    let claim_id = user_id * 100;
    env.source.add_user(user_id, days_ago(30), Some("signatures/file.png"));
    env.source.add_claim(claim_id, user_id);
    env.store
        .seed_score(user_id, Some(QueueType::OutstandingRequests), 3);
    claim_id
}

/// An unsigned user tracked in the unsigned queue
pub fn unsigned_user(env: &TestEnvironment, user_id: i64) {
    env.source.add_user(user_id, days_ago(10), None);
    env.store.seed_score(user_id, Some(QueueType::UnsignedUsers), 1);
}
