mod common;

use chrono::Duration;
use common::*;

use queue_reconciler::constants::ConversionType;
use queue_reconciler::reconciliation::{AgentAttributionJob, JobOptions, SignatureConversionCleanup};
use queue_reconciler::test_helpers::TestEnvironment;

#[tokio::test]
async fn test_most_recent_agent_is_primary() {
    let env = TestEnvironment::new();
    unsigned_user(&env, 1);
    env.call_history
        .add_session(7, 1, days_ago(2), 95, "completed");
    env.call_history
        .add_session(3, 1, days_ago(3), 240, "completed");
    env.source.set_signature(1, Some("signatures/1.png"));

    let cleanup = SignatureConversionCleanup::new(env.context())
        .run(&JobOptions::default())
        .await;
    assert_eq!(cleanup.counters.conversions_logged, 1);

    let result = AgentAttributionJob::new(env.context())
        .run(&JobOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(result.counters.conversions_attributed, 1);

    let conversion = &env.store.conversions_for(1)[0];
    assert_eq!(conversion.primary_agent_id, Some(7));
    assert_eq!(conversion.contributing_agents, vec![3]);
}

#[tokio::test]
async fn test_repeat_calls_by_primary_do_not_contribute() {
    let env = TestEnvironment::new();
    env.store
        .seed_conversion(1, ConversionType::RequirementsCompleted, minutes_ago(30));
    env.call_history
        .add_session(7, 1, days_ago(1), 60, "completed");
    env.call_history
        .add_session(4, 1, days_ago(4), 60, "completed");
    env.call_history
        .add_session(7, 1, days_ago(6), 60, "completed");
    env.call_history
        .add_session(9, 1, days_ago(8), 60, "completed");

    let result = AgentAttributionJob::new(env.context())
        .run(&JobOptions::default())
        .await;

    assert_eq!(result.counters.contributing_agents_assigned, 2);
    let conversion = &env.store.conversions_for(1)[0];
    assert_eq!(conversion.primary_agent_id, Some(7));
    assert_eq!(conversion.contributing_agents, vec![4, 9]);
}

#[tokio::test]
async fn test_calls_after_conversion_are_not_credited() {
    let env = TestEnvironment::new();
    let converted_at = minutes_ago(120);
    env.store
        .seed_conversion(1, ConversionType::SignatureObtained, converted_at);
    env.call_history
        .add_session(5, 1, converted_at + Duration::minutes(30), 300, "completed");

    let result = AgentAttributionJob::new(env.context())
        .run(&JobOptions::default())
        .await;

    assert_eq!(result.counters.no_agent_interaction, 1);
    assert_eq!(env.store.conversions_for(1)[0].primary_agent_id, None);
}

#[tokio::test]
async fn test_unattributed_conversion_is_reexamined_later() {
    let env = TestEnvironment::new();
    let conversion = env
        .store
        .seed_conversion(1, ConversionType::SignatureObtained, minutes_ago(45));

    let job = AgentAttributionJob::new(env.context());
    let first = job.run(&JobOptions::default()).await;
    assert_eq!(first.counters.no_agent_interaction, 1);

    // call history backfilled by the dialler after the first run
    env.call_history
        .add_session(12, 1, days_ago(1), 75, "completed");
    let second = job.run(&JobOptions::default()).await;

    assert_eq!(second.counters.total_candidates, 1);
    assert_eq!(second.counters.conversions_attributed, 1);
    assert_eq!(
        env.store.conversion(conversion.id).unwrap().primary_agent_id,
        Some(12)
    );
}

#[tokio::test]
async fn test_conversions_outside_hours_back_are_skipped() {
    let env = TestEnvironment::new();
    env.store
        .seed_conversion(1, ConversionType::SignatureObtained, days_ago(3));
    env.call_history
        .add_session(12, 1, days_ago(4), 75, "completed");

    let job = AgentAttributionJob::new(env.context());
    let default_window = job.run(&JobOptions::default()).await;
    assert_eq!(default_window.counters.total_candidates, 0);

    let widened = job
        .run(&JobOptions {
            hours_back: Some(96),
            ..JobOptions::default()
        })
        .await;
    assert_eq!(widened.counters.conversions_attributed, 1);
}

#[tokio::test]
async fn test_call_history_failure_is_isolated_per_conversion() {
    let env = TestEnvironment::new();
    env.store
        .seed_conversion(1, ConversionType::SignatureObtained, minutes_ago(10));
    env.store
        .seed_conversion(2, ConversionType::SignatureObtained, minutes_ago(20));
    env.call_history
        .add_session(5, 2, days_ago(1), 75, "completed");
    env.call_history.fail_next_reads(1);

    let result = AgentAttributionJob::new(env.context())
        .run(&JobOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("user 1"));
    assert_eq!(result.counters.conversions_attributed, 1);
    assert_eq!(env.store.conversions_for(2)[0].primary_agent_id, Some(5));
}

#[tokio::test]
async fn test_lookback_window_bounds_are_inclusive() {
    let env = TestEnvironment::new();
    let converted_at = minutes_ago(60);
    let conversion = env
        .store
        .seed_conversion(1, ConversionType::SignatureObtained, converted_at);
    let window_start = converted_at - Duration::days(30);

    env.call_history
        .add_session(2, 1, converted_at, 60, "completed");
    env.call_history
        .add_session(3, 1, window_start, 60, "completed");
    env.call_history
        .add_session(4, 1, window_start - Duration::seconds(1), 60, "completed");
    env.call_history
        .add_session(5, 1, converted_at + Duration::seconds(1), 60, "completed");

    let result = AgentAttributionJob::new(env.context())
        .run(&JobOptions::default())
        .await;

    assert_eq!(result.counters.conversions_attributed, 1);
    let stored = env.store.conversion(conversion.id).unwrap();
    assert_eq!(stored.primary_agent_id, Some(2));
    assert_eq!(stored.contributing_agents, vec![3]);
}
