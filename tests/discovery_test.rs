mod common;

use common::*;
use proptest::prelude::*;

use queue_reconciler::constants::QueueType;
use queue_reconciler::reconciliation::{
    JobOptions, NewRequirementDiscovery, NewUserDiscovery, OutstandingRequirementsCleanup,
};
use queue_reconciler::test_helpers::TestEnvironment;

#[tokio::test]
async fn test_repeated_discovery_never_duplicates_rows() {
    let env = small_batch_environment(2);
    for user_id in 1..=5 {
        let signature = (user_id % 2 == 0).then_some("signatures/file.png");
        env.source.add_user(user_id, minutes_ago(10 * user_id), signature);
    }

    let job = NewUserDiscovery::new(env.context());
    let first = job.run(&JobOptions::default()).await;
    let second = job.run(&JobOptions::default()).await;

    assert_eq!(first.counters.users_created, 5);
    assert_eq!(first.counters.unsigned_queued, 3);
    assert_eq!(first.counters.signed_without_queue, 2);
    assert_eq!(second.counters.users_created, 0);
    assert_eq!(second.counters.already_present, 5);
    assert_eq!(env.store.scores().len(), 5);
}

#[tokio::test]
async fn test_hours_back_override_widens_window() {
    let env = TestEnvironment::new();
    env.source.add_user(1, minutes_ago(60 * 5), None);

    let job = NewUserDiscovery::new(env.context());
    let default_window = job.run(&JobOptions::default()).await;
    let widened = job
        .run(&JobOptions {
            hours_back: Some(6),
            ..JobOptions::default()
        })
        .await;

    assert_eq!(default_window.counters.users_found, 0);
    assert_eq!(widened.counters.users_created, 1);
}

#[tokio::test]
async fn test_invalid_options_fail_the_run() {
    let env = TestEnvironment::new();
    let result = NewUserDiscovery::new(env.context())
        .run(&JobOptions {
            hours_back: Some(0),
            ..JobOptions::default()
        })
        .await;

    assert!(!result.success);
    assert!(result.errors[0].contains("hoursBack"));
}

#[tokio::test]
async fn test_unrepresentable_hours_back_fails_the_run() {
    let env = TestEnvironment::new();
    env.source.add_user(1, minutes_ago(5), None);

    for errors in [
        NewUserDiscovery::new(env.context())
            .run(&JobOptions {
                hours_back: Some(3_000_000_000),
                ..JobOptions::default()
            })
            .await
            .errors,
        NewRequirementDiscovery::new(env.context())
            .run(&JobOptions {
                hours_back: Some(i64::MAX),
                ..JobOptions::default()
            })
            .await
            .errors,
    ] {
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("hoursBack"));
    }
    assert!(env.store.scores().is_empty());
}

#[tokio::test]
async fn test_disabled_users_are_ignored() {
    let env = TestEnvironment::new();
    env.source.add_user(1, minutes_ago(5), None);
    env.source.disable_user(1);

    let result = NewUserDiscovery::new(env.context())
        .run(&JobOptions::default())
        .await;

    assert_eq!(result.counters.users_found, 0);
    assert!(env.store.scores().is_empty());
}

#[tokio::test]
async fn test_discovery_then_requirements_promotes_signed_user() {
    let env = TestEnvironment::new();
    env.source.add_user(1, minutes_ago(30), Some("signatures/1.png"));
    env.source.add_claim(100, 1);
    env.source
        .add_requirement(1, 100, "PROOF_OF_ADDRESS", "PENDING", minutes_ago(10));

    let users = NewUserDiscovery::new(env.context())
        .run(&JobOptions::default())
        .await;
    assert_eq!(users.counters.signed_without_queue, 1);

    let requirements = NewRequirementDiscovery::new(env.context())
        .run(&JobOptions::default())
        .await;
    assert_eq!(requirements.counters.users_prioritized, 1);
    assert_eq!(requirements.counters.users_created, 0);

    let row = env.store.score(1).unwrap();
    assert_eq!(row.current_queue_type, Some(QueueType::OutstandingRequests));
    assert_eq!(row.current_score, 0);
}

#[derive(Debug, Clone)]
struct GeneratedRequirement {
    requirement_type: String,
    status: String,
    actionable: bool,
}

fn requirement_strategy() -> impl Strategy<Value = GeneratedRequirement> {
    prop_oneof![
        (excluded_type_strategy(), status_strategy()).prop_map(|(requirement_type, status)| {
            GeneratedRequirement {
                requirement_type,
                status,
                actionable: false,
            }
        }),
        (actionable_type_strategy(), status_strategy()).prop_map(|(requirement_type, status)| {
            let actionable = status.eq_ignore_ascii_case("PENDING");
            GeneratedRequirement {
                requirement_type,
                status,
                actionable,
            }
        }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: a user is placed in outstanding_requests iff a non-excluded
    /// requirement is pending
    #[test]
    fn excluded_requirements_never_prioritize(requirements in prop::collection::vec(requirement_strategy(), 0..8)) {
        let env = TestEnvironment::new();
        env.source.add_user(1, days_ago(5), Some("signatures/1.png"));
        env.source.add_claim(100, 1);
        for (index, requirement) in requirements.iter().enumerate() {
            env.source.add_requirement(
                index as i64,
                100,
                &requirement.requirement_type,
                &requirement.status,
                minutes_ago(15),
            );
        }

        let result = runtime().block_on(
            NewRequirementDiscovery::new(env.context()).run(&JobOptions::default()),
        );

        let expected = requirements.iter().any(|r| r.actionable);
        let queued = env
            .store
            .score(1)
            .is_some_and(|row| row.is_in_queue(QueueType::OutstandingRequests));
        prop_assert!(result.success);
        prop_assert_eq!(queued, expected);
    }

    /// Property: an outstanding user converts iff nothing actionable is pending
    #[test]
    fn only_actionable_requirements_block_conversion(requirements in prop::collection::vec(requirement_strategy(), 0..8)) {
        let env = TestEnvironment::new();
        let claim_id = outstanding_user(&env, 1);
        for (index, requirement) in requirements.iter().enumerate() {
            env.source.add_requirement(
                index as i64,
                claim_id,
                &requirement.requirement_type,
                &requirement.status,
                days_ago(3),
            );
        }

        let result = runtime().block_on(
            OutstandingRequirementsCleanup::new(env.context()).run(&JobOptions::default()),
        );

        let blocked = requirements.iter().any(|r| r.actionable);
        prop_assert!(result.success);
        prop_assert_eq!(env.store.conversions_for(1).is_empty(), blocked);
        prop_assert_eq!(
            env.store.score(1).unwrap().is_in_queue(QueueType::OutstandingRequests),
            blocked
        );
    }
}
