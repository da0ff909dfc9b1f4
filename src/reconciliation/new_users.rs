//! # New User Discovery
//!
//! Seeds a score row for every recently registered user the call queue has not seen.
//! Unsigned users enter `unsigned_users` at the top priority score; signed users get
//! a queue-less row so later discovery runs skip them and the requirements job can
//! promote them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use crate::context::ReconcilerContext;
use crate::error::Result;
use crate::models::{NewUserCallScore, SourceUser};
use crate::reconciliation::batch::{ExecutionBudget, JobOptions};
use crate::reconciliation::result::{JobCounters, JobKind, JobResult, JobRun};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUsersCounters {
    pub users_found: usize,
    pub already_present: usize,
    pub total_candidates: usize,
    pub users_checked: usize,
    pub users_created: usize,
    pub unsigned_queued: usize,
    pub signed_without_queue: usize,
    pub duplicates_skipped: usize,
}

impl JobCounters for NewUsersCounters {
    fn summary(&self) -> String {
        format!(
            "Found {} new users ({} already tracked); created {} score rows ({} unsigned queued, {} signed without queue), {} skipped as duplicates",
            self.users_found,
            self.already_present,
            self.users_created,
            self.unsigned_queued,
            self.signed_without_queue,
            self.duplicates_skipped
        )
    }
}

impl NewUsersCounters {
    fn record_created(&mut self, seed: &NewUserCallScore) {
        self.users_created += 1;
        if seed.current_queue_type.is_some() {
            self.unsigned_queued += 1;
        } else {
            self.signed_without_queue += 1;
        }
    }
}

pub struct NewUserDiscovery {
    context: Arc<ReconcilerContext>,
}

impl NewUserDiscovery {
    pub fn new(context: Arc<ReconcilerContext>) -> Self {
        Self { context }
    }

    #[instrument(skip(self), fields(job = "new_users"))]
    pub async fn run(&self, options: &JobOptions) -> JobResult<NewUsersCounters> {
        let mut run = JobRun::start(JobKind::NewUsers, options.dry_run);
        let mut counters = NewUsersCounters::default();

        match self.process(options, &mut run, &mut counters).await {
            Ok(completed) => run.finish(completed, counters),
            Err(err) => run.abort(err, counters),
        }
    }

    async fn process(
        &self,
        options: &JobOptions,
        run: &mut JobRun,
        counters: &mut NewUsersCounters,
    ) -> Result<bool> {
        options.validate()?;
        let jobs = self.context.jobs();
        // candidate reads count against the budget too
        let mut budget = ExecutionBudget::from_config(jobs);
        let store = self.context.store();

        let hours_back = options.hours_back_or(jobs.new_users_hours_back);
        let cutoff = options.cutoff(Utc::now(), jobs.new_users_hours_back)?;

        let users = self.context.source().users_created_since(cutoff).await?;
        counters.users_found = users.len();

        let user_ids: Vec<i64> = users.iter().map(|user| user.user_id).collect();
        let existing = store.existing_user_ids(&user_ids).await?;
        let candidates: Vec<&SourceUser> = users
            .iter()
            .filter(|user| !existing.contains(&user.user_id))
            .collect();
        counters.already_present = users.len() - candidates.len();
        counters.total_candidates = candidates.len();

        tracing::info!(
            hours_back = hours_back,
            users_found = counters.users_found,
            candidates = counters.total_candidates,
            "Discovered recently registered users"
        );

        for batch in candidates.chunks(options.batch_size_or(jobs)) {
            if !budget.begin_batch().await {
                break;
            }

            for user in batch {
                counters.users_checked += 1;
                let seed = NewUserCallScore::discovered(user.user_id, user.has_signature());

                if run.dry_run() {
                    counters.record_created(&seed);
                    continue;
                }

                match store.insert_user_score(&seed).await {
                    Ok(true) => counters.record_created(&seed),
                    Ok(false) => {
                        tracing::debug!(user_id = user.user_id, "Score row appeared concurrently");
                        counters.duplicates_skipped += 1;
                    }
                    Err(err) => run.record_item_error(user.user_id, err)?,
                }
            }
        }

        Ok(!budget.is_exhausted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::QueueType;
    use crate::test_helpers::TestEnvironment;
    use chrono::Duration;

    #[tokio::test]
    async fn test_seeds_unsigned_and_signed_users() {
        let env = TestEnvironment::new();
        let now = Utc::now();
        env.source.add_user(1, now - Duration::minutes(30), None);
        env.source.add_user(2, now - Duration::minutes(20), Some("sig/2.png"));
        env.source.add_user(3, now - Duration::hours(5), None);

        let result = NewUserDiscovery::new(env.context())
            .run(&JobOptions::default())
            .await;

        assert!(result.success);
        assert!(result.completed);
        assert_eq!(result.counters.users_found, 2);
        assert_eq!(result.counters.unsigned_queued, 1);
        assert_eq!(result.counters.signed_without_queue, 1);

        let unsigned = env.store.score(1).unwrap();
        assert_eq!(unsigned.current_queue_type, Some(QueueType::UnsignedUsers));
        assert_eq!(unsigned.current_score, 0);
        assert!(unsigned.is_active);

        let signed = env.store.score(2).unwrap();
        assert_eq!(signed.current_queue_type, None);
        assert!(env.store.score(3).is_none());
    }

    #[tokio::test]
    async fn test_existing_rows_are_never_reseeded() {
        let env = TestEnvironment::new();
        env.source.add_user(1, Utc::now(), None);
        env.store.seed_score(1, Some(QueueType::UnsignedUsers), 9);

        let job = NewUserDiscovery::new(env.context());
        let first = job.run(&JobOptions::default()).await;
        let second = job.run(&JobOptions::default()).await;

        assert_eq!(first.counters.already_present, 1);
        assert_eq!(first.counters.users_created, 0);
        assert_eq!(second.counters.users_created, 0);
        assert_eq!(env.store.score(1).unwrap().current_score, 9);
        assert_eq!(env.store.scores().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_writing() {
        let env = TestEnvironment::new();
        env.source.add_user(1, Utc::now(), None);

        let result = NewUserDiscovery::new(env.context())
            .run(&JobOptions::dry_run())
            .await;

        assert!(result.dry_run);
        assert_eq!(result.counters.users_created, 1);
        assert!(env.store.scores().is_empty());
    }

    #[tokio::test]
    async fn test_source_outage_aborts_run() {
        let env = TestEnvironment::new();
        env.source.add_user(1, Utc::now(), None);
        env.source.fail_next_reads(1);

        let result = NewUserDiscovery::new(env.context())
            .run(&JobOptions::default())
            .await;

        assert!(!result.success);
        assert!(!result.completed);
        assert_eq!(result.errors.len(), 1);
        assert!(env.store.scores().is_empty());
    }

    #[tokio::test]
    async fn test_failed_insert_is_isolated() {
        let env = TestEnvironment::new();
        env.source.add_user(1, Utc::now(), None);
        env.source.add_user(2, Utc::now(), None);
        env.store.fail_writes_for(1);

        let result = NewUserDiscovery::new(env.context())
            .run(&JobOptions::default())
            .await;

        assert!(result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.counters.users_created, 1);
        assert!(env.store.score(2).is_some());
    }
}
