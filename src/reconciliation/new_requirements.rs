//! # New Requirement Discovery
//!
//! Moves signed users with freshly created, actionable requirements to the front of
//! `outstanding_requests`. Administrative requirement types are excluded, unsigned
//! users are left to the unsigned pipeline, and an existing `unsigned_users`
//! membership is never overwritten.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

use crate::context::ReconcilerContext;
use crate::constants::QueueType;
use crate::database::normalize_excluded_types;
use crate::error::Result;
use crate::models::{PendingRequirement, PrioritizeOutcome, UserCallScore};
use crate::reconciliation::batch::{ExecutionBudget, JobOptions};
use crate::reconciliation::result::{JobCounters, JobKind, JobResult, JobRun};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRequirementsCounters {
    pub requirements_found: usize,
    pub users_found: usize,
    pub unsigned_skipped: usize,
    pub total_candidates: usize,
    pub users_checked: usize,
    pub users_prioritized: usize,
    pub users_created: usize,
    pub unsigned_membership_kept: usize,
}

impl JobCounters for NewRequirementsCounters {
    fn summary(&self) -> String {
        format!(
            "Found {} actionable requirements across {} users; prioritized {} ({} new rows), skipped {} unsigned, kept {} in unsigned queue",
            self.requirements_found,
            self.users_found,
            self.users_prioritized,
            self.users_created,
            self.unsigned_skipped,
            self.unsigned_membership_kept
        )
    }
}

impl NewRequirementsCounters {
    fn record(&mut self, outcome: PrioritizeOutcome) {
        match outcome {
            PrioritizeOutcome::Created => {
                self.users_prioritized += 1;
                self.users_created += 1;
            }
            PrioritizeOutcome::Updated => self.users_prioritized += 1,
            PrioritizeOutcome::UnsignedMembershipKept => self.unsigned_membership_kept += 1,
        }
    }
}

/// What `prioritize_outstanding` would do to the current row
pub fn predict_prioritize(existing: Option<&UserCallScore>) -> PrioritizeOutcome {
    match existing {
        None => PrioritizeOutcome::Created,
        Some(score) if score.is_in_queue(QueueType::UnsignedUsers) => {
            PrioritizeOutcome::UnsignedMembershipKept
        }
        Some(_) => PrioritizeOutcome::Updated,
    }
}

/// Distinct signed owners in first-seen order, plus the distinct unsigned owners.
/// Requirements of an excluded type are dropped even if the source let them through.
fn partition_owners(
    requirements: &[PendingRequirement],
    excluded_types: &[String],
) -> (Vec<i64>, HashSet<i64>, usize) {
    let excluded: HashSet<String> = normalize_excluded_types(excluded_types).into_iter().collect();

    let mut seen = HashSet::new();
    let mut signed = Vec::new();
    let mut unsigned = HashSet::new();
    let mut actionable = 0;

    for requirement in requirements {
        if excluded.contains(&requirement.requirement_type.trim().to_uppercase()) {
            continue;
        }
        actionable += 1;

        if !requirement.has_signature {
            unsigned.insert(requirement.user_id);
        } else if seen.insert(requirement.user_id) {
            signed.push(requirement.user_id);
        }
    }

    (signed, unsigned, actionable)
}

pub struct NewRequirementDiscovery {
    context: Arc<ReconcilerContext>,
}

impl NewRequirementDiscovery {
    pub fn new(context: Arc<ReconcilerContext>) -> Self {
        Self { context }
    }

    #[instrument(skip(self), fields(job = "new_requirements"))]
    pub async fn run(&self, options: &JobOptions) -> JobResult<NewRequirementsCounters> {
        let mut run = JobRun::start(JobKind::NewRequirements, options.dry_run);
        let mut counters = NewRequirementsCounters::default();

        match self.process(options, &mut run, &mut counters).await {
            Ok(completed) => run.finish(completed, counters),
            Err(err) => run.abort(err, counters),
        }
    }

    async fn process(
        &self,
        options: &JobOptions,
        run: &mut JobRun,
        counters: &mut NewRequirementsCounters,
    ) -> Result<bool> {
        options.validate()?;
        let jobs = self.context.jobs();
        let mut budget = ExecutionBudget::from_config(jobs);
        let store = self.context.store();

        let hours_back = options.hours_back_or(jobs.new_requirements_hours_back);
        let cutoff = options.cutoff(Utc::now(), jobs.new_requirements_hours_back)?;

        let requirements = self
            .context
            .source()
            .pending_requirements_since(cutoff, &jobs.excluded_requirement_types)
            .await?;

        let (signed, unsigned, actionable) =
            partition_owners(&requirements, &jobs.excluded_requirement_types);
        counters.requirements_found = actionable;
        counters.unsigned_skipped = unsigned.len();
        counters.users_found = signed.len() + unsigned.len();
        counters.total_candidates = signed.len();

        tracing::info!(
            hours_back = hours_back,
            requirements = actionable,
            signed_users = signed.len(),
            unsigned_users = unsigned.len(),
            "Discovered users with new actionable requirements"
        );

        for batch in signed.chunks(options.batch_size_or(jobs)) {
            if !budget.begin_batch().await {
                break;
            }

            for &user_id in batch {
                counters.users_checked += 1;

                let outcome = if run.dry_run() {
                    store
                        .find_user_score(user_id)
                        .await
                        .map(|existing| predict_prioritize(existing.as_ref()))
                } else {
                    store.prioritize_outstanding(user_id).await
                };

                match outcome {
                    Ok(outcome) => {
                        if outcome == PrioritizeOutcome::UnsignedMembershipKept {
                            tracing::debug!(user_id = user_id, "User stays in unsigned queue");
                        }
                        counters.record(outcome);
                    }
                    Err(err) => run.record_item_error(user_id, err)?,
                }
            }
        }

        Ok(!budget.is_exhausted())
    }
}
