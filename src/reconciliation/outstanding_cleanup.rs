//! # Outstanding Requirements Cleanup
//!
//! Re-checks every member of `outstanding_requests`. A user converts once no
//! actionable requirement is pending on any of their claims and a signature is on
//! file. Excluded requirement types never block completion.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use crate::context::ReconcilerContext;
use crate::constants::{ConversionType, QueueType};
use crate::error::Result;
use crate::models::RequirementStatus;
use crate::reconciliation::batch::{ExecutionBudget, JobOptions};
use crate::reconciliation::conversion_recorder::{ConversionOutcome, ConversionRecorder};
use crate::reconciliation::result::{JobCounters, JobKind, JobResult, JobRun};

const REQUIREMENTS_CONVERSION_REASON: &str = "All actionable requirements completed";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstandingCleanupCounters {
    pub total_candidates: usize,
    pub users_checked: usize,
    pub requirements_cleared: usize,
    pub still_outstanding: usize,
    pub missing_signature: usize,
    pub users_converted: usize,
    pub conversions_logged: usize,
    pub races_lost: usize,
    pub duplicates_skipped: usize,
}

impl JobCounters for OutstandingCleanupCounters {
    fn summary(&self) -> String {
        format!(
            "Checked {} of {} outstanding users; {} cleared, {} converted ({} conversions logged, {} duplicates skipped, {} races lost), {} still outstanding, {} missing signature",
            self.users_checked,
            self.total_candidates,
            self.requirements_cleared,
            self.users_converted,
            self.conversions_logged,
            self.duplicates_skipped,
            self.races_lost,
            self.still_outstanding,
            self.missing_signature
        )
    }
}

impl OutstandingCleanupCounters {
    fn record(&mut self, outcome: &ConversionOutcome) {
        match outcome {
            ConversionOutcome::Converted(_) => {
                self.users_converted += 1;
                self.conversions_logged += 1;
            }
            ConversionOutcome::DuplicateSkipped => {
                self.users_converted += 1;
                self.duplicates_skipped += 1;
            }
            ConversionOutcome::RaceLost => self.races_lost += 1,
        }
    }
}

pub struct OutstandingRequirementsCleanup {
    context: Arc<ReconcilerContext>,
}

impl OutstandingRequirementsCleanup {
    pub fn new(context: Arc<ReconcilerContext>) -> Self {
        Self { context }
    }

    #[instrument(skip(self), fields(job = "outstanding_cleanup"))]
    pub async fn run(&self, options: &JobOptions) -> JobResult<OutstandingCleanupCounters> {
        let mut run = JobRun::start(JobKind::OutstandingCleanup, options.dry_run);
        let mut counters = OutstandingCleanupCounters::default();

        match self.process(options, &mut run, &mut counters).await {
            Ok(completed) => run.finish(completed, counters),
            Err(err) => run.abort(err, counters),
        }
    }

    async fn process(
        &self,
        options: &JobOptions,
        run: &mut JobRun,
        counters: &mut OutstandingCleanupCounters,
    ) -> Result<bool> {
        options.validate()?;
        let jobs = self.context.jobs();
        let mut budget = ExecutionBudget::from_config(jobs);
        let store = self.context.store();
        let recorder = ConversionRecorder::new(store.clone(), jobs);

        let candidates = store.queue_members(QueueType::OutstandingRequests).await?;
        counters.total_candidates = candidates.len();
        tracing::info!(candidates = candidates.len(), "Loaded outstanding queue members");

        for batch in candidates.chunks(options.batch_size_or(jobs)) {
            if !budget.begin_batch().await {
                break;
            }

            let user_ids: Vec<i64> = batch.iter().map(|score| score.user_id).collect();
            let statuses: HashMap<i64, RequirementStatus> = self
                .context
                .source()
                .requirement_statuses(&user_ids, &jobs.excluded_requirement_types)
                .await?
                .into_iter()
                .map(|status| (status.user_id, status))
                .collect();

            let mut unchanged = Vec::new();
            for score in batch {
                counters.users_checked += 1;

                let Some(status) = statuses.get(&score.user_id) else {
                    tracing::warn!(user_id = score.user_id, "Queued user not found in operational database");
                    counters.still_outstanding += 1;
                    unchanged.push(score.user_id);
                    continue;
                };

                if status.pending_count > 0 {
                    counters.still_outstanding += 1;
                    unchanged.push(score.user_id);
                    continue;
                }

                counters.requirements_cleared += 1;
                if !status.has_signature {
                    counters.missing_signature += 1;
                    unchanged.push(score.user_id);
                    continue;
                }

                match recorder
                    .convert(
                        score,
                        ConversionType::RequirementsCompleted,
                        REQUIREMENTS_CONVERSION_REASON,
                        run.dry_run(),
                    )
                    .await
                {
                    Ok(outcome) => counters.record(&outcome),
                    Err(err) => run.record_item_error(score.user_id, err)?,
                }
            }

            if !run.dry_run() {
                if let Err(err) = store.mark_queue_checked(&unchanged, Utc::now()).await {
                    run.record_error("mark_queue_checked", err)?;
                }
            }
        }

        Ok(!budget.is_exhausted())
    }
}
