//! # Signature Conversion Cleanup
//!
//! Re-checks every member of `unsigned_users` against the operational database.
//! Users who have since signed are demoted and a `signature_obtained` conversion is
//! logged; users still unsigned get their `last_queue_check` stamped so the next run
//! starts with whoever has gone longest without a check.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

use crate::context::ReconcilerContext;
use crate::constants::{ConversionType, QueueType};
use crate::error::Result;
use crate::reconciliation::batch::{ExecutionBudget, JobOptions};
use crate::reconciliation::conversion_recorder::{ConversionOutcome, ConversionRecorder};
use crate::reconciliation::result::{JobCounters, JobKind, JobResult, JobRun};

const SIGNATURE_CONVERSION_REASON: &str = "Signature file present in operational database";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureCleanupCounters {
    pub total_candidates: usize,
    pub users_checked: usize,
    pub signatures_found: usize,
    pub still_unsigned: usize,
    pub users_converted: usize,
    pub conversions_logged: usize,
    pub races_lost: usize,
    pub duplicates_skipped: usize,
}

impl JobCounters for SignatureCleanupCounters {
    fn summary(&self) -> String {
        format!(
            "Checked {} of {} unsigned users; {} signed, {} converted ({} conversions logged, {} duplicates skipped, {} races lost), {} still unsigned",
            self.users_checked,
            self.total_candidates,
            self.signatures_found,
            self.users_converted,
            self.conversions_logged,
            self.duplicates_skipped,
            self.races_lost,
            self.still_unsigned
        )
    }
}

impl SignatureCleanupCounters {
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

pub struct SignatureConversionCleanup {
    context: Arc<ReconcilerContext>,
}

impl SignatureConversionCleanup {
    pub fn new(context: Arc<ReconcilerContext>) -> Self {
        Self { context }
    }

    #[instrument(skip(self), fields(job = "signature_cleanup"))]
    pub async fn run(&self, options: &JobOptions) -> JobResult<SignatureCleanupCounters> {
        let mut run = JobRun::start(JobKind::SignatureCleanup, options.dry_run);
        let mut counters = SignatureCleanupCounters::default();

        match self.process(options, &mut run, &mut counters).await {
            Ok(completed) => run.finish(completed, counters),
            Err(err) => run.abort(err, counters),
        }
    }

    async fn process(
        &self,
        options: &JobOptions,
        run: &mut JobRun,
        counters: &mut SignatureCleanupCounters,
    ) -> Result<bool> {
        options.validate()?;
        let jobs = self.context.jobs();
        let mut budget = ExecutionBudget::from_config(jobs);
        let store = self.context.store();
        let recorder = ConversionRecorder::new(store.clone(), jobs);

        let candidates = store.queue_members(QueueType::UnsignedUsers).await?;
        counters.total_candidates = candidates.len();
        tracing::info!(candidates = candidates.len(), "Loaded unsigned queue members");

        for batch in candidates.chunks(options.batch_size_or(jobs)) {
            if !budget.begin_batch().await {
                break;
            }

            let user_ids: Vec<i64> = batch.iter().map(|score| score.user_id).collect();
            let signed: HashSet<i64> = self
                .context
                .source()
                .signature_states(&user_ids)
                .await?
                .into_iter()
                .filter(|state| state.has_signature)
                .map(|state| state.user_id)
                .collect();

            let mut unchanged = Vec::new();
            for score in batch {
                counters.users_checked += 1;

                if !signed.contains(&score.user_id) {
                    counters.still_unsigned += 1;
                    unchanged.push(score.user_id);
                    continue;
                }

                counters.signatures_found += 1;
                match recorder
                    .convert(
                        score,
                        ConversionType::SignatureObtained,
                        SIGNATURE_CONVERSION_REASON,
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
