//! # Agent Attribution
//!
//! Credits recent conversions to the agents who talked to the user beforehand. The
//! agent on the most recent qualifying call is primary; every other distinct agent
//! in the look-back window is contributing. Conversions with no qualifying call stay
//! unattributed and are re-examined on later runs while inside the look-back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

use crate::context::ReconcilerContext;
use crate::error::Result;
use crate::models::{CallSession, Conversion};
use crate::reconciliation::batch::{ExecutionBudget, JobOptions};
use crate::reconciliation::result::{JobCounters, JobKind, JobResult, JobRun};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAttribution {
    pub primary_agent_id: i64,
    /// Distinct agents other than the primary, most recent first
    pub contributing_agents: Vec<i64>,
}

/// Pick primary and contributing agents from qualifying sessions.
///
/// Sessions are ordered by start time descending; ties go to the longer call, then
/// the lower agent id, so the result does not depend on input order.
pub fn attribute_agents(sessions: &[CallSession]) -> Option<AgentAttribution> {
    let mut ordered: Vec<&CallSession> = sessions.iter().collect();
    ordered.sort_by(|a, b| {
        b.started_at
            .cmp(&a.started_at)
            .then_with(|| b.talk_time_seconds.cmp(&a.talk_time_seconds))
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });

    let mut seen = HashSet::new();
    let mut agents = ordered
        .into_iter()
        .map(|session| session.agent_id)
        .filter(|agent_id| seen.insert(*agent_id));

    let primary_agent_id = agents.next()?;
    Some(AgentAttribution {
        primary_agent_id,
        contributing_agents: agents.collect(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionCounters {
    pub total_candidates: usize,
    pub conversions_checked: usize,
    pub conversions_attributed: usize,
    pub no_agent_interaction: usize,
    pub already_attributed: usize,
    pub contributing_agents_assigned: usize,
}

impl JobCounters for AttributionCounters {
    fn summary(&self) -> String {
        format!(
            "Checked {} of {} unattributed conversions; attributed {} ({} contributing agents), {} with no qualifying call, {} attributed concurrently",
            self.conversions_checked,
            self.total_candidates,
            self.conversions_attributed,
            self.contributing_agents_assigned,
            self.no_agent_interaction,
            self.already_attributed
        )
    }
}

pub struct AgentAttributionJob {
    context: Arc<ReconcilerContext>,
}

impl AgentAttributionJob {
    pub fn new(context: Arc<ReconcilerContext>) -> Self {
        Self { context }
    }

    #[instrument(skip(self), fields(job = "attribution"))]
    pub async fn run(&self, options: &JobOptions) -> JobResult<AttributionCounters> {
        let mut run = JobRun::start(JobKind::Attribution, options.dry_run);
        let mut counters = AttributionCounters::default();

        match self.process(options, &mut run, &mut counters).await {
            Ok(completed) => run.finish(completed, counters),
            Err(err) => run.abort(err, counters),
        }
    }

    async fn process(
        &self,
        options: &JobOptions,
        run: &mut JobRun,
        counters: &mut AttributionCounters,
    ) -> Result<bool> {
        options.validate()?;
        let jobs = self.context.jobs();
        let mut budget = ExecutionBudget::from_config(jobs);

        let hours_back = options.hours_back_or(jobs.attribution_hours_back);
        let since = options.cutoff(Utc::now(), jobs.attribution_hours_back)?;

        let conversions = self.context.store().unattributed_conversions(since).await?;
        counters.total_candidates = conversions.len();
        tracing::info!(
            hours_back = hours_back,
            candidates = conversions.len(),
            "Loaded unattributed conversions"
        );

        for batch in conversions.chunks(options.batch_size_or(jobs)) {
            if !budget.begin_batch().await {
                break;
            }

            for conversion in batch {
                counters.conversions_checked += 1;
                if let Err(err) = self.attribute(conversion, run.dry_run(), counters).await {
                    run.record_item_error(conversion.user_id, err)?;
                }
            }
        }

        Ok(!budget.is_exhausted())
    }

    async fn attribute(
        &self,
        conversion: &Conversion,
        dry_run: bool,
        counters: &mut AttributionCounters,
    ) -> Result<()> {
        // selected unattributed, but a concurrent run may have filled it in since
        if conversion.is_attributed() {
            counters.already_attributed += 1;
            return Ok(());
        }

        let jobs = self.context.jobs();
        let window_start = conversion.converted_at - jobs.attribution_lookback();
        let sessions = self
            .context
            .call_history()
            .qualifying_sessions(
                conversion.user_id,
                window_start,
                conversion.converted_at,
                jobs.min_talk_time_seconds,
            )
            .await?;

        let Some(attribution) = attribute_agents(&sessions) else {
            tracing::debug!(
                conversion_id = %conversion.id,
                user_id = conversion.user_id,
                "No qualifying agent interaction"
            );
            counters.no_agent_interaction += 1;
            return Ok(());
        };

        let applied = dry_run
            || self
                .context
                .store()
                .assign_attribution(
                    conversion.id,
                    attribution.primary_agent_id,
                    &attribution.contributing_agents,
                )
                .await?;

        if applied {
            tracing::info!(
                conversion_id = %conversion.id,
                primary_agent_id = attribution.primary_agent_id,
                contributing = attribution.contributing_agents.len(),
                "Conversion attributed"
            );
            counters.conversions_attributed += 1;
            counters.contributing_agents_assigned += attribution.contributing_agents.len();
        } else {
            counters.already_attributed += 1;
        }

        Ok(())
    }
}
