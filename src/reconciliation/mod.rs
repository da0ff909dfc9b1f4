//! # Reconciliation Jobs
//!
//! The five scheduled jobs that keep the local call queue consistent with the
//! operational database:
//!
//! - [`new_users`] - seed score rows for newly registered users
//! - [`new_requirements`] - prioritize signed users with new actionable requirements
//! - [`signature_cleanup`] - convert unsigned-queue users who have since signed
//! - [`outstanding_cleanup`] - convert outstanding-queue users whose work is done
//! - [`attribution`] - credit conversions to the agents who spoke to the user
//!
//! Each job is safe to re-run at any time, bounds its own wall-clock time, and
//! reports a [`JobResult`] rather than failing outright.

pub mod attribution;
pub mod batch;
pub mod conversion_recorder;
pub mod new_requirements;
pub mod new_users;
pub mod outstanding_cleanup;
pub mod result;
pub mod signature_cleanup;

pub use attribution::{attribute_agents, AgentAttribution, AgentAttributionJob, AttributionCounters};
pub use batch::{ExecutionBudget, JobOptions};
pub use conversion_recorder::{ConversionOutcome, ConversionRecorder};
pub use new_requirements::{NewRequirementDiscovery, NewRequirementsCounters};
pub use new_users::{NewUserDiscovery, NewUsersCounters};
pub use outstanding_cleanup::{OutstandingCleanupCounters, OutstandingRequirementsCleanup};
pub use result::{JobCounters, JobKind, JobResult, JobRun, ProcessingStrategy};
pub use signature_cleanup::{SignatureCleanupCounters, SignatureConversionCleanup};

use serde::Serialize;
use std::sync::Arc;

use crate::context::ReconcilerContext;

/// Result of any job, serialized as that job's own JSON shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobReport {
    NewUsers(JobResult<NewUsersCounters>),
    NewRequirements(JobResult<NewRequirementsCounters>),
    SignatureCleanup(JobResult<SignatureCleanupCounters>),
    OutstandingCleanup(JobResult<OutstandingCleanupCounters>),
    Attribution(JobResult<AttributionCounters>),
}

impl JobReport {
    pub fn job(&self) -> JobKind {
        match self {
            JobReport::NewUsers(result) => result.job,
            JobReport::NewRequirements(result) => result.job,
            JobReport::SignatureCleanup(result) => result.job,
            JobReport::OutstandingCleanup(result) => result.job,
            JobReport::Attribution(result) => result.job,
        }
    }

    pub fn success(&self) -> bool {
        match self {
            JobReport::NewUsers(result) => result.success,
            JobReport::NewRequirements(result) => result.success,
            JobReport::SignatureCleanup(result) => result.success,
            JobReport::OutstandingCleanup(result) => result.success,
            JobReport::Attribution(result) => result.success,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            JobReport::NewUsers(result) => &result.summary,
            JobReport::NewRequirements(result) => &result.summary,
            JobReport::SignatureCleanup(result) => &result.summary,
            JobReport::OutstandingCleanup(result) => &result.summary,
            JobReport::Attribution(result) => &result.summary,
        }
    }
}

/// Entry point used by the scheduler binary
#[derive(Clone)]
pub struct Reconciler {
    context: Arc<ReconcilerContext>,
}

impl Reconciler {
    pub fn new(context: Arc<ReconcilerContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<ReconcilerContext> {
        &self.context
    }

    pub async fn run(&self, job: JobKind, options: &JobOptions) -> JobReport {
        let context = self.context.clone();
        match job {
            JobKind::NewUsers => {
                JobReport::NewUsers(NewUserDiscovery::new(context).run(options).await)
            }
            JobKind::NewRequirements => JobReport::NewRequirements(
                NewRequirementDiscovery::new(context).run(options).await,
            ),
            JobKind::SignatureCleanup => JobReport::SignatureCleanup(
                SignatureConversionCleanup::new(context).run(options).await,
            ),
            JobKind::OutstandingCleanup => JobReport::OutstandingCleanup(
                OutstandingRequirementsCleanup::new(context).run(options).await,
            ),
            JobKind::Attribution => {
                JobReport::Attribution(AgentAttributionJob::new(context).run(options).await)
            }
        }
    }

    /// Run every job in pipeline order. A failed job does not stop later ones; each
    /// reads fresh state, so a later job simply sees less to do.
    pub async fn run_pipeline(&self, options: &JobOptions) -> Vec<JobReport> {
        let mut reports = Vec::with_capacity(JobKind::PIPELINE.len());
        for job in JobKind::PIPELINE {
            let report = self.run(job, options).await;
            tracing::info!(
                job = %job,
                success = report.success(),
                summary = report.summary(),
                "Pipeline step finished"
            );
            reports.push(report);
        }
        reports
    }
}
