//! # Job Results
//!
//! Every job reports the same envelope (timing, success, error list, completion
//! status) plus job-specific counters flattened into the same JSON object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::error::ReconcilerError;
use crate::logging::log_job_operation;

/// Which reconciliation job produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    NewUsers,
    NewRequirements,
    SignatureCleanup,
    OutstandingCleanup,
    Attribution,
}

impl JobKind {
    /// Discovery first, then cleanup, then attribution of what cleanup produced
    pub const PIPELINE: [JobKind; 5] = [
        JobKind::NewUsers,
        JobKind::NewRequirements,
        JobKind::SignatureCleanup,
        JobKind::OutstandingCleanup,
        JobKind::Attribution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::NewUsers => "new_users",
            JobKind::NewRequirements => "new_requirements",
            JobKind::SignatureCleanup => "signature_cleanup",
            JobKind::OutstandingCleanup => "outstanding_cleanup",
            JobKind::Attribution => "attribution",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the run covered every candidate or stopped early on its time budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStrategy {
    CompleteProcessing,
    PriorityProcessing,
}

/// Job-specific counters carried inside a [`JobResult`]
pub trait JobCounters: Serialize + Default {
    /// One-line human summary of what the run did
    fn summary(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult<C> {
    pub job: JobKind,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    /// False only when the run aborted; per-item failures are listed in `errors`
    pub success: bool,
    pub errors: Vec<String>,
    pub summary: String,
    pub completed: bool,
    pub processing_strategy: ProcessingStrategy,
    pub dry_run: bool,
    #[serde(flatten)]
    pub counters: C,
}

/// Accumulates the envelope fields while a job runs
#[derive(Debug)]
pub struct JobRun {
    job: JobKind,
    timestamp: DateTime<Utc>,
    started: Instant,
    dry_run: bool,
    errors: Vec<String>,
}

impl JobRun {
    pub fn start(job: JobKind, dry_run: bool) -> Self {
        log_job_operation(
            job.as_str(),
            "run",
            "started",
            dry_run.then_some("dry run"),
        );

        Self {
            job,
            timestamp: Utc::now(),
            started: Instant::now(),
            dry_run,
            errors: Vec::new(),
        }
    }

    pub fn job(&self) -> JobKind {
        self.job
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Record a failure for one user and keep going, unless the failure is a
    /// circuit breaker rejection: every later call would be rejected too, so the
    /// error is handed back to abort the run.
    pub fn record_item_error(
        &mut self,
        user_id: i64,
        err: ReconcilerError,
    ) -> Result<(), ReconcilerError> {
        if err.is_circuit_open() {
            return Err(err);
        }

        tracing::error!(job = %self.job, user_id = user_id, error = %err, "Failed to process user");
        self.errors.push(format!("user {user_id}: {err}"));
        Ok(())
    }

    /// Record a failure not tied to a single user
    pub fn record_error(&mut self, context: &str, err: ReconcilerError) -> Result<(), ReconcilerError> {
        if err.is_circuit_open() {
            return Err(err);
        }

        tracing::error!(job = %self.job, context = context, error = %err, "Job step failed");
        self.errors.push(format!("{context}: {err}"));
        Ok(())
    }

    pub fn finish<C: JobCounters>(self, completed: bool, counters: C) -> JobResult<C> {
        let summary = counters.summary();
        let status = if completed { "completed" } else { "truncated" };
        log_job_operation(self.job.as_str(), "run", status, Some(&summary));
        self.into_result(true, completed, summary, counters)
    }

    /// The run could not continue; counters reflect the work done before the failure
    pub fn abort<C: JobCounters>(mut self, err: ReconcilerError, counters: C) -> JobResult<C> {
        let summary = format!("Aborted: {err}. Before abort: {}", counters.summary());
        tracing::error!(job = %self.job, error = %err, "Job aborted");
        log_job_operation(self.job.as_str(), "run", "aborted", Some(&summary));
        self.errors.push(err.to_string());
        self.into_result(false, false, summary, counters)
    }

    fn into_result<C>(self, success: bool, completed: bool, summary: String, counters: C) -> JobResult<C> {
        JobResult {
            job: self.job,
            timestamp: self.timestamp,
            duration_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            success,
            errors: self.errors,
            summary,
            completed,
            processing_strategy: if completed {
                ProcessingStrategy::CompleteProcessing
            } else {
                ProcessingStrategy::PriorityProcessing
            },
            dry_run: self.dry_run,
            counters,
        }
    }
}
