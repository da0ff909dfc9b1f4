//! # Batch Execution
//!
//! Candidates are processed in fixed-size slices. Before each slice the job waits
//! out the inter-batch delay and checks its wall-clock budget; once the budget is
//! spent no new slice starts and the run reports itself as truncated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::JobsConfig;
use crate::constants::MAX_LOOKBACK_HOURS;
use crate::error::{ReconcilerError, Result};

/// Per-invocation overrides supplied by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    /// Discovery/attribution look-back in hours; job default when absent
    pub hours_back: Option<i64>,
    /// Perform every read and compute every intended write without writing
    pub dry_run: bool,
    pub batch_size: Option<usize>,
}

impl JobOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(hours) = self.hours_back {
            if hours <= 0 {
                return Err(ReconcilerError::Validation(format!(
                    "hoursBack must be positive, got {hours}"
                )));
            }
            if hours > MAX_LOOKBACK_HOURS {
                return Err(ReconcilerError::Validation(format!(
                    "hoursBack must not exceed {MAX_LOOKBACK_HOURS}, got {hours}"
                )));
            }
        }

        if self.batch_size == Some(0) {
            return Err(ReconcilerError::Validation(
                "batchSize must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn hours_back_or(&self, default_hours: i64) -> i64 {
        self.hours_back.unwrap_or(default_hours)
    }

    /// Start of the look-back window ending at `now`
    pub fn cutoff(&self, now: DateTime<Utc>, default_hours: i64) -> Result<DateTime<Utc>> {
        let hours = self.hours_back_or(default_hours);
        chrono::Duration::try_hours(hours)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                ReconcilerError::Validation(format!(
                    "hoursBack {hours} reaches outside the representable time range"
                ))
            })
    }

    pub fn batch_size_or(&self, jobs: &JobsConfig) -> usize {
        self.batch_size.unwrap_or(jobs.default_batch_size).max(1)
    }
}

/// Wall-clock budget for one job invocation
#[derive(Debug)]
pub struct ExecutionBudget {
    started: Instant,
    limit: Duration,
    inter_batch_delay: Duration,
    batches_started: usize,
    exhausted: bool,
}

impl ExecutionBudget {
    pub fn new(limit: Duration, inter_batch_delay: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit,
            inter_batch_delay,
            batches_started: 0,
            exhausted: false,
        }
    }

    pub fn from_config(jobs: &JobsConfig) -> Self {
        Self::new(jobs.max_execution_time(), jobs.inter_batch_delay())
    }

    /// Gate the next batch. Returns false once the budget is spent; the caller
    /// must stop starting work. The first batch is never delayed.
    pub async fn begin_batch(&mut self) -> bool {
        if self.exhausted {
            return false;
        }

        if self.batches_started > 0 && !self.inter_batch_delay.is_zero() {
            tokio::time::sleep(self.inter_batch_delay).await;
        }

        if self.started.elapsed() >= self.limit {
            self.exhausted = true;
            tracing::warn!(
                batches_started = self.batches_started,
                elapsed_ms = self.elapsed().as_millis() as u64,
                limit_ms = self.limit.as_millis() as u64,
                "Execution budget exhausted, stopping before next batch"
            );
            return false;
        }

        self.batches_started += 1;
        true
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True when at least one batch was skipped for lack of time
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn batches_started(&self) -> usize {
        self.batches_started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_validation() {
        assert!(JobOptions::default().validate().is_ok());

        let negative = JobOptions {
            hours_back: Some(-1),
            ..JobOptions::default()
        };
        assert!(negative.validate().is_err());

        let too_wide = JobOptions {
            hours_back: Some(3_000_000_000),
            ..JobOptions::default()
        };
        assert!(too_wide.validate().is_err());

        let empty_batch = JobOptions {
            batch_size: Some(0),
            ..JobOptions::default()
        };
        assert!(empty_batch.validate().is_err());
    }

    #[test]
    fn test_options_deserialize_camel_case() {
        let options: JobOptions =
            serde_json::from_str(r#"{"hoursBack": 6, "dryRun": true}"#).unwrap();
        assert_eq!(options.hours_back, Some(6));
        assert!(options.dry_run);
        assert_eq!(options.batch_size, None);
        assert_eq!(options.batch_size_or(&JobsConfig::default()), 50);
    }

    #[test]
    fn test_cutoff_uses_override_or_default() {
        let now = Utc::now();
        let defaulted = JobOptions::default().cutoff(now, 2).unwrap();
        assert_eq!(now - defaulted, chrono::Duration::hours(2));

        let widened = JobOptions {
            hours_back: Some(6),
            ..JobOptions::default()
        };
        assert_eq!(now - widened.cutoff(now, 2).unwrap(), chrono::Duration::hours(6));
    }

    #[test]
    fn test_cutoff_overflow_is_a_validation_error() {
        let options = JobOptions {
            hours_back: Some(i64::MAX),
            ..JobOptions::default()
        };
        let err = options.cutoff(Utc::now(), 2).unwrap_err();
        assert!(matches!(err, ReconcilerError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_stops_after_limit() {
        let mut budget = ExecutionBudget::new(Duration::from_millis(250), Duration::from_millis(100));

        assert!(budget.begin_batch().await);
        assert!(budget.begin_batch().await);
        assert!(budget.begin_batch().await);
        // third delay lands at 300ms, past the 250ms limit
        assert!(!budget.begin_batch().await);
        assert!(budget.is_exhausted());
        assert_eq!(budget.batches_started(), 3);
        assert!(!budget.begin_batch().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_batch_is_not_delayed() {
        let mut budget = ExecutionBudget::new(Duration::from_secs(1), Duration::from_millis(500));
        assert!(budget.begin_batch().await);
        assert_eq!(budget.elapsed(), Duration::ZERO);
    }
}
