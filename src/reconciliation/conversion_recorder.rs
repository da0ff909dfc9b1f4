//! Shared exit path for both cleanup jobs: demote the user if they are still in the
//! queue being cleaned, then log a conversion unless one was already recorded for
//! the user inside the duplicate window.

use chrono::Utc;
use std::sync::Arc;

use crate::config::JobsConfig;
use crate::constants::ConversionType;
use crate::database::LocalStore;
use crate::error::Result;
use crate::models::{Conversion, NewConversion, UserCallScore};

#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    /// Demoted and a conversion was logged; `None` in dry runs
    Converted(Option<Conversion>),
    /// Demoted, but a conversion already existed inside the duplicate window
    DuplicateSkipped,
    /// The row left the queue before the conditional update applied
    RaceLost,
}

pub struct ConversionRecorder {
    store: Arc<dyn LocalStore>,
    duplicate_window: chrono::Duration,
}

impl ConversionRecorder {
    pub fn new(store: Arc<dyn LocalStore>, jobs: &JobsConfig) -> Self {
        Self {
            store,
            duplicate_window: jobs.duplicate_conversion_window(),
        }
    }

    pub async fn convert(
        &self,
        score: &UserCallScore,
        conversion_type: ConversionType,
        reason: &str,
        dry_run: bool,
    ) -> Result<ConversionOutcome> {
        let queue = conversion_type.source_queue();

        if dry_run {
            // the candidate row was read from this queue moments ago
            if !score.is_in_queue(queue) {
                return Ok(ConversionOutcome::RaceLost);
            }
        } else if !self.store.demote_if_in_queue(score.user_id, queue).await? {
            tracing::debug!(
                user_id = score.user_id,
                queue = %queue,
                "User left the queue before demotion, skipping conversion"
            );
            return Ok(ConversionOutcome::RaceLost);
        }

        let now = Utc::now();
        if self
            .store
            .conversion_exists_since(score.user_id, now - self.duplicate_window)
            .await?
        {
            tracing::info!(
                user_id = score.user_id,
                conversion_type = %conversion_type,
                "Conversion already logged inside duplicate window"
            );
            return Ok(ConversionOutcome::DuplicateSkipped);
        }

        if dry_run {
            return Ok(ConversionOutcome::Converted(None));
        }

        let conversion = self
            .store
            .insert_conversion(&NewConversion::from_score(score, conversion_type, reason, now))
            .await?;

        tracing::info!(
            user_id = score.user_id,
            conversion_id = %conversion.id,
            conversion_type = %conversion_type,
            final_score = conversion.final_score,
            "Conversion logged"
        );

        Ok(ConversionOutcome::Converted(Some(conversion)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::QueueType;
    use crate::test_helpers::InMemoryLocalStore;

    fn recorder(store: &Arc<InMemoryLocalStore>) -> ConversionRecorder {
        ConversionRecorder::new(store.clone(), &JobsConfig::default())
    }

    #[tokio::test]
    async fn test_converts_user_still_in_queue() {
        let store = Arc::new(InMemoryLocalStore::new());
        let score = store.seed_score(10, Some(QueueType::UnsignedUsers), 4);

        let outcome = recorder(&store)
            .convert(&score, ConversionType::SignatureObtained, "signed", false)
            .await
            .unwrap();

        let ConversionOutcome::Converted(Some(conversion)) = outcome else {
            panic!("expected a logged conversion");
        };
        assert_eq!(conversion.previous_queue_type, QueueType::UnsignedUsers);
        assert_eq!(conversion.final_score, 4);
        assert!(conversion.signature_obtained);
        assert!(store.score(10).unwrap().is_demoted());
    }

    #[tokio::test]
    async fn test_lost_race_writes_nothing() {
        let store = Arc::new(InMemoryLocalStore::new());
        let score = store.seed_score(10, Some(QueueType::UnsignedUsers), 4);
        store.set_queue(10, None);

        let outcome = recorder(&store)
            .convert(&score, ConversionType::SignatureObtained, "signed", false)
            .await
            .unwrap();

        assert_eq!(outcome, ConversionOutcome::RaceLost);
        assert!(store.conversions().is_empty());
    }

    #[tokio::test]
    async fn test_recent_conversion_suppresses_duplicate() {
        let store = Arc::new(InMemoryLocalStore::new());
        let score = store.seed_score(10, Some(QueueType::OutstandingRequests), 2);
        store.seed_conversion(10, ConversionType::SignatureObtained, Utc::now());

        let outcome = recorder(&store)
            .convert(&score, ConversionType::RequirementsCompleted, "done", false)
            .await
            .unwrap();

        assert_eq!(outcome, ConversionOutcome::DuplicateSkipped);
        assert_eq!(store.conversions().len(), 1);
        assert!(store.score(10).unwrap().is_demoted());
    }

    #[tokio::test]
    async fn test_dry_run_leaves_store_untouched() {
        let store = Arc::new(InMemoryLocalStore::new());
        let score = store.seed_score(10, Some(QueueType::UnsignedUsers), 4);

        let outcome = recorder(&store)
            .convert(&score, ConversionType::SignatureObtained, "signed", true)
            .await
            .unwrap();

        assert_eq!(outcome, ConversionOutcome::Converted(None));
        assert!(store.conversions().is_empty());
        assert!(store.score(10).unwrap().is_in_queue(QueueType::UnsignedUsers));
    }
}
