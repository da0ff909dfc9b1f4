use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::constants::{QueueType, TOP_PRIORITY_SCORE};

/// UserCallScore is the local priority record for one known user.
/// Maps to `user_call_scores` table
///
/// A user holds at most one queue membership; rows are demoted (inactive, no queue)
/// rather than deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UserCallScore {
    pub user_id: i64,
    /// Lower is called sooner; 0 is the front of the queue
    pub current_score: i32,
    pub current_queue_type: Option<QueueType>,
    pub is_active: bool,
    pub total_attempts: i32,
    pub last_call_at: Option<DateTime<Utc>>,
    pub last_queue_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserCallScore {
    pub fn is_in_queue(&self, queue: QueueType) -> bool {
        self.current_queue_type == Some(queue)
    }

    /// Row state after a conversion demotes the user out of every queue
    pub fn is_demoted(&self) -> bool {
        self.current_queue_type.is_none() && !self.is_active && self.current_score == TOP_PRIORITY_SCORE
    }
}

/// New UserCallScore for creation (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUserCallScore {
    pub user_id: i64,
    pub current_score: i32,
    pub current_queue_type: Option<QueueType>,
    pub is_active: bool,
}

impl NewUserCallScore {
    /// Seed row for a user the operational database just created.
    ///
    /// Unsigned users go straight into `unsigned_users`; signed users get no queue until
    /// an actionable requirement appears.
    pub fn discovered(user_id: i64, has_signature: bool) -> Self {
        Self {
            user_id,
            current_score: TOP_PRIORITY_SCORE,
            current_queue_type: if has_signature {
                None
            } else {
                Some(QueueType::UnsignedUsers)
            },
            is_active: true,
        }
    }
}

/// What an outstanding-requests upsert did to the row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrioritizeOutcome {
    /// No row existed; one was inserted in `outstanding_requests`
    Created,
    /// Existing row moved (or re-prioritized) into `outstanding_requests`
    Updated,
    /// Row is still in `unsigned_users` and was left untouched
    UnsignedMembershipKept,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovered_unsigned_user_is_queued() {
        let row = NewUserCallScore::discovered(42, false);
        assert_eq!(row.current_queue_type, Some(QueueType::UnsignedUsers));
        assert_eq!(row.current_score, 0);
        assert!(row.is_active);
    }

    #[test]
    fn test_discovered_signed_user_has_no_queue() {
        let row = NewUserCallScore::discovered(42, true);
        assert_eq!(row.current_queue_type, None);
        assert_eq!(row.current_score, 0);
        assert!(row.is_active);
    }
}
