//! # Call History
//!
//! Read-only access to the dialler's call sessions, used to credit agents for
//! conversions after the fact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::constants::COMPLETED_CALL_STATUS;
use crate::error::Result;
use crate::models::CallSession;

/// Read interface over call history written by the dialler
#[async_trait]
pub trait CallHistoryRepository: Send + Sync {
    /// Completed sessions for `user_id` started inside `[window_start, window_end]` with
    /// talk time strictly above `min_talk_time_seconds`, most recent first
    async fn qualifying_sessions(
        &self,
        user_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        min_talk_time_seconds: i32,
    ) -> Result<Vec<CallSession>>;
}

#[derive(Debug, Clone)]
pub struct PgCallHistoryRepository {
    pool: PgPool,
}

impl PgCallHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallHistoryRepository for PgCallHistoryRepository {
    async fn qualifying_sessions(
        &self,
        user_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        min_talk_time_seconds: i32,
    ) -> Result<Vec<CallSession>> {
        let sessions = sqlx::query_as::<_, CallSession>(
            r#"
            SELECT agent_id, user_id, started_at, talk_time_seconds, status
            FROM call_sessions
            WHERE user_id = $1
              AND started_at >= $2
              AND started_at <= $3
              AND talk_time_seconds > $4
              AND status = $5
            ORDER BY started_at DESC
            "#,
        )
        .bind(user_id)
        .bind(window_start)
        .bind(window_end)
        .bind(min_talk_time_seconds)
        .bind(COMPLETED_CALL_STATUS)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }
}
