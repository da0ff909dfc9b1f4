//! # Local Store
//!
//! The locally owned `user_call_scores` and `conversions` tables. Every mutation the
//! jobs perform is shaped to be safe under re-runs and under races with live
//! call-outcome handling:
//!
//! - seeding inserts skip on conflict instead of failing
//! - demotions only apply while the row is still in the expected queue
//! - attribution only applies while `primary_agent_id` is still null

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::constants::QueueType;
use crate::error::Result;
use crate::models::{Conversion, NewConversion, NewUserCallScore, PrioritizeOutcome, UserCallScore};

/// Write/read interface over the local scoring and conversion tables
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Subset of `user_ids` that already have a score row
    async fn existing_user_ids(&self, user_ids: &[i64]) -> Result<HashSet<i64>>;

    /// Insert a seed row; `Ok(false)` when a row already existed
    async fn insert_user_score(&self, new_score: &NewUserCallScore) -> Result<bool>;

    /// Move a user to the front of `outstanding_requests`, never touching `unsigned_users`
    async fn prioritize_outstanding(&self, user_id: i64) -> Result<PrioritizeOutcome>;

    /// Every row in `queue`, stalest check first, then highest priority, then newest user
    async fn queue_members(&self, queue: QueueType) -> Result<Vec<UserCallScore>>;

    async fn find_user_score(&self, user_id: i64) -> Result<Option<UserCallScore>>;

    /// Demote to no queue / score 0 / inactive only if still in `expected`.
    /// `Ok(false)` means someone else already moved the user.
    async fn demote_if_in_queue(&self, user_id: i64, expected: QueueType) -> Result<bool>;

    async fn mark_queue_checked(&self, user_ids: &[i64], checked_at: DateTime<Utc>) -> Result<u64>;

    /// Whether any conversion for the user was recorded at or after `since`
    async fn conversion_exists_since(&self, user_id: i64, since: DateTime<Utc>) -> Result<bool>;

    async fn insert_conversion(&self, new_conversion: &NewConversion) -> Result<Conversion>;

    /// Conversions at or after `since` with no primary agent, most recent first
    async fn unattributed_conversions(&self, since: DateTime<Utc>) -> Result<Vec<Conversion>>;

    /// Set attribution only while `primary_agent_id` is still null
    async fn assign_attribution(
        &self,
        conversion_id: Uuid,
        primary_agent_id: i64,
        contributing_agents: &[i64],
    ) -> Result<bool>;

    async fn health_check(&self) -> Result<()>;
}

const USER_CALL_SCORE_COLUMNS: &str = "user_id, current_score, current_queue_type, is_active, \
     total_attempts, last_call_at, last_queue_check, created_at, updated_at";

const CONVERSION_COLUMNS: &str = "id, user_id, previous_queue_type, conversion_type, \
     conversion_reason, final_score, total_call_attempts, last_call_at, signature_obtained, \
     converted_at, primary_agent_id, contributing_agents";

#[derive(Debug, Clone)]
pub struct PgLocalStore {
    pool: PgPool,
}

impl PgLocalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocalStore for PgLocalStore {
    async fn existing_user_ids(&self, user_ids: &[i64]) -> Result<HashSet<i64>> {
        if user_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let existing: Vec<i64> =
            sqlx::query_scalar("SELECT user_id FROM user_call_scores WHERE user_id = ANY($1)")
                .bind(user_ids)
                .fetch_all(&self.pool)
                .await?;

        Ok(existing.into_iter().collect())
    }

    async fn insert_user_score(&self, new_score: &NewUserCallScore) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_call_scores
                (user_id, current_score, current_queue_type, is_active, total_attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, NOW(), NOW())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(new_score.user_id)
        .bind(new_score.current_score)
        .bind(new_score.current_queue_type)
        .bind(new_score.is_active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn prioritize_outstanding(&self, user_id: i64) -> Result<PrioritizeOutcome> {
        // xmax = 0 distinguishes a fresh insert from the ON CONFLICT update path
        let inserted: Option<bool> = sqlx::query_scalar(
            r#"
            INSERT INTO user_call_scores
                (user_id, current_score, current_queue_type, is_active, total_attempts, created_at, updated_at)
            VALUES ($1, 0, 'outstanding_requests', TRUE, 0, NOW(), NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET current_queue_type = 'outstanding_requests',
                current_score = 0,
                is_active = TRUE,
                updated_at = NOW()
            WHERE user_call_scores.current_queue_type IS DISTINCT FROM 'unsigned_users'
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match inserted {
            Some(true) => PrioritizeOutcome::Created,
            Some(false) => PrioritizeOutcome::Updated,
            None => PrioritizeOutcome::UnsignedMembershipKept,
        })
    }

    async fn queue_members(&self, queue: QueueType) -> Result<Vec<UserCallScore>> {
        let sql = format!(
            r#"
            SELECT {USER_CALL_SCORE_COLUMNS}
            FROM user_call_scores
            WHERE current_queue_type = $1
            ORDER BY last_queue_check ASC NULLS FIRST, current_score ASC, user_id DESC
            "#
        );

        let members = sqlx::query_as::<_, UserCallScore>(&sql)
            .bind(queue)
            .fetch_all(&self.pool)
            .await?;

        Ok(members)
    }

    async fn find_user_score(&self, user_id: i64) -> Result<Option<UserCallScore>> {
        let sql = format!("SELECT {USER_CALL_SCORE_COLUMNS} FROM user_call_scores WHERE user_id = $1");

        let score = sqlx::query_as::<_, UserCallScore>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(score)
    }

    async fn demote_if_in_queue(&self, user_id: i64, expected: QueueType) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE user_call_scores
            SET current_queue_type = NULL,
                current_score = 0,
                is_active = FALSE,
                last_queue_check = NOW(),
                updated_at = NOW()
            WHERE user_id = $1
              AND current_queue_type = $2
            "#,
        )
        .bind(user_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_queue_checked(&self, user_ids: &[i64], checked_at: DateTime<Utc>) -> Result<u64> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE user_call_scores SET last_queue_check = $2 WHERE user_id = ANY($1)",
        )
        .bind(user_ids)
        .bind(checked_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn conversion_exists_since(&self, user_id: i64, since: DateTime<Utc>) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM conversions WHERE user_id = $1 AND converted_at >= $2)",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert_conversion(&self, new_conversion: &NewConversion) -> Result<Conversion> {
        let sql = format!(
            r#"
            INSERT INTO conversions
                (id, user_id, previous_queue_type, conversion_type, conversion_reason, final_score,
                 total_call_attempts, last_call_at, signature_obtained, converted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {CONVERSION_COLUMNS}
            "#
        );

        let conversion = sqlx::query_as::<_, Conversion>(&sql)
            .bind(Uuid::new_v4())
            .bind(new_conversion.user_id)
            .bind(new_conversion.previous_queue_type)
            .bind(new_conversion.conversion_type)
            .bind(&new_conversion.conversion_reason)
            .bind(new_conversion.final_score)
            .bind(new_conversion.total_call_attempts)
            .bind(new_conversion.last_call_at)
            .bind(new_conversion.signature_obtained)
            .bind(new_conversion.converted_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(conversion)
    }

    async fn unattributed_conversions(&self, since: DateTime<Utc>) -> Result<Vec<Conversion>> {
        let sql = format!(
            r#"
            SELECT {CONVERSION_COLUMNS}
            FROM conversions
            WHERE primary_agent_id IS NULL
              AND converted_at >= $1
            ORDER BY converted_at DESC
            "#
        );

        let conversions = sqlx::query_as::<_, Conversion>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(conversions)
    }

    async fn assign_attribution(
        &self,
        conversion_id: Uuid,
        primary_agent_id: i64,
        contributing_agents: &[i64],
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE conversions
            SET primary_agent_id = $2,
                contributing_agents = $3
            WHERE id = $1
              AND primary_agent_id IS NULL
            "#,
        )
        .bind(conversion_id)
        .bind(primary_agent_id)
        .bind(contributing_agents)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
