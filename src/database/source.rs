//! # Operational Database Queries
//!
//! Read-only, parameterized queries against the source of truth: users and their
//! signature files, and pending requirements joined through claims to their owner.
//! Requirement types and statuses are compared upper-cased so the exclusion list is
//! case-insensitive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::constants::PENDING_REQUIREMENT_STATUS;
use crate::error::Result;
use crate::models::{PendingRequirement, RequirementStatus, SignatureState, SourceUser};

/// Read interface over the operational database
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Enabled users created at or after `cutoff`, oldest first
    async fn users_created_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SourceUser>>;

    /// Current signature presence for the given users; unknown ids are omitted
    async fn signature_states(&self, user_ids: &[i64]) -> Result<Vec<SignatureState>>;

    /// Pending requirements created at or after `cutoff`, excluding `excluded_types`
    async fn pending_requirements_since(
        &self,
        cutoff: DateTime<Utc>,
        excluded_types: &[String],
    ) -> Result<Vec<PendingRequirement>>;

    /// Per-user count of pending, non-excluded requirements across all claims
    async fn requirement_statuses(
        &self,
        user_ids: &[i64],
        excluded_types: &[String],
    ) -> Result<Vec<RequirementStatus>>;

    async fn health_check(&self) -> Result<()>;
}

/// Upper-cased copy of the exclusion list, matching the `UPPER(r.type)` comparisons
pub fn normalize_excluded_types(excluded_types: &[String]) -> Vec<String> {
    excluded_types
        .iter()
        .map(|requirement_type| requirement_type.trim().to_uppercase())
        .collect()
}

/// Postgres implementation against the operational schema (`users`, `claims`, `requirements`)
#[derive(Debug, Clone)]
pub struct PgSourceRepository {
    pool: PgPool,
}

impl PgSourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceRepository for PgSourceRepository {
    async fn users_created_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SourceUser>> {
        let users = sqlx::query_as::<_, SourceUser>(
            r#"
            SELECT u.id AS user_id, u.created_at, u.signature_file
            FROM users u
            WHERE u.created_at >= $1
              AND u.is_enabled = TRUE
            ORDER BY u.created_at ASC, u.id ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn signature_states(&self, user_ids: &[i64]) -> Result<Vec<SignatureState>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let states = sqlx::query_as::<_, SignatureState>(
            r#"
            SELECT u.id AS user_id,
                   (u.signature_file IS NOT NULL AND btrim(u.signature_file) <> '') AS has_signature
            FROM users u
            WHERE u.id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(states)
    }

    async fn pending_requirements_since(
        &self,
        cutoff: DateTime<Utc>,
        excluded_types: &[String],
    ) -> Result<Vec<PendingRequirement>> {
        let requirements = sqlx::query_as::<_, PendingRequirement>(
            r#"
            SELECT r.id AS requirement_id,
                   r.claim_id,
                   c.user_id,
                   r.type AS requirement_type,
                   r.created_at,
                   (u.signature_file IS NOT NULL AND btrim(u.signature_file) <> '') AS has_signature
            FROM requirements r
            INNER JOIN claims c ON c.id = r.claim_id
            INNER JOIN users u ON u.id = c.user_id
            WHERE r.created_at >= $1
              AND UPPER(r.status) = $2
              AND NOT (UPPER(r.type) = ANY($3))
              AND u.is_enabled = TRUE
            ORDER BY r.created_at ASC, r.id ASC
            "#,
        )
        .bind(cutoff)
        .bind(PENDING_REQUIREMENT_STATUS)
        .bind(normalize_excluded_types(excluded_types))
        .fetch_all(&self.pool)
        .await?;

        Ok(requirements)
    }

    async fn requirement_statuses(
        &self,
        user_ids: &[i64],
        excluded_types: &[String],
    ) -> Result<Vec<RequirementStatus>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let statuses = sqlx::query_as::<_, RequirementStatus>(
            r#"
            SELECT u.id AS user_id,
                   COUNT(r.id) FILTER (
                       WHERE UPPER(r.status) = $2
                         AND NOT (UPPER(r.type) = ANY($3))
                   ) AS pending_count,
                   (u.signature_file IS NOT NULL AND btrim(u.signature_file) <> '') AS has_signature
            FROM users u
            LEFT JOIN claims c ON c.user_id = u.id
            LEFT JOIN requirements r ON r.claim_id = c.id
            WHERE u.id = ANY($1)
            GROUP BY u.id, u.signature_file
            "#,
        )
        .bind(user_ids)
        .bind(PENDING_REQUIREMENT_STATUS)
        .bind(normalize_excluded_types(excluded_types))
        .fetch_all(&self.pool)
        .await?;

        Ok(statuses)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
