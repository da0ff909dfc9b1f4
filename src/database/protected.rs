//! # Circuit Breaker Protected Repositories
//!
//! Wraps each repository so every call passes through the circuit breaker for its
//! database. When a dependency is judged unhealthy, calls fail immediately with
//! [`ReconcilerError::CircuitOpen`] carrying a retry-after hint, instead of queuing
//! behind a degraded database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::constants::QueueType;
use crate::database::{CallHistoryRepository, LocalStore, SourceRepository};
use crate::error::{ReconcilerError, Result};
use crate::models::{
    CallSession, Conversion, NewConversion, NewUserCallScore, PendingRequirement,
    PrioritizeOutcome, RequirementStatus, SignatureState, SourceUser, UserCallScore,
};
use crate::resilience::CircuitBreaker;

/// Routes operations through a circuit breaker, or straight through when disabled
#[derive(Debug, Clone)]
pub struct DependencyGuard {
    breaker: Option<Arc<CircuitBreaker>>,
}

impl DependencyGuard {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker: Some(breaker),
        }
    }

    /// Guard that never rejects; used when circuit breakers are disabled
    pub fn passthrough() -> Self {
        Self { breaker: None }
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub async fn execute<T, F, Fut>(&self, operation: F, operation_name: &str) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match &self.breaker {
            Some(breaker) => breaker
                .execute(operation, operation_name)
                .await
                .map_err(ReconcilerError::from),
            None => operation().await,
        }
    }
}

/// Operational database reads with circuit breaker protection
#[derive(Clone)]
pub struct ProtectedSourceRepository {
    inner: Arc<dyn SourceRepository>,
    guard: DependencyGuard,
}

impl ProtectedSourceRepository {
    pub fn new(inner: Arc<dyn SourceRepository>, guard: DependencyGuard) -> Self {
        Self { inner, guard }
    }
}

#[async_trait]
impl SourceRepository for ProtectedSourceRepository {
    async fn users_created_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SourceUser>> {
        self.guard
            .execute(|| self.inner.users_created_since(cutoff), "users_created_since")
            .await
    }

    async fn signature_states(&self, user_ids: &[i64]) -> Result<Vec<SignatureState>> {
        self.guard
            .execute(|| self.inner.signature_states(user_ids), "signature_states")
            .await
    }

    async fn pending_requirements_since(
        &self,
        cutoff: DateTime<Utc>,
        excluded_types: &[String],
    ) -> Result<Vec<PendingRequirement>> {
        self.guard
            .execute(
                || self.inner.pending_requirements_since(cutoff, excluded_types),
                "pending_requirements_since",
            )
            .await
    }

    async fn requirement_statuses(
        &self,
        user_ids: &[i64],
        excluded_types: &[String],
    ) -> Result<Vec<RequirementStatus>> {
        self.guard
            .execute(
                || self.inner.requirement_statuses(user_ids, excluded_types),
                "requirement_statuses",
            )
            .await
    }

    async fn health_check(&self) -> Result<()> {
        self.guard
            .execute(|| self.inner.health_check(), "source_health_check")
            .await
    }
}

/// Local store operations with circuit breaker protection
#[derive(Clone)]
pub struct ProtectedLocalStore {
    inner: Arc<dyn LocalStore>,
    guard: DependencyGuard,
}

impl ProtectedLocalStore {
    pub fn new(inner: Arc<dyn LocalStore>, guard: DependencyGuard) -> Self {
        Self { inner, guard }
    }
}

#[async_trait]
impl LocalStore for ProtectedLocalStore {
    async fn existing_user_ids(&self, user_ids: &[i64]) -> Result<HashSet<i64>> {
        self.guard
            .execute(|| self.inner.existing_user_ids(user_ids), "existing_user_ids")
            .await
    }

    async fn insert_user_score(&self, new_score: &NewUserCallScore) -> Result<bool> {
        self.guard
            .execute(|| self.inner.insert_user_score(new_score), "insert_user_score")
            .await
    }

    async fn prioritize_outstanding(&self, user_id: i64) -> Result<PrioritizeOutcome> {
        self.guard
            .execute(
                || self.inner.prioritize_outstanding(user_id),
                "prioritize_outstanding",
            )
            .await
    }

    async fn queue_members(&self, queue: QueueType) -> Result<Vec<UserCallScore>> {
        self.guard
            .execute(|| self.inner.queue_members(queue), "queue_members")
            .await
    }

    async fn find_user_score(&self, user_id: i64) -> Result<Option<UserCallScore>> {
        self.guard
            .execute(|| self.inner.find_user_score(user_id), "find_user_score")
            .await
    }

    async fn demote_if_in_queue(&self, user_id: i64, expected: QueueType) -> Result<bool> {
        self.guard
            .execute(
                || self.inner.demote_if_in_queue(user_id, expected),
                "demote_if_in_queue",
            )
            .await
    }

    async fn mark_queue_checked(&self, user_ids: &[i64], checked_at: DateTime<Utc>) -> Result<u64> {
        self.guard
            .execute(
                || self.inner.mark_queue_checked(user_ids, checked_at),
                "mark_queue_checked",
            )
            .await
    }

    async fn conversion_exists_since(&self, user_id: i64, since: DateTime<Utc>) -> Result<bool> {
        self.guard
            .execute(
                || self.inner.conversion_exists_since(user_id, since),
                "conversion_exists_since",
            )
            .await
    }

    async fn insert_conversion(&self, new_conversion: &NewConversion) -> Result<Conversion> {
        self.guard
            .execute(
                || self.inner.insert_conversion(new_conversion),
                "insert_conversion",
            )
            .await
    }

    async fn unattributed_conversions(&self, since: DateTime<Utc>) -> Result<Vec<Conversion>> {
        self.guard
            .execute(
                || self.inner.unattributed_conversions(since),
                "unattributed_conversions",
            )
            .await
    }

    async fn assign_attribution(
        &self,
        conversion_id: Uuid,
        primary_agent_id: i64,
        contributing_agents: &[i64],
    ) -> Result<bool> {
        self.guard
            .execute(
                || {
                    self.inner
                        .assign_attribution(conversion_id, primary_agent_id, contributing_agents)
                },
                "assign_attribution",
            )
            .await
    }

    async fn health_check(&self) -> Result<()> {
        self.guard
            .execute(|| self.inner.health_check(), "local_health_check")
            .await
    }
}

/// Call history reads; shares the local store's guard since both live in that database
#[derive(Clone)]
pub struct ProtectedCallHistory {
    inner: Arc<dyn CallHistoryRepository>,
    guard: DependencyGuard,
}

impl ProtectedCallHistory {
    pub fn new(inner: Arc<dyn CallHistoryRepository>, guard: DependencyGuard) -> Self {
        Self { inner, guard }
    }
}

#[async_trait]
impl CallHistoryRepository for ProtectedCallHistory {
    async fn qualifying_sessions(
        &self,
        user_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        min_talk_time_seconds: i32,
    ) -> Result<Vec<CallSession>> {
        self.guard
            .execute(
                || {
                    self.inner.qualifying_sessions(
                        user_id,
                        window_start,
                        window_end,
                        min_talk_time_seconds,
                    )
                },
                "qualifying_sessions",
            )
            .await
    }
}
