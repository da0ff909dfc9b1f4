//! In-memory repository fakes that mirror the Postgres query semantics closely enough
//! for job-level tests: the same ordering, upper-cased type/status comparisons,
//! conditional updates and conflict handling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::constants::{ConversionType, QueueType, COMPLETED_CALL_STATUS, PENDING_REQUIREMENT_STATUS, TOP_PRIORITY_SCORE};
use crate::database::{normalize_excluded_types, CallHistoryRepository, LocalStore, SourceRepository};
use crate::error::{ReconcilerError, Result};
use crate::models::{
    has_signature_file, CallSession, Conversion, NewConversion, NewUserCallScore,
    PendingRequirement, PrioritizeOutcome, RequirementStatus, SignatureState, SourceUser,
    UserCallScore,
};

/// Countdown of injected failures shared by the fakes
#[derive(Debug, Default)]
struct FailureInjector {
    remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl FailureInjector {
    fn arm(&self, count: usize) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    fn check(&self, component: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if tripped {
            Err(ReconcilerError::Database(format!(
                "simulated {component} connection failure"
            )))
        } else {
            Ok(())
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct SourceUserRecord {
    created_at: DateTime<Utc>,
    signature_file: Option<String>,
    is_enabled: bool,
}

#[derive(Debug, Clone)]
struct RequirementRecord {
    id: i64,
    claim_id: i64,
    requirement_type: String,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SourceState {
    users: BTreeMap<i64, SourceUserRecord>,
    claim_owners: HashMap<i64, i64>,
    requirements: Vec<RequirementRecord>,
}

/// Fake operational database
#[derive(Debug, Default)]
pub struct InMemorySource {
    state: Mutex<SourceState>,
    failures: FailureInjector,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: i64, created_at: DateTime<Utc>, signature_file: Option<&str>) {
        self.state.lock().users.insert(
            user_id,
            SourceUserRecord {
                created_at,
                signature_file: signature_file.map(str::to_string),
                is_enabled: true,
            },
        );
    }

    pub fn set_signature(&self, user_id: i64, signature_file: Option<&str>) {
        if let Some(user) = self.state.lock().users.get_mut(&user_id) {
            user.signature_file = signature_file.map(str::to_string);
        }
    }

    pub fn disable_user(&self, user_id: i64) {
        if let Some(user) = self.state.lock().users.get_mut(&user_id) {
            user.is_enabled = false;
        }
    }

    pub fn add_claim(&self, claim_id: i64, user_id: i64) {
        self.state.lock().claim_owners.insert(claim_id, user_id);
    }

    pub fn add_requirement(
        &self,
        requirement_id: i64,
        claim_id: i64,
        requirement_type: &str,
        status: &str,
        created_at: DateTime<Utc>,
    ) {
        self.state.lock().requirements.push(RequirementRecord {
            id: requirement_id,
            claim_id,
            requirement_type: requirement_type.to_string(),
            status: status.to_string(),
            created_at,
        });
    }

    pub fn set_requirement_status(&self, requirement_id: i64, status: &str) {
        let mut state = self.state.lock();
        for requirement in state.requirements.iter_mut().filter(|r| r.id == requirement_id) {
            requirement.status = status.to_string();
        }
    }

    /// Make the next `count` reads fail with a database error
    pub fn fail_next_reads(&self, count: usize) {
        self.failures.arm(count);
    }

    /// Reads that reached the fake, including failed ones
    pub fn read_calls(&self) -> usize {
        self.failures.calls()
    }
}

fn is_actionable(requirement: &RequirementRecord, excluded: &HashSet<String>) -> bool {
    requirement.status.to_uppercase() == PENDING_REQUIREMENT_STATUS
        && !excluded.contains(&requirement.requirement_type.to_uppercase())
}

#[async_trait]
impl SourceRepository for InMemorySource {
    async fn users_created_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SourceUser>> {
        self.failures.check("source")?;
        let state = self.state.lock();

        let mut users: Vec<SourceUser> = state
            .users
            .iter()
            .filter(|(_, user)| user.is_enabled && user.created_at >= cutoff)
            .map(|(&user_id, user)| SourceUser {
                user_id,
                created_at: user.created_at,
                signature_file: user.signature_file.clone(),
            })
            .collect();
        users.sort_by_key(|user| (user.created_at, user.user_id));
        Ok(users)
    }

    async fn signature_states(&self, user_ids: &[i64]) -> Result<Vec<SignatureState>> {
        self.failures.check("source")?;
        let state = self.state.lock();

        Ok(user_ids
            .iter()
            .filter_map(|user_id| {
                state.users.get(user_id).map(|user| SignatureState {
                    user_id: *user_id,
                    has_signature: has_signature_file(user.signature_file.as_deref()),
                })
            })
            .collect())
    }

    async fn pending_requirements_since(
        &self,
        cutoff: DateTime<Utc>,
        excluded_types: &[String],
    ) -> Result<Vec<PendingRequirement>> {
        self.failures.check("source")?;
        let excluded: HashSet<String> = normalize_excluded_types(excluded_types).into_iter().collect();
        let state = self.state.lock();

        let mut pending: Vec<PendingRequirement> = state
            .requirements
            .iter()
            .filter(|r| r.created_at >= cutoff && is_actionable(r, &excluded))
            .filter_map(|r| {
                let user_id = *state.claim_owners.get(&r.claim_id)?;
                let user = state.users.get(&user_id).filter(|user| user.is_enabled)?;
                Some(PendingRequirement {
                    requirement_id: r.id,
                    claim_id: r.claim_id,
                    user_id,
                    requirement_type: r.requirement_type.clone(),
                    created_at: r.created_at,
                    has_signature: has_signature_file(user.signature_file.as_deref()),
                })
            })
            .collect();
        pending.sort_by_key(|r| (r.created_at, r.requirement_id));
        Ok(pending)
    }

    async fn requirement_statuses(
        &self,
        user_ids: &[i64],
        excluded_types: &[String],
    ) -> Result<Vec<RequirementStatus>> {
        self.failures.check("source")?;
        let excluded: HashSet<String> = normalize_excluded_types(excluded_types).into_iter().collect();
        let state = self.state.lock();

        Ok(user_ids
            .iter()
            .filter_map(|&user_id| {
                let user = state.users.get(&user_id)?;
                let pending_count = state
                    .requirements
                    .iter()
                    .filter(|r| state.claim_owners.get(&r.claim_id) == Some(&user_id))
                    .filter(|r| is_actionable(r, &excluded))
                    .count() as i64;

                Some(RequirementStatus {
                    user_id,
                    pending_count,
                    has_signature: has_signature_file(user.signature_file.as_deref()),
                })
            })
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        self.failures.check("source")
    }
}

#[derive(Debug, Default)]
struct LocalState {
    scores: BTreeMap<i64, UserCallScore>,
    conversions: Vec<Conversion>,
}

/// Fake local store
#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    state: Mutex<LocalState>,
    failing_users: Mutex<HashSet<i64>>,
    failures: FailureInjector,
}

impl InMemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a score row directly, bypassing job semantics
    pub fn seed_score(&self, user_id: i64, queue: Option<QueueType>, score: i32) -> UserCallScore {
        let now = Utc::now();
        let row = UserCallScore {
            user_id,
            current_score: score,
            current_queue_type: queue,
            is_active: true,
            total_attempts: 0,
            last_call_at: None,
            last_queue_check: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().scores.insert(user_id, row.clone());
        row
    }

    /// Replace a stored row as-is, e.g. to set `last_queue_check` or attempt counts
    pub fn put_score(&self, row: UserCallScore) {
        self.state.lock().scores.insert(row.user_id, row);
    }

    /// Simulate the live call-outcome handler moving a user
    pub fn set_queue(&self, user_id: i64, queue: Option<QueueType>) {
        if let Some(row) = self.state.lock().scores.get_mut(&user_id) {
            row.current_queue_type = queue;
            row.updated_at = Utc::now();
        }
    }

    pub fn seed_conversion(
        &self,
        user_id: i64,
        conversion_type: ConversionType,
        converted_at: DateTime<Utc>,
    ) -> Conversion {
        let conversion = Conversion {
            id: Uuid::new_v4(),
            user_id,
            previous_queue_type: conversion_type.source_queue(),
            conversion_type,
            conversion_reason: "seeded".to_string(),
            final_score: TOP_PRIORITY_SCORE,
            total_call_attempts: 0,
            last_call_at: None,
            signature_obtained: true,
            converted_at,
            primary_agent_id: None,
            contributing_agents: Vec::new(),
        };
        self.state.lock().conversions.push(conversion.clone());
        conversion
    }

    /// Make every write touching `user_id` fail
    pub fn fail_writes_for(&self, user_id: i64) {
        self.failing_users.lock().insert(user_id);
    }

    /// Make the next `count` operations of any kind fail
    pub fn fail_next_operations(&self, count: usize) {
        self.failures.arm(count);
    }

    pub fn score(&self, user_id: i64) -> Option<UserCallScore> {
        self.state.lock().scores.get(&user_id).cloned()
    }

    pub fn scores(&self) -> Vec<UserCallScore> {
        self.state.lock().scores.values().cloned().collect()
    }

    pub fn conversions(&self) -> Vec<Conversion> {
        self.state.lock().conversions.clone()
    }

    pub fn conversions_for(&self, user_id: i64) -> Vec<Conversion> {
        self.state
            .lock()
            .conversions
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn conversion(&self, conversion_id: Uuid) -> Option<Conversion> {
        self.state
            .lock()
            .conversions
            .iter()
            .find(|c| c.id == conversion_id)
            .cloned()
    }

    fn check_write(&self, user_id: i64) -> Result<()> {
        self.failures.check("local store")?;
        if self.failing_users.lock().contains(&user_id) {
            return Err(ReconcilerError::Database(format!(
                "simulated write failure for user {user_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn existing_user_ids(&self, user_ids: &[i64]) -> Result<HashSet<i64>> {
        self.failures.check("local store")?;
        let state = self.state.lock();
        Ok(user_ids
            .iter()
            .copied()
            .filter(|user_id| state.scores.contains_key(user_id))
            .collect())
    }

    async fn insert_user_score(&self, new_score: &NewUserCallScore) -> Result<bool> {
        self.check_write(new_score.user_id)?;
        let mut state = self.state.lock();
        if state.scores.contains_key(&new_score.user_id) {
            return Ok(false);
        }

        let now = Utc::now();
        state.scores.insert(
            new_score.user_id,
            UserCallScore {
                user_id: new_score.user_id,
                current_score: new_score.current_score,
                current_queue_type: new_score.current_queue_type,
                is_active: new_score.is_active,
                total_attempts: 0,
                last_call_at: None,
                last_queue_check: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(true)
    }

    async fn prioritize_outstanding(&self, user_id: i64) -> Result<PrioritizeOutcome> {
        self.check_write(user_id)?;
        let mut state = self.state.lock();
        let now = Utc::now();

        if let Some(row) = state.scores.get_mut(&user_id) {
            if row.is_in_queue(QueueType::UnsignedUsers) {
                return Ok(PrioritizeOutcome::UnsignedMembershipKept);
            }
            row.current_queue_type = Some(QueueType::OutstandingRequests);
            row.current_score = TOP_PRIORITY_SCORE;
            row.is_active = true;
            row.updated_at = now;
            return Ok(PrioritizeOutcome::Updated);
        }

        state.scores.insert(
            user_id,
            UserCallScore {
                user_id,
                current_score: TOP_PRIORITY_SCORE,
                current_queue_type: Some(QueueType::OutstandingRequests),
                is_active: true,
                total_attempts: 0,
                last_call_at: None,
                last_queue_check: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(PrioritizeOutcome::Created)
    }

    async fn queue_members(&self, queue: QueueType) -> Result<Vec<UserCallScore>> {
        self.failures.check("local store")?;
        let mut members: Vec<UserCallScore> = self
            .state
            .lock()
            .scores
            .values()
            .filter(|row| row.is_in_queue(queue))
            .cloned()
            .collect();

        // None sorts first, matching NULLS FIRST
        members.sort_by(|a, b| {
            a.last_queue_check
                .cmp(&b.last_queue_check)
                .then_with(|| a.current_score.cmp(&b.current_score))
                .then_with(|| b.user_id.cmp(&a.user_id))
        });
        Ok(members)
    }

    async fn find_user_score(&self, user_id: i64) -> Result<Option<UserCallScore>> {
        self.failures.check("local store")?;
        Ok(self.score(user_id))
    }

    async fn demote_if_in_queue(&self, user_id: i64, expected: QueueType) -> Result<bool> {
        self.check_write(user_id)?;
        let mut state = self.state.lock();
        let Some(row) = state.scores.get_mut(&user_id).filter(|row| row.is_in_queue(expected)) else {
            return Ok(false);
        };

        let now = Utc::now();
        row.current_queue_type = None;
        row.current_score = TOP_PRIORITY_SCORE;
        row.is_active = false;
        row.last_queue_check = Some(now);
        row.updated_at = now;
        Ok(true)
    }

    async fn mark_queue_checked(&self, user_ids: &[i64], checked_at: DateTime<Utc>) -> Result<u64> {
        self.failures.check("local store")?;
        let mut state = self.state.lock();
        let mut updated = 0;
        for user_id in user_ids {
            if let Some(row) = state.scores.get_mut(user_id) {
                row.last_queue_check = Some(checked_at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn conversion_exists_since(&self, user_id: i64, since: DateTime<Utc>) -> Result<bool> {
        self.failures.check("local store")?;
        Ok(self
            .state
            .lock()
            .conversions
            .iter()
            .any(|c| c.user_id == user_id && c.converted_at >= since))
    }

    async fn insert_conversion(&self, new_conversion: &NewConversion) -> Result<Conversion> {
        self.check_write(new_conversion.user_id)?;
        let conversion = Conversion {
            id: Uuid::new_v4(),
            user_id: new_conversion.user_id,
            previous_queue_type: new_conversion.previous_queue_type,
            conversion_type: new_conversion.conversion_type,
            conversion_reason: new_conversion.conversion_reason.clone(),
            final_score: new_conversion.final_score,
            total_call_attempts: new_conversion.total_call_attempts,
            last_call_at: new_conversion.last_call_at,
            signature_obtained: new_conversion.signature_obtained,
            converted_at: new_conversion.converted_at,
            primary_agent_id: None,
            contributing_agents: Vec::new(),
        };
        self.state.lock().conversions.push(conversion.clone());
        Ok(conversion)
    }

    async fn unattributed_conversions(&self, since: DateTime<Utc>) -> Result<Vec<Conversion>> {
        self.failures.check("local store")?;
        let mut conversions: Vec<Conversion> = self
            .state
            .lock()
            .conversions
            .iter()
            .filter(|c| c.primary_agent_id.is_none() && c.converted_at >= since)
            .cloned()
            .collect();
        conversions.sort_by(|a, b| b.converted_at.cmp(&a.converted_at));
        Ok(conversions)
    }

    async fn assign_attribution(
        &self,
        conversion_id: Uuid,
        primary_agent_id: i64,
        contributing_agents: &[i64],
    ) -> Result<bool> {
        self.failures.check("local store")?;
        let mut state = self.state.lock();
        let Some(conversion) = state
            .conversions
            .iter_mut()
            .find(|c| c.id == conversion_id && c.primary_agent_id.is_none())
        else {
            return Ok(false);
        };

        conversion.primary_agent_id = Some(primary_agent_id);
        conversion.contributing_agents = contributing_agents.to_vec();
        Ok(true)
    }

    async fn health_check(&self) -> Result<()> {
        self.failures.check("local store")
    }
}

/// Fake call history
#[derive(Debug, Default)]
pub struct InMemoryCallHistory {
    sessions: Mutex<Vec<CallSession>>,
    failures: FailureInjector,
}

impl InMemoryCallHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(
        &self,
        agent_id: i64,
        user_id: i64,
        started_at: DateTime<Utc>,
        talk_time_seconds: i32,
        status: &str,
    ) {
        self.sessions.lock().push(CallSession {
            agent_id,
            user_id,
            started_at,
            talk_time_seconds,
            status: status.to_string(),
        });
    }

    pub fn fail_next_reads(&self, count: usize) {
        self.failures.arm(count);
    }
}

#[async_trait]
impl CallHistoryRepository for InMemoryCallHistory {
    async fn qualifying_sessions(
        &self,
        user_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        min_talk_time_seconds: i32,
    ) -> Result<Vec<CallSession>> {
        self.failures.check("call history")?;
        let mut sessions: Vec<CallSession> = self
            .sessions
            .lock()
            .iter()
            .filter(|s| {
                s.user_id == user_id
                    && s.started_at >= window_start
                    && s.started_at <= window_end
                    && s.talk_time_seconds > min_talk_time_seconds
                    && s.status == COMPLETED_CALL_STATUS
            })
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_queue_members_ordering() {
        let store = InMemoryLocalStore::new();
        let checked = Utc::now() - Duration::hours(1);

        let mut stale = store.seed_score(1, Some(QueueType::UnsignedUsers), 0);
        stale.last_queue_check = Some(checked);
        store.put_score(stale);
        store.seed_score(2, Some(QueueType::UnsignedUsers), 5);
        store.seed_score(3, Some(QueueType::UnsignedUsers), 0);
        store.seed_score(4, Some(QueueType::UnsignedUsers), 0);
        store.seed_score(5, Some(QueueType::OutstandingRequests), 0);

        let order: Vec<i64> = store
            .queue_members(QueueType::UnsignedUsers)
            .await
            .unwrap()
            .iter()
            .map(|row| row.user_id)
            .collect();
        assert_eq!(order, vec![4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_injected_failures_count_down() {
        let source = InMemorySource::new();
        source.fail_next_reads(1);

        assert!(source.health_check().await.is_err());
        assert!(source.health_check().await.is_ok());
        assert_eq!(source.read_calls(), 2);
    }
}
