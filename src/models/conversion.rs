use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::constants::{ConversionType, QueueType};
use crate::models::UserCallScore;

/// Conversion logs a user leaving a queue because its condition was satisfied.
/// Maps to `conversions` table
///
/// `primary_agent_id` and `contributing_agents` are filled in later by attribution;
/// once `primary_agent_id` is set it is never reconsidered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Conversion {
    pub id: Uuid,
    pub user_id: i64,
    pub previous_queue_type: QueueType,
    pub conversion_type: ConversionType,
    pub conversion_reason: String,
    pub final_score: i32,
    pub total_call_attempts: i32,
    pub last_call_at: Option<DateTime<Utc>>,
    pub signature_obtained: bool,
    pub converted_at: DateTime<Utc>,
    pub primary_agent_id: Option<i64>,
    /// Distinct agents other than the primary, most recent interaction first
    pub contributing_agents: Vec<i64>,
}

impl Conversion {
    pub fn is_attributed(&self) -> bool {
        self.primary_agent_id.is_some()
    }
}

/// New Conversion for creation (id and attribution are assigned by the store)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConversion {
    pub user_id: i64,
    pub previous_queue_type: QueueType,
    pub conversion_type: ConversionType,
    pub conversion_reason: String,
    pub final_score: i32,
    pub total_call_attempts: i32,
    pub last_call_at: Option<DateTime<Utc>>,
    pub signature_obtained: bool,
    pub converted_at: DateTime<Utc>,
}

impl NewConversion {
    /// Build the log entry from the score row as it was before demotion
    pub fn from_score(
        score: &UserCallScore,
        conversion_type: ConversionType,
        conversion_reason: impl Into<String>,
        converted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: score.user_id,
            previous_queue_type: conversion_type.source_queue(),
            conversion_type,
            conversion_reason: conversion_reason.into(),
            final_score: score.current_score,
            total_call_attempts: score.total_attempts,
            last_call_at: score.last_call_at,
            // Both conversion kinds require a signature on file
            signature_obtained: true,
            converted_at,
        }
    }
}
