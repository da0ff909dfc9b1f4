//! # Queue and Conversion Constants
//!
//! Enums and fixed values shared by the discovery and cleanup jobs and by the
//! downstream call-queue consumer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority bucket a user currently occupies; `None` at the column level means no queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "queue_type", rename_all = "snake_case")]
pub enum QueueType {
    /// Users who have not yet provided a signature; strictly higher priority
    UnsignedUsers,
    /// Signed users with actionable requirements still pending
    OutstandingRequests,
}

impl QueueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::UnsignedUsers => "unsigned_users",
            QueueType::OutstandingRequests => "outstanding_requests",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsigned_users" => Ok(QueueType::UnsignedUsers),
            "outstanding_requests" => Ok(QueueType::OutstandingRequests),
            other => Err(format!("unknown queue type: {other}")),
        }
    }
}

/// Why a user left a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "conversion_type", rename_all = "snake_case")]
pub enum ConversionType {
    SignatureObtained,
    RequirementsCompleted,
}

impl ConversionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionType::SignatureObtained => "signature_obtained",
            ConversionType::RequirementsCompleted => "requirements_completed",
        }
    }

    /// The queue a user must still occupy for this conversion to apply
    pub fn source_queue(&self) -> QueueType {
        match self {
            ConversionType::SignatureObtained => QueueType::UnsignedUsers,
            ConversionType::RequirementsCompleted => QueueType::OutstandingRequests,
        }
    }
}

impl fmt::Display for ConversionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requirement status the operational database uses for actionable work
pub const PENDING_REQUIREMENT_STATUS: &str = "PENDING";

/// Call session status that counts as a real conversation
pub const COMPLETED_CALL_STATUS: &str = "completed";

/// Requirement types that never block onboarding completion
pub const DEFAULT_EXCLUDED_REQUIREMENT_TYPES: &[&str] = &[
    "SIGNATURE",
    "VEHICLE_REGISTRATION",
    "CFA",
    "LETTER_OF_AUTHORITY",
    "LOA",
    "LOA_SIGNED",
];

/// Widest look-back any job accepts, in hours (five years)
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 366 * 5;

/// Score assigned to newly discovered or re-prioritized users (front of the queue)
pub const TOP_PRIORITY_SCORE: i32 = 0;
