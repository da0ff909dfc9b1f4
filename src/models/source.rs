//! Read-only projections of the operational database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Recently created, enabled user with their current signature file reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SourceUser {
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub signature_file: Option<String>,
}

impl SourceUser {
    pub fn has_signature(&self) -> bool {
        has_signature_file(self.signature_file.as_deref())
    }
}

/// Current signature presence for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SignatureState {
    pub user_id: i64,
    pub has_signature: bool,
}

/// Pending, non-excluded requirement joined through its claim to the owning user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PendingRequirement {
    pub requirement_id: i64,
    pub claim_id: i64,
    pub user_id: i64,
    pub requirement_type: String,
    pub created_at: DateTime<Utc>,
    pub has_signature: bool,
}

/// Aggregate of a user's pending, non-excluded requirements across all claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RequirementStatus {
    pub user_id: i64,
    pub pending_count: i64,
    pub has_signature: bool,
}

/// A blank or whitespace-only file reference does not count as a signature
pub fn has_signature_file(signature_file: Option<&str>) -> bool {
    signature_file.is_some_and(|file| !file.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_file_presence() {
        assert!(has_signature_file(Some("signatures/42.png")));
        assert!(!has_signature_file(Some("  ")));
        assert!(!has_signature_file(None));
    }
}
