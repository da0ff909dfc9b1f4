use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// CallSession is one dialler session, written by call handling outside this pipeline.
/// Maps to `call_sessions` table (read-only here)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CallSession {
    pub agent_id: i64,
    pub user_id: i64,
    pub started_at: DateTime<Utc>,
    /// Seconds of two-way conversation
    pub talk_time_seconds: i32,
    pub status: String,
}
