//! # Local Store Migrations
//!
//! Schema for `user_call_scores`, `conversions` and `call_sessions`, embedded from the
//! `migrations/` directory (`YYYYMMDDHHMMSS_description.sql`). The operational
//! database is never migrated from here.

use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

/// Apply any pending local store migrations
pub async fn run(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("📦 Local store migrations applied");
    Ok(())
}
