#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Queue Reconciler
//!
//! Scheduled batch jobs that keep a call-center priority queue consistent with the
//! operational claims database.
//!
//! ## Overview
//!
//! Users arrive in the operational database through signup and claim workflows the
//! queue never sees directly. Five idempotent jobs close that gap:
//!
//! - **New user discovery** seeds score rows for recently registered users
//! - **New requirement discovery** moves signed users with fresh actionable work to
//!   the front of the outstanding queue
//! - **Signature cleanup** and **outstanding cleanup** demote users who no longer
//!   need a call and record a conversion
//! - **Attribution** credits each conversion to the agents who spoke to the user
//!
//! ## Module Organization
//!
//! - [`reconciliation`] - The jobs, batch budgeting and result reporting
//! - [`database`] - Repository traits, Postgres implementations, guarded wrappers
//! - [`models`] - Local rows and operational projections
//! - [`resilience`] - Circuit breakers for both databases
//! - [`config`] - Layered TOML + environment configuration
//! - [`context`] - Wiring of repositories, settings and breakers
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use queue_reconciler::config::ConfigManager;
//! use queue_reconciler::context::ReconcilerContext;
//! use queue_reconciler::reconciliation::{JobKind, JobOptions, Reconciler};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?;
//! let context = ReconcilerContext::from_config(config).await?;
//!
//! let report = Reconciler::new(context)
//!     .run(JobKind::SignatureCleanup, &JobOptions::default())
//!     .await;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Jobs run against the in-memory fakes in [`test_helpers`]; no database is needed:
//!
//! ```bash
//! cargo test
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod reconciliation;
pub mod resilience;
pub mod test_helpers;

pub use config::{ConfigManager, JobsConfig, ReconcilerConfig};
pub use constants::{ConversionType, QueueType};
pub use context::{HealthReport, ReconcilerContext};
pub use error::{ReconcilerError, Result};
pub use reconciliation::{JobKind, JobOptions, JobReport, JobResult, ProcessingStrategy, Reconciler};
