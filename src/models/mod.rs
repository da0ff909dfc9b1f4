//! # Data Models
//!
//! Rows owned by the local store (`UserCallScore`, `Conversion`), the externally
//! written call history (`CallSession`), and the read-only projections of the
//! operational database used by the discovery and cleanup jobs.

pub mod call_session;
pub mod conversion;
pub mod source;
pub mod user_call_score;

pub use call_session::CallSession;
pub use conversion::{Conversion, NewConversion};
pub use source::{
    has_signature_file, PendingRequirement, RequirementStatus, SignatureState, SourceUser,
};
pub use user_call_score::{NewUserCallScore, PrioritizeOutcome, UserCallScore};
