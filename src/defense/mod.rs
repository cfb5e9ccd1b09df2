//! Abuse mitigation for the public form endpoint.
//!
//! `pipeline` orchestrates the layers; the submodules under it are
//! individually testable: persisted reputation, window rate limiting,
//! progressive delay, content spam scoring, metadata suspicion scoring,
//! and violation escalation.

pub mod escalation;
pub mod pipeline;
pub mod rate;
pub mod reputation;
pub mod spam;
pub mod suspicion;
pub mod throttle;

pub use pipeline::{Decision, DefensePipeline, GuardRequest, ReasonCode, SubmittedFields};
pub use reputation::ReputationGuard;
pub use spam::{SpamAnalysisResult, SpamScorer};
pub use suspicion::{SuspicionAnalysisResult, SuspicionInput, SuspicionScorer};
