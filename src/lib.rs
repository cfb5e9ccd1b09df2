//! Formgate
//!
//! Abuse-mitigation gateway for a public contact-form endpoint: decides per
//! request whether to allow, delay, reject, or exclude the caller.
//!
//! ## Module Structure
//!
//! ```text
//! formgate/src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Configuration management
//! ├── defense/       - Abuse-mitigation pipeline
//! │   ├── pipeline.rs   - Per-request orchestration & Decision
//! │   ├── reputation.rs - Whitelist/CIDR checks & block state
//! │   ├── rate.rs       - Sliding-window rate limiter
//! │   ├── throttle.rs   - Progressive response delay
//! │   ├── spam.rs       - Content spam scoring
//! │   ├── suspicion.rs  - Request-metadata suspicion scoring
//! │   └── escalation.rs - Violation tracking -> blocks
//! ├── store/         - Persistence (PostgreSQL + in-memory)
//! ├── notify.rs      - Submission notification seam
//! └── api/           - HTTP endpoints & middleware
//! ```

pub mod api;
pub mod config;
pub mod defense;
pub mod notify;
pub mod store;

pub use config::{DefenseConfig, GuardConfig};
pub use defense::{Decision, DefensePipeline, GuardRequest, ReasonCode, SubmittedFields};
pub use notify::{LogNotifier, Notifier};
pub use store::{GuardStore, MemoryStore, PgGuardStore};
