//! Persistent state behind the defense pipeline.
//!
//! The pipeline consumes a narrow async store contract (`GuardStore`) so the
//! PostgreSQL backend and the in-memory implementation are interchangeable.
//! Only the persisted store is authoritative across processes; everything
//! transient in `defense/` is a best-effort optimization on top of it.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use postgres::PgGuardStore;

/// Persisted block/allow status for one IP.
///
/// Records are created on the first block, updated in place on every
/// subsequent block, and never deleted; expiry is evaluated lazily at read
/// time via [`ReputationRecord::is_blocking`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub ip: String,
    pub reason: String,
    pub blocked_until: Option<DateTime<Utc>>,
    pub permanent: bool,
    /// Monotonically non-decreasing; incremented by one on every block call.
    pub blocked_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReputationRecord {
    /// A record is currently blocking iff it is permanent or its expiry
    /// timestamp lies in the future.
    pub fn is_blocking(&self, now: DateTime<Utc>) -> bool {
        self.permanent || self.blocked_until.map(|until| until > now).unwrap_or(false)
    }
}

/// One (IP, endpoint) counting window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateWindow {
    pub ip: String,
    pub endpoint: String,
    pub request_count: i64,
    pub window_start: DateTime<Utc>,
    pub last_request: DateTime<Utc>,
}

/// Result of an atomic rate-window upsert.
#[derive(Debug, Clone, Copy)]
pub struct RateWindowUpdate {
    pub total_hits: i64,
    pub reset_time: DateTime<Utc>,
}

/// Severity attached to a security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Append-only audit record describing one pipeline outcome or soft flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: String,
    pub ip: String,
    pub user_agent: Option<String>,
    pub request_data: serde_json::Value,
    pub blocked: bool,
    pub severity: Severity,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: &str, ip: &str, severity: Severity) -> Self {
        Self {
            event_type: event_type.to_string(),
            ip: ip.to_string(),
            user_agent: None,
            request_data: serde_json::json!({}),
            blocked: false,
            severity,
            details: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = user_agent.map(|ua| ua.to_string());
        self
    }

    pub fn with_request_data(mut self, data: serde_json::Value) -> Self {
        self.request_data = data;
        self
    }

    pub fn with_blocked(mut self, blocked: bool) -> Self {
        self.blocked = blocked;
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = details;
        self
    }
}

/// A form submission accepted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub equipment_type: Option<String>,
    pub problem_description: String,
    pub ip: String,
    pub user_agent: Option<String>,
}

/// Store contract consumed by the defense pipeline.
///
/// Mutations for a single key must be atomic with respect to concurrent
/// callers: both upserts compute their next value inside the store rather
/// than letting the caller read-modify-write.
#[async_trait]
pub trait GuardStore: Send + Sync {
    /// Fetch the reputation record for an IP, expired or not.
    async fn get_reputation(&self, ip: &str) -> Result<Option<ReputationRecord>>;

    /// Upsert a block record: `blocked_count` becomes previous + 1 (or 1),
    /// `created_at` is preserved, `blocked_until` is `now + duration_hours`
    /// when a duration is given and NULL otherwise.
    async fn upsert_reputation(
        &self,
        ip: &str,
        reason: &str,
        duration_hours: Option<i64>,
        permanent: bool,
    ) -> Result<()>;

    /// Fetch the current (non-expired) window for (IP, endpoint), if any.
    async fn get_rate_window(
        &self,
        ip: &str,
        endpoint: &str,
        window_ms: i64,
    ) -> Result<Option<RateWindow>>;

    /// Atomically increment the current window or start a fresh one with
    /// count 1, returning the updated count and the window's reset time.
    async fn upsert_rate_window(
        &self,
        ip: &str,
        endpoint: &str,
        window_ms: i64,
    ) -> Result<RateWindowUpdate>;

    /// Append one security event to the audit trail.
    async fn append_security_event(&self, event: SecurityEvent) -> Result<()>;

    /// Count events of one type for an IP within the trailing `since_hours`.
    async fn count_recent_events(
        &self,
        ip: &str,
        event_type: &str,
        since_hours: i64,
    ) -> Result<i64>;

    /// Persist an accepted submission, returning its row id.
    async fn insert_contact(&self, contact: NewContact) -> Result<i64>;

    /// Connectivity probe for health reporting.
    async fn health_check(&self) -> Result<()>;
}
