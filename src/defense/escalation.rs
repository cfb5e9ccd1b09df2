//! Escalation from repeated violations to reputation blocks.
//!
//! Violation counters are process-local and transient (DashMap); only the
//! blocks they produce are persisted. Losing the counters on restart means
//! an offender gets a fresh count, never a spurious block.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::defense::reputation::ReputationGuard;
use crate::store::GuardStore;

const SPAM_EVENTS_BEFORE_BLOCK: i64 = 3;
const SPAM_LOOKBACK_HOURS: i64 = 1;

#[derive(Debug, Clone, Copy)]
struct ViolationTracker {
    count: u32,
    first_violation_at: DateTime<Utc>,
}

/// What `record_rate_limit_violation` decided for this violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    Tracked,
    BlockedTemporarily,
    BlockedPermanently,
}

pub struct EscalationEngine {
    store: Arc<dyn GuardStore>,
    reputation: Arc<ReputationGuard>,
    violations: DashMap<String, ViolationTracker>,
    suspicious_activity_threshold: u32,
    permanent_block_threshold: u32,
    block_duration_hours: i64,
}

impl EscalationEngine {
    pub fn new(
        store: Arc<dyn GuardStore>,
        reputation: Arc<ReputationGuard>,
        suspicious_activity_threshold: u32,
        permanent_block_threshold: u32,
        block_duration_hours: i64,
    ) -> Self {
        Self {
            store,
            reputation,
            violations: DashMap::new(),
            suspicious_activity_threshold,
            permanent_block_threshold,
            block_duration_hours,
        }
    }

    /// Count one rate-limit violation for an IP and block it once the
    /// violation count reaches the threshold within an hour of the first.
    pub async fn record_rate_limit_violation(&self, ip: &str) -> Result<EscalationOutcome> {
        let now = Utc::now();

        // The entry guard must drop before any await below.
        let tracker = {
            let mut entry = self
                .violations
                .entry(ip.to_string())
                .or_insert(ViolationTracker {
                    count: 0,
                    first_violation_at: now,
                });
            entry.count += 1;
            *entry
        };

        let within_hour = now - tracker.first_violation_at <= Duration::hours(1);
        if tracker.count < self.suspicious_activity_threshold || !within_hour {
            return Ok(EscalationOutcome::Tracked);
        }

        let permanent = tracker.count >= self.permanent_block_threshold;
        let duration_hours = if permanent {
            None
        } else {
            Some(self.block_duration_hours)
        };
        let reason = format!(
            "Repeated rate limit violations ({} in the last hour)",
            tracker.count
        );

        self.reputation
            .block(ip, &reason, duration_hours, permanent)
            .await?;
        self.violations.remove(ip);

        if permanent {
            warn!(ip = %ip, count = tracker.count, "permanently blocked after repeated violations");
            Ok(EscalationOutcome::BlockedPermanently)
        } else {
            info!(ip = %ip, count = tracker.count, hours = self.block_duration_hours, "temporarily blocked after repeated violations");
            Ok(EscalationOutcome::BlockedTemporarily)
        }
    }

    /// Block an IP for 24 hours once it has produced three `spam_detected`
    /// events within the trailing hour. The caller appends the event before
    /// invoking this, so the current attempt counts toward the threshold.
    pub async fn record_spam_event(&self, ip: &str) -> Result<bool> {
        let recent = self
            .store
            .count_recent_events(ip, "spam_detected", SPAM_LOOKBACK_HOURS)
            .await?;
        if recent < SPAM_EVENTS_BEFORE_BLOCK {
            return Ok(false);
        }

        let reason = format!("Multiple spam attempts ({recent} in last hour)");
        self.reputation
            .block(ip, &reason, Some(self.block_duration_hours), false)
            .await?;
        info!(ip = %ip, attempts = recent, "blocked after repeated spam attempts");
        Ok(true)
    }

    /// Drop violation trackers whose first violation is over an hour old.
    pub fn sweep(&self) {
        let cutoff = Utc::now() - Duration::hours(1);
        self.violations
            .retain(|_, tracker| tracker.first_violation_at > cutoff);
    }

    #[cfg(test)]
    fn tracked_violations(&self, ip: &str) -> Option<u32> {
        self.violations.get(ip).map(|tracker| tracker.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SecurityEvent, Severity};

    fn engine(store: Arc<MemoryStore>) -> EscalationEngine {
        let reputation = Arc::new(ReputationGuard::new(store.clone(), Vec::new()));
        EscalationEngine::new(store, reputation, 5, 10, 24)
    }

    #[tokio::test]
    async fn five_violations_produce_one_temporary_block() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());

        for _ in 0..4 {
            let outcome = engine
                .record_rate_limit_violation("203.0.113.1")
                .await
                .unwrap();
            assert_eq!(outcome, EscalationOutcome::Tracked);
        }
        let fifth = engine
            .record_rate_limit_violation("203.0.113.1")
            .await
            .unwrap();
        assert_eq!(fifth, EscalationOutcome::BlockedTemporarily);

        let record = store.get_reputation("203.0.113.1").await.unwrap().unwrap();
        assert!(!record.permanent);
        assert!(record.blocked_until.is_some());
        assert_eq!(record.blocked_count, 1);

        // Blocking cleared the tracker; the next violation starts over.
        assert_eq!(engine.tracked_violations("203.0.113.1"), None);
        let next = engine
            .record_rate_limit_violation("203.0.113.1")
            .await
            .unwrap();
        assert_eq!(next, EscalationOutcome::Tracked);
    }

    #[tokio::test]
    async fn tenth_violation_blocks_permanently() {
        let store = Arc::new(MemoryStore::new());
        let reputation = Arc::new(ReputationGuard::new(store.clone(), Vec::new()));
        // Thresholds 10/10 so no temporary block fires first.
        let engine = EscalationEngine::new(store.clone(), reputation, 10, 10, 24);

        for _ in 0..9 {
            engine
                .record_rate_limit_violation("203.0.113.2")
                .await
                .unwrap();
        }
        let tenth = engine
            .record_rate_limit_violation("203.0.113.2")
            .await
            .unwrap();
        assert_eq!(tenth, EscalationOutcome::BlockedPermanently);

        let record = store.get_reputation("203.0.113.2").await.unwrap().unwrap();
        assert!(record.permanent);
        assert!(record.blocked_until.is_none());
    }

    #[tokio::test]
    async fn third_spam_event_in_an_hour_blocks_for_a_day() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());

        for _ in 0..2 {
            store
                .append_security_event(SecurityEvent::new(
                    "spam_detected",
                    "203.0.113.3",
                    Severity::Warning,
                ))
                .await
                .unwrap();
            assert!(!engine.record_spam_event("203.0.113.3").await.unwrap());
        }

        store
            .append_security_event(SecurityEvent::new(
                "spam_detected",
                "203.0.113.3",
                Severity::Warning,
            ))
            .await
            .unwrap();
        assert!(engine.record_spam_event("203.0.113.3").await.unwrap());

        let record = store.get_reputation("203.0.113.3").await.unwrap().unwrap();
        assert!(!record.permanent);
        assert!(record.blocked_until.is_some());
    }

    #[tokio::test]
    async fn sweep_drops_only_stale_trackers() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);

        engine
            .record_rate_limit_violation("203.0.113.4")
            .await
            .unwrap();
        engine.sweep();
        assert_eq!(engine.tracked_violations("203.0.113.4"), Some(1));
    }
}
