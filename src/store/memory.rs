//! In-memory store implementation.
//!
//! Used by the test suite and when `postgres_enabled` is off. Applies the
//! same window and upsert semantics as the PostgreSQL backend, guarded by
//! async locks instead of SQL statements.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::store::{
    GuardStore, NewContact, RateWindow, RateWindowUpdate, ReputationRecord, SecurityEvent,
};

#[derive(Default)]
pub struct MemoryStore {
    reputations: Arc<RwLock<HashMap<String, ReputationRecord>>>,
    windows: Arc<RwLock<HashMap<(String, String), RateWindow>>>,
    events: Arc<RwLock<Vec<SecurityEvent>>>,
    contacts: Arc<RwLock<Vec<NewContact>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All persisted events, for inspection in tests.
    pub async fn events(&self) -> Vec<SecurityEvent> {
        self.events.read().await.clone()
    }

    /// All accepted submissions, for inspection in tests.
    pub async fn contacts(&self) -> Vec<NewContact> {
        self.contacts.read().await.clone()
    }
}

#[async_trait]
impl GuardStore for MemoryStore {
    async fn get_reputation(&self, ip: &str) -> Result<Option<ReputationRecord>> {
        Ok(self.reputations.read().await.get(ip).cloned())
    }

    async fn upsert_reputation(
        &self,
        ip: &str,
        reason: &str,
        duration_hours: Option<i64>,
        permanent: bool,
    ) -> Result<()> {
        let now = Utc::now();
        let blocked_until = duration_hours.map(|hours| now + Duration::hours(hours));

        let mut reputations = self.reputations.write().await;
        match reputations.get_mut(ip) {
            Some(record) => {
                record.reason = reason.to_string();
                record.blocked_until = blocked_until;
                record.permanent = permanent;
                record.blocked_count += 1;
                record.updated_at = now;
            }
            None => {
                reputations.insert(
                    ip.to_string(),
                    ReputationRecord {
                        ip: ip.to_string(),
                        reason: reason.to_string(),
                        blocked_until,
                        permanent,
                        blocked_count: 1,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_rate_window(
        &self,
        ip: &str,
        endpoint: &str,
        window_ms: i64,
    ) -> Result<Option<RateWindow>> {
        let cutoff = Utc::now() - Duration::milliseconds(window_ms);
        let windows = self.windows.read().await;
        Ok(windows
            .get(&(ip.to_string(), endpoint.to_string()))
            .filter(|window| window.window_start > cutoff)
            .cloned())
    }

    async fn upsert_rate_window(
        &self,
        ip: &str,
        endpoint: &str,
        window_ms: i64,
    ) -> Result<RateWindowUpdate> {
        let now = Utc::now();
        let cutoff = now - Duration::milliseconds(window_ms);
        let key = (ip.to_string(), endpoint.to_string());

        let mut windows = self.windows.write().await;
        let window = windows
            .entry(key)
            .and_modify(|window| {
                if window.window_start > cutoff {
                    window.request_count += 1;
                } else {
                    window.request_count = 1;
                    window.window_start = now;
                }
                window.last_request = now;
            })
            .or_insert_with(|| RateWindow {
                ip: ip.to_string(),
                endpoint: endpoint.to_string(),
                request_count: 1,
                window_start: now,
                last_request: now,
            });

        Ok(RateWindowUpdate {
            total_hits: window.request_count,
            reset_time: window.window_start + Duration::milliseconds(window_ms),
        })
    }

    async fn append_security_event(&self, event: SecurityEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn count_recent_events(
        &self,
        ip: &str,
        event_type: &str,
        since_hours: i64,
    ) -> Result<i64> {
        let cutoff = Utc::now() - Duration::hours(since_hours);
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|event| {
                event.ip == ip && event.event_type == event_type && event.created_at > cutoff
            })
            .count() as i64)
    }

    async fn insert_contact(&self, contact: NewContact) -> Result<i64> {
        let mut contacts = self.contacts.write().await;
        contacts.push(contact);
        Ok(contacts.len() as i64)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_reputation_increments_count_and_preserves_created_at() {
        let store = MemoryStore::new();

        store
            .upsert_reputation("203.0.113.9", "first", Some(24), false)
            .await
            .unwrap();
        let first = store.get_reputation("203.0.113.9").await.unwrap().unwrap();
        assert_eq!(first.blocked_count, 1);

        store
            .upsert_reputation("203.0.113.9", "second", Some(24), false)
            .await
            .unwrap();
        let second = store.get_reputation("203.0.113.9").await.unwrap().unwrap();
        assert_eq!(second.blocked_count, 2);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.reason, "second");
    }

    #[tokio::test]
    async fn rate_window_increments_then_resets_after_expiry() {
        let store = MemoryStore::new();

        let first = store
            .upsert_rate_window("203.0.113.9", "/api/contact", 50)
            .await
            .unwrap();
        assert_eq!(first.total_hits, 1);

        let second = store
            .upsert_rate_window("203.0.113.9", "/api/contact", 50)
            .await
            .unwrap();
        assert_eq!(second.total_hits, 2);

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        let fresh = store
            .upsert_rate_window("203.0.113.9", "/api/contact", 50)
            .await
            .unwrap();
        assert_eq!(fresh.total_hits, 1);
    }

    #[tokio::test]
    async fn count_recent_events_filters_by_ip_and_type() {
        let store = MemoryStore::new();
        store
            .append_security_event(SecurityEvent::new(
                "spam_detected",
                "203.0.113.9",
                crate::store::Severity::Warning,
            ))
            .await
            .unwrap();
        store
            .append_security_event(SecurityEvent::new(
                "rate_limit_exceeded",
                "203.0.113.9",
                crate::store::Severity::Warning,
            ))
            .await
            .unwrap();

        let count = store
            .count_recent_events("203.0.113.9", "spam_detected", 1)
            .await
            .unwrap();
        assert_eq!(count, 1);
        let other = store
            .count_recent_events("198.51.100.1", "spam_detected", 1)
            .await
            .unwrap();
        assert_eq!(other, 0);
    }
}
