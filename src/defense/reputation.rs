//! IP reputation: whitelist checks and persisted block state.
//!
//! Whitelist entries may be exact addresses or CIDR blocks. Block state
//! lives in the store; reads fail open so a store outage never turns into
//! a site-wide block.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::error;

use crate::store::GuardStore;

/// Outcome of a reputation check for one IP.
#[derive(Debug, Clone, Serialize)]
pub struct BlockState {
    pub blocked: bool,
    pub reason: Option<String>,
    pub until: Option<DateTime<Utc>>,
    pub permanent: bool,
}

impl BlockState {
    fn clear() -> Self {
        Self {
            blocked: false,
            reason: None,
            until: None,
            permanent: false,
        }
    }
}

pub struct ReputationGuard {
    store: Arc<dyn GuardStore>,
    whitelist: Vec<String>,
}

impl ReputationGuard {
    pub fn new(store: Arc<dyn GuardStore>, whitelist: Vec<String>) -> Self {
        Self { store, whitelist }
    }

    /// True if `ip` exactly matches a whitelist entry or falls inside a
    /// whitelisted CIDR block.
    pub fn is_whitelisted(&self, ip: &str) -> bool {
        self.whitelist.iter().any(|entry| {
            if entry.contains('/') {
                is_in_cidr(ip, entry)
            } else {
                ip == entry
            }
        })
    }

    /// Read the current block state for an IP.
    ///
    /// A store failure is logged and reported as not blocked: blocking all
    /// traffic on infrastructure trouble would be worse than letting a
    /// burst through.
    pub async fn check(&self, ip: &str) -> BlockState {
        match self.store.get_reputation(ip).await {
            Ok(Some(record)) if record.is_blocking(Utc::now()) => BlockState {
                blocked: true,
                reason: Some(record.reason),
                until: record.blocked_until,
                permanent: record.permanent,
            },
            Ok(_) => BlockState::clear(),
            Err(err) => {
                error!(ip = %ip, error = %err, "reputation check failed, failing open");
                BlockState::clear()
            }
        }
    }

    /// Record a block for an IP. `duration_hours = None` together with
    /// `permanent = false` produces a record that never actively blocks.
    pub async fn block(
        &self,
        ip: &str,
        reason: &str,
        duration_hours: Option<i64>,
        permanent: bool,
    ) -> Result<()> {
        self.store
            .upsert_reputation(ip, reason, duration_hours, permanent)
            .await
    }
}

/// Parse a dotted-quad IPv4 address into its integer form.
pub fn ip_to_u32(ip: &str) -> Option<u32> {
    ip.parse::<Ipv4Addr>().ok().map(u32::from)
}

/// CIDR containment test for IPv4.
///
/// Masks both addresses with `0xFFFFFFFF << (32 - prefix)` and compares the
/// network parts. Malformed input (bad address, bad prefix, non-IPv4) is
/// treated as non-matching rather than an error.
pub fn is_in_cidr(ip: &str, cidr: &str) -> bool {
    let Some((network, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(prefix_len) = prefix.parse::<u32>() else {
        return false;
    };
    if prefix_len > 32 {
        return false;
    }
    let (Some(ip_num), Some(network_num)) = (ip_to_u32(ip), ip_to_u32(network)) else {
        return false;
    };

    // A /0 prefix masks nothing and matches every address.
    let mask = u32::MAX.checked_shl(32 - prefix_len).unwrap_or(0);
    ip_num & mask == network_num & mask
}
