//! Request-metadata suspicion scoring.
//!
//! Advisory only: a high score is logged and fed into escalation
//! bookkeeping, but never rejects a request by itself. `analyze` is pure
//! over its input; the frequency tracker that supplies
//! `recent_request_count` lives alongside it.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;

const BOT_UA_MARKERS: [&str; 13] = [
    "curl",
    "wget",
    "python",
    "requests",
    "scrapy",
    "bot",
    "crawler",
    "spider",
    "scraper",
    "headless",
    "phantom",
    "selenium",
    "webdriver",
];

const LOW_TRUST_REFERER_MARKERS: [&str; 9] = [
    ".tk",
    ".ml",
    ".ga",
    ".cf",
    "bit.ly",
    "tinyurl",
    "goo.gl",
    "localhost",
    "127.0.0.1",
];

/// Metadata of one request, assembled by the caller.
#[derive(Debug, Clone, Default)]
pub struct SuspicionInput {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub accept: Option<String>,
    pub accept_language: Option<String>,
    pub recent_request_count: usize,
    pub is_known_exit_node: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspicionAnalysisResult {
    pub is_suspicious: bool,
    pub score: u32,
    pub reasons: Vec<String>,
}

pub struct SuspicionScorer {
    suspicion_threshold: u32,
}

impl SuspicionScorer {
    pub fn new(suspicion_threshold: u32) -> Self {
        Self {
            suspicion_threshold,
        }
    }

    pub fn analyze(&self, input: &SuspicionInput) -> SuspicionAnalysisResult {
        let mut score = 0u32;
        let mut reasons = Vec::new();

        let user_agent = input.user_agent.as_deref().unwrap_or("");
        let lowered_ua = user_agent.to_lowercase();
        // First matching marker only; a UA saying both "python" and
        // "requests" is one bot, not two.
        if let Some(marker) = BOT_UA_MARKERS
            .iter()
            .find(|marker| lowered_ua.contains(**marker))
        {
            score += 30;
            reasons.push(format!("Bot-like user agent: {marker}"));
        }

        if user_agent.len() < 10 {
            score += 20;
            reasons.push("Missing or very short user agent".to_string());
        }

        if let Some(referer) = input.referer.as_deref() {
            let lowered = referer.to_lowercase();
            for marker in LOW_TRUST_REFERER_MARKERS {
                if lowered.contains(marker) {
                    score += 15;
                    reasons.push(format!("Suspicious referer: {marker}"));
                }
            }
        }

        if input.accept.is_none() {
            score += 10;
            reasons.push("Missing Accept header".to_string());
        }
        if input.accept_language.is_none() {
            score += 10;
            reasons.push("Missing Accept-Language header".to_string());
        }

        if input.is_known_exit_node {
            score += 25;
            reasons.push("Anonymizing exit node detected".to_string());
        }

        if input.recent_request_count > 50 {
            score += 20;
            reasons.push(format!(
                "High request frequency: {} requests/minute",
                input.recent_request_count
            ));
        }

        SuspicionAnalysisResult {
            is_suspicious: score >= self.suspicion_threshold,
            score,
            reasons,
        }
    }
}

/// Process-local burst detector: per-IP request timestamps over the
/// trailing minute. Best effort, not authoritative across processes.
#[derive(Default)]
pub struct RequestFrequencyTracker {
    requests: DashMap<String, Vec<DateTime<Utc>>>,
}

impl RequestFrequencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request and return how many this IP made in the trailing
    /// 60 seconds, including this one.
    pub fn record(&self, ip: &str) -> usize {
        let now = Utc::now();
        let cutoff = now - Duration::seconds(60);
        let mut entry = self.requests.entry(ip.to_string()).or_default();
        entry.retain(|at| *at > cutoff);
        entry.push(now);
        entry.len()
    }

    /// Drop IPs with no requests in the trailing minute.
    pub fn sweep(&self) {
        let cutoff = Utc::now() - Duration::seconds(60);
        self.requests
            .retain(|_, timestamps| timestamps.iter().any(|at| *at > cutoff));
    }

    #[cfg(test)]
    fn tracked_ips(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser_input() -> SuspicionInput {
        SuspicionInput {
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0".to_string()),
            referer: Some("https://example.com/contact".to_string()),
            accept: Some("text/html".to_string()),
            accept_language: Some("es-ES,es;q=0.9".to_string()),
            recent_request_count: 1,
            is_known_exit_node: false,
        }
    }

    #[test]
    fn ordinary_browser_is_not_suspicious() {
        let result = SuspicionScorer::new(40).analyze(&browser_input());
        assert_eq!(result.score, 0);
        assert!(!result.is_suspicious);
    }

    #[test]
    fn bot_ua_scores_once_even_with_multiple_markers() {
        let mut input = browser_input();
        input.user_agent = Some("python-requests/2.32".to_string());
        let result = SuspicionScorer::new(40).analyze(&input);
        assert_eq!(result.score, 30);
        assert!(!result.is_suspicious);
    }

    #[test]
    fn headless_client_with_bare_headers_crosses_threshold() {
        let input = SuspicionInput {
            user_agent: Some("curl/8.5".to_string()),
            referer: None,
            accept: None,
            accept_language: None,
            recent_request_count: 1,
            is_known_exit_node: false,
        };
        // bot marker 30 + short UA 20 + missing accept 10 + missing language 10
        let result = SuspicionScorer::new(40).analyze(&input);
        assert_eq!(result.score, 70);
        assert!(result.is_suspicious);
    }

    #[test]
    fn low_trust_referers_score_per_match() {
        let mut input = browser_input();
        input.referer = Some("http://bit.ly/x.tk".to_string());
        let result = SuspicionScorer::new(40).analyze(&input);
        assert_eq!(result.score, 30);
    }

    #[test]
    fn burst_traffic_adds_frequency_penalty() {
        let mut input = browser_input();
        input.recent_request_count = 51;
        let result = SuspicionScorer::new(40).analyze(&input);
        assert_eq!(result.score, 20);

        input.recent_request_count = 50;
        assert_eq!(SuspicionScorer::new(40).analyze(&input).score, 0);
    }

    #[test]
    fn frequency_tracker_counts_and_sweeps() {
        let tracker = RequestFrequencyTracker::new();
        assert_eq!(tracker.record("203.0.113.3"), 1);
        assert_eq!(tracker.record("203.0.113.3"), 2);
        assert_eq!(tracker.record("198.51.100.4"), 1);
        assert_eq!(tracker.tracked_ips(), 2);

        // Recent entries survive a sweep.
        tracker.sweep();
        assert_eq!(tracker.tracked_ips(), 2);
        assert_eq!(tracker.record("203.0.113.3"), 3);
    }
}
