//! Per-request orchestration of the defense layers.
//!
//! Order: whitelist, reputation, global limiter, endpoint limiter,
//! progressive delay, spam analysis, suspicion analysis. Each rejection and
//! soft flag appends a security event; accepted submissions are recorded by
//! the contact handler. The pipeline owns all transient state and is
//! constructed once per process.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::DefenseConfig;
use crate::defense::escalation::EscalationEngine;
use crate::defense::rate::RateLimiter;
use crate::defense::reputation::ReputationGuard;
use crate::defense::spam::{SpamAnalysisResult, SpamScorer};
use crate::defense::suspicion::{
    RequestFrequencyTracker, SuspicionAnalysisResult, SuspicionInput, SuspicionScorer,
};
use crate::defense::throttle;
use crate::store::{GuardStore, SecurityEvent, Severity};

/// Key under which the surface-wide limiter counts every request,
/// regardless of endpoint.
const GLOBAL_WINDOW_KEY: &str = "global";

/// Form fields carried by a content-bearing request.
#[derive(Debug, Clone)]
pub struct SubmittedFields {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub equipment_type: Option<String>,
    pub problem_description: String,
}

/// Everything the pipeline consumes about one request.
#[derive(Debug, Clone, Default)]
pub struct GuardRequest {
    pub ip: String,
    pub endpoint: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub accept: Option<String>,
    pub accept_language: Option<String>,
    pub fields: Option<SubmittedFields>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Ok,
    IpBlocked,
    RateLimitExceeded,
    SpamDetected,
}

/// Verdict for one request.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub http_status: u16,
    pub reason_code: ReasonCode,
    pub retry_after_seconds: Option<i64>,
    pub spam_analysis: Option<SpamAnalysisResult>,
    pub suspicion_analysis: Option<SuspicionAnalysisResult>,
    /// Delay already applied before this decision was returned.
    pub throttle_ms: u64,
}

impl Decision {
    fn allow(throttle_ms: u64, suspicion: Option<SuspicionAnalysisResult>) -> Self {
        Self {
            allowed: true,
            http_status: 200,
            reason_code: ReasonCode::Ok,
            retry_after_seconds: None,
            spam_analysis: None,
            suspicion_analysis: suspicion,
            throttle_ms,
        }
    }

    fn reject(http_status: u16, reason_code: ReasonCode) -> Self {
        Self {
            allowed: false,
            http_status,
            reason_code,
            retry_after_seconds: None,
            spam_analysis: None,
            suspicion_analysis: None,
            throttle_ms: 0,
        }
    }
}

pub struct DefensePipeline {
    store: Arc<dyn GuardStore>,
    reputation: Arc<ReputationGuard>,
    endpoint_limiter: RateLimiter,
    global_limiter: RateLimiter,
    escalation: EscalationEngine,
    spam: SpamScorer,
    suspicion: SuspicionScorer,
    frequency: RequestFrequencyTracker,
    config: DefenseConfig,
}

impl DefensePipeline {
    pub fn new(store: Arc<dyn GuardStore>, config: DefenseConfig) -> Self {
        let reputation = Arc::new(ReputationGuard::new(
            store.clone(),
            config.whitelist.clone(),
        ));
        let escalation = EscalationEngine::new(
            store.clone(),
            reputation.clone(),
            config.suspicious_activity_threshold,
            config.permanent_block_threshold,
            config.block_duration_hours,
        );
        let spam = SpamScorer::new(
            config.spam_keywords.clone(),
            config.spam_threshold,
            config.max_urls_allowed,
            config.max_capital_percentage,
        );

        Self {
            endpoint_limiter: RateLimiter::new(store.clone(), config.window_ms, config.max_requests),
            global_limiter: RateLimiter::new(
                store.clone(),
                config.global_window_ms,
                config.global_max_requests,
            ),
            escalation,
            spam,
            suspicion: SuspicionScorer::new(config.suspicion_threshold),
            frequency: RequestFrequencyTracker::new(),
            reputation,
            store,
            config,
        }
    }

    /// Run the full pipeline for one request and return the verdict.
    pub async fn evaluate(&self, request: &GuardRequest) -> Decision {
        let ip = request.ip.as_str();

        if self.reputation.is_whitelisted(ip) {
            debug!(ip = %ip, "whitelisted, skipping checks");
            return Decision::allow(0, None);
        }

        let state = self.reputation.check(ip).await;
        if state.blocked {
            let detail = if state.permanent {
                format!("Blocked IP rejected (permanent): {}", state.reason.as_deref().unwrap_or(""))
            } else {
                format!("Blocked IP rejected (temporary): {}", state.reason.as_deref().unwrap_or(""))
            };
            self.append_event(
                SecurityEvent::new("blocked_ip_attempt", ip, Severity::Warning)
                    .with_user_agent(request.user_agent.as_deref())
                    .with_blocked(true)
                    .with_details(detail),
            )
            .await;
            return Decision::reject(403, ReasonCode::IpBlocked);
        }

        let global = self.global_limiter.increment(ip, GLOBAL_WINDOW_KEY).await;
        if global.exceeded {
            let now = chrono::Utc::now();
            self.append_event(
                SecurityEvent::new("rate_limit_exceeded", ip, Severity::Warning)
                    .with_user_agent(request.user_agent.as_deref())
                    .with_blocked(true)
                    .with_details(format!(
                        "Global limit exceeded ({} requests)",
                        global.total_hits
                    )),
            )
            .await;
            let mut decision = Decision::reject(429, ReasonCode::RateLimitExceeded);
            decision.retry_after_seconds = Some(global.retry_after_seconds(now));
            return decision;
        }

        let endpoint = self
            .endpoint_limiter
            .increment(ip, &request.endpoint)
            .await;
        if endpoint.exceeded {
            let now = chrono::Utc::now();
            self.append_event(
                SecurityEvent::new("rate_limit_exceeded", ip, Severity::Warning)
                    .with_user_agent(request.user_agent.as_deref())
                    .with_blocked(true)
                    .with_details(format!(
                        "Endpoint {} limit exceeded ({} of {})",
                        request.endpoint, endpoint.total_hits, endpoint.limit
                    )),
            )
            .await;
            if let Err(err) = self.escalation.record_rate_limit_violation(ip).await {
                warn!(ip = %ip, error = %err, "escalation update failed");
            }
            let mut decision = Decision::reject(429, ReasonCode::RateLimitExceeded);
            decision.retry_after_seconds = Some(endpoint.retry_after_seconds(now));
            return decision;
        }

        let delay_ms = throttle::delay_for(
            endpoint.total_hits,
            self.config.delay_after,
            self.config.per_request_delay_ms,
            self.config.max_delay_ms,
        );
        if delay_ms > 0 {
            debug!(ip = %ip, delay_ms, "applying progressive delay");
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        let mut spam_analysis = None;
        if let Some(fields) = &request.fields {
            let analysis = self
                .spam
                .analyze(&fields.name, &fields.email, &fields.problem_description);
            if analysis.is_spam {
                // Appended first so this attempt counts toward the
                // spam-escalation threshold.
                self.append_event(
                    SecurityEvent::new("spam_detected", ip, Severity::Warning)
                        .with_user_agent(request.user_agent.as_deref())
                        .with_request_data(serde_json::json!({
                            "name": truncate(&fields.name, 50),
                            "email": fields.email,
                            "score": analysis.score,
                            "reasons": analysis.reasons,
                        }))
                        .with_blocked(true)
                        .with_details(format!("Spam detected: {}", analysis.reasons.join(", "))),
                )
                .await;
                if let Err(err) = self.escalation.record_spam_event(ip).await {
                    warn!(ip = %ip, error = %err, "spam escalation failed");
                }
                let mut decision = Decision::reject(403, ReasonCode::SpamDetected);
                decision.spam_analysis = Some(analysis);
                decision.throttle_ms = delay_ms;
                return decision;
            }
            spam_analysis = Some(analysis);
        }

        let suspicion_input = SuspicionInput {
            user_agent: request.user_agent.clone(),
            referer: request.referer.clone(),
            accept: request.accept.clone(),
            accept_language: request.accept_language.clone(),
            recent_request_count: self.frequency.record(ip),
            is_known_exit_node: self.config.exit_nodes.iter().any(|node| node == ip),
        };
        let suspicion = self.suspicion.analyze(&suspicion_input);
        if suspicion.is_suspicious {
            warn!(ip = %ip, score = suspicion.score, "high suspicion score");
            self.append_event(
                SecurityEvent::new("high_suspicion_score", ip, Severity::Warning)
                    .with_user_agent(request.user_agent.as_deref())
                    .with_request_data(serde_json::json!({
                        "score": suspicion.score,
                        "reasons": suspicion.reasons,
                    }))
                    .with_details(suspicion.reasons.join(", ")),
            )
            .await;
        }

        let mut decision = Decision::allow(delay_ms, Some(suspicion));
        decision.spam_analysis = spam_analysis;
        decision
    }

    /// Drop transient state older than its retention window. Driven by a
    /// timer task in `main`, decoupled from request volume.
    pub fn sweep(&self) {
        self.escalation.sweep();
        self.frequency.sweep();
    }

    async fn append_event(&self, event: SecurityEvent) {
        if let Err(err) = self.store.append_security_event(event).await {
            warn!(error = %err, "failed to append security event");
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn quick_config() -> DefenseConfig {
        DefenseConfig {
            // Keep the throttle negligible so tests stay fast.
            per_request_delay_ms: 1,
            max_delay_ms: 2,
            ..DefenseConfig::default()
        }
    }

    fn plain_request(ip: &str) -> GuardRequest {
        GuardRequest {
            ip: ip.to_string(),
            endpoint: "/api/contact".to_string(),
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0".to_string()),
            referer: None,
            accept: Some("application/json".to_string()),
            accept_language: Some("es-ES".to_string()),
            fields: None,
        }
    }

    #[tokio::test]
    async fn whitelisted_ip_is_never_limited() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = DefensePipeline::new(store.clone(), quick_config());

        for _ in 0..20 {
            let decision = pipeline.evaluate(&plain_request("127.0.0.1")).await;
            assert!(decision.allowed);
            assert_eq!(decision.reason_code, ReasonCode::Ok);
        }
        assert!(store.events().await.is_empty());
    }

    #[tokio::test]
    async fn fourth_request_is_rate_limited() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = DefensePipeline::new(store.clone(), quick_config());
        let request = plain_request("203.0.113.5");

        for _ in 0..3 {
            assert!(pipeline.evaluate(&request).await.allowed);
        }
        let fourth = pipeline.evaluate(&request).await;
        assert!(!fourth.allowed);
        assert_eq!(fourth.http_status, 429);
        assert_eq!(fourth.reason_code, ReasonCode::RateLimitExceeded);
        assert!(fourth.retry_after_seconds.unwrap() > 0);

        let events = store.events().await;
        let limit_events: Vec<_> = events
            .iter()
            .filter(|event| event.event_type == "rate_limit_exceeded")
            .collect();
        assert_eq!(limit_events.len(), 1);
    }

    #[tokio::test]
    async fn spam_submission_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = DefensePipeline::new(store.clone(), quick_config());

        let mut request = plain_request("203.0.113.6");
        request.fields = Some(SubmittedFields {
            name: "Promo".to_string(),
            email: "promo@gmail.com".to_string(),
            phone: None,
            equipment_type: None,
            problem_description: "URGENTE!!! Gana dinero facil http://x.com http://y.com"
                .to_string(),
        });

        let decision = pipeline.evaluate(&request).await;
        assert!(!decision.allowed);
        assert_eq!(decision.http_status, 403);
        assert_eq!(decision.reason_code, ReasonCode::SpamDetected);
        let analysis = decision.spam_analysis.unwrap();
        assert!(analysis.score >= 50);

        let events = store.events().await;
        assert!(events
            .iter()
            .any(|event| event.event_type == "spam_detected" && event.blocked));
    }

    #[tokio::test]
    async fn blocked_ip_is_rejected_up_front() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = DefensePipeline::new(store.clone(), quick_config());

        store
            .upsert_reputation("203.0.113.7", "manual", Some(24), false)
            .await
            .unwrap();

        let decision = pipeline.evaluate(&plain_request("203.0.113.7")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.http_status, 403);
        assert_eq!(decision.reason_code, ReasonCode::IpBlocked);
    }

    #[tokio::test]
    async fn suspicion_is_attached_but_never_rejects() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = DefensePipeline::new(store.clone(), quick_config());

        let request = GuardRequest {
            ip: "203.0.113.8".to_string(),
            endpoint: "/api/contact".to_string(),
            user_agent: Some("curl/8.5".to_string()),
            fields: None,
            ..Default::default()
        };
        let decision = pipeline.evaluate(&request).await;
        assert!(decision.allowed);
        let suspicion = decision.suspicion_analysis.unwrap();
        assert!(suspicion.is_suspicious);

        let events = store.events().await;
        assert!(events
            .iter()
            .any(|event| event.event_type == "high_suspicion_score" && !event.blocked));
    }
}
