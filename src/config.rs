use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Configuration for the form-submission gateway.
///
/// Built once at startup and injected into every component; nothing reads
/// the environment after `from_env` returns. Parse or validation failures
/// here are fatal to the process but can never occur mid-request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Defense pipeline configuration
    pub defense: DefenseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses the in-memory store)
    pub postgres_enabled: bool,
    /// Connection pool size
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Enable per-request logging
    pub log_requests: bool,
}

/// Tunables for the abuse-mitigation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenseConfig {
    /// Endpoint rate-limit window in milliseconds
    pub window_ms: i64,
    /// Maximum requests per endpoint window
    pub max_requests: i64,
    /// Global rate-limit window in milliseconds
    pub global_window_ms: i64,
    /// Maximum requests per global window
    pub global_max_requests: i64,
    /// Requests in a window before progressive delay kicks in
    pub delay_after: i64,
    /// Added delay per request over `delay_after`, in milliseconds
    pub per_request_delay_ms: u64,
    /// Ceiling on the progressive delay, in milliseconds
    pub max_delay_ms: u64,
    /// Duration of a temporary block, in hours
    pub block_duration_hours: i64,
    /// Violation count at which a block becomes permanent
    pub permanent_block_threshold: u32,
    /// Violation count that triggers a block
    pub suspicious_activity_threshold: u32,
    /// Spam score at or above which a submission is rejected
    pub spam_threshold: u32,
    /// Suspicion score at or above which a request is flagged
    pub suspicion_threshold: u32,
    /// URLs allowed in a submission before it is penalized
    pub max_urls_allowed: usize,
    /// Maximum uppercase percentage before content is penalized
    pub max_capital_percentage: f64,
    /// Exact IPs and CIDR blocks exempt from all checks
    pub whitelist: Vec<String>,
    /// Known anonymizing exit-node IPs
    pub exit_nodes: Vec<String>,
    /// Lower-cased spam keywords, matched as substrings
    pub spam_keywords: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost:5432/formgate".to_string(),
            postgres_enabled: false,
            max_connections: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_requests: true,
        }
    }
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            window_ms: 3_600_000,
            max_requests: 3,
            global_window_ms: 60_000,
            global_max_requests: 100,
            delay_after: 1,
            per_request_delay_ms: 500,
            max_delay_ms: 5_000,
            block_duration_hours: 24,
            permanent_block_threshold: 10,
            suspicious_activity_threshold: 5,
            spam_threshold: 50,
            suspicion_threshold: 40,
            max_urls_allowed: 0,
            max_capital_percentage: 30.0,
            whitelist: vec![
                "127.0.0.1".to_string(),
                "::1".to_string(),
                "192.168.0.0/16".to_string(),
                "10.0.0.0/8".to_string(),
                "172.16.0.0/12".to_string(),
            ],
            exit_nodes: Vec::new(),
            spam_keywords: default_spam_keywords(),
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            defense: DefenseConfig::default(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from environment variables and validate it.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = env::var("FORMGATE_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = env::var("FORMGATE_PORT") {
            config.server.port = port.parse().context("invalid FORMGATE_PORT value")?;
        }

        if let Ok(url) = env::var("FORMGATE_POSTGRES_URL") {
            config.database.postgres_url = url;
        }
        if let Ok(enabled) = env::var("FORMGATE_POSTGRES_ENABLED") {
            config.database.postgres_enabled = enabled
                .parse()
                .context("invalid FORMGATE_POSTGRES_ENABLED value")?;
        }
        if let Ok(max) = env::var("FORMGATE_DB_MAX_CONNECTIONS") {
            config.database.max_connections = max
                .parse()
                .context("invalid FORMGATE_DB_MAX_CONNECTIONS value")?;
        }

        if let Ok(level) = env::var("FORMGATE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(log_requests) = env::var("FORMGATE_LOG_REQUESTS") {
            config.logging.log_requests = log_requests
                .parse()
                .context("invalid FORMGATE_LOG_REQUESTS value")?;
        }

        if let Ok(window) = env::var("FORMGATE_RATE_LIMIT_WINDOW_MS") {
            config.defense.window_ms = window
                .parse()
                .context("invalid FORMGATE_RATE_LIMIT_WINDOW_MS value")?;
        }
        if let Ok(max) = env::var("FORMGATE_RATE_LIMIT_MAX_REQUESTS") {
            config.defense.max_requests = max
                .parse()
                .context("invalid FORMGATE_RATE_LIMIT_MAX_REQUESTS value")?;
        }
        if let Ok(delay) = env::var("FORMGATE_SLOW_DOWN_DELAY_MS") {
            config.defense.per_request_delay_ms = delay
                .parse()
                .context("invalid FORMGATE_SLOW_DOWN_DELAY_MS value")?;
        }
        if let Ok(hours) = env::var("FORMGATE_IP_BLOCK_DURATION_HOURS") {
            config.defense.block_duration_hours = hours
                .parse()
                .context("invalid FORMGATE_IP_BLOCK_DURATION_HOURS value")?;
        }
        if let Ok(threshold) = env::var("FORMGATE_PERMANENT_BLOCK_THRESHOLD") {
            config.defense.permanent_block_threshold = threshold
                .parse()
                .context("invalid FORMGATE_PERMANENT_BLOCK_THRESHOLD value")?;
        }
        if let Ok(threshold) = env::var("FORMGATE_SUSPICIOUS_ACTIVITY_THRESHOLD") {
            config.defense.suspicious_activity_threshold = threshold
                .parse()
                .context("invalid FORMGATE_SUSPICIOUS_ACTIVITY_THRESHOLD value")?;
        }
        if let Ok(threshold) = env::var("FORMGATE_SPAM_THRESHOLD") {
            config.defense.spam_threshold = threshold
                .parse()
                .context("invalid FORMGATE_SPAM_THRESHOLD value")?;
        }
        if let Ok(whitelist) = env::var("FORMGATE_WHITELIST") {
            config.defense.whitelist = whitelist
                .split(',')
                .map(|entry| entry.trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect();
        }
        if let Ok(exit_nodes) = env::var("FORMGATE_EXIT_NODES") {
            config.defense.exit_nodes = exit_nodes
                .split(',')
                .map(|entry| entry.trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate security-relevant settings. Called at startup only.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let defense = &self.defense;

        if defense.window_ms <= 0 || defense.global_window_ms <= 0 {
            errors.push("rate-limit windows must be positive".to_string());
        }
        if defense.max_requests < 1 || defense.global_max_requests < 1 {
            errors.push("rate limits must allow at least one request".to_string());
        }
        if defense.per_request_delay_ms > defense.max_delay_ms {
            errors.push("per-request delay exceeds the delay ceiling".to_string());
        }
        if defense.suspicious_activity_threshold == 0 {
            errors.push("suspicious activity threshold must be at least 1".to_string());
        }
        if defense.permanent_block_threshold < defense.suspicious_activity_threshold {
            errors.push(
                "permanent block threshold must not be below the suspicious activity threshold"
                    .to_string(),
            );
        }
        if defense.block_duration_hours < 1 {
            errors.push("block duration must be at least one hour".to_string());
        }
        if !(0.0..=100.0).contains(&defense.max_capital_percentage) {
            errors.push("max capital percentage must be within 0-100".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "configuration errors: {}",
                errors.join(", ")
            ))
        }
    }
}

/// Built-in spam keywords (Spanish and English phrasebook plus common
/// scam vocabulary), overridable via configuration.
pub fn default_spam_keywords() -> Vec<String> {
    [
        "oferta especial",
        "click aqui",
        "ganar dinero",
        "trabajo desde casa",
        "inversion minima",
        "dinero facil",
        "urgente",
        "felicidades has ganado",
        "promocion limitada",
        "reclama ahora",
        "sin costo",
        "gratis total",
        "make money fast",
        "work from home",
        "click here now",
        "free money",
        "urgent response",
        "congratulations you won",
        "limited time offer",
        "act now",
        "risk free",
        "guaranteed income",
        "viagra",
        "casino",
        "lottery",
        "inheritance",
        "bitcoin investment",
        "cryptocurrency",
        "forex trading",
        "mlm",
        "pyramid",
    ]
    .iter()
    .map(|keyword| keyword.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GuardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.defense.window_ms, 3_600_000);
        assert_eq!(config.defense.max_requests, 3);
        assert_eq!(config.defense.spam_threshold, 50);
        assert_eq!(config.defense.suspicion_threshold, 40);
    }

    #[test]
    fn rejects_zero_window() {
        let mut config = GuardConfig::default();
        config.defense.window_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_permanent_threshold_below_suspicious() {
        let mut config = GuardConfig::default();
        config.defense.permanent_block_threshold = 2;
        config.defense.suspicious_activity_threshold = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_whitelist_covers_loopback_and_private_ranges() {
        let config = GuardConfig::default();
        assert!(config.defense.whitelist.contains(&"127.0.0.1".to_string()));
        assert!(config
            .defense
            .whitelist
            .iter()
            .any(|entry| entry.contains('/')));
    }
}
