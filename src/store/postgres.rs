//! PostgreSQL implementation of the store contract using sqlx.
//!
//! Both upserts are single statements with computed next-value expressions
//! (`ON CONFLICT ... DO UPDATE`), so concurrent requests from the same IP
//! never lose an increment to a read-then-write race.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;

use crate::store::{
    GuardStore, NewContact, RateWindow, RateWindowUpdate, ReputationRecord, SecurityEvent,
};

pub struct PgGuardStore {
    pool: PgPool,
}

impl PgGuardStore {
    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .context("failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing guard schema...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocked_ips (
                ip_address TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                blocked_until TIMESTAMPTZ,
                permanent BOOLEAN NOT NULL DEFAULT FALSE,
                blocked_count BIGINT NOT NULL DEFAULT 1,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create blocked_ips table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_limits (
                ip_address TEXT NOT NULL,
                endpoint TEXT NOT NULL,
                request_count BIGINT NOT NULL DEFAULT 1,
                window_start TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_request TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (ip_address, endpoint)
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create rate_limits table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS security_events (
                id BIGSERIAL PRIMARY KEY,
                event_type TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                user_agent TEXT,
                request_data JSONB NOT NULL DEFAULT '{}'::jsonb,
                blocked BOOLEAN NOT NULL DEFAULT FALSE,
                severity TEXT NOT NULL DEFAULT 'info',
                details TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create security_events table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_security_events_ip_type \
             ON security_events(ip_address, event_type, created_at)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create security_events index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT,
                equipment_type TEXT,
                problem_description TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                user_agent TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create contacts table")?;

        info!("Guard schema initialized");
        Ok(())
    }

}

#[async_trait]
impl GuardStore for PgGuardStore {
    async fn get_reputation(&self, ip: &str) -> Result<Option<ReputationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT ip_address, reason, blocked_until, permanent, blocked_count,
                   created_at, updated_at
            FROM blocked_ips
            WHERE ip_address = $1
        "#,
        )
        .bind(ip)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read reputation record")?;

        Ok(row.map(|row| ReputationRecord {
            ip: row.get("ip_address"),
            reason: row.get("reason"),
            blocked_until: row.get("blocked_until"),
            permanent: row.get("permanent"),
            blocked_count: row.get("blocked_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn upsert_reputation(
        &self,
        ip: &str,
        reason: &str,
        duration_hours: Option<i64>,
        permanent: bool,
    ) -> Result<()> {
        let blocked_until = duration_hours.map(|hours| Utc::now() + Duration::hours(hours));

        sqlx::query(
            r#"
            INSERT INTO blocked_ips
                (ip_address, reason, blocked_until, permanent, blocked_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 1, NOW(), NOW())
            ON CONFLICT (ip_address) DO UPDATE SET
                reason = EXCLUDED.reason,
                blocked_until = EXCLUDED.blocked_until,
                permanent = EXCLUDED.permanent,
                blocked_count = blocked_ips.blocked_count + 1,
                updated_at = NOW()
        "#,
        )
        .bind(ip)
        .bind(reason)
        .bind(blocked_until)
        .bind(permanent)
        .execute(&self.pool)
        .await
        .context("failed to upsert reputation record")?;

        Ok(())
    }

    async fn get_rate_window(
        &self,
        ip: &str,
        endpoint: &str,
        window_ms: i64,
    ) -> Result<Option<RateWindow>> {
        let cutoff = Utc::now() - Duration::milliseconds(window_ms);

        let row = sqlx::query(
            r#"
            SELECT ip_address, endpoint, request_count, window_start, last_request
            FROM rate_limits
            WHERE ip_address = $1 AND endpoint = $2 AND window_start > $3
        "#,
        )
        .bind(ip)
        .bind(endpoint)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read rate window")?;

        Ok(row.map(|row| RateWindow {
            ip: row.get("ip_address"),
            endpoint: row.get("endpoint"),
            request_count: row.get("request_count"),
            window_start: row.get("window_start"),
            last_request: row.get("last_request"),
        }))
    }

    async fn upsert_rate_window(
        &self,
        ip: &str,
        endpoint: &str,
        window_ms: i64,
    ) -> Result<RateWindowUpdate> {
        let cutoff = Utc::now() - Duration::milliseconds(window_ms);

        // An expired window is replaced with a fresh one (count 1) in the
        // same statement that increments a current one.
        let row = sqlx::query(
            r#"
            INSERT INTO rate_limits (ip_address, endpoint, request_count, window_start, last_request)
            VALUES ($1, $2, 1, NOW(), NOW())
            ON CONFLICT (ip_address, endpoint) DO UPDATE SET
                request_count = CASE
                    WHEN rate_limits.window_start > $3 THEN rate_limits.request_count + 1
                    ELSE 1
                END,
                window_start = CASE
                    WHEN rate_limits.window_start > $3 THEN rate_limits.window_start
                    ELSE NOW()
                END,
                last_request = NOW()
            RETURNING request_count, window_start
        "#,
        )
        .bind(ip)
        .bind(endpoint)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .context("failed to upsert rate window")?;

        let total_hits: i64 = row.get("request_count");
        let window_start: chrono::DateTime<Utc> = row.get("window_start");

        Ok(RateWindowUpdate {
            total_hits,
            reset_time: window_start + Duration::milliseconds(window_ms),
        })
    }

    async fn append_security_event(&self, event: SecurityEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO security_events
                (event_type, ip_address, user_agent, request_data, blocked, severity, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
        )
        .bind(&event.event_type)
        .bind(&event.ip)
        .bind(&event.user_agent)
        .bind(&event.request_data)
        .bind(event.blocked)
        .bind(event.severity.as_str())
        .bind(&event.details)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .context("failed to append security event")?;

        Ok(())
    }

    async fn count_recent_events(
        &self,
        ip: &str,
        event_type: &str,
        since_hours: i64,
    ) -> Result<i64> {
        let cutoff = Utc::now() - Duration::hours(since_hours);

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM security_events
            WHERE ip_address = $1 AND event_type = $2 AND created_at > $3
        "#,
        )
        .bind(ip)
        .bind(event_type)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .context("failed to count recent events")?;

        Ok(row.get("count"))
    }

    async fn insert_contact(&self, contact: NewContact) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO contacts
                (name, email, phone, equipment_type, problem_description, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
        "#,
        )
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(&contact.equipment_type)
        .bind(&contact.problem_description)
        .bind(&contact.ip)
        .bind(&contact.user_agent)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert contact")?;

        Ok(row.get("id"))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("database health check failed")?;
        Ok(())
    }
}
