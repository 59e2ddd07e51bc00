//! Login activity log
//!
//! Append-only audit trail of authentication attempts in the
//! `login_activity` table.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{LoginActivityRecord, NewLoginActivity};

/// Read and append access to the login activity log
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Append one record and return it as stored
    async fn insert(&self, activity: &NewLoginActivity) -> DatabaseResult<LoginActivityRecord>;

    /// Successful logins of the user since `since`, newest first, at most `limit`
    async fn recent_successes(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        limit: i64,
    ) -> DatabaseResult<Vec<LoginActivityRecord>>;

    /// Number of failed attempts of the user since `since`
    async fn count_failures_since(&self, user_id: Uuid, since: DateTime<Utc>)
    -> DatabaseResult<i64>;

    /// Whether any successful login used exactly this device triple
    ///
    /// Absent attributes only match absent attributes.
    async fn has_device_match(
        &self,
        user_id: Uuid,
        device_type: Option<&str>,
        browser: Option<&str>,
        os: Option<&str>,
    ) -> DatabaseResult<bool>;

    /// Whether any successful login came from this country
    async fn has_country(&self, user_id: Uuid, country: &str) -> DatabaseResult<bool>;

    /// Latest record of the user for each of the given session ids
    async fn latest_by_session(
        &self,
        user_id: Uuid,
        session_ids: &[String],
    ) -> DatabaseResult<HashMap<String, LoginActivityRecord>>;

    /// The user's records, newest first, at most `limit`
    async fn list_for_user(&self, user_id: Uuid, limit: i64)
    -> DatabaseResult<Vec<LoginActivityRecord>>;
}

const RECORD_COLUMNS: &str = "id, user_id, session_id, auth_method, two_factor_used, status, \
     failure_reason, ip_address, device_type, browser, os, country, city, is_suspicious, \
     suspicious_reasons, created_at";

/// PostgreSQL-backed activity log
#[derive(Clone)]
pub struct PgActivityLog {
    pool: PgPool,
}

impl PgActivityLog {
    /// Create a new activity log over the pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> DatabaseResult<LoginActivityRecord> {
    let auth_method: String = row.try_get("auth_method").map_err(DatabaseError::Query)?;
    let status: String = row.try_get("status").map_err(DatabaseError::Query)?;

    Ok(LoginActivityRecord {
        id: row.try_get("id").map_err(DatabaseError::Query)?,
        user_id: row.try_get("user_id").map_err(DatabaseError::Query)?,
        session_id: row.try_get("session_id").map_err(DatabaseError::Query)?,
        auth_method: auth_method
            .parse()
            .map_err(|_| DatabaseError::CorruptRow(format!("auth_method '{}'", auth_method)))?,
        two_factor_used: row.try_get("two_factor_used").map_err(DatabaseError::Query)?,
        status: status
            .parse()
            .map_err(|_| DatabaseError::CorruptRow(format!("status '{}'", status)))?,
        failure_reason: row.try_get("failure_reason").map_err(DatabaseError::Query)?,
        ip_address: row.try_get("ip_address").map_err(DatabaseError::Query)?,
        device_type: row.try_get("device_type").map_err(DatabaseError::Query)?,
        browser: row.try_get("browser").map_err(DatabaseError::Query)?,
        os: row.try_get("os").map_err(DatabaseError::Query)?,
        country: row.try_get("country").map_err(DatabaseError::Query)?,
        city: row.try_get("city").map_err(DatabaseError::Query)?,
        is_suspicious: row.try_get("is_suspicious").map_err(DatabaseError::Query)?,
        suspicious_reasons: row
            .try_get("suspicious_reasons")
            .map_err(DatabaseError::Query)?,
        created_at: row.try_get("created_at").map_err(DatabaseError::Query)?,
    })
}

#[async_trait]
impl ActivityLog for PgActivityLog {
    async fn insert(&self, activity: &NewLoginActivity) -> DatabaseResult<LoginActivityRecord> {
        let query = format!(
            r#"
            INSERT INTO login_activity (
                id, user_id, session_id, auth_method, two_factor_used, status,
                failure_reason, ip_address, device_type, browser, os, country, city,
                is_suspicious, suspicious_reasons
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(activity.user_id)
            .bind(&activity.session_id)
            .bind(activity.auth_method.as_str())
            .bind(activity.two_factor_used)
            .bind(activity.status.as_str())
            .bind(&activity.failure_reason)
            .bind(&activity.ip_address)
            .bind(&activity.device_type)
            .bind(&activity.browser)
            .bind(&activity.os)
            .bind(&activity.country)
            .bind(&activity.city)
            .bind(activity.is_suspicious)
            .bind(&activity.suspicious_reasons)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        let record = record_from_row(&row)?;
        info!(
            "Recorded {} login attempt via {}",
            record.status, record.auth_method
        );
        Ok(record)
    }

    async fn recent_successes(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        limit: i64,
    ) -> DatabaseResult<Vec<LoginActivityRecord>> {
        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM login_activity
            WHERE user_id = $1 AND status = 'success' AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT $3
            "#
        );

        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn count_failures_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> DatabaseResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS failures
            FROM login_activity
            WHERE user_id = $1 AND status = 'failed' AND created_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        row.try_get("failures").map_err(DatabaseError::Query)
    }

    async fn has_device_match(
        &self,
        user_id: Uuid,
        device_type: Option<&str>,
        browser: Option<&str>,
        os: Option<&str>,
    ) -> DatabaseResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM login_activity
                WHERE user_id = $1
                  AND status = 'success'
                  AND device_type IS NOT DISTINCT FROM $2
                  AND browser IS NOT DISTINCT FROM $3
                  AND os IS NOT DISTINCT FROM $4
            ) AS matched
            "#,
        )
        .bind(user_id)
        .bind(device_type)
        .bind(browser)
        .bind(os)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        row.try_get("matched").map_err(DatabaseError::Query)
    }

    async fn has_country(&self, user_id: Uuid, country: &str) -> DatabaseResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM login_activity
                WHERE user_id = $1 AND status = 'success' AND country = $2
            ) AS matched
            "#,
        )
        .bind(user_id)
        .bind(country)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        row.try_get("matched").map_err(DatabaseError::Query)
    }

    async fn latest_by_session(
        &self,
        user_id: Uuid,
        session_ids: &[String],
    ) -> DatabaseResult<HashMap<String, LoginActivityRecord>> {
        if session_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let query = format!(
            r#"
            SELECT DISTINCT ON (session_id) {RECORD_COLUMNS}
            FROM login_activity
            WHERE user_id = $1 AND session_id = ANY($2)
            ORDER BY session_id, created_at DESC
            "#
        );

        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(session_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        let mut latest = HashMap::with_capacity(rows.len());
        for row in &rows {
            let record = record_from_row(row)?;
            if let Some(session_id) = record.session_id.clone() {
                latest.insert(session_id, record);
            }
        }
        debug!("Loaded activity for {} of {} sessions", latest.len(), session_ids.len());
        Ok(latest)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> DatabaseResult<Vec<LoginActivityRecord>> {
        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM login_activity
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );

        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        rows.iter().map(record_from_row).collect()
    }
}
