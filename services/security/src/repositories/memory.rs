//! In-process repositories
//!
//! Same contracts as the PostgreSQL repositories, backed by vectors and maps.
//! Used by the test suites and for running the service without a database.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::activity::ActivityLog;
use super::user::{UserDirectory, hash_password};
use crate::error::SecurityResult;
use crate::models::{LoginActivityRecord, LoginStatus, NewLoginActivity, User};

/// In-memory login activity log
#[derive(Clone, Default)]
pub struct InMemoryActivityLog {
    records: Arc<Mutex<Vec<LoginActivityRecord>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as an unreachable database would
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Append a record with an explicit timestamp
    pub async fn insert_at(
        &self,
        activity: &NewLoginActivity,
        created_at: DateTime<Utc>,
    ) -> DatabaseResult<LoginActivityRecord> {
        self.ensure_available()?;

        let record = LoginActivityRecord {
            id: Uuid::new_v4(),
            user_id: activity.user_id,
            session_id: activity.session_id.clone(),
            auth_method: activity.auth_method,
            two_factor_used: activity.two_factor_used,
            status: activity.status,
            failure_reason: activity.failure_reason.clone(),
            ip_address: activity.ip_address.clone(),
            device_type: activity.device_type.clone(),
            browser: activity.browser.clone(),
            os: activity.os.clone(),
            country: activity.country.clone(),
            city: activity.city.clone(),
            is_suspicious: activity.is_suspicious,
            suspicious_reasons: activity.suspicious_reasons.clone(),
            created_at,
        };

        self.records.lock().await.push(record.clone());
        Ok(record)
    }

    /// Every stored record, in insertion order
    pub async fn all(&self) -> Vec<LoginActivityRecord> {
        self.records.lock().await.clone()
    }

    fn ensure_available(&self) -> DatabaseResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn successes_of(&self, user_id: Uuid) -> Vec<LoginActivityRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.user_id == Some(user_id) && r.status == LoginStatus::Success)
            .cloned()
            .collect()
    }
}

fn newest_first(records: &mut [LoginActivityRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn insert(&self, activity: &NewLoginActivity) -> DatabaseResult<LoginActivityRecord> {
        self.insert_at(activity, Utc::now()).await
    }

    async fn recent_successes(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
        limit: i64,
    ) -> DatabaseResult<Vec<LoginActivityRecord>> {
        self.ensure_available()?;

        let mut records: Vec<_> = self
            .successes_of(user_id)
            .await
            .into_iter()
            .filter(|r| r.created_at >= since)
            .collect();
        newest_first(&mut records);
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn count_failures_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> DatabaseResult<i64> {
        self.ensure_available()?;

        let count = self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| {
                r.user_id == Some(user_id)
                    && r.status == LoginStatus::Failed
                    && r.created_at >= since
            })
            .count();
        Ok(count as i64)
    }

    async fn has_device_match(
        &self,
        user_id: Uuid,
        device_type: Option<&str>,
        browser: Option<&str>,
        os: Option<&str>,
    ) -> DatabaseResult<bool> {
        self.ensure_available()?;

        Ok(self.successes_of(user_id).await.iter().any(|r| {
            r.device_type.as_deref() == device_type
                && r.browser.as_deref() == browser
                && r.os.as_deref() == os
        }))
    }

    async fn has_country(&self, user_id: Uuid, country: &str) -> DatabaseResult<bool> {
        self.ensure_available()?;

        Ok(self
            .successes_of(user_id)
            .await
            .iter()
            .any(|r| r.country.as_deref() == Some(country)))
    }

    async fn latest_by_session(
        &self,
        user_id: Uuid,
        session_ids: &[String],
    ) -> DatabaseResult<HashMap<String, LoginActivityRecord>> {
        self.ensure_available()?;

        let records = self.records.lock().await;
        let mut latest: HashMap<String, LoginActivityRecord> = HashMap::new();
        for record in records.iter().filter(|r| r.user_id == Some(user_id)) {
            let Some(session_id) = record.session_id.as_ref() else {
                continue;
            };
            if !session_ids.contains(session_id) {
                continue;
            }
            let newer = latest
                .get(session_id)
                .is_none_or(|current| record.created_at >= current.created_at);
            if newer {
                latest.insert(session_id.clone(), record.clone());
            }
        }
        Ok(latest)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> DatabaseResult<Vec<LoginActivityRecord>> {
        self.ensure_available()?;

        let mut records: Vec<_> = self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.user_id == Some(user_id))
            .cloned()
            .collect();
        newest_first(&mut records);
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }
}

/// In-memory user directory
#[derive(Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<Mutex<HashMap<Uuid, User>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with a freshly hashed password
    pub async fn add_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> SecurityResult<User> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
            created_at: now,
            updated_at: now,
        };

        self.users.lock().await.insert(user.id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn find_by_username_or_email(
        &self,
        username_or_email: &str,
    ) -> DatabaseResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .await
            .values()
            .find(|u| u.username == username_or_email || u.email == username_or_email)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthMethod;
    use crate::request_info::RequestInfo;
    use chrono::Duration;

    fn success(user_id: Uuid, session_id: &str, browser: &str) -> NewLoginActivity {
        let request = RequestInfo {
            ip_address: "203.0.113.5".to_string(),
            browser: Some(browser.to_string()),
            ..Default::default()
        };
        NewLoginActivity::from_request(
            Some(user_id),
            Some(session_id.to_string()),
            AuthMethod::Password,
            false,
            LoginStatus::Success,
            None,
            &request,
        )
    }

    #[tokio::test]
    async fn test_latest_by_session_picks_newest() -> anyhow::Result<()> {
        let log = InMemoryActivityLog::new();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        log.insert_at(&success(user_id, "s1", "Chrome"), now - Duration::hours(2))
            .await?;
        log.insert_at(&success(user_id, "s1", "Firefox"), now).await?;
        log.insert_at(&success(Uuid::new_v4(), "s1", "Edge"), now + Duration::hours(1))
            .await?;

        let latest = log.latest_by_session(user_id, &["s1".to_string()]).await?;
        assert_eq!(latest["s1"].browser.as_deref(), Some("Firefox"));
        Ok(())
    }

    #[tokio::test]
    async fn test_device_match_is_null_safe() -> anyhow::Result<()> {
        let log = InMemoryActivityLog::new();
        let user_id = Uuid::new_v4();
        log.insert(&success(user_id, "s1", "Chrome")).await?;

        assert!(log.has_device_match(user_id, None, Some("Chrome"), None).await?);
        assert!(!log
            .has_device_match(user_id, Some("desktop"), Some("Chrome"), None)
            .await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_log_reports_errors() {
        let log = InMemoryActivityLog::new();
        log.set_failing(true);
        assert!(log.list_for_user(Uuid::new_v4(), 10).await.is_err());
    }
}
