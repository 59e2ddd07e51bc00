//! Security service
//!
//! Login activity recording and device management on top of the session
//! manager and the activity log.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::detector::SuspiciousActivityDetector;
use crate::error::{SecurityError, SecurityResult};
use crate::models::{
    AuthMethod, Device, LoginActivityRecord, LoginStatus, NewLoginActivity, Session,
};
use crate::notifier::{NewDeviceInfo, Notifier};
use crate::repositories::{ActivityLog, UserDirectory};
use crate::request_info::{RequestInfo, is_known, mask_ip};
use crate::session::SessionManager;

/// Bounds of the activity listing page size
pub const MIN_ACTIVITY_LIMIT: i64 = 1;
pub const MAX_ACTIVITY_LIMIT: i64 = 100;

/// Maximum length of a device display name, in characters
pub const MAX_DEVICE_NAME_LEN: usize = 50;

/// One authentication attempt to record
#[derive(Debug, Clone)]
pub struct RecordLoginParams {
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub auth_method: AuthMethod,
    pub two_factor_used: bool,
    pub status: LoginStatus,
    pub failure_reason: Option<String>,
    pub request: RequestInfo,
}

/// Security service
#[derive(Clone)]
pub struct SecurityService {
    sessions: SessionManager,
    activity_log: Arc<dyn ActivityLog>,
    users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn Notifier>,
    detector: SuspiciousActivityDetector,
}

impl SecurityService {
    pub fn new(
        sessions: SessionManager,
        activity_log: Arc<dyn ActivityLog>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
        detector: SuspiciousActivityDetector,
    ) -> Self {
        Self {
            sessions,
            activity_log,
            users,
            notifier,
            detector,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Record a login attempt with its suspicion verdict
    ///
    /// A successful attempt must name its user. Returns `Ok(None)` when the
    /// record could not be persisted; recording never fails a login.
    pub async fn record_login_attempt(
        &self,
        params: RecordLoginParams,
    ) -> SecurityResult<Option<LoginActivityRecord>> {
        if params.status == LoginStatus::Success && params.user_id.is_none() {
            return Err(SecurityError::Validation(
                "A successful login must have a user id".to_string(),
            ));
        }

        let mut activity = NewLoginActivity::from_request(
            params.user_id,
            params.session_id,
            params.auth_method,
            params.two_factor_used,
            params.status,
            params.failure_reason,
            &params.request,
        );

        let verdict = self.detector.evaluate(&activity).await;
        activity.is_suspicious = verdict.is_suspicious;
        activity.suspicious_reasons = verdict.reasons;

        // Checked before the write so the attempt does not match itself
        let new_device_user = match (activity.status, activity.user_id) {
            (LoginStatus::Success, Some(user_id)) => self
                .is_new_device(user_id, &params.request)
                .await
                .then_some(user_id),
            _ => None,
        };

        let record = match self.activity_log.insert(&activity).await {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to record login attempt: {}", e);
                return Ok(None);
            }
        };

        if let Some(user_id) = new_device_user {
            self.spawn_new_device_notification(user_id, &record);
        }

        Ok(Some(record))
    }

    /// Hand the notification to a detached task with its own error boundary
    fn spawn_new_device_notification(&self, user_id: Uuid, record: &LoginActivityRecord) {
        let users = Arc::clone(&self.users);
        let notifier = Arc::clone(&self.notifier);
        let device = NewDeviceInfo {
            device_type: record.device_type.clone(),
            browser: record.browser.clone(),
            os: record.os.clone(),
            ip_address: mask_ip(&record.ip_address),
            country: record.country.clone(),
            city: record.city.clone(),
            login_time: record.created_at,
        };

        tokio::spawn(async move {
            let user = match users.find_user_by_id(user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    warn!("Skipping new device notification, user {} not found", user_id);
                    return;
                }
                Err(e) => {
                    error!("Failed to load user {} for notification: {}", user_id, e);
                    return;
                }
            };

            if let Err(e) = notifier.send_new_device_login_email(&user, &device).await {
                error!("Failed to send new device notification to user {}: {}", user_id, e);
            }
        });
    }

    /// Prune the user's dangling session index entries in the background
    pub fn spawn_session_maintenance(&self, user_id: Uuid) {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            if let Err(e) = sessions.cleanup_expired_sessions(user_id).await {
                warn!("Session index maintenance failed for user {}: {}", user_id, e);
            }
        });
    }

    /// The user's login history, newest first, with masked addresses
    pub async fn get_login_activity(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> SecurityResult<Vec<LoginActivityRecord>> {
        let limit = limit.clamp(MIN_ACTIVITY_LIMIT, MAX_ACTIVITY_LIMIT);
        let mut records = self.activity_log.list_for_user(user_id, limit).await?;
        for record in &mut records {
            record.ip_address = mask_ip(&record.ip_address);
        }
        Ok(records)
    }

    /// Whether the request comes from a device or country never seen on a
    /// successful login of this user
    ///
    /// Lookup failures count as a known device.
    pub async fn is_new_device(&self, user_id: Uuid, request: &RequestInfo) -> bool {
        match self.try_is_new_device(user_id, request).await {
            Ok(new_device) => new_device,
            Err(e) => {
                warn!("New device check failed for user {}: {}", user_id, e);
                false
            }
        }
    }

    async fn try_is_new_device(&self, user_id: Uuid, request: &RequestInfo) -> SecurityResult<bool> {
        let seen_device = self
            .activity_log
            .has_device_match(
                user_id,
                request.device_type.as_deref(),
                request.browser.as_deref(),
                request.os.as_deref(),
            )
            .await?;
        if !seen_device {
            return Ok(true);
        }

        match request.country.as_deref() {
            Some(country) if is_known(Some(country)) => {
                Ok(!self.activity_log.has_country(user_id, country).await?)
            }
            _ => Ok(false),
        }
    }

    /// The user's live sessions as a device list, most recently active first
    pub async fn get_active_devices(
        &self,
        user_id: Uuid,
        current_session_id: &str,
    ) -> SecurityResult<Vec<Device>> {
        let sessions = self.sessions.try_get_user_sessions(user_id).await?;
        let ids: Vec<String> = sessions.iter().map(|s| s.session_id.clone()).collect();

        let mut latest = match self.activity_log.latest_by_session(user_id, &ids).await {
            Ok(latest) => latest,
            Err(e) => {
                warn!("Device list for user {} without activity details: {}", user_id, e);
                Default::default()
            }
        };

        let mut devices: Vec<Device> = sessions
            .into_iter()
            .map(|session| {
                let activity = latest.remove(&session.session_id);
                to_device(session, activity, current_session_id)
            })
            .collect();
        devices.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        Ok(devices)
    }

    /// Sign out one of the user's devices
    pub async fn logout_device(&self, user_id: Uuid, session_id: &str) -> SecurityResult<()> {
        self.sessions.revoke_session(user_id, session_id).await
    }

    /// Sign out every device of the user, including the calling one
    pub async fn logout_all_devices(&self, user_id: Uuid) -> SecurityResult<usize> {
        let revoked = self.sessions.revoke_all_sessions(user_id).await?;
        info!("Logged out {} devices for user {}", revoked, user_id);
        Ok(revoked)
    }

    /// Set the display name of one of the user's devices
    pub async fn update_device_name(
        &self,
        user_id: Uuid,
        session_id: &str,
        name: &str,
    ) -> SecurityResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SecurityError::Validation(
                "Device name must not be empty".to_string(),
            ));
        }
        if name.chars().count() > MAX_DEVICE_NAME_LEN {
            return Err(SecurityError::Validation(format!(
                "Device name must be at most {} characters",
                MAX_DEVICE_NAME_LEN
            )));
        }

        self.sessions.rename_session(user_id, session_id, name).await
    }
}

/// Session fields win; the latest activity record fills the gaps
fn to_device(
    session: Session,
    activity: Option<LoginActivityRecord>,
    current_session_id: &str,
) -> Device {
    let activity = activity.as_ref();
    let ip_address = session
        .ip_address
        .clone()
        .or_else(|| activity.map(|record| record.ip_address.clone()))
        .map(|ip| mask_ip(&ip))
        .unwrap_or_else(|| "unknown".to_string());

    Device {
        is_current: session.session_id == current_session_id,
        device_name: session.device_name,
        device_type: session
            .device_type
            .or_else(|| activity.and_then(|r| r.device_type.clone())),
        browser: session
            .browser
            .or_else(|| activity.and_then(|r| r.browser.clone())),
        os: session
            .os
            .or_else(|| activity.and_then(|r| r.os.clone())),
        ip_address,
        country: session
            .country
            .or_else(|| activity.and_then(|r| r.country.clone())),
        city: session
            .city
            .or_else(|| activity.and_then(|r| r.city.clone())),
        created_at: session.created_at,
        last_active: session.last_active,
        session_id: session.session_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectionPolicy;
    use crate::models::SessionMetadata;
    use crate::notifier::LogNotifier;
    use crate::repositories::{InMemoryActivityLog, InMemoryUserDirectory};
    use chrono::Utc;
    use common::memory::MemoryStore;

    fn service() -> (SecurityService, InMemoryActivityLog) {
        let log = InMemoryActivityLog::new();
        let sessions = SessionManager::new(Arc::new(MemoryStore::new()), 86_400);
        let detector =
            SuspiciousActivityDetector::new(Arc::new(log.clone()), DetectionPolicy::default());
        let service = SecurityService::new(
            sessions,
            Arc::new(log.clone()),
            Arc::new(InMemoryUserDirectory::new()),
            Arc::new(LogNotifier),
            detector,
        );
        (service, log)
    }

    fn params(user_id: Option<Uuid>, status: LoginStatus) -> RecordLoginParams {
        RecordLoginParams {
            user_id,
            session_id: None,
            auth_method: AuthMethod::Password,
            two_factor_used: false,
            status,
            failure_reason: None,
            request: RequestInfo {
                ip_address: "198.51.100.23".to_string(),
                browser: Some("Chrome".to_string()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_success_requires_user() {
        let (service, _) = service();
        let result = service
            .record_login_attempt(params(None, LoginStatus::Success))
            .await;
        assert!(matches!(result, Err(SecurityError::Validation(_))));
    }

    #[tokio::test]
    async fn test_failed_attempt_for_unknown_user_is_recorded() -> anyhow::Result<()> {
        let (service, log) = service();
        let mut attempt = params(None, LoginStatus::Failed);
        attempt.failure_reason = Some("Unknown user".to_string());

        let record = service.record_login_attempt(attempt).await?.unwrap();
        assert!(!record.is_suspicious);
        assert!(record.suspicious_reasons.is_empty());
        assert_eq!(log.all().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_persistence_failure_returns_none() -> anyhow::Result<()> {
        let (service, log) = service();
        log.set_failing(true);

        let result = service
            .record_login_attempt(params(Some(Uuid::new_v4()), LoginStatus::Success))
            .await?;
        assert!(result.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_activity_limit_is_clamped() -> anyhow::Result<()> {
        let (service, _) = service();
        let user_id = Uuid::new_v4();
        for _ in 0..3 {
            service
                .record_login_attempt(params(Some(user_id), LoginStatus::Failed))
                .await?;
        }

        assert_eq!(service.get_login_activity(user_id, 0).await?.len(), 1);
        assert_eq!(service.get_login_activity(user_id, 500).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_device_name_validation() -> anyhow::Result<()> {
        let (service, _) = service();
        let user_id = Uuid::new_v4();
        let session_id = service
            .sessions()
            .create_session(user_id, SessionMetadata::default())
            .await?;

        assert!(matches!(
            service.update_device_name(user_id, &session_id, "   ").await,
            Err(SecurityError::Validation(_))
        ));
        assert!(matches!(
            service
                .update_device_name(user_id, &session_id, &"x".repeat(51))
                .await,
            Err(SecurityError::Validation(_))
        ));

        service
            .update_device_name(user_id, &session_id, "  Kitchen tablet  ")
            .await?;
        let devices = service.get_active_devices(user_id, &session_id).await?;
        assert_eq!(devices[0].device_name.as_deref(), Some("Kitchen tablet"));
        Ok(())
    }

    #[test]
    fn test_to_device_falls_back_to_activity() {
        let now = Utc::now();
        let session = Session {
            session_id: "s1".to_string(),
            user_id: Uuid::new_v4(),
            token_hash: String::new(),
            device_type: None,
            browser: Some("Firefox".to_string()),
            os: None,
            ip_address: None,
            country: None,
            city: None,
            device_name: None,
            created_at: now,
            last_active: now,
        };
        let activity = LoginActivityRecord {
            id: Uuid::new_v4(),
            user_id: Some(session.user_id),
            session_id: Some("s1".to_string()),
            auth_method: AuthMethod::Password,
            two_factor_used: false,
            status: LoginStatus::Success,
            failure_reason: None,
            ip_address: "192.0.2.44".to_string(),
            device_type: Some("mobile".to_string()),
            browser: Some("Chrome".to_string()),
            os: Some("Android".to_string()),
            country: Some("DE".to_string()),
            city: None,
            is_suspicious: false,
            suspicious_reasons: Vec::new(),
            created_at: now,
        };

        let device = to_device(session, Some(activity), "s1");
        assert!(device.is_current);
        assert_eq!(device.browser.as_deref(), Some("Firefox"));
        assert_eq!(device.device_type.as_deref(), Some("mobile"));
        assert_eq!(device.os.as_deref(), Some("Android"));
        assert_eq!(device.ip_address, "192.0.2.xxx");
        assert_eq!(device.country.as_deref(), Some("DE"));
    }
}
