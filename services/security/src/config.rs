//! Service configuration
//!
//! Defaults are overlaid by `SECURITY_*` environment variables, e.g.
//! `SECURITY_SESSION_TTL_DAYS=7` or `SECURITY_NOTIFICATION_WEBHOOK_URL=...`.

use anyhow::Result;
use chrono::Duration;
use config::{Config, Environment};
use serde::Deserialize;

use crate::detector::DetectionPolicy;

/// Security service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Session record and index TTL, in days
    pub session_ttl_days: u64,
    /// Trailing window of successful logins the detector compares against
    pub history_window_days: i64,
    /// Maximum number of successful logins the detector loads
    pub history_limit: i64,
    /// Trailing window for counting failed attempts
    pub failed_attempt_window_hours: i64,
    /// Failed attempts within the window that mark the next login suspicious
    pub failed_attempt_threshold: i64,
    /// Whether a first-ever successful login is checked for failed attempts
    pub failures_on_first_login: bool,
    /// Email service endpoint for new-device notifications (log-only when unset)
    pub notification_webhook_url: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            session_ttl_days: 30,
            history_window_days: 30,
            history_limit: 50,
            failed_attempt_window_hours: 24,
            failed_attempt_threshold: 3,
            failures_on_first_login: true,
            notification_webhook_url: None,
        }
    }
}

impl SecurityConfig {
    /// Load the configuration from defaults and the environment
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        let settings = Config::builder()
            .set_default("bind_addr", defaults.bind_addr)?
            .set_default("session_ttl_days", defaults.session_ttl_days as i64)?
            .set_default("history_window_days", defaults.history_window_days)?
            .set_default("history_limit", defaults.history_limit)?
            .set_default(
                "failed_attempt_window_hours",
                defaults.failed_attempt_window_hours,
            )?
            .set_default(
                "failed_attempt_threshold",
                defaults.failed_attempt_threshold,
            )?
            .set_default(
                "failures_on_first_login",
                defaults.failures_on_first_login,
            )?
            .add_source(Environment::with_prefix("SECURITY").try_parsing(true))
            .build()?;

        let config: SecurityConfig = settings.try_deserialize()?;
        if config.session_ttl_days == 0 {
            anyhow::bail!("SECURITY_SESSION_TTL_DAYS must be at least 1");
        }
        Ok(config)
    }

    /// Session TTL in seconds
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_days * 86_400
    }

    /// Rule thresholds for the suspicious activity detector
    pub fn detection_policy(&self) -> DetectionPolicy {
        DetectionPolicy {
            history_window: Duration::days(self.history_window_days),
            history_limit: self.history_limit,
            failed_attempt_window: Duration::hours(self.failed_attempt_window_hours),
            failed_attempt_threshold: self.failed_attempt_threshold,
            failures_on_first_login: self.failures_on_first_login,
        }
    }
}
