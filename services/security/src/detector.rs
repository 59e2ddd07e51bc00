//! Suspicious activity detection
//!
//! A fixed, ordered table of independent rules. Each rule that fires adds its
//! reason; the attempt is suspicious when any rule marked as such fired.
//! Rules never block a login, they only feed the verdict stored on the
//! activity record.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, warn};

use crate::models::{LoginActivityRecord, NewLoginActivity};
use crate::repositories::ActivityLog;
use crate::request_info::is_known;

pub const REASON_NEW_COUNTRY: &str = "New country";
pub const REASON_NEW_DEVICE_TYPE: &str = "New device type";
pub const REASON_NEW_BROWSER: &str = "New browser";
pub const REASON_OAUTH_WITHOUT_2FA: &str = "OAuth without 2FA";
pub const REASON_RECENT_FAILURES: &str = "Recent failed attempts";
pub const REASON_DETECTION_ERROR: &str = "Detection error";

/// Rule thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionPolicy {
    /// How far back successful logins are compared against
    pub history_window: Duration,
    /// Maximum number of successful logins loaded
    pub history_limit: i64,
    /// How far back failed attempts are counted
    pub failed_attempt_window: Duration,
    /// Failed attempts within the window that mark the attempt suspicious
    pub failed_attempt_threshold: i64,
    /// Count failed attempts even when the user has no successful history
    pub failures_on_first_login: bool,
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self {
            history_window: Duration::days(30),
            history_limit: 50,
            failed_attempt_window: Duration::hours(24),
            failed_attempt_threshold: 3,
            failures_on_first_login: true,
        }
    }
}

/// Verdict for one login attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResult {
    pub is_suspicious: bool,
    pub reasons: Vec<String>,
}

impl DetectionResult {
    fn detection_error() -> Self {
        Self {
            is_suspicious: false,
            reasons: vec![REASON_DETECTION_ERROR.to_string()],
        }
    }
}

/// What the rules are evaluated against
struct Evidence<'a> {
    attempt: &'a NewLoginActivity,
    history: &'a [LoginActivityRecord],
    recent_failures: i64,
    policy: &'a DetectionPolicy,
}

struct Rule {
    reason: &'static str,
    marks_suspicious: bool,
    /// Rules comparing against history are skipped when there is none
    needs_history: bool,
    fires: fn(&Evidence<'_>) -> bool,
}

fn new_country(evidence: &Evidence<'_>) -> bool {
    let country = evidence.attempt.country.as_deref();
    is_known(country)
        && !evidence
            .history
            .iter()
            .any(|r| r.country.as_deref() == country)
}

fn new_device_type(evidence: &Evidence<'_>) -> bool {
    let device_type = evidence.attempt.device_type.as_deref();
    is_known(device_type)
        && !evidence
            .history
            .iter()
            .any(|r| r.device_type.as_deref() == device_type)
}

fn new_browser(evidence: &Evidence<'_>) -> bool {
    let browser = evidence.attempt.browser.as_deref();
    !evidence
        .history
        .iter()
        .any(|r| r.browser.as_deref() == browser)
}

fn oauth_without_2fa(evidence: &Evidence<'_>) -> bool {
    evidence.attempt.auth_method.is_oauth()
        && !evidence.attempt.two_factor_used
        && evidence.history.iter().any(|r| r.two_factor_used)
}

fn recent_failures(evidence: &Evidence<'_>) -> bool {
    evidence.recent_failures >= evidence.policy.failed_attempt_threshold
}

const RULES: &[Rule] = &[
    Rule {
        reason: REASON_NEW_COUNTRY,
        marks_suspicious: true,
        needs_history: true,
        fires: new_country,
    },
    Rule {
        reason: REASON_NEW_DEVICE_TYPE,
        marks_suspicious: true,
        needs_history: true,
        fires: new_device_type,
    },
    Rule {
        reason: REASON_NEW_BROWSER,
        marks_suspicious: false,
        needs_history: true,
        fires: new_browser,
    },
    Rule {
        reason: REASON_OAUTH_WITHOUT_2FA,
        marks_suspicious: false,
        needs_history: true,
        fires: oauth_without_2fa,
    },
    Rule {
        reason: REASON_RECENT_FAILURES,
        marks_suspicious: true,
        needs_history: false,
        fires: recent_failures,
    },
];

/// Rule-based detector over the login activity log
#[derive(Clone)]
pub struct SuspiciousActivityDetector {
    activity_log: Arc<dyn ActivityLog>,
    policy: DetectionPolicy,
}

impl SuspiciousActivityDetector {
    pub fn new(activity_log: Arc<dyn ActivityLog>, policy: DetectionPolicy) -> Self {
        Self {
            activity_log,
            policy,
        }
    }

    /// Evaluate an attempt before it is persisted
    ///
    /// Attempts without a user are never suspicious. Lookup failures yield a
    /// non-suspicious verdict carrying [`REASON_DETECTION_ERROR`].
    pub async fn evaluate(&self, attempt: &NewLoginActivity) -> DetectionResult {
        let Some(user_id) = attempt.user_id else {
            return DetectionResult::default();
        };

        let now = Utc::now();
        let history = match self
            .activity_log
            .recent_successes(
                user_id,
                now - self.policy.history_window,
                self.policy.history_limit,
            )
            .await
        {
            Ok(history) => history,
            Err(e) => {
                error!("Detection history lookup failed for user {}: {}", user_id, e);
                return DetectionResult::detection_error();
            }
        };

        let recent_failures = match self
            .activity_log
            .count_failures_since(user_id, now - self.policy.failed_attempt_window)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                error!("Failed attempt lookup failed for user {}: {}", user_id, e);
                return DetectionResult::detection_error();
            }
        };

        let evidence = Evidence {
            attempt,
            history: &history,
            recent_failures,
            policy: &self.policy,
        };

        let cold_start = history.is_empty();
        let mut result = DetectionResult::default();
        for rule in RULES {
            if cold_start && (rule.needs_history || !self.policy.failures_on_first_login) {
                continue;
            }
            if (rule.fires)(&evidence) {
                result.reasons.push(rule.reason.to_string());
                result.is_suspicious |= rule.marks_suspicious;
            }
        }

        if result.is_suspicious {
            warn!(
                "Suspicious login for user {}: {}",
                user_id,
                result.reasons.join(", ")
            );
        }
        result
    }
}
