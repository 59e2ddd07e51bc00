//! Login activity model
//!
//! Activity records are append-only: they are written once, with the
//! suspicion verdict already computed, and never updated afterwards.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SecurityError;
use crate::request_info::RequestInfo;

/// How the user authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMethod {
    #[serde(rename = "password")]
    Password,
    #[serde(rename = "google-oauth")]
    GoogleOauth,
    #[serde(rename = "facebook-oauth")]
    FacebookOauth,
    #[serde(rename = "2fa")]
    TwoFactor,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::GoogleOauth => "google-oauth",
            AuthMethod::FacebookOauth => "facebook-oauth",
            AuthMethod::TwoFactor => "2fa",
        }
    }

    pub fn is_oauth(&self) -> bool {
        matches!(self, AuthMethod::GoogleOauth | AuthMethod::FacebookOauth)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(AuthMethod::Password),
            "google-oauth" => Ok(AuthMethod::GoogleOauth),
            "facebook-oauth" => Ok(AuthMethod::FacebookOauth),
            "2fa" => Ok(AuthMethod::TwoFactor),
            other => Err(SecurityError::Validation(format!(
                "Unsupported auth method: {other}"
            ))),
        }
    }
}

/// Outcome of a login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginStatus {
    Success,
    Failed,
}

impl LoginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStatus::Success => "success",
            LoginStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginStatus {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LoginStatus::Success),
            "failed" => Ok(LoginStatus::Failed),
            other => Err(SecurityError::Validation(format!(
                "Unsupported login status: {other}"
            ))),
        }
    }
}

/// A persisted login attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginActivityRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub auth_method: AuthMethod,
    pub two_factor_used: bool,
    pub status: LoginStatus,
    pub failure_reason: Option<String>,
    pub ip_address: String,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub is_suspicious: bool,
    pub suspicious_reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a login attempt
#[derive(Debug, Clone, PartialEq)]
pub struct NewLoginActivity {
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub auth_method: AuthMethod,
    pub two_factor_used: bool,
    pub status: LoginStatus,
    pub failure_reason: Option<String>,
    pub ip_address: String,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub is_suspicious: bool,
    pub suspicious_reasons: Vec<String>,
}

impl NewLoginActivity {
    /// Copy the request context fields into an insert payload
    pub fn from_request(
        user_id: Option<Uuid>,
        session_id: Option<String>,
        auth_method: AuthMethod,
        two_factor_used: bool,
        status: LoginStatus,
        failure_reason: Option<String>,
        request: &RequestInfo,
    ) -> Self {
        Self {
            user_id,
            session_id,
            auth_method,
            two_factor_used,
            status,
            failure_reason,
            ip_address: request.ip_address.clone(),
            device_type: request.device_type.clone(),
            browser: request.browser.clone(),
            os: request.os.clone(),
            country: request.country.clone(),
            city: request.city.clone(),
            is_suspicious: false,
            suspicious_reasons: Vec::new(),
        }
    }
}
