//! Session model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request_info::RequestInfo;

/// Session entity, stored as JSON under `session:{session_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: Uuid,
    /// Hex SHA-256 of the token secret
    pub token_hash: String,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Device metadata recorded on a new session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

impl From<&RequestInfo> for SessionMetadata {
    fn from(info: &RequestInfo) -> Self {
        Self {
            device_type: info.device_type.clone(),
            browser: info.browser.clone(),
            os: info.os.clone(),
            ip_address: Some(info.ip_address.clone()),
            country: info.country.clone(),
            city: info.city.clone(),
        }
    }
}

/// One entry of a user's active device list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub session_id: String,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    /// Always masked
    pub ip_address: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub is_current: bool,
}
