//! New-device login notifications
//!
//! The email itself is rendered and delivered by a separate service; this
//! module only hands it the event.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::models::User;

/// Device details included in a new-device notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewDeviceInfo {
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    /// Masked
    pub ip_address: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub login_time: DateTime<Utc>,
}

/// Delivery of security notifications to users
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_new_device_login_email(&self, user: &User, device: &NewDeviceInfo) -> Result<()>;
}

/// Notifier that only logs the event
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_new_device_login_email(&self, user: &User, device: &NewDeviceInfo) -> Result<()> {
        info!(
            "New device login for user {}: {} on {} from {}",
            user.id,
            device.browser.as_deref().unwrap_or("unknown browser"),
            device.os.as_deref().unwrap_or("unknown OS"),
            device.country.as_deref().unwrap_or("unknown country"),
        );
        Ok(())
    }
}

/// Notifier posting the event to an email service endpoint
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_new_device_login_email(&self, user: &User, device: &NewDeviceInfo) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "template": "new-device-login",
                "to": user.email,
                "username": user.username,
                "device": device,
            }))
            .send()
            .await?;

        if response.status().is_success() {
            info!("New device notification sent for user {}", user.id);
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Email service rejected new device notification: {}",
                response.status()
            ))
        }
    }
}

/// A notification captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub user_id: Uuid,
    pub device: NewDeviceInfo,
}

/// Notifier forwarding every event to a channel
#[derive(Debug, Clone)]
pub struct RecordingNotifier {
    sender: mpsc::UnboundedSender<SentNotification>,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SentNotification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_new_device_login_email(&self, user: &User, device: &NewDeviceInfo) -> Result<()> {
        self.sender.send(SentNotification {
            user_id: user.id,
            device: device.clone(),
        })?;
        Ok(())
    }
}
