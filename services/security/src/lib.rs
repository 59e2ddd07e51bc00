//! Session lifecycle and login security service
//!
//! Issues and validates device sessions, keeps the login activity audit
//! trail, flags suspicious logins and lets users manage their signed-in
//! devices.

pub mod config;
pub mod detector;
pub mod error;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod repositories;
pub mod request_info;
pub mod routes;
pub mod security;
pub mod session;

use std::sync::Arc;

use sqlx::PgPool;

use crate::{repositories::UserDirectory, security::SecurityService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub security: SecurityService,
    pub users: Arc<dyn UserDirectory>,
    /// Checked by the health endpoint when present
    pub db_pool: Option<PgPool>,
}
