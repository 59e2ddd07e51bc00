//! Session management on the ephemeral key-value store
//!
//! Layout:
//! - `session:{session_id}` holds the JSON [`Session`] record (TTL).
//! - `user_sessions:{user_id}` is the set of the user's session ids (TTL,
//!   refreshed whenever a session is created or validated).
//!
//! Session ids are public handles: device and activity listings show them.
//! Clients authenticate with a [`SessionToken`], which adds a secret whose
//! SHA-256 digest is the only trace of it in the store.
//!
//! Every mutation is a single [`KeyValueStore::atomic`] batch and every
//! destructive operation re-reads the record and checks its embedded owner
//! before touching it.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use common::cache::{CacheOp, KeyValueStore};
use rand::{Rng, distributions::Alphanumeric, rngs::OsRng};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{SecurityError, SecurityResult};
use crate::models::{Session, SessionMetadata};

/// Length of a session id; 64 alphanumeric characters carry ~381 bits.
pub const SESSION_ID_LEN: usize = 64;

/// Length of the secret half of a session token
pub const TOKEN_SECRET_LEN: usize = 64;

fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

fn index_key(user_id: Uuid) -> String {
    format!("user_sessions:{}", user_id)
}

fn random_alphanumeric(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate an unguessable session id from the OS CSPRNG
pub fn generate_session_id() -> String {
    random_alphanumeric(SESSION_ID_LEN)
}

fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

fn is_token_part(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Bearer credential of one session: `{user_id}.{session_id}.{secret}`
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub user_id: Uuid,
    pub session_id: String,
    secret: String,
}

impl SessionToken {
    /// Parse a bearer token, rejecting anything but three well-formed parts
    pub fn parse(token: &str) -> Option<Self> {
        let mut parts = token.splitn(3, '.');
        let user_id = Uuid::parse_str(parts.next()?).ok()?;
        let session_id = parts.next()?;
        let secret = parts.next()?;
        if !is_token_part(session_id) || !is_token_part(secret) {
            return None;
        }

        Some(Self {
            user_id,
            session_id: session_id.to_string(),
            secret: secret.to_string(),
        })
    }

    /// The bearer string handed to the client
    pub fn encode(&self) -> String {
        format!("{}.{}.{}", self.user_id, self.session_id, self.secret)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Session manager for handling user sessions
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn KeyValueStore>,
    ttl_seconds: u64,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(store: Arc<dyn KeyValueStore>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    /// TTL applied to session records and indexes
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Create a new session for a user and return its id
    pub async fn create_session(
        &self,
        user_id: Uuid,
        metadata: SessionMetadata,
    ) -> SecurityResult<String> {
        Ok(self.issue_session(user_id, metadata).await?.session_id)
    }

    /// Create a new session for a user and return its bearer token
    ///
    /// The record and the index entry are written in one transaction.
    pub async fn issue_session(
        &self,
        user_id: Uuid,
        metadata: SessionMetadata,
    ) -> SecurityResult<SessionToken> {
        let token = SessionToken {
            user_id,
            session_id: generate_session_id(),
            secret: random_alphanumeric(TOKEN_SECRET_LEN),
        };
        let now = Utc::now();
        let session = Session {
            session_id: token.session_id.clone(),
            user_id,
            token_hash: hash_secret(&token.secret),
            device_type: metadata.device_type,
            browser: metadata.browser,
            os: metadata.os,
            ip_address: metadata.ip_address,
            country: metadata.country,
            city: metadata.city,
            device_name: None,
            created_at: now,
            last_active: now,
        };
        let record = serde_json::to_string(&session)
            .map_err(|e| SecurityError::Internal(format!("Session serialization failed: {}", e)))?;

        let index = index_key(user_id);
        self.store
            .atomic(vec![
                CacheOp::SetEx {
                    key: session_key(&token.session_id),
                    value: record,
                    ttl_seconds: self.ttl_seconds,
                },
                CacheOp::SetAdd {
                    key: index.clone(),
                    member: token.session_id.clone(),
                },
                CacheOp::Expire {
                    key: index,
                    ttl_seconds: self.ttl_seconds,
                },
            ])
            .await?;

        info!("Created session for user: {}", user_id);
        Ok(token)
    }

    /// Load a session record, whoever owns it
    ///
    /// An unparsable record is reported as absent.
    pub async fn get_session(&self, session_id: &str) -> SecurityResult<Option<Session>> {
        let Some(raw) = self.store.get(&session_key(session_id)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!("Discarding unparsable session record: {}", e);
                Ok(None)
            }
        }
    }

    /// Check that `session_id` is a live session issued to `user_id`
    ///
    /// Fails closed: store errors, missing or foreign records all yield
    /// `false`. A valid session gets its `last_active` and TTL refreshed.
    /// The token secret is not checked here; requests go through
    /// [`authenticate`](Self::authenticate).
    pub async fn validate_session(&self, user_id: Uuid, session_id: &str) -> bool {
        self.validate_or_reject(user_id, session_id, None).await
    }

    /// Validate a bearer token, its secret included
    pub async fn authenticate(&self, token: &SessionToken) -> bool {
        self.validate_or_reject(token.user_id, &token.session_id, Some(&token.secret))
            .await
    }

    async fn validate_or_reject(
        &self,
        user_id: Uuid,
        session_id: &str,
        secret: Option<&str>,
    ) -> bool {
        match self.try_validate_session(user_id, session_id, secret).await {
            Ok(valid) => valid,
            Err(e) => {
                error!("Session validation failed for user {}: {}", user_id, e);
                false
            }
        }
    }

    async fn try_validate_session(
        &self,
        user_id: Uuid,
        session_id: &str,
        secret: Option<&str>,
    ) -> SecurityResult<bool> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Ok(false);
        };

        if session.user_id != user_id {
            warn!("Session presented by user {} belongs to another user", user_id);
            return Ok(false);
        }

        if let Some(secret) = secret {
            if !constant_time_eq(hash_secret(secret).as_bytes(), session.token_hash.as_bytes()) {
                warn!("Session token with a wrong secret for user {}", user_id);
                return Ok(false);
            }
        }

        session.last_active = Utc::now();
        let record = serde_json::to_string(&session)
            .map_err(|e| SecurityError::Internal(format!("Session serialization failed: {}", e)))?;

        let index = index_key(user_id);
        let applied = self
            .store
            .atomic(vec![
                // XX: a concurrent revoke must not be undone by this refresh
                CacheOp::SetIfExists {
                    key: session_key(session_id),
                    value: record,
                    ttl_seconds: self.ttl_seconds,
                },
                CacheOp::Expire {
                    key: index,
                    ttl_seconds: self.ttl_seconds,
                },
            ])
            .await?;

        Ok(applied.first().copied().unwrap_or(false))
    }

    /// List the user's live sessions, or an empty list if the store fails
    pub async fn get_user_sessions(&self, user_id: Uuid) -> Vec<Session> {
        match self.try_get_user_sessions(user_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!("Failed to list sessions for user {}: {}", user_id, e);
                Vec::new()
            }
        }
    }

    /// List the user's live sessions, propagating store errors
    ///
    /// Dangling, unparsable and foreign-owned index entries are skipped.
    pub async fn try_get_user_sessions(&self, user_id: Uuid) -> SecurityResult<Vec<Session>> {
        let ids = self.store.members(&index_key(user_id)).await?;
        self.load_sessions(user_id, &ids).await
    }

    async fn load_sessions(&self, user_id: Uuid, ids: &[String]) -> SecurityResult<Vec<Session>> {
        let keys: Vec<String> = ids.iter().map(|id| session_key(id)).collect();
        let records = self.store.get_many(&keys).await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for (id, record) in ids.iter().zip(records) {
            let Some(raw) = record else {
                continue;
            };
            match serde_json::from_str::<Session>(&raw) {
                Ok(session) if session.user_id == user_id => sessions.push(session),
                Ok(_) => warn!("Index of user {} references a foreign session", user_id),
                Err(e) => warn!("Skipping unparsable session {}: {}", id, e),
            }
        }

        Ok(sessions)
    }

    /// Revoke one of the user's sessions
    ///
    /// Revoking an already-gone session is a no-op. Revoking another user's
    /// session is an authorization error. An unparsable record is deleted.
    pub async fn revoke_session(&self, user_id: Uuid, session_id: &str) -> SecurityResult<()> {
        let key = session_key(session_id);
        let unindex = CacheOp::SetRemove {
            key: index_key(user_id),
            member: session_id.to_string(),
        };

        let Some(raw) = self.store.get(&key).await? else {
            self.store.atomic(vec![unindex]).await?;
            return Ok(());
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) if session.user_id != user_id => {
                warn!("User {} attempted to revoke a foreign session", user_id);
                return Err(SecurityError::Authorization);
            }
            Ok(_) => {}
            Err(e) => warn!("Deleting unparsable session record: {}", e),
        }

        self.store
            .atomic(vec![CacheOp::Delete { key }, unindex])
            .await?;
        info!("Revoked session for user: {}", user_id);
        Ok(())
    }

    /// Revoke every session of the user
    ///
    /// Only the index entries read here are removed, so a session created
    /// concurrently stays listed. Redis drops the set once it is empty.
    /// Returns the number of live sessions removed.
    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> SecurityResult<usize> {
        let index = index_key(user_id);
        let ids = self.store.members(&index).await?;
        if ids.is_empty() {
            return Ok(0);
        }
        let sessions = self.load_sessions(user_id, &ids).await?;

        let mut ops: Vec<CacheOp> = sessions
            .iter()
            .map(|session| CacheOp::Delete {
                key: session_key(&session.session_id),
            })
            .collect();
        ops.extend(ids.into_iter().map(|member| CacheOp::SetRemove {
            key: index.clone(),
            member,
        }));

        let applied = self.store.atomic(ops).await?;
        let revoked = applied
            .iter()
            .take(sessions.len())
            .filter(|deleted| **deleted)
            .count();

        info!("Revoked {} sessions for user: {}", revoked, user_id);
        Ok(revoked)
    }

    /// Set the display name of one of the user's sessions
    ///
    /// The remaining TTL is left untouched.
    pub async fn rename_session(
        &self,
        user_id: Uuid,
        session_id: &str,
        name: &str,
    ) -> SecurityResult<()> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Err(SecurityError::NotFound("Session not found".to_string()));
        };
        if session.user_id != user_id {
            return Err(SecurityError::Authorization);
        }

        session.device_name = Some(name.to_string());
        let record = serde_json::to_string(&session)
            .map_err(|e| SecurityError::Internal(format!("Session serialization failed: {}", e)))?;

        if !self
            .store
            .replace_keep_ttl(&session_key(session_id), &record)
            .await?
        {
            return Err(SecurityError::NotFound("Session not found".to_string()));
        }
        Ok(())
    }

    /// Remove index entries whose session record has expired
    ///
    /// Idempotent and safe to run concurrently; returns the number of entries
    /// removed by this call.
    pub async fn cleanup_expired_sessions(&self, user_id: Uuid) -> SecurityResult<usize> {
        let index = index_key(user_id);
        let ids = self.store.members(&index).await?;

        let mut ops = Vec::new();
        for id in ids {
            if !self.store.exists(&session_key(&id)).await? {
                ops.push(CacheOp::SetRemove {
                    key: index.clone(),
                    member: id,
                });
            }
        }

        if ops.is_empty() {
            return Ok(0);
        }

        let removed = self
            .store
            .atomic(ops)
            .await?
            .into_iter()
            .filter(|removed| *removed)
            .count();
        if removed > 0 {
            info!("Pruned {} dangling session ids for user: {}", removed, user_id);
        }
        Ok(removed)
    }

    /// Check if the session store is reachable
    pub async fn health_check(&self) -> bool {
        self.store.health_check().await.unwrap_or(false)
    }
}
