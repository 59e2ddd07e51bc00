//! User repository for database operations

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use async_trait::async_trait;
use common::error::{DatabaseError, DatabaseResult};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{SecurityError, SecurityResult};
use crate::models::User;

/// Lookup of the account records owned by the identity system
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by ID
    async fn find_user_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>>;

    /// Find a user by username or email
    async fn find_by_username_or_email(
        &self,
        username_or_email: &str,
    ) -> DatabaseResult<Option<User>>;
}

/// Hash a password with Argon2 and a random salt
pub fn hash_password(password: &str) -> SecurityResult<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SecurityError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a user's password
///
/// An unparsable stored hash never verifies.
pub fn verify_password(user: &User, password: &str) -> bool {
    let parsed_hash = match PasswordHash::new(&user.password_hash) {
        Ok(hash) => hash,
        Err(e) => {
            warn!("Stored password hash for user {} is invalid: {}", user.id, e);
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// User repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> DatabaseResult<User> {
    Ok(User {
        id: row.try_get("id").map_err(DatabaseError::Query)?,
        username: row.try_get("username").map_err(DatabaseError::Query)?,
        email: row.try_get("email").map_err(DatabaseError::Query)?,
        password_hash: row.try_get("password_hash").map_err(DatabaseError::Query)?,
        created_at: row.try_get("created_at").map_err(DatabaseError::Query)?,
        updated_at: row.try_get("updated_at").map_err(DatabaseError::Query)?,
    })
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn find_user_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>> {
        debug!("Finding user by ID: {}", id);

        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_username_or_email(
        &self,
        username_or_email: &str,
    ) -> DatabaseResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            WHERE username = $1 OR email = $1
            "#,
        )
        .bind(username_or_email)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        row.as_ref().map(user_from_row).transpose()
    }
}
