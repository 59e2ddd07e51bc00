//! Repository module for database operations

pub mod activity;
pub mod memory;
pub mod user;

use common::error::{DatabaseError, DatabaseResult};
use sqlx::PgPool;
use tracing::info;

pub use activity::{ActivityLog, PgActivityLog};
pub use memory::{InMemoryActivityLog, InMemoryUserDirectory};
pub use user::{UserDirectory, UserRepository, hash_password, verify_password};

/// Apply the pending schema migrations
pub async fn migrate(pool: &PgPool) -> DatabaseResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    info!("Database migrations applied");
    Ok(())
}
