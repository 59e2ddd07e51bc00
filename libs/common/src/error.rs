//! Custom error types for the common library
//!
//! This module defines the infrastructure-level error types returned by the
//! database and cache layers.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),

    /// A stored row could not be mapped back into its model
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Custom error type for key-value store operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The Redis server rejected a command or could not be reached
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store is not reachable
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Type alias for Result with CacheError
pub type CacheResult<T> = Result<T, CacheError>;
