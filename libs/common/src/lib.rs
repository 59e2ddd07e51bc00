//! Common library shared by the platform services
//!
//! This crate provides shared infrastructure used across services: the
//! ephemeral key-value store (Redis and in-process), PostgreSQL pool
//! bootstrap and the shared error types.

pub mod cache;
pub mod database;
pub mod error;
pub mod memory;

pub use cache::{CacheOp, KeyValueStore, RedisConfig, RedisPool};
pub use memory::MemoryStore;
