//! In-process implementation of [`KeyValueStore`]
//!
//! Mirrors the Redis semantics the services rely on (string and set values,
//! per-key TTL, `XX` writes, transactional batches) so components can be run
//! and tested without a Redis server.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cache::{CacheOp, KeyValueStore};
use crate::error::{CacheError, CacheResult};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Memory-backed key-value store
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Drop `key` if it has expired and return the live entry, if any
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn ttl_deadline(now: Instant, ttl_seconds: u64) -> Option<Instant> {
    Some(now + Duration::from_secs(ttl_seconds))
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::Unavailable(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, Instant::now()) {
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| match live_entry(&mut entries, key, now) {
                Some(Entry {
                    value: Value::Str(value),
                    ..
                }) => Some(value.clone()),
                _ => None,
            })
            .collect())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        Ok(live_entry(&mut entries, key, Instant::now()).is_some())
    }

    async fn members(&self, key: &str) -> CacheResult<Vec<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, Instant::now()) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn replace_keep_ttl(&self, key: &str, value: &str) -> CacheResult<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, Instant::now()) {
            Some(entry) => {
                entry.value = Value::Str(value.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn atomic(&self, ops: Vec<CacheOp>) -> CacheResult<Vec<bool>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        // Reject the whole batch up front rather than applying half of it.
        for op in &ops {
            if let CacheOp::SetAdd { key, .. } | CacheOp::SetRemove { key, .. } = op {
                if let Some(Entry {
                    value: Value::Str(_),
                    ..
                }) = live_entry(&mut entries, key, now)
                {
                    return Err(wrong_type(key));
                }
            }
        }

        let mut applied = Vec::with_capacity(ops.len());
        for op in ops {
            let changed = match op {
                CacheOp::SetEx {
                    key,
                    value,
                    ttl_seconds,
                } => {
                    entries.insert(
                        key,
                        Entry {
                            value: Value::Str(value),
                            expires_at: ttl_deadline(now, ttl_seconds),
                        },
                    );
                    true
                }
                CacheOp::SetIfExists {
                    key,
                    value,
                    ttl_seconds,
                } => match live_entry(&mut entries, &key, now) {
                    Some(entry) => {
                        entry.value = Value::Str(value);
                        entry.expires_at = ttl_deadline(now, ttl_seconds);
                        true
                    }
                    None => false,
                },
                CacheOp::SetAdd { key, member } => {
                    if live_entry(&mut entries, &key, now).is_none() {
                        entries.insert(
                            key.clone(),
                            Entry {
                                value: Value::Set(HashSet::new()),
                                expires_at: None,
                            },
                        );
                    }
                    match entries.get_mut(&key) {
                        Some(Entry {
                            value: Value::Set(members),
                            ..
                        }) => members.insert(member),
                        _ => false,
                    }
                }
                CacheOp::SetRemove { key, member } => {
                    let (removed, now_empty) = match live_entry(&mut entries, &key, now) {
                        Some(Entry {
                            value: Value::Set(members),
                            ..
                        }) => (members.remove(&member), members.is_empty()),
                        _ => (false, false),
                    };
                    if now_empty {
                        entries.remove(&key);
                    }
                    removed
                }
                CacheOp::Expire { key, ttl_seconds } => {
                    match live_entry(&mut entries, &key, now) {
                        Some(entry) => {
                            entry.expires_at = ttl_deadline(now, ttl_seconds);
                            true
                        }
                        None => false,
                    }
                }
                CacheOp::Delete { key } => {
                    let present = live_entry(&mut entries, &key, now).is_some();
                    entries.remove(&key);
                    present
                }
            };
            applied.push(changed);
        }

        Ok(applied)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(!self.unavailable.load(Ordering::SeqCst))
    }
}
