//! In-memory reservation ledger.
//!
//! Behaves like the Redis ledger for everything the reservation core relies
//! on: per-key TTL, expired keys invisible to reads, expiry notifications,
//! and atomic slot primitives (each runs under one lock).
//!
//! Time comes from an injected [`Clock`], so tests expire cart lines by
//! advancing a [`MockClock`](crate::MockClock) and calling
//! [`InMemoryLedger::purge_expired`].

use async_stream::stream;
use chrono::{DateTime, Utc};
use storefront_core::environment::{Clock, SystemClock};
use storefront_core::error::LedgerError;
use storefront_core::keys::EMPTY_OCCUPANT;
use storefront_core::providers::{ClearOutcome, ExpiryStream, ReservationLedger};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

const EXPIRY_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
}

/// In-memory ledger for fast, deterministic tests.
#[derive(Clone)]
pub struct InMemoryLedger {
    entries: Arc<Mutex<Entries>>,
    clock: Arc<dyn Clock>,
    expired_tx: Arc<Mutex<broadcast::Sender<String>>>,
}

impl InMemoryLedger {
    /// Create an empty ledger on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty ledger reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(EXPIRY_CHANNEL_CAPACITY);
        Self {
            entries: Arc::new(Mutex::new(Entries::default())),
            clock,
            expired_tx: Arc::new(Mutex::new(tx)),
        }
    }

    /// Remove every key whose TTL has passed and publish an expiry event for each.
    ///
    /// # Returns
    ///
    /// The expired keys, sorted.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn purge_expired(&self) -> Result<Vec<String>, LedgerError> {
        let now = self.clock.now();
        let mut expired: Vec<String> = {
            let mut entries = self.lock()?;
            let keys: Vec<String> = entries
                .map
                .iter()
                .filter(|(_, entry)| entry.expires_at.is_some_and(|at| at <= now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                entries.map.remove(key);
            }
            keys
        };
        expired.sort();
        for key in &expired {
            self.publish_expired(key);
        }
        Ok(expired)
    }

    /// Number of live keys (expired keys excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .map(|entries| entries.map.values().filter(|e| !Self::is_expired(e, now)).count())
            .unwrap_or(0)
    }

    /// Check if the ledger holds no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of active expiry subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.expired_tx.lock().map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// End every open expiry stream, as a dropped Redis connection would.
    pub fn disconnect_subscribers(&self) {
        if let Ok(mut tx) = self.expired_tx.lock() {
            let (fresh, _) = broadcast::channel(EXPIRY_CHANNEL_CAPACITY);
            *tx = fresh;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>, LedgerError> {
        self.entries
            .lock()
            .map_err(|_| LedgerError::Command("Mutex lock failed".to_string()))
    }

    fn is_expired(entry: &Entry, now: DateTime<Utc>) -> bool {
        entry.expires_at.is_some_and(|at| at <= now)
    }

    fn publish_expired(&self, key: &str) {
        if let Ok(tx) = self.expired_tx.lock() {
            // No subscribers is fine: notifications are fire-and-forget.
            let _ = tx.send(key.to_string());
        }
    }

    /// Run `f` against the live entry map, dropping (and announcing) a key
    /// first if its TTL has passed.
    fn with_live<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let now = self.clock.now();
        let (result, expired) = {
            let mut entries = self.lock()?;
            let expired = entries
                .map
                .get(key)
                .is_some_and(|entry| Self::is_expired(entry, now));
            if expired {
                entries.map.remove(key);
            }
            (f(&mut entries.map), expired)
        };
        if expired {
            self.publish_expired(key);
        }
        result
    }

    fn ttl_deadline(&self, ttl: Duration) -> Result<DateTime<Utc>, LedgerError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| LedgerError::Command(format!("Invalid TTL: {e}")))?;
        Ok(self.clock.now() + ttl)
    }

    fn wrong_type(key: &str) -> LedgerError {
        LedgerError::Command(format!(
            "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
        ))
    }

    fn hash_mut<'a>(
        map: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Result<Option<&'a mut HashMap<String, String>>, LedgerError> {
        match map.get_mut(key) {
            None => Ok(None),
            Some(Entry { value: Value::Hash(fields), .. }) => Ok(Some(fields)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    /// Field names in slot order: numeric fields ascending, then the rest.
    fn ordered_fields(fields: &HashMap<String, String>) -> Vec<String> {
        let mut names: Vec<String> = fields.keys().cloned().collect();
        names.sort_by_key(|name| (name.parse::<u64>().unwrap_or(u64::MAX), name.clone()));
        names
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger").field("keys", &self.len()).finish_non_exhaustive()
    }
}

impl ReservationLedger for InMemoryLedger {
    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), LedgerError> {
        self.with_live(key, |map| {
            let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Hash(fields) => {
                    fields.insert(field.to_string(), value.to_string());
                    Ok(())
                }
                Value::Text(_) => Err(Self::wrong_type(key)),
            }
        })
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, LedgerError> {
        self.with_live(key, |map| {
            Ok(Self::hash_mut(map, key)?.and_then(|fields| fields.get(field).cloned()))
        })
    }

    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, LedgerError> {
        self.with_live(key, |map| {
            Ok(Self::hash_mut(map, key)?.map(|fields| fields.clone()).unwrap_or_default())
        })
    }

    async fn delete_key(&self, key: &str) -> Result<bool, LedgerError> {
        self.with_live(key, |map| Ok(map.remove(key).is_some()))
    }

    async fn key_exists(&self, key: &str) -> Result<bool, LedgerError> {
        self.with_live(key, |map| Ok(map.contains_key(key)))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LedgerError> {
        let expires_at = self.ttl_deadline(ttl)?;
        self.with_live(key, |map| {
            map.insert(
                key.to_string(),
                Entry {
                    value: Value::Text(value.to_string()),
                    expires_at: Some(expires_at),
                },
            );
            Ok(())
        })
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, LedgerError> {
        self.with_live(key, |map| match map.get(key) {
            None => Ok(None),
            Some(Entry { value: Value::Text(text), .. }) => Ok(Some(text.clone())),
            Some(_) => Err(Self::wrong_type(key)),
        })
    }

    async fn increment_with_ttl(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, LedgerError> {
        let expires_at = self.ttl_deadline(ttl)?;
        self.with_live(key, |map| {
            let current = match map.get(key) {
                None => 0,
                Some(Entry { value: Value::Text(text), .. }) => {
                    text.parse::<i64>().map_err(|e| LedgerError::Malformed {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?
                }
                Some(_) => return Err(Self::wrong_type(key)),
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| LedgerError::Command("increment would overflow".to_string()))?;
            map.insert(
                key.to_string(),
                Entry {
                    value: Value::Text(next.to_string()),
                    expires_at: Some(expires_at),
                },
            );
            Ok(next)
        })
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, LedgerError> {
        let now = self.clock.now();
        let entries = self.lock()?;
        let mut keys: Vec<String> = entries
            .map
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !Self::is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn init_fields(&self, key: &str, fields: &[String], value: &str) -> Result<bool, LedgerError> {
        self.with_live(key, |map| {
            if map.contains_key(key) || fields.is_empty() {
                return Ok(false);
            }
            let hash = fields
                .iter()
                .map(|field| (field.clone(), value.to_string()))
                .collect();
            map.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(hash),
                    expires_at: None,
                },
            );
            Ok(true)
        })
    }

    async fn claim_fields(&self, key: &str, count: usize, value: &str) -> Result<Option<Vec<String>>, LedgerError> {
        self.with_live(key, |map| {
            let Some(fields) = Self::hash_mut(map, key)? else {
                return Ok((count == 0).then(Vec::new));
            };
            let free: Vec<String> = Self::ordered_fields(fields)
                .into_iter()
                .filter(|name| fields.get(name).is_some_and(|v| v == EMPTY_OCCUPANT))
                .take(count)
                .collect();
            if free.len() < count {
                return Ok(None);
            }
            for name in &free {
                fields.insert(name.clone(), value.to_string());
            }
            Ok(Some(free))
        })
    }

    async fn clear_fields(&self, key: &str, value: &str, exact: Option<usize>) -> Result<ClearOutcome, LedgerError> {
        self.with_live(key, |map| {
            let Some(fields) = Self::hash_mut(map, key)? else {
                return Ok(match exact {
                    Some(n) if n > 0 => ClearOutcome::Insufficient { held: 0 },
                    _ => ClearOutcome::Cleared(0),
                });
            };
            let owned: Vec<String> = Self::ordered_fields(fields)
                .into_iter()
                .filter(|name| fields.get(name).is_some_and(|v| v == value))
                .collect();
            let to_clear = match exact {
                Some(n) if owned.len() < n => return Ok(ClearOutcome::Insufficient { held: owned.len() }),
                Some(n) => n,
                None => owned.len(),
            };
            for name in owned.iter().take(to_clear) {
                fields.insert(name.clone(), EMPTY_OCCUPANT.to_string());
            }
            Ok(ClearOutcome::Cleared(to_clear))
        })
    }

    async fn subscribe_expiry_events(&self) -> Result<ExpiryStream, LedgerError> {
        let mut rx = self
            .expired_tx
            .lock()
            .map_err(|_| LedgerError::Command("Mutex lock failed".to_string()))?
            .subscribe();

        let events = stream! {
            loop {
                match rx.recv().await {
                    Ok(key) => yield Ok(key),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        yield Err(LedgerError::Command(format!("missed {missed} expiry events")));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(events))
    }
}
