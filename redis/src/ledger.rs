//! Redis-backed reservation ledger.

use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::collections::HashMap;
use std::time::Duration;
use storefront_core::error::LedgerError;
use storefront_core::providers::{ClearOutcome, ExpiryStream, ReservationLedger};

/// Keys scanned per `SCAN` round trip.
const SCAN_BATCH: usize = 100;

/// Create a hash with every field set to ARGV[1], only if the key is absent.
const INIT_FIELDS_SCRIPT: &str = r"
    if redis.call('EXISTS', KEYS[1]) == 1 then
        return 0
    end
    for i = 2, #ARGV do
        redis.call('HSET', KEYS[1], ARGV[i], ARGV[1])
    end
    return 1
";

/// Claim ARGV[1] empty fields for ARGV[2], lowest slot first, or nothing.
const CLAIM_FIELDS_SCRIPT: &str = r"
    local wanted = tonumber(ARGV[1])
    local entries = redis.call('HGETALL', KEYS[1])
    local free = {}
    for i = 1, #entries, 2 do
        if entries[i + 1] == '' then
            table.insert(free, entries[i])
        end
    end
    if #free < wanted then
        return false
    end
    table.sort(free, function(a, b) return (tonumber(a) or 0) < (tonumber(b) or 0) end)
    local claimed = {}
    for i = 1, wanted do
        redis.call('HSET', KEYS[1], free[i], ARGV[2])
        claimed[i] = free[i]
    end
    return claimed
";

/// Reset fields holding ARGV[1] to empty; all of them, or exactly ARGV[2].
///
/// Returns `{1, cleared}` on success or `{0, held}` when fewer than ARGV[2] match.
const CLEAR_FIELDS_SCRIPT: &str = r"
    local entries = redis.call('HGETALL', KEYS[1])
    local owned = {}
    for i = 1, #entries, 2 do
        if entries[i + 1] == ARGV[1] then
            table.insert(owned, entries[i])
        end
    end
    local count = #owned
    local exact = tonumber(ARGV[2])
    if exact then
        if count < exact then
            return {0, count}
        end
        count = exact
    end
    table.sort(owned, function(a, b) return (tonumber(a) or 0) < (tonumber(b) or 0) end)
    for i = 1, count do
        redis.call('HSET', KEYS[1], owned[i], '')
    end
    return {1, count}
";

/// Connection settings for [`RedisLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisLedgerConfig {
    /// Redis connection URL (e.g., `redis://127.0.0.1:6379/0`)
    pub url: String,
    /// Logical database the URL selects; names the expiry channel
    pub database: i64,
    /// Run `CONFIG SET notify-keyspace-events Ex` on connect
    pub enable_keyspace_events: bool,
}

impl RedisLedgerConfig {
    /// Settings for `url` on database 0 with keyspace events enabled.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: 0,
            enable_keyspace_events: true,
        }
    }

    /// Set the logical database.
    #[must_use]
    pub const fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    /// Choose whether to enable keyspace notifications on connect.
    #[must_use]
    pub const fn with_keyspace_events(mut self, enable: bool) -> Self {
        self.enable_keyspace_events = enable;
        self
    }
}

/// Redis-based reservation ledger.
///
/// Provides:
/// - Atomic slot primitives via Lua scripts
/// - Cart lines as plain strings with TTL
/// - Expired-key notifications over a dedicated pub/sub connection
/// - Connection pooling via `ConnectionManager`
#[derive(Clone)]
pub struct RedisLedger {
    /// Client used to open pub/sub connections.
    client: Client,
    /// Connection manager for commands.
    conn_manager: ConnectionManager,
    /// `__keyevent@{db}__:expired`
    expiry_channel: String,
    init_fields: Script,
    claim_fields: Script,
    clear_fields: Script,
}

impl std::fmt::Debug for RedisLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLedger")
            .field("expiry_channel", &self.expiry_channel)
            .finish_non_exhaustive()
    }
}

impl RedisLedger {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Connection`] if the client cannot be created or
    /// the connection fails, and [`LedgerError::Command`] if keyspace
    /// notifications were requested but could not be enabled.
    pub async fn connect(config: &RedisLedgerConfig) -> Result<Self, LedgerError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| LedgerError::Connection(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client.clone()).await.map_err(|e| {
            LedgerError::Connection(format!("Failed to create Redis connection manager: {e}"))
        })?;

        let ledger = Self {
            client,
            conn_manager,
            expiry_channel: format!("__keyevent@{}__:expired", config.database),
            init_fields: Script::new(INIT_FIELDS_SCRIPT),
            claim_fields: Script::new(CLAIM_FIELDS_SCRIPT),
            clear_fields: Script::new(CLEAR_FIELDS_SCRIPT),
        };

        if config.enable_keyspace_events {
            ledger.enable_keyspace_events().await?;
        }

        tracing::info!(channel = %ledger.expiry_channel, "Connected Redis reservation ledger");
        Ok(ledger)
    }

    /// Enable expired-key notifications (`notify-keyspace-events Ex`).
    ///
    /// # Errors
    ///
    /// Returns error if the server rejects `CONFIG SET` (e.g. managed Redis
    /// with `CONFIG` disabled; configure the server instead).
    pub async fn enable_keyspace_events(&self) -> Result<(), LedgerError> {
        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Ex")
            .query_async(&mut conn)
            .await
            .map_err(command_error("enable keyspace events"))?;
        Ok(())
    }

    /// Channel expiry notifications arrive on.
    #[must_use]
    pub fn expiry_channel(&self) -> &str {
        &self.expiry_channel
    }

    /// Whole seconds for a Redis TTL, rounded up and never zero.
    fn ttl_seconds(ttl: Duration) -> u64 {
        let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        secs.max(1)
    }
}

/// Classify a Redis error, keeping transport failures apart from command failures.
fn command_error(operation: &'static str) -> impl Fn(RedisError) -> LedgerError {
    move |e| {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            LedgerError::Connection(format!("Failed to {operation}: {e}"))
        } else {
            LedgerError::Command(format!("Failed to {operation}: {e}"))
        }
    }
}

impl ReservationLedger for RedisLedger {
    async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), LedgerError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .hset(key, field, value)
            .await
            .map_err(command_error("set hash field"))?;
        Ok(())
    }

    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, LedgerError> {
        let mut conn = self.conn_manager.clone();
        conn.hget(key, field).await.map_err(command_error("get hash field"))
    }

    async fn get_all_fields(&self, key: &str) -> Result<HashMap<String, String>, LedgerError> {
        let mut conn = self.conn_manager.clone();
        conn.hgetall(key).await.map_err(command_error("get hash"))
    }

    async fn delete_key(&self, key: &str) -> Result<bool, LedgerError> {
        let mut conn = self.conn_manager.clone();
        let removed: usize = conn.del(key).await.map_err(command_error("delete key"))?;
        Ok(removed > 0)
    }

    async fn key_exists(&self, key: &str) -> Result<bool, LedgerError> {
        let mut conn = self.conn_manager.clone();
        conn.exists(key).await.map_err(command_error("check key existence"))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LedgerError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .set_ex(key, value, Self::ttl_seconds(ttl))
            .await
            .map_err(command_error("set value with TTL"))?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, LedgerError> {
        let mut conn = self.conn_manager.clone();
        conn.get(key).await.map_err(command_error("get value"))
    }

    async fn increment_with_ttl(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, LedgerError> {
        let mut conn = self.conn_manager.clone();
        let ttl_seconds = i64::try_from(Self::ttl_seconds(ttl)).unwrap_or(i64::MAX);

        let (value,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, delta)
            .expire(key, ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(command_error("increment value"))?;
        Ok(value)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, LedgerError> {
        let mut conn = self.conn_manager.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(command_error("scan keys"))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn init_fields(&self, key: &str, fields: &[String], value: &str) -> Result<bool, LedgerError> {
        if fields.is_empty() {
            return Ok(false);
        }
        let mut conn = self.conn_manager.clone();
        let mut invocation = self.init_fields.key(key);
        invocation.arg(value);
        for field in fields {
            invocation.arg(field);
        }
        let created: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(command_error("create reservation pool"))?;
        Ok(created == 1)
    }

    async fn claim_fields(&self, key: &str, count: usize, value: &str) -> Result<Option<Vec<String>>, LedgerError> {
        let mut conn = self.conn_manager.clone();
        self.claim_fields
            .key(key)
            .arg(count)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(command_error("claim slots"))
    }

    async fn clear_fields(&self, key: &str, value: &str, exact: Option<usize>) -> Result<ClearOutcome, LedgerError> {
        let mut conn = self.conn_manager.clone();
        let exact_arg = exact.map(|n| n.to_string()).unwrap_or_default();
        let (ok, n): (i64, i64) = self
            .clear_fields
            .key(key)
            .arg(value)
            .arg(exact_arg)
            .invoke_async(&mut conn)
            .await
            .map_err(command_error("release slots"))?;

        let n = usize::try_from(n).map_err(|_| LedgerError::Malformed {
            key: key.to_string(),
            reason: format!("negative slot count {n}"),
        })?;
        Ok(if ok == 1 {
            ClearOutcome::Cleared(n)
        } else {
            ClearOutcome::Insufficient { held: n }
        })
    }

    async fn subscribe_expiry_events(&self) -> Result<ExpiryStream, LedgerError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| LedgerError::Connection(format!("Failed to open pub/sub connection: {e}")))?;
        pubsub
            .subscribe(&self.expiry_channel)
            .await
            .map_err(command_error("subscribe to expiry notifications"))?;

        tracing::debug!(channel = %self.expiry_channel, "Subscribed to Redis expiry notifications");

        let events = pubsub.into_on_message().map(|msg| {
            msg.get_payload::<String>().map_err(|e| LedgerError::Malformed {
                key: msg.get_channel_name().to_string(),
                reason: e.to_string(),
            })
        });
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    // Note: the tests below require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    const URL: &str = "redis://127.0.0.1:6379";

    #[test]
    fn ttl_rounds_up_to_whole_seconds() {
        assert_eq!(RedisLedger::ttl_seconds(Duration::from_millis(1)), 1);
        assert_eq!(RedisLedger::ttl_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(RedisLedger::ttl_seconds(Duration::from_secs(900)), 900);
        assert_eq!(RedisLedger::ttl_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn config_names_expiry_channel_by_database() {
        let config = RedisLedgerConfig::new(URL).with_database(3).with_keyspace_events(false);
        assert_eq!(config.database, 3);
        assert!(!config.enable_keyspace_events);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_pool_lifecycle() {
        let ledger = RedisLedger::connect(&RedisLedgerConfig::new(URL)).await.unwrap();
        let key = "product:900001:inventory";
        ledger.delete_key(key).await.unwrap();
        let fields: Vec<String> = (1..=3).map(|i| i.to_string()).collect();

        assert!(ledger.init_fields(key, &fields, "").await.unwrap());
        assert!(!ledger.init_fields(key, &fields, "").await.unwrap());

        assert_eq!(ledger.claim_fields(key, 4, "7").await.unwrap(), None);
        assert_eq!(
            ledger.claim_fields(key, 2, "7").await.unwrap(),
            Some(vec!["1".to_string(), "2".to_string()])
        );
        assert_eq!(
            ledger.clear_fields(key, "7", Some(3)).await.unwrap(),
            ClearOutcome::Insufficient { held: 2 }
        );
        assert_eq!(ledger.clear_fields(key, "7", None).await.unwrap(), ClearOutcome::Cleared(2));

        ledger.delete_key(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_cart_line_increment_and_scan() {
        let ledger = RedisLedger::connect(&RedisLedgerConfig::new(URL)).await.unwrap();
        let key = "cart:900002:1";
        ledger.delete_key(key).await.unwrap();

        assert_eq!(ledger.increment_with_ttl(key, 2, Duration::from_secs(60)).await.unwrap(), 2);
        assert_eq!(ledger.increment_with_ttl(key, 3, Duration::from_secs(60)).await.unwrap(), 5);
        assert_eq!(ledger.keys_with_prefix("cart:900002:").await.unwrap(), vec![key.to_string()]);

        ledger.delete_key(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_expiry_notification() {
        let ledger = RedisLedger::connect(&RedisLedgerConfig::new(URL)).await.unwrap();
        let mut events = ledger.subscribe_expiry_events().await.unwrap();

        ledger.set_with_ttl("cart:900003:1", "1", Duration::from_secs(1)).await.unwrap();

        let key = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let key = events.next().await.unwrap().unwrap();
                if key == "cart:900003:1" {
                    return key;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(key, "cart:900003:1");
    }
}
