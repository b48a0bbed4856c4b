//! # Redis Store
//!
//! [`KvStore`] over Redis. Batches run as `MULTI/EXEC` pipelines; the conditional
//! operations are Lua scripts evaluated inside the same transaction, so the
//! condition and the writes it guards can never interleave with another client.
//! Blocking pops use dedicated connections because `BRPOP` stalls every other
//! request multiplexed on the same connection.

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::batch::{OpReply, PendingSetUpdate, StoreBatch, StoreOp};
use super::errors::{StoreError, StoreResult};
use super::traits::{KvStore, Notification, Subscription};
use crate::config::StoreConfig;

/// HSETNX with companion field, pending-set maintenance and TTL.
///
/// KEYS: hash, pending set. ARGV: field, value, ttl_ms, require_record, pending
/// action, member, companion field, companion value, exclusive count,
/// exclusive fields..., unless-fields...
const HASH_SET_IF_ABSENT_SCRIPT: &str = r#"
if ARGV[4] == '1' and redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
local exclusive = tonumber(ARGV[9])
for i = 10, 9 + exclusive do
  if redis.call('HEXISTS', KEYS[1], ARGV[i]) == 1 then
    return 0
  end
end
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
  return 0
end
if ARGV[7] ~= '' then
  redis.call('HSETNX', KEYS[1], ARGV[7], ARGV[8])
end
if ARGV[5] == 'add' then
  local terminal = false
  for i = 10 + exclusive, #ARGV do
    if redis.call('HEXISTS', KEYS[1], ARGV[i]) == 1 then
      terminal = true
      break
    end
  end
  if not terminal then
    redis.call('SADD', KEYS[2], ARGV[6])
  end
elseif ARGV[5] == 'remove' then
  redis.call('SREM', KEYS[2], ARGV[6])
end
local ttl = tonumber(ARGV[3])
if ttl > 0 then
  redis.call('PEXPIRE', KEYS[1], ttl)
end
return 1
"#;

/// KEYS: processed, queue, raw. ARGV: payload, queue value, channel, message.
const PROMOTE_PROCESSED_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('DEL', KEYS[3])
  return 0
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('LPUSH', KEYS[2], ARGV[2])
redis.call('PUBLISH', ARGV[3], ARGV[4])
redis.call('DEL', KEYS[3])
return 1
"#;

/// Extra allowance on top of a `BRPOP` timeout before the connection is presumed dead
const BLOCKING_GRACE: Duration = Duration::from_secs(2);
const SCAN_COUNT: usize = 500;

impl From<redis::RedisError> for StoreError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_timeout() {
            StoreError::Timeout(error.to_string())
        } else if error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal()
        {
            StoreError::ConnectionError(error.to_string())
        } else {
            StoreError::CommandError(error.to_string())
        }
    }
}

pub struct RedisStore {
    client: redis::Client,
    manager: RwLock<ConnectionManager>,
    blocking_pool: Mutex<Vec<MultiplexedConnection>>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("manager", &"ConnectionManager")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect using the store configuration section
    pub async fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            StoreError::ConnectionError(format!("Failed to create Redis client: {e}"))
        })?;
        let connect_timeout = config.connect_timeout();
        let manager = Self::connect(&client, connect_timeout).await?;

        info!(
            url = %crate::config::loader::redact_url(&config.url),
            "Redis store connected"
        );

        Ok(Self {
            client,
            manager: RwLock::new(manager),
            blocking_pool: Mutex::new(Vec::new()),
            connect_timeout,
        })
    }

    async fn connect(client: &redis::Client, timeout: Duration) -> StoreResult<ConnectionManager> {
        tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| StoreError::Timeout("Redis connect".to_string()))?
            .map_err(StoreError::from)
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.read().clone()
    }

    async fn checkout_blocking(&self) -> StoreResult<MultiplexedConnection> {
        if let Some(conn) = self.blocking_pool.lock().await.pop() {
            return Ok(conn);
        }
        tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| StoreError::Timeout("Redis blocking connection".to_string()))?
        .map_err(StoreError::from)
    }

    async fn checkin_blocking(&self, conn: MultiplexedConnection) {
        self.blocking_pool.lock().await.push(conn);
    }

    fn ttl_millis(ttl: Option<Duration>) -> u64 {
        ttl.map_or(0, |ttl| ttl.as_millis().max(1) as u64)
    }

    /// Append one operation to the transaction, returning how to read its reply
    fn add_op(pipe: &mut redis::Pipeline, op: &StoreOp) -> ReplyKind {
        match op {
            StoreOp::Set { key, value, ttl } => {
                pipe.cmd("SET").arg(key).arg(value);
                if ttl.is_some() {
                    pipe.arg("PX").arg(Self::ttl_millis(*ttl));
                }
                ReplyKind::Done
            }
            StoreOp::SetIfAbsent { key, value, ttl } => {
                pipe.cmd("SET").arg(key).arg(value).arg("NX");
                if ttl.is_some() {
                    pipe.arg("PX").arg(Self::ttl_millis(*ttl));
                }
                ReplyKind::NilIsFalse
            }
            StoreOp::Delete { key } => {
                pipe.cmd("DEL").arg(key);
                ReplyKind::Count
            }
            StoreOp::PushQueue { queue, value } => {
                pipe.cmd("LPUSH").arg(queue).arg(value);
                ReplyKind::Count
            }
            StoreOp::Publish { channel, message } => {
                pipe.cmd("PUBLISH").arg(channel).arg(message);
                ReplyKind::Done
            }
            StoreOp::SetAdd { key, member } => {
                pipe.cmd("SADD").arg(key).arg(member);
                ReplyKind::Count
            }
            StoreOp::SetRemove { key, member } => {
                pipe.cmd("SREM").arg(key).arg(member);
                ReplyKind::Count
            }
            StoreOp::HashSetIfAbsent {
                key,
                field,
                value,
                companion,
                ttl,
                pending,
                require_record,
                exclusive_with,
            } => {
                let (action, set_key, member, unless_fields) = match pending {
                    Some(PendingSetUpdate::Add {
                        set_key,
                        member,
                        unless_fields,
                    }) => ("add", set_key.as_str(), member.as_str(), unless_fields.as_slice()),
                    Some(PendingSetUpdate::Remove { set_key, member }) => {
                        ("remove", set_key.as_str(), member.as_str(), &[][..])
                    }
                    None => ("", key.as_str(), "", &[][..]),
                };
                let (companion_field, companion_value) = companion
                    .as_ref()
                    .map_or(("", ""), |(f, v)| (f.as_str(), v.as_str()));

                pipe.cmd("EVAL")
                    .arg(HASH_SET_IF_ABSENT_SCRIPT)
                    .arg(2)
                    .arg(key)
                    .arg(set_key)
                    .arg(field)
                    .arg(value)
                    .arg(Self::ttl_millis(*ttl))
                    .arg(if *require_record { "1" } else { "0" })
                    .arg(action)
                    .arg(member)
                    .arg(companion_field)
                    .arg(companion_value)
                    .arg(exclusive_with.len());
                for exclusive in exclusive_with {
                    pipe.arg(exclusive);
                }
                for unless in unless_fields {
                    pipe.arg(unless);
                }
                ReplyKind::Flag
            }
            StoreOp::PromoteProcessed {
                processed_key,
                payload,
                queue,
                queue_value,
                channel,
                message,
                raw_key,
            } => {
                pipe.cmd("EVAL")
                    .arg(PROMOTE_PROCESSED_SCRIPT)
                    .arg(3)
                    .arg(processed_key)
                    .arg(queue)
                    .arg(raw_key)
                    .arg(payload)
                    .arg(queue_value)
                    .arg(channel)
                    .arg(message);
                ReplyKind::Flag
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ReplyKind {
    Done,
    Count,
    Flag,
    NilIsFalse,
}

impl ReplyKind {
    fn read(self, value: &redis::Value) -> OpReply {
        match (self, value) {
            (Self::NilIsFalse, redis::Value::Nil) => OpReply::Flag(false),
            (Self::NilIsFalse, _) => OpReply::Flag(true),
            (Self::Flag, redis::Value::Int(n)) => OpReply::Flag(*n > 0),
            (Self::Flag, _) => OpReply::Flag(false),
            (Self::Count, redis::Value::Int(n)) => OpReply::Count(*n),
            (Self::Count, _) => OpReply::Count(0),
            (Self::Done, _) => OpReply::Done,
        }
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn execute(&self, batch: StoreBatch) -> StoreResult<Vec<OpReply>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        let kinds: Vec<ReplyKind> = batch
            .ops()
            .iter()
            .map(|op| Self::add_op(&mut pipe, op))
            .collect();

        let mut conn = self.conn();
        let values: Vec<redis::Value> = pipe.query_async(&mut conn).await?;
        if values.len() != kinds.len() {
            return Err(StoreError::SerializationError(format!(
                "expected {} transaction replies, got {}",
                kinds.len(),
                values.len()
            )));
        }
        Ok(kinds
            .into_iter()
            .zip(values.iter())
            .map(|(kind, value)| kind.read(value))
            .collect())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        Ok(redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?)
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?)
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?)
    }

    async fn hash_exists(&self, key: &str, field: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        Ok(redis::cmd("HEXISTS")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let mut members: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;
        members.sort();
        Ok(members)
    }

    async fn pop_blocking(&self, queue: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let mut conn = self.checkout_blocking().await?;
        let seconds = timeout.as_secs_f64().max(0.01);
        let mut cmd = redis::cmd("BRPOP");
        cmd.arg(queue).arg(seconds);
        let pop = cmd.query_async::<Option<(String, String)>>(&mut conn);

        match tokio::time::timeout(timeout + BLOCKING_GRACE, pop).await {
            Ok(Ok(entry)) => {
                self.checkin_blocking(conn).await;
                Ok(entry.map(|(_, value)| value))
            }
            // The connection is dropped rather than returned to the pool
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(StoreError::Timeout(format!("BRPOP {queue}"))),
        }
    }

    async fn pop_batch(&self, queue: &str, max: usize) -> StoreResult<Vec<String>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for _ in 0..max {
            pipe.cmd("RPOP").arg(queue);
        }
        let mut conn = self.conn();
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        Ok(values.into_iter().flatten().collect())
    }

    async fn queue_len(&self, queue: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(redis::cmd("LLEN").arg(queue).query_async(&mut conn).await?)
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        // SCAN iterates without blocking the server
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        keys.sort();
        keys.dedup();
        debug!(pattern = pattern, matched = keys.len(), "Key scan complete");
        Ok(keys)
    }

    async fn subscribe(&self, channels: &[String]) -> StoreResult<Box<dyn Subscription>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub.subscribe(channel).await?;
        }
        debug!(channels = ?channels, "Subscribed to notification channels");
        Ok(Box::new(RedisSubscription {
            stream: Box::pin(pubsub.into_on_message()),
        }))
    }

    async fn reconnect(&self) -> StoreResult<()> {
        let manager = Self::connect(&self.client, self.connect_timeout).await?;
        *self.manager.write() = manager;
        self.blocking_pool.lock().await.clear();
        warn!("Redis store connections rebuilt");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

struct RedisSubscription {
    stream: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_notification(&mut self, timeout: Duration) -> StoreResult<Option<Notification>> {
        match tokio::time::timeout(timeout, self.stream.next()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(StoreError::ConnectionError(
                "pub/sub connection closed".to_string(),
            )),
            Ok(Some(msg)) => {
                let payload: String = msg
                    .get_payload()
                    .map_err(|e| StoreError::SerializationError(e.to_string()))?;
                Ok(Some(Notification {
                    channel: msg.get_channel_name().to_string(),
                    payload,
                }))
            }
        }
    }
}
