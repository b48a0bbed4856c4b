//! # In-Memory Store
//!
//! Complete [`KvStore`] implementation for tests and embedded single-process use.
//! One mutex guards all data, so a batch is atomic by construction. Pub/sub rides a
//! broadcast channel, blocking pops wait on a [`Notify`], and TTLs are enforced lazily
//! when a key is touched.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::batch::{OpReply, PendingSetUpdate, StoreBatch, StoreOp};
use super::errors::{StoreError, StoreResult};
use super::traits::{KvStore, Notification, Subscription};

const PUBSUB_CAPACITY: usize = 4_096;

#[derive(Debug)]
struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    strings: HashMap<String, Expiring<String>>,
    hashes: HashMap<String, Expiring<HashMap<String, String>>>,
    sets: HashMap<String, HashSet<String>>,
    lists: HashMap<String, VecDeque<String>>,
}

impl Inner {
    fn purge_expired(&mut self, key: &str, now: Instant) {
        if self.strings.get(key).is_some_and(|e| e.is_expired(now)) {
            self.strings.remove(key);
        }
        if self.hashes.get(key).is_some_and(|e| e.is_expired(now)) {
            self.hashes.remove(key);
        }
    }

    fn key_exists(&mut self, key: &str, now: Instant) -> bool {
        self.purge_expired(key, now);
        self.strings.contains_key(key)
            || self.hashes.contains_key(key)
            || self.sets.contains_key(key)
            || self.lists.contains_key(key)
    }

    fn delete(&mut self, key: &str) -> i64 {
        let removed = [
            self.strings.remove(key).is_some(),
            self.hashes.remove(key).is_some(),
            self.sets.remove(key).is_some(),
            self.lists.remove(key).is_some(),
        ];
        removed.iter().filter(|r| **r).count() as i64
    }

    fn push(&mut self, queue: String, value: String) -> i64 {
        let list = self.lists.entry(queue).or_default();
        list.push_front(value);
        list.len() as i64
    }

    fn pop(&mut self, queue: &str) -> Option<String> {
        let list = self.lists.get_mut(queue)?;
        let value = list.pop_back();
        if list.is_empty() {
            self.lists.remove(queue);
        }
        value
    }

    fn set_remove(&mut self, key: &str, member: &str) -> i64 {
        let Some(set) = self.sets.get_mut(key) else {
            return 0;
        };
        let removed = set.remove(member);
        if set.is_empty() {
            self.sets.remove(key);
        }
        i64::from(removed)
    }

    fn all_keys(&mut self, now: Instant) -> Vec<String> {
        self.strings.retain(|_, e| !e.is_expired(now));
        self.hashes.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = self
            .strings
            .keys()
            .chain(self.hashes.keys())
            .chain(self.sets.keys())
            .chain(self.lists.keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn apply(&mut self, op: StoreOp, now: Instant, published: &mut Vec<Notification>) -> OpReply {
        match op {
            StoreOp::Set { key, value, ttl } => {
                self.delete(&key);
                self.strings.insert(key, Expiring::new(value, ttl, now));
                OpReply::Done
            }
            StoreOp::SetIfAbsent { key, value, ttl } => {
                if self.key_exists(&key, now) {
                    OpReply::Flag(false)
                } else {
                    self.strings.insert(key, Expiring::new(value, ttl, now));
                    OpReply::Flag(true)
                }
            }
            StoreOp::Delete { key } => {
                self.purge_expired(&key, now);
                OpReply::Count(self.delete(&key))
            }
            StoreOp::PushQueue { queue, value } => OpReply::Count(self.push(queue, value)),
            StoreOp::Publish { channel, message } => {
                published.push(Notification {
                    channel,
                    payload: message,
                });
                OpReply::Done
            }
            StoreOp::SetAdd { key, member } => {
                OpReply::Count(i64::from(self.sets.entry(key).or_default().insert(member)))
            }
            StoreOp::SetRemove { key, member } => OpReply::Count(self.set_remove(&key, &member)),
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
                self.purge_expired(&key, now);
                if require_record && !self.hashes.contains_key(&key) {
                    return OpReply::Flag(false);
                }
                let entry = self
                    .hashes
                    .entry(key)
                    .or_insert_with(|| Expiring::new(HashMap::new(), None, now));
                if entry.value.contains_key(&field)
                    || exclusive_with.iter().any(|f| entry.value.contains_key(f))
                {
                    return OpReply::Flag(false);
                }
                entry.value.insert(field, value);
                if let Some((companion_field, companion_value)) = companion {
                    entry.value.entry(companion_field).or_insert(companion_value);
                }
                if let Some(ttl) = ttl {
                    entry.expires_at = Some(now + ttl);
                }
                let terminal_present = match &pending {
                    Some(PendingSetUpdate::Add { unless_fields, .. }) => {
                        unless_fields.iter().any(|f| entry.value.contains_key(f))
                    }
                    _ => false,
                };
                match pending {
                    Some(PendingSetUpdate::Add {
                        set_key, member, ..
                    }) => {
                        if !terminal_present {
                            self.sets.entry(set_key).or_default().insert(member);
                        }
                    }
                    Some(PendingSetUpdate::Remove { set_key, member }) => {
                        self.set_remove(&set_key, &member);
                    }
                    None => {}
                }
                OpReply::Flag(true)
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
                let promoted = !self.key_exists(&processed_key, now);
                if promoted {
                    self.strings
                        .insert(processed_key, Expiring::new(payload, None, now));
                    self.push(queue, queue_value);
                    published.push(Notification {
                        channel,
                        payload: message,
                    });
                }
                self.delete(&raw_key);
                OpReply::Flag(promoted)
            }
        }
    }
}

/// Process-local store with the same semantics as the Redis backend
#[derive(Debug)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    publisher: broadcast::Sender<Notification>,
    queue_notify: Notify,
    injected_failures: AtomicU32,
    reconnects: AtomicU32,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (publisher, _) = broadcast::channel(PUBSUB_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            publisher,
            queue_notify: Notify::new(),
            injected_failures: AtomicU32::new(0),
            reconnects: AtomicU32::new(0),
        }
    }

    /// Make the next `count` batch or pop calls fail with a connection error
    pub fn inject_connection_failures(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn check_injected_failure(&self) -> StoreResult<()> {
        let taken = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(StoreError::ConnectionError(
                "injected connection failure".to_string(),
            )),
            Err(_) => Ok(()),
        }
    }

    fn try_pop(&self, queue: &str) -> Option<String> {
        self.inner.lock().pop(queue)
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn execute(&self, batch: StoreBatch) -> StoreResult<Vec<OpReply>> {
        self.check_injected_failure()?;

        let now = Instant::now();
        let mut published = Vec::new();
        let mut pushed = false;
        let mut replies = Vec::with_capacity(batch.len());
        {
            let mut inner = self.inner.lock();
            for op in batch.into_ops() {
                pushed |= matches!(
                    op,
                    StoreOp::PushQueue { .. } | StoreOp::PromoteProcessed { .. }
                );
                replies.push(inner.apply(op, now, &mut published));
            }
        }

        for notification in published {
            let receivers = self.publisher.send(notification).unwrap_or(0);
            debug!(receivers = receivers, "Published notification");
        }
        if pushed {
            self.queue_notify.notify_waiters();
        }
        Ok(replies)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.purge_expired(key, now);
        Ok(inner.strings.get(key).map(|e| e.value.clone()))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().key_exists(key, Instant::now()))
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.purge_expired(key, now);
        Ok(inner
            .hashes
            .get(key)
            .and_then(|e| e.value.get(field).cloned()))
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.purge_expired(key, now);
        Ok(inner
            .hashes
            .get(key)
            .map(|e| e.value.clone())
            .unwrap_or_default())
    }

    async fn hash_exists(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self.hash_get(key, field).await?.is_some())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock();
        let mut members: Vec<String> = inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn pop_blocking(&self, queue: &str, timeout: Duration) -> StoreResult<Option<String>> {
        self.check_injected_failure()?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.queue_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(queue) {
                return Ok(Some(value));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_pop(queue));
            }
        }
    }

    async fn pop_batch(&self, queue: &str, max: usize) -> StoreResult<Vec<String>> {
        self.check_injected_failure()?;

        let mut inner = self.inner.lock();
        let mut values = Vec::new();
        while values.len() < max {
            match inner.pop(queue) {
                Some(value) => values.push(value),
                None => break,
            }
        }
        Ok(values)
    }

    async fn queue_len(&self, queue: &str) -> StoreResult<usize> {
        Ok(self.inner.lock().lists.get(queue).map_or(0, VecDeque::len))
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.check_injected_failure()?;

        let keys = self.inner.lock().all_keys(Instant::now());
        Ok(keys.into_iter().filter(|k| glob_match(pattern, k)).collect())
    }

    async fn subscribe(&self, channels: &[String]) -> StoreResult<Box<dyn Subscription>> {
        Ok(Box::new(MemorySubscription {
            channels: channels.iter().cloned().collect(),
            receiver: self.publisher.subscribe(),
        }))
    }

    async fn reconnect(&self) -> StoreResult<()> {
        let count = self.reconnects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(reconnects = count, "In-memory store reconnect requested");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemorySubscription {
    channels: HashSet<String>,
    receiver: broadcast::Receiver<Notification>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_notification(&mut self, timeout: Duration) -> StoreResult<Option<Notification>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Err(_) => return Ok(None),
                Ok(Ok(notification)) => {
                    if self.channels.contains(&notification.channel) {
                        return Ok(Some(notification));
                    }
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(skipped = skipped, "Subscription lagged; notifications dropped");
                }
                Ok(Err(RecvError::Closed)) => {
                    return Err(StoreError::ConnectionError(
                        "notification channel closed".to_string(),
                    ))
                }
            }
        }
    }
}

/// Glob matching with `*` (any run) and `?` (any single char)
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn hash_set_if_absent(key: &str, field: &str, value: &str) -> StoreOp {
        StoreOp::HashSetIfAbsent {
            key: key.into(),
            field: field.into(),
            value: value.into(),
            companion: None,
            ttl: None,
            pending: None,
            require_record: false,
            exclusive_with: Vec::new(),
        }
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("news:live:complete:*", "news:live:complete:123"));
        assert!(!glob_match("news:live:complete:*", "news:hist:complete:123"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a?c*", "abcdef"));
        assert!(glob_match("*:raw:*", "filing:live:raw:9"));
        assert!(!glob_match("a*b", "acd"));
    }

    #[tokio::test]
    async fn test_hash_set_if_absent_never_overwrites() {
        let store = InMemoryStore::new();
        let mut batch = StoreBatch::new();
        batch.push(hash_set_if_absent("h", "f", "first"));
        batch.push(hash_set_if_absent("h", "f", "second"));
        let replies = store.execute(batch).await.unwrap();

        assert_eq!(replies, vec![OpReply::Flag(true), OpReply::Flag(false)]);
        assert_eq!(store.hash_get("h", "f").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_require_record_skips_missing_hash() {
        let store = InMemoryStore::new();
        let mut batch = StoreBatch::new();
        batch.push(StoreOp::HashSetIfAbsent {
            key: "h".into(),
            field: "filtered_at".into(),
            value: "now".into(),
            companion: Some(("filtered_reason".into(), "none".into())),
            ttl: None,
            pending: None,
            require_record: true,
            exclusive_with: Vec::new(),
        });
        let replies = store.execute(batch).await.unwrap();
        assert_eq!(replies, vec![OpReply::Flag(false)]);
        assert!(!store.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_promote_processed_short_circuits_duplicates() {
        let store = InMemoryStore::new();
        let promote = |raw: &str| StoreOp::PromoteProcessed {
            processed_key: "news:live:processed:1".into(),
            payload: "{}".into(),
            queue: "news:queues:processed".into(),
            queue_value: "live:1".into(),
            channel: "news:live:processed".into(),
            message: "1".into(),
            raw_key: raw.into(),
        };

        let mut seed = StoreBatch::new();
        seed.set("raw:a", "x", None);
        seed.set("raw:b", "y", None);
        store.execute(seed).await.unwrap();

        let mut first = StoreBatch::new();
        first.push(promote("raw:a"));
        assert_eq!(store.execute(first).await.unwrap(), vec![OpReply::Flag(true)]);

        let mut second = StoreBatch::new();
        second.push(promote("raw:b"));
        assert_eq!(store.execute(second).await.unwrap(), vec![OpReply::Flag(false)]);

        assert_eq!(store.queue_len("news:queues:processed").await.unwrap(), 1);
        assert!(!store.exists("raw:a").await.unwrap());
        assert!(!store.exists("raw:b").await.unwrap());
    }

    #[tokio::test]
    async fn test_queue_is_fifo_and_batch_pop_bounded() {
        let store = InMemoryStore::new();
        let mut batch = StoreBatch::new();
        for i in 0..5 {
            batch.push_queue("q", i.to_string());
        }
        store.execute(batch).await.unwrap();

        assert_eq!(store.pop_batch("q", 3).await.unwrap(), vec!["0", "1", "2"]);
        assert_eq!(
            store.pop_blocking("q", Duration::from_millis(10)).await.unwrap().as_deref(),
            Some("3")
        );
        assert_eq!(store.queue_len("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blocking_pop_wakes_on_push() {
        let store = Arc::new(InMemoryStore::new());
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.pop_blocking("q", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut batch = StoreBatch::new();
        batch.push_queue("q", "hello");
        store.execute(batch).await.unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_blocking_pop_times_out() {
        let store = InMemoryStore::new();
        let popped = store.pop_blocking("empty", Duration::from_millis(10)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_subscription_filters_channels() {
        let store = InMemoryStore::new();
        let mut subscription = store.subscribe(&["a".to_string()]).await.unwrap();

        let mut batch = StoreBatch::new();
        batch.publish("b", "ignored");
        batch.publish("a", "wanted");
        store.execute(batch).await.unwrap();

        let notification = subscription
            .next_notification(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.payload, "wanted");
        assert!(subscription
            .next_notification(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_ttl_expires_lazily() {
        let store = InMemoryStore::new();
        let mut batch = StoreBatch::new();
        batch.set("k", "v", Some(Duration::from_millis(5)));
        store.execute(batch).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.scan_keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_io_errors() {
        let store = InMemoryStore::new();
        store.inject_connection_failures(1);
        let err = store.pop_batch("q", 1).await.unwrap_err();
        assert!(err.is_io());
        assert!(store.pop_batch("q", 1).await.unwrap().is_empty());
    }
}
