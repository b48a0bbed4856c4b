//! Atomic operation batches.
//!
//! A [`StoreBatch`] is applied by the backend as one transaction: every operation
//! runs, in order, without interleaving with other callers. Conditional operations
//! (`SetIfAbsent`, `HashSetIfAbsent`, `PromoteProcessed`) evaluate their condition
//! inside that transaction.

use std::time::Duration;

/// Pending-set side effect of a lifecycle field write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingSetUpdate {
    /// Add `member` unless the hash already holds any of `unless_fields`
    Add {
        set_key: String,
        member: String,
        unless_fields: Vec<String>,
    },
    Remove { set_key: String, member: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    /// Replies `Flag(true)` when the key was written
    SetIfAbsent {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    PushQueue {
        queue: String,
        value: String,
    },
    Publish {
        channel: String,
        message: String,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    /// Set a hash field only if it does not exist. When the field is written, the
    /// companion field (if any) is written the same way, the pending-set update is
    /// applied and the TTL is set. With `require_record`, nothing happens unless
    /// the hash already exists. Nothing happens either when the hash holds any of
    /// `exclusive_with`. Replies `Flag(true)` when the field was written.
    HashSetIfAbsent {
        key: String,
        field: String,
        value: String,
        companion: Option<(String, String)>,
        ttl: Option<Duration>,
        pending: Option<PendingSetUpdate>,
        require_record: bool,
        exclusive_with: Vec<String>,
    },
    /// If `processed_key` is absent: write it, push `queue_value` onto `queue`,
    /// publish `message` on `channel`. Always delete `raw_key`. Replies
    /// `Flag(false)` when the processed entry already existed.
    PromoteProcessed {
        processed_key: String,
        payload: String,
        queue: String,
        queue_value: String,
        channel: String,
        message: String,
        raw_key: String,
    },
}

/// Reply for one operation, in batch order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpReply {
    Done,
    Flag(bool),
    Count(i64),
}

impl OpReply {
    pub fn flag(&self) -> bool {
        match self {
            Self::Flag(value) => *value,
            Self::Count(count) => *count > 0,
            Self::Done => true,
        }
    }
}

/// Ordered list of operations applied atomically
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreBatch {
    ops: Vec<StoreOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation, returning its index in the reply vector
    pub fn push(&mut self, op: StoreOp) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) -> usize {
        self.push(StoreOp::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        })
    }

    pub fn set_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) -> usize {
        self.push(StoreOp::SetIfAbsent {
            key: key.into(),
            value: value.into(),
            ttl: None,
        })
    }

    pub fn delete(&mut self, key: impl Into<String>) -> usize {
        self.push(StoreOp::Delete { key: key.into() })
    }

    pub fn push_queue(&mut self, queue: impl Into<String>, value: impl Into<String>) -> usize {
        self.push(StoreOp::PushQueue {
            queue: queue.into(),
            value: value.into(),
        })
    }

    pub fn publish(&mut self, channel: impl Into<String>, message: impl Into<String>) -> usize {
        self.push(StoreOp::Publish {
            channel: channel.into(),
            message: message.into(),
        })
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_returns_reply_index() {
        let mut batch = StoreBatch::new();
        assert_eq!(batch.set("a", "1", None), 0);
        assert_eq!(batch.push_queue("q", "a"), 1);
        assert_eq!(batch.delete("b"), 2);
        assert_eq!(batch.len(), 3);
        assert!(matches!(batch.ops()[1], StoreOp::PushQueue { .. }));
    }

    #[test]
    fn test_reply_flag() {
        assert!(OpReply::Flag(true).flag());
        assert!(!OpReply::Count(0).flag());
        assert!(OpReply::Done.flag());
    }
}
