//! # Store Key Layout
//!
//! Every key, queue and channel name shared between components is built here.
//!
//! | Purpose          | Layout                                              |
//! |------------------|-----------------------------------------------------|
//! | item payload     | `{source}:{live\|hist}:{raw\|processed\|complete\|incomplete}:{id}` |
//! | item queue       | `{source}:queues:{raw\|processed\|failed}`          |
//! | notification     | `{source}:live:{processed\|complete\|incomplete}`   |
//! | lifecycle record | `tracking:meta:{source}:{id}`                       |
//! | pending set      | `tracking:pending:{source}`                         |
//! | document queue   | `{prefix}:{heavy\|medium\|light}`                   |

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::tracking;
use crate::models::{ItemState, Namespace, SourceKind};

/// Queue lanes per source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueLane {
    Raw,
    Processed,
    Failed,
}

impl QueueLane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

/// Reference to an item payload pushed through the per-source queues: `{namespace}:{id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub namespace: Namespace,
    pub id: String,
}

impl ItemRef {
    pub fn new(namespace: Namespace, id: impl Into<String>) -> Self {
        Self {
            namespace,
            id: id.into(),
        }
    }

    pub fn live(id: impl Into<String>) -> Self {
        Self::new(Namespace::Live, id)
    }

    /// Parse a queue reference; a bare id is taken as live
    pub fn parse(reference: &str) -> Option<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        match reference.split_once(':') {
            Some((ns, id)) if !id.is_empty() => match ns.parse::<Namespace>() {
                Ok(namespace) => Some(Self::new(namespace, id)),
                Err(_) => Some(Self::live(reference)),
            },
            Some(_) => None,
            None => Some(Self::live(reference)),
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

pub fn item_key(source: SourceKind, namespace: Namespace, state: ItemState, id: &str) -> String {
    format!("{source}:{namespace}:{state}:{id}")
}

/// Glob pattern matching every item key in one partition
pub fn item_pattern(source: SourceKind, namespace: Namespace, state: ItemState) -> String {
    format!("{source}:{namespace}:{state}:*")
}

/// Extract the id from an item key of the given partition
pub fn id_from_item_key<'a>(
    key: &'a str,
    source: SourceKind,
    namespace: Namespace,
    state: ItemState,
) -> Option<&'a str> {
    key.strip_prefix(&format!("{source}:{namespace}:{state}:"))
        .filter(|id| !id.is_empty())
}

pub fn queue_key(source: SourceKind, lane: QueueLane) -> String {
    format!("{source}:queues:{}", lane.as_str())
}

pub fn channel(source: SourceKind, state: ItemState) -> String {
    format!("{source}:{}:{state}", Namespace::Live)
}

/// Channels the dispatcher subscribes to for one source
pub fn dispatch_channels(source: SourceKind) -> [String; 2] {
    [
        channel(source, ItemState::Complete),
        channel(source, ItemState::Incomplete),
    ]
}

/// Resolve a notification channel back into its source and outcome
pub fn parse_channel(name: &str) -> Option<(SourceKind, ItemState)> {
    let mut parts = name.splitn(3, ':');
    let source = parts.next()?.parse::<SourceKind>().ok()?;
    let namespace = parts.next()?.parse::<Namespace>().ok()?;
    let state = parts.next()?.parse::<ItemState>().ok()?;
    (namespace == Namespace::Live).then_some((source, state))
}

pub fn lifecycle_key(source: SourceKind, id: &str) -> String {
    format!("{}:{source}:{id}", tracking::META_PREFIX)
}

pub fn lifecycle_pattern(source: SourceKind) -> String {
    format!("{}:{source}:*", tracking::META_PREFIX)
}

pub fn id_from_lifecycle_key(key: &str, source: SourceKind) -> Option<&str> {
    key.strip_prefix(&format!("{}:{source}:", tracking::META_PREFIX))
}

/// Source a lifecycle key belongs to
pub fn source_of_lifecycle_key(key: &str) -> Option<SourceKind> {
    key.strip_prefix(tracking::META_PREFIX)?
        .strip_prefix(':')?
        .split(':')
        .next()?
        .parse()
        .ok()
}

pub fn pending_set_key(source: SourceKind) -> String {
    format!("{}:{source}", tracking::PENDING_PREFIX)
}

pub fn document_queue_key(prefix: &str, tier: &str) -> String {
    format!("{prefix}:{tier}")
}
