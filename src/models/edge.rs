//! Relationship write requests and their commit grouping.

use serde::{Deserialize, Serialize};

/// One relationship write, as carried on the shared edge queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeWriteRequest {
    pub relationship_type: String,
    pub source_id: String,
    pub target_id: String,
    /// Node kind hints; empty or missing hints fall back to the type table
    #[serde(default)]
    pub source_kind: Option<String>,
    #[serde(default)]
    pub target_kind: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl EdgeWriteRequest {
    pub fn new(
        relationship_type: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            source_kind: None,
            target_kind: None,
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_kinds(mut self, source_kind: impl Into<String>, target_kind: impl Into<String>) -> Self {
        self.source_kind = Some(source_kind.into());
        self.target_kind = Some(target_kind.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Commit group key: `(relationship_type, source_kind, target_kind)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeGroupKey {
    pub relationship_type: String,
    pub source_kind: String,
    pub target_kind: String,
}

/// Edge inside a group; kinds live on the group key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedEdge {
    pub source_id: String,
    pub target_id: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// All edges sharing one key, written by exactly one batched upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeGroup {
    pub key: EdgeGroupKey,
    pub edges: Vec<GroupedEdge>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_without_hints() {
        let json = r#"{"relationship_type":"INFLUENCES","source_id":"n1","target_id":"AAPL"}"#;
        let request: EdgeWriteRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.source_kind, None);
        assert!(request.properties.is_empty());
    }

    #[test]
    fn test_group_key_ordering_is_lexicographic() {
        let a = EdgeGroupKey {
            relationship_type: "A".into(),
            source_kind: "Z".into(),
            target_kind: "Z".into(),
        };
        let b = EdgeGroupKey {
            relationship_type: "B".into(),
            source_kind: "A".into(),
            target_kind: "A".into(),
        };
        assert!(a < b);
    }
}
