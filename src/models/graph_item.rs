//! Destination-store view of an item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::SourceKind;
use crate::error::{PipelineError, PipelineResult};

/// Node upserted by id into the destination graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphItem {
    pub source: SourceKind,
    pub id: String,
    /// Update timestamp of the payload, compared for mutable entities
    pub version: Option<DateTime<Utc>>,
    pub symbols: Vec<String>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl GraphItem {
    pub fn label(&self) -> &'static str {
        self.source.node_label()
    }

    /// Build from a transient payload. Processed entries nest the item under `item`;
    /// other payloads are read from the top level.
    pub fn from_payload(source: SourceKind, id: &str, payload: &str) -> PipelineResult<Self> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        let serde_json::Value::Object(properties) = value else {
            return Err(PipelineError::validation(format!(
                "{source} payload for '{id}' is not a JSON object"
            )));
        };

        let body = properties
            .get("item")
            .and_then(|v| v.as_object())
            .unwrap_or(&properties);
        let version = body
            .get("updated")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let symbols = body
            .get("symbols")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            source,
            id: id.to_string(),
            version,
            symbols,
            properties,
        })
    }
}
