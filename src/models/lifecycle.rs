//! Lifecycle record: the per-item set-once stage timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::lifecycle_fields as fields;

/// Fields whose presence ends an item's lifecycle
pub const TERMINAL_FIELDS: [&str; 3] = [fields::INSERTED_AT, fields::FILTERED_AT, fields::FAILED_AT];

pub fn is_terminal_field(field: &str) -> bool {
    TERMINAL_FIELDS.contains(&field)
}

/// Terminal outcome recorded for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Inserted,
    Filtered,
    Failed,
}

/// Typed view over a lifecycle hash
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub ingested_at: Option<DateTime<Utc>>,
    pub source_api_timestamp: Option<DateTime<Utc>>,
    pub filtered_at: Option<DateTime<Utc>>,
    pub filtered_reason: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub inserted_at: Option<DateTime<Utc>>,
    /// Audit fields written through `set_data`
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

fn parse_ts(value: Option<&String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl LifecycleRecord {
    /// Build from the raw hash; unparseable timestamps are dropped
    pub fn from_fields(mut raw: HashMap<String, String>) -> Self {
        let mut take = |name: &str| raw.remove(name);
        let ingested_at = parse_ts(take(fields::INGESTED_AT).as_ref());
        let source_api_timestamp = parse_ts(take(fields::SOURCE_API_TIMESTAMP).as_ref());
        let filtered_at = parse_ts(take(fields::FILTERED_AT).as_ref());
        let filtered_reason = take(fields::FILTERED_REASON);
        let failed_at = parse_ts(take(fields::FAILED_AT).as_ref());
        let failed_reason = take(fields::FAILED_REASON);
        let inserted_at = parse_ts(take(fields::INSERTED_AT).as_ref());
        Self {
            ingested_at,
            source_api_timestamp,
            filtered_at,
            filtered_reason,
            failed_at,
            failed_reason,
            inserted_at,
            extra: raw,
        }
    }

    /// Terminal fields set on this record; at most one is expected
    pub fn terminal_outcomes(&self) -> Vec<TerminalOutcome> {
        let mut outcomes = Vec::new();
        if self.inserted_at.is_some() {
            outcomes.push(TerminalOutcome::Inserted);
        }
        if self.filtered_at.is_some() {
            outcomes.push(TerminalOutcome::Filtered);
        }
        if self.failed_at.is_some() {
            outcomes.push(TerminalOutcome::Failed);
        }
        outcomes
    }

    pub fn is_terminal(&self) -> bool {
        !self.terminal_outcomes().is_empty()
    }
}

/// Serialize a timestamp the way lifecycle fields store it
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_fields() {
        let now = Utc::now();
        let mut raw = HashMap::new();
        raw.insert("ingested_at".to_string(), format_timestamp(now));
        raw.insert("failed_at".to_string(), format_timestamp(now));
        raw.insert("failed_reason".to_string(), "validation_failed".to_string());
        raw.insert("operator_note".to_string(), "replayed".to_string());
        raw.insert("inserted_at".to_string(), "garbage".to_string());

        let record = LifecycleRecord::from_fields(raw);
        assert!(record.ingested_at.is_some());
        assert_eq!(record.failed_reason.as_deref(), Some("validation_failed"));
        assert_eq!(record.inserted_at, None);
        assert_eq!(record.terminal_outcomes(), vec![TerminalOutcome::Failed]);
        assert_eq!(record.extra.get("operator_note").map(String::as_str), Some("replayed"));
    }

    #[test]
    fn test_terminal_field_set() {
        assert!(is_terminal_field("inserted_at"));
        assert!(is_terminal_field("filtered_at"));
        assert!(!is_terminal_field("ingested_at"));
        assert!(!is_terminal_field("filtered_reason"));
    }
}
