//! Source plugins, the monitored symbol universe and the enrichment seam.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;

use crate::error::PipelineResult;
use crate::models::{NormalizableItem, NormalizedItem, SourceItem, SourceKind};

/// Source-specific parsing and cleanup
pub trait SourcePlugin: Send + Sync {
    fn source(&self) -> SourceKind;

    /// Parse a raw payload into its typed variant
    fn parse(&self, raw: &str) -> PipelineResult<SourceItem>;

    /// Parse and validate into the common record
    fn normalize(&self, raw: &str) -> PipelineResult<NormalizedItem> {
        self.parse(raw)?.normalize()
    }

    /// Content cleanup applied to items that passed the symbol filter
    fn clean(&self, mut item: NormalizedItem) -> NormalizedItem {
        item.content = item
            .content
            .iter()
            .map(|chunk| chunk.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|chunk| !chunk.is_empty())
            .collect();
        item.title = item
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        item
    }
}

/// Deserializes raw JSON straight into the payload type for its source
#[derive(Debug, Clone, Copy)]
pub struct JsonSourcePlugin {
    source: SourceKind,
}

impl JsonSourcePlugin {
    pub fn new(source: SourceKind) -> Self {
        Self { source }
    }
}

impl SourcePlugin for JsonSourcePlugin {
    fn source(&self) -> SourceKind {
        self.source
    }

    fn parse(&self, raw: &str) -> PipelineResult<SourceItem> {
        Ok(match self.source {
            SourceKind::News => SourceItem::News(serde_json::from_str(raw)?),
            SourceKind::Filing => SourceItem::Filing(serde_json::from_str(raw)?),
            SourceKind::Transcript => SourceItem::Transcript(serde_json::from_str(raw)?),
        })
    }
}

/// Case-insensitive set of monitored symbols. An empty universe accepts everything.
#[derive(Debug, Clone, Default)]
pub struct SymbolUniverse {
    symbols: HashSet<String>,
}

impl SymbolUniverse {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| s.as_ref().trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn accepts_all(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.accepts_all() || self.symbols.contains(&symbol.trim().to_uppercase())
    }

    /// Subset of `symbols` that is monitored
    pub fn matching(&self, symbols: &BTreeSet<String>) -> BTreeSet<String> {
        symbols.iter().filter(|s| self.contains(s)).cloned().collect()
    }
}

/// External enrichment collaborator (return windows and similar metadata)
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn enrich(&self, item: &NormalizedItem) -> PipelineResult<serde_json::Value>;
}

/// Enrichment that attaches nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnrichment;

#[async_trait]
impl EnrichmentService for NoEnrichment {
    async fn enrich(&self, _item: &NormalizedItem) -> PipelineResult<serde_json::Value> {
        Ok(serde_json::Value::Object(serde_json::Map::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_matches_case_insensitively() {
        let universe = SymbolUniverse::new(["aapl", " MSFT "]);
        let symbols: BTreeSet<String> = ["AAPL", "TSLA"].iter().map(|s| s.to_string()).collect();
        let matched = universe.matching(&symbols);
        assert_eq!(matched.into_iter().collect::<Vec<_>>(), vec!["AAPL".to_string()]);
        assert!(universe.contains("msft"));
        assert!(!universe.contains("GOOG"));
    }

    #[test]
    fn test_empty_universe_accepts_all() {
        let universe = SymbolUniverse::default();
        assert!(universe.accepts_all());
        assert!(universe.contains("ANY"));
    }

    #[test]
    fn test_json_plugin_normalizes_and_cleans() {
        let plugin = JsonSourcePlugin::new(SourceKind::News);
        let raw = r#"{"id":"42","created":"2024-03-01T09:00:00Z","title":"  Beat  ",
                      "body":"  multiple   spaces\n here ","symbols":["aapl"]}"#;
        let item = plugin.clean(plugin.normalize(raw).unwrap());
        assert_eq!(item.id, "42");
        assert_eq!(item.title.as_deref(), Some("Beat"));
        assert_eq!(item.content, vec!["multiple spaces here".to_string()]);
    }

    #[test]
    fn test_json_plugin_rejects_missing_required_field() {
        let plugin = JsonSourcePlugin::new(SourceKind::Filing);
        let raw = r#"{"accession_no":"0001","filed_at":"2024-03-01T09:00:00Z"}"#;
        let err = plugin.normalize(raw).unwrap_err();
        assert!(err.to_string().contains("form_type"));
    }
}
