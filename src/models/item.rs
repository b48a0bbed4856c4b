//! # Item Model
//!
//! Source-typed payloads, the common normalization capability and the strongly-typed
//! record the rest of the pipeline works with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{PipelineError, PipelineResult};

/// Kind of upstream source an item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    News,
    Filing,
    Transcript,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::News, SourceKind::Filing, SourceKind::Transcript];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Filing => "filing",
            Self::Transcript => "transcript",
        }
    }

    /// Graph node label used for items of this source
    pub fn node_label(&self) -> &'static str {
        match self {
            Self::News => "News",
            Self::Filing => "Report",
            Self::Transcript => "Transcript",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "news" => Ok(Self::News),
            "filing" | "report" => Ok(Self::Filing),
            "transcript" => Ok(Self::Transcript),
            _ => Err(format!("Invalid source kind: {s}")),
        }
    }
}

/// Storage namespace an item lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Live,
    Historical,
}

impl Namespace {
    /// Historical first: dispatch falls back from historical to live storage
    pub const LOOKUP_ORDER: [Namespace; 2] = [Namespace::Historical, Namespace::Live];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Historical => "hist",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Self::Live),
            "hist" | "historical" => Ok(Self::Historical),
            _ => Err(format!("Invalid namespace: {s}")),
        }
    }
}

/// Pipeline state of an item, which also names its transient partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Raw,
    Processed,
    Complete,
    Incomplete,
    Failed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Processed => "processed",
            Self::Complete => "complete",
            Self::Incomplete => "incomplete",
            Self::Failed => "failed",
        }
    }

    /// States whose keys the dispatcher consumes
    pub fn is_transient_outcome(&self) -> bool {
        matches!(self, Self::Complete | Self::Incomplete)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "processed" => Ok(Self::Processed),
            "complete" => Ok(Self::Complete),
            "incomplete" => Ok(Self::Incomplete),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid item state: {s}")),
        }
    }
}

/// Identity of an item version: `(source, id, update-timestamp)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemIdentity {
    pub source: SourceKind,
    pub id: String,
    pub updated: DateTime<Utc>,
}

/// Capability shared by every source-typed payload
pub trait NormalizableItem {
    /// Validate and convert into the common strongly-typed record
    fn normalize(self) -> PipelineResult<NormalizedItem>;
}

/// News wire item as delivered by the wire adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub title: Option<String>,
    #[serde(default)]
    pub teaser: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Regulatory filing as delivered by the filing adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingItem {
    pub accession_no: Option<String>,
    pub filed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    pub form_type: Option<String>,
    #[serde(default)]
    pub cik: Option<String>,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub primary_document_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Earnings-call transcript as delivered by the transcript adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub id: Option<String>,
    pub symbol: Option<String>,
    pub conference_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fiscal_quarter: Option<u8>,
    #[serde(default)]
    pub fiscal_year: Option<i32>,
    #[serde(default)]
    pub speakers: Vec<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Tagged union of every supported source payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceItem {
    News(NewsItem),
    Filing(FilingItem),
    Transcript(TranscriptItem),
}

impl SourceItem {
    pub fn source(&self) -> SourceKind {
        match self {
            Self::News(_) => SourceKind::News,
            Self::Filing(_) => SourceKind::Filing,
            Self::Transcript(_) => SourceKind::Transcript,
        }
    }
}

fn required<T>(value: Option<T>, source: SourceKind, field: &str) -> PipelineResult<T> {
    value.ok_or_else(|| {
        PipelineError::validation(format!("{source} item missing required field '{field}'"))
    })
}

fn symbol_set<I: IntoIterator<Item = String>>(symbols: I) -> BTreeSet<String> {
    symbols
        .into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl NormalizableItem for NewsItem {
    fn normalize(self) -> PipelineResult<NormalizedItem> {
        let source = SourceKind::News;
        let id = required(self.id, source, "id")?;
        let created = required(self.created, source, "created")?;
        let updated = self.updated.unwrap_or(created);
        let title = required(self.title, source, "title")?;

        let mut metadata = serde_json::Map::new();
        metadata.insert("channels".into(), serde_json::json!(self.channels));
        metadata.insert("tags".into(), serde_json::json!(self.tags));
        if let Some(url) = self.url {
            metadata.insert("url".into(), serde_json::json!(url));
        }

        Ok(NormalizedItem {
            source,
            id,
            created,
            updated,
            symbols: symbol_set(self.symbols),
            title: Some(title),
            content: [self.teaser, self.body].into_iter().flatten().collect(),
            metadata,
        })
    }
}

impl NormalizableItem for FilingItem {
    fn normalize(self) -> PipelineResult<NormalizedItem> {
        let source = SourceKind::Filing;
        let id = required(self.accession_no, source, "accession_no")?;
        let created = required(self.filed_at, source, "filed_at")?;
        let form_type = required(self.form_type, source, "form_type")?;

        let mut metadata = serde_json::Map::new();
        metadata.insert("form_type".into(), serde_json::json!(form_type));
        if let Some(cik) = self.cik {
            metadata.insert("cik".into(), serde_json::json!(cik));
        }
        if let Some(url) = self.primary_document_url {
            metadata.insert("primary_document_url".into(), serde_json::json!(url));
        }

        Ok(NormalizedItem {
            source,
            id,
            created,
            updated: self.updated.unwrap_or(created),
            symbols: symbol_set(self.tickers),
            title: self.description,
            content: Vec::new(),
            metadata,
        })
    }
}

impl NormalizableItem for TranscriptItem {
    fn normalize(self) -> PipelineResult<NormalizedItem> {
        let source = SourceKind::Transcript;
        let symbol = required(self.symbol, source, "symbol")?;
        let created = required(self.conference_datetime, source, "conference_datetime")?;
        let id = self
            .id
            .unwrap_or_else(|| format!("{}_{}", symbol.to_uppercase(), created.format("%Y%m%d")));

        let mut metadata = serde_json::Map::new();
        if let Some(quarter) = self.fiscal_quarter {
            metadata.insert("fiscal_quarter".into(), serde_json::json!(quarter));
        }
        if let Some(year) = self.fiscal_year {
            metadata.insert("fiscal_year".into(), serde_json::json!(year));
        }
        metadata.insert("speakers".into(), serde_json::json!(self.speakers));

        Ok(NormalizedItem {
            source,
            id,
            created,
            updated: self.updated.unwrap_or(created),
            symbols: symbol_set([symbol]),
            title: None,
            content: self.content.into_iter().collect(),
            metadata,
        })
    }
}

impl NormalizableItem for SourceItem {
    fn normalize(self) -> PipelineResult<NormalizedItem> {
        match self {
            Self::News(item) => item.normalize(),
            Self::Filing(item) => item.normalize(),
            Self::Transcript(item) => item.normalize(),
        }
    }
}

/// Strongly-typed, validated record shared by every downstream component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub source: SourceKind,
    pub id: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub symbols: BTreeSet<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NormalizedItem {
    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity {
            source: self.source,
            id: self.id.clone(),
            updated: self.updated,
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Processed entry written by the item processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub item: NormalizedItem,
    /// Enrichment metadata computed by the external collaborator
    #[serde(default)]
    pub enrichment: serde_json::Value,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_news_normalization_uppercases_symbols_and_defaults_updated() {
        let news = NewsItem {
            id: Some("123".into()),
            created: Some(ts(9)),
            updated: None,
            title: Some("Apple beats estimates".into()),
            teaser: Some("teaser".into()),
            body: None,
            symbols: vec![" aapl ".into(), "".into(), "MSFT".into()],
            channels: vec!["earnings".into()],
            tags: vec![],
            url: None,
        };

        let item = SourceItem::News(news).normalize().unwrap();
        assert_eq!(item.id, "123");
        assert_eq!(item.updated, ts(9));
        assert_eq!(
            item.symbols.iter().cloned().collect::<Vec<_>>(),
            vec!["AAPL".to_string(), "MSFT".to_string()]
        );
        assert_eq!(item.content, vec!["teaser".to_string()]);
    }

    #[test]
    fn test_filing_missing_form_type_is_validation_error() {
        let filing = FilingItem {
            accession_no: Some("0000320193-24-000010".into()),
            filed_at: Some(ts(16)),
            updated: None,
            form_type: None,
            cik: None,
            tickers: vec!["AAPL".into()],
            primary_document_url: None,
            description: None,
        };

        let err = filing.normalize().unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(err.to_string().contains("form_type"));
    }

    #[test]
    fn test_transcript_synthesizes_id() {
        let transcript = TranscriptItem {
            id: None,
            symbol: Some("nvda".into()),
            conference_datetime: Some(ts(21)),
            updated: None,
            fiscal_quarter: Some(4),
            fiscal_year: Some(2024),
            speakers: vec![],
            content: None,
        };

        let item = transcript.normalize().unwrap();
        assert_eq!(item.id, "NVDA_20240301");
        assert!(item.symbols.contains("NVDA"));
    }

    #[test]
    fn test_source_item_tagged_serde() {
        let json = serde_json::json!({
            "kind": "transcript",
            "id": "t-1",
            "symbol": "AAPL",
            "conference_datetime": "2024-03-01T21:00:00Z"
        });
        let item: SourceItem = serde_json::from_value(json).unwrap();
        assert_eq!(item.source(), SourceKind::Transcript);
    }
}
