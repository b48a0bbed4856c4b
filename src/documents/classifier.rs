//! Cheap document classification into cost tiers.

use std::collections::HashSet;

use crate::config::ClassificationConfig;
use crate::models::DocumentTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Tier(DocumentTier),
    /// Out of scope; the job is marked SKIPPED
    Skip,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentClassifier {
    heavy: HashSet<String>,
    medium: HashSet<String>,
    light: HashSet<String>,
    skip: HashSet<String>,
}

fn normalize_type(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

fn to_set(items: &[String]) -> HashSet<String> {
    items.iter().map(|s| normalize_type(s)).filter(|s| !s.is_empty()).collect()
}

impl DocumentClassifier {
    pub fn from_config(config: &ClassificationConfig) -> Self {
        Self {
            heavy: to_set(&config.heavy),
            medium: to_set(&config.medium),
            light: to_set(&config.light),
            skip: to_set(&config.skip),
        }
    }

    /// Unknown, missing or ambiguous types fall into the heavy tier
    pub fn classify(&self, document_type: Option<&str>) -> Classification {
        let Some(document_type) = document_type.map(normalize_type).filter(|t| !t.is_empty()) else {
            return Classification::Tier(DocumentTier::Heavy);
        };

        let in_medium = self.medium.contains(&document_type);
        let in_light = self.light.contains(&document_type);
        if self.heavy.contains(&document_type) || (in_medium && in_light) {
            return Classification::Tier(DocumentTier::Heavy);
        }
        if self.skip.contains(&document_type) {
            return if in_medium || in_light {
                Classification::Tier(DocumentTier::Heavy)
            } else {
                Classification::Skip
            };
        }
        if in_medium {
            Classification::Tier(DocumentTier::Medium)
        } else if in_light {
            Classification::Tier(DocumentTier::Light)
        } else {
            Classification::Tier(DocumentTier::Heavy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> DocumentClassifier {
        DocumentClassifier::from_config(&ClassificationConfig::default())
    }

    #[test]
    fn test_listed_types_route_to_their_tier() {
        let c = classifier();
        assert_eq!(c.classify(Some("10-K")), Classification::Tier(DocumentTier::Heavy));
        assert_eq!(c.classify(Some("10-q")), Classification::Tier(DocumentTier::Medium));
        assert_eq!(c.classify(Some(" 8-K ")), Classification::Tier(DocumentTier::Light));
        assert_eq!(c.classify(Some("sc  13g")), Classification::Skip);
    }

    #[test]
    fn test_unknown_and_missing_default_to_heavy() {
        let c = classifier();
        assert_eq!(c.classify(Some("DEF 14A")), Classification::Tier(DocumentTier::Heavy));
        assert_eq!(c.classify(None), Classification::Tier(DocumentTier::Heavy));
        assert_eq!(c.classify(Some("  ")), Classification::Tier(DocumentTier::Heavy));
    }

    #[test]
    fn test_ambiguous_type_goes_heavy() {
        let mut config = ClassificationConfig::default();
        config.light.push("10-Q".into());
        config.skip.push("8-K".into());
        let c = DocumentClassifier::from_config(&config);
        assert_eq!(c.classify(Some("10-Q")), Classification::Tier(DocumentTier::Heavy));
        assert_eq!(c.classify(Some("8-K")), Classification::Tier(DocumentTier::Heavy));
    }
}
