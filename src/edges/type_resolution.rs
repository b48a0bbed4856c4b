//! Static fallback for node kinds when a request carries no usable hints.

/// `(relationship_type, source_kind, target_kind)`
const TYPE_TABLE: &[(&str, &str, &str)] = &[
    ("INFLUENCES", "News", "Company"),
    ("PRIMARY_FILER", "Report", "Company"),
    ("HAS_TRANSCRIPT", "Company", "Transcript"),
    ("HAS_SECTION", "Report", "Section"),
    ("HAS_EXHIBIT", "Report", "Exhibit"),
    ("HAS_FINANCIAL_STATEMENT", "Report", "FinancialStatement"),
    ("HAS_FILING_TEXT", "Report", "FilingText"),
    ("BELONGS_TO", "Company", "Sector"),
];

pub fn default_kinds(relationship_type: &str) -> Option<(&'static str, &'static str)> {
    TYPE_TABLE
        .iter()
        .find(|(rel, _, _)| *rel == relationship_type)
        .map(|(_, source, target)| (*source, *target))
}

/// Labels and relationship types are interpolated into queries, so only ASCII
/// alphanumerics and `_` are accepted
pub fn is_identifier(raw: &str) -> bool {
    !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn hint(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve `(source_kind, target_kind)`; each side uses its hint when present,
/// otherwise the table entry for the relationship type. Unresolved when the
/// relationship type or either resolved kind is not a valid identifier.
pub fn resolve_kinds(
    relationship_type: &str,
    source_kind: Option<&str>,
    target_kind: Option<&str>,
) -> Option<(String, String)> {
    let relationship_type = relationship_type.trim();
    if !is_identifier(relationship_type) {
        return None;
    }
    let fallback = default_kinds(relationship_type);
    let source = hint(source_kind).or(fallback.map(|(s, _)| s))?;
    let target = hint(target_kind).or(fallback.map(|(_, t)| t))?;
    if !is_identifier(source) || !is_identifier(target) {
        return None;
    }
    Some((source.to_string(), target.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_hints_fall_back_to_table() {
        assert_eq!(
            resolve_kinds("INFLUENCES", Some("  "), None),
            Some(("News".to_string(), "Company".to_string()))
        );
    }

    #[test]
    fn test_hints_override_table() {
        assert_eq!(
            resolve_kinds("INFLUENCES", Some("Report"), Some("")),
            Some(("Report".to_string(), "Company".to_string()))
        );
    }

    #[test]
    fn test_non_identifier_kinds_are_unresolved() {
        assert_eq!(resolve_kinds("INFLUENCES", Some("Company Name"), None), None);
        assert_eq!(resolve_kinds("HAS-LINK", Some("News"), Some("Company")), None);
        assert_eq!(resolve_kinds("INFLUENCES", None, Some("Co`mpany")), None);
        assert!(is_identifier("FinancialStatement"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_unknown_type_without_hints_is_unresolved() {
        assert_eq!(resolve_kinds("MENTIONS", None, Some("Company")), None);
        assert_eq!(
            resolve_kinds("MENTIONS", Some("News"), Some("Company")),
            Some(("News".to_string(), "Company".to_string()))
        );
    }
}
