//! Description → canonical item resolution.
//!
//! ## Strategy
//!
//! Strict priority, first hit wins:
//!
//! 1. **Exact**: normalized description equals a normalized canonical name (confidence 1.0)
//! 2. **Synonym**: equals a normalized synonym (confidence = the synonym's stored value)
//! 3. **Fuzzy**: best [`token_set_ratio`] across canonical names, then synonyms
//!
//! Candidates are scanned in ascending id order, names before synonyms, and a
//! candidate only replaces the current best when its score is strictly
//! greater. The first candidate in that order wins ties.
//!
//! Synonyms whose canonical item no longer exists are ignored everywhere.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogSnapshot;
use crate::normalize::normalize;
use crate::proposals::NewSynonym;
use crate::similarity::token_set_ratio;
use crate::types::{CanonicalItem, MatchType};

/// Minimum fuzzy score accepted as a match.
pub const FUZZY_THRESHOLD: f64 = 0.60;

/// Fuzzy scores in this band raise a synonym proposal.
pub const SYNONYM_PROPOSAL_BAND: RangeInclusive<f64> = 0.75..=0.85;

/// Minimum score reported by [`Matcher::suggest`].
pub const SUGGEST_MIN_SCORE: f64 = 0.5;

/// Result of matching one description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub canonical_item_id: Option<String>,
    pub canonical_name: Option<String>,
    pub confidence: f64,
    pub match_type: MatchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
}

impl MatchResult {
    pub fn none() -> Self {
        Self {
            canonical_item_id: None,
            canonical_name: None,
            confidence: 0.0,
            match_type: MatchType::NoMatch,
            proposal_id: None,
        }
    }

    fn hit(item: &CanonicalItem, confidence: f64, match_type: MatchType) -> Self {
        Self {
            canonical_item_id: Some(item.id.clone()),
            canonical_name: Some(item.name.clone()),
            confidence,
            match_type,
            proposal_id: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.canonical_item_id.is_some()
    }
}

/// Match result plus the synonym proposal the caller should file, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub result: MatchResult,
    pub synonym_proposal: Option<NewSynonym>,
}

/// Ranked candidate for interactive lookup and offline retrieval metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Suggestion {
    pub canonical_item_id: String,
    pub display_name: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_price_band: Option<(f64, f64)>,
}

/// Stateless matcher over a catalog snapshot.
#[derive(Debug, Clone)]
pub struct Matcher {
    fuzzy_threshold: f64,
    proposal_band: RangeInclusive<f64>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    pub fn new() -> Self {
        Self {
            fuzzy_threshold: FUZZY_THRESHOLD,
            proposal_band: SYNONYM_PROPOSAL_BAND,
        }
    }

    /// Resolve a free-text description.
    pub fn match_description(&self, catalog: &CatalogSnapshot, description: &str) -> MatchOutcome {
        let normalized = normalize(description);
        if normalized.is_empty() {
            return MatchOutcome {
                result: MatchResult::none(),
                synonym_proposal: None,
            };
        }

        if let Some(item) = catalog
            .canonical_items()
            .iter()
            .find(|item| normalize(&item.name) == normalized)
        {
            return MatchOutcome {
                result: MatchResult::hit(item, 1.0, MatchType::Exact),
                synonym_proposal: None,
            };
        }

        for synonym in catalog.synonyms() {
            if normalize(&synonym.synonym) != normalized {
                continue;
            }
            if let Some(item) = catalog.canonical_item(&synonym.canonical_item_id) {
                return MatchOutcome {
                    result: MatchResult::hit(item, synonym.confidence, MatchType::Synonym),
                    synonym_proposal: None,
                };
            }
        }

        let mut best: Option<(&CanonicalItem, f64)> = None;
        for (item, score) in candidates(catalog, &normalized) {
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((item, score));
            }
        }

        match best {
            Some((item, score)) if score >= self.fuzzy_threshold => {
                let synonym_proposal = self.proposal_band.contains(&score).then(|| NewSynonym {
                    canonical_item_id: item.id.clone(),
                    synonym: normalized.clone(),
                    confidence: score,
                });
                MatchOutcome {
                    result: MatchResult::hit(item, score, MatchType::Fuzzy),
                    synonym_proposal,
                }
            }
            _ => MatchOutcome {
                result: MatchResult::none(),
                synonym_proposal: None,
            },
        }
    }

    /// Top `k` candidates for `query`, best score per item, ties by id.
    pub fn suggest(&self, catalog: &CatalogSnapshot, query: &str, k: usize) -> Vec<Suggestion> {
        let normalized = normalize(query);
        if normalized.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut best: BTreeMap<&str, (&CanonicalItem, f64)> = BTreeMap::new();
        for (item, score) in candidates(catalog, &normalized) {
            if score < SUGGEST_MIN_SCORE {
                continue;
            }
            let entry = best.entry(item.id.as_str()).or_insert((item, score));
            if score > entry.1 {
                entry.1 = score;
            }
        }

        let mut ranked: Vec<(&CanonicalItem, f64)> = best.into_values().collect();
        // Stable sort keeps ascending id order among equal scores.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(item, score)| Suggestion {
                canonical_item_id: item.id.clone(),
                display_name: item.name.clone(),
                score,
                sample_price_band: catalog.price_range(&item.id).map(|r| r.bounds()),
            })
            .collect()
    }
}

/// Fuzzy candidates in scan order: canonical names, then non-orphan synonyms.
fn candidates<'a>(
    catalog: &'a CatalogSnapshot,
    normalized: &'a str,
) -> impl Iterator<Item = (&'a CanonicalItem, f64)> + 'a {
    let names = catalog
        .canonical_items()
        .iter()
        .map(move |item| (item, token_set_ratio(normalized, &normalize(&item.name))));

    let synonyms = catalog.synonyms().iter().filter_map(move |synonym| {
        catalog
            .canonical_item(&synonym.canonical_item_id)
            .map(|item| (item, token_set_ratio(normalized, &normalize(&synonym.synonym))))
    });

    names.chain(synonyms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn catalog() -> CatalogSnapshot {
        let yaml = r#"
canonical_items:
  - id: "item-chair"
    name: "Office Chair Standard"
    category: "furniture"
  - id: "item-paper"
    name: "Printer Paper A4"
    category: "supplies"
synonyms:
  - id: "syn-1"
    canonical_item_id: "item-chair"
    synonym: "desk chair"
    confidence: 0.92
  - id: "syn-2"
    canonical_item_id: "item-gone"
    synonym: "mystery widget"
price_ranges:
  - canonical_item_id: "item-chair"
    min_price: 100.0
    max_price: 200.0
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let outcome = Matcher::new().match_description(&catalog(), "  OFFICE chair   standard ");
        assert_eq!(outcome.result.match_type, MatchType::Exact);
        assert_eq!(outcome.result.canonical_item_id.as_deref(), Some("item-chair"));
        assert_eq!(outcome.result.confidence, 1.0);
        assert!(outcome.synonym_proposal.is_none());
    }

    #[test]
    fn test_synonym_uses_stored_confidence() {
        let outcome = Matcher::new().match_description(&catalog(), "Desk Chair");
        assert_eq!(outcome.result.match_type, MatchType::Synonym);
        assert_eq!(outcome.result.canonical_name.as_deref(), Some("Office Chair Standard"));
        assert_eq!(outcome.result.confidence, 0.92);
    }

    #[test]
    fn test_orphan_synonym_ignored() {
        let outcome = Matcher::new().match_description(&catalog(), "mystery widget");
        assert_eq!(outcome.result.match_type, MatchType::NoMatch);
        assert_eq!(outcome.result.confidence, 0.0);
    }

    #[test]
    fn test_medium_fuzzy_raises_synonym_proposal() {
        let outcome = Matcher::new().match_description(&catalog(), "chair office black");
        assert_eq!(outcome.result.match_type, MatchType::Fuzzy);
        assert!((outcome.result.confidence - 0.8).abs() < 1e-9);

        let proposal = outcome.synonym_proposal.unwrap();
        assert_eq!(proposal.canonical_item_id, "item-chair");
        assert_eq!(proposal.synonym, "chair office black");
        assert!((proposal.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_high_fuzzy_no_proposal() {
        // Subset of the canonical name's tokens.
        let outcome = Matcher::new().match_description(&catalog(), "printer paper");
        assert_eq!(outcome.result.match_type, MatchType::Fuzzy);
        assert_eq!(outcome.result.confidence, 1.0);
        assert!(outcome.synonym_proposal.is_none());
    }

    #[test]
    fn test_empty_description_is_none() {
        let outcome = Matcher::new().match_description(&catalog(), "   ");
        assert_eq!(outcome.result, MatchResult::none());
    }

    #[test]
    fn test_tie_prefers_lower_id() {
        let yaml = r#"
canonical_items:
  - id: "b"
    name: "Blue Pen"
  - id: "a"
    name: "Blue Pen"
"#;
        let snapshot: CatalogSnapshot = serde_yaml::from_str(yaml).unwrap();
        let outcome = Matcher::new().match_description(&snapshot, "pen blue fine");
        assert_eq!(outcome.result.canonical_item_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_suggest_ranks_and_dedupes() {
        let suggestions = Matcher::new().suggest(&catalog(), "chair", 5);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].canonical_item_id, "item-chair");
        assert_eq!(suggestions[0].score, 1.0);
        assert_eq!(suggestions[0].sample_price_band, Some((100.0, 200.0)));

        assert!(Matcher::new().suggest(&catalog(), "chair", 0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_matching_is_idempotent(desc in "[a-zA-Z ]{0,30}") {
            let snapshot = catalog();
            let matcher = Matcher::new();
            let first = matcher.match_description(&snapshot, &desc);
            let second = matcher.match_description(&snapshot, &desc);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_confidence_in_bounds(desc in "[a-z ]{0,30}") {
            let outcome = Matcher::new().match_description(&catalog(), &desc);
            prop_assert!((0.0..=1.0).contains(&outcome.result.confidence));
            if outcome.result.match_type == MatchType::NoMatch {
                prop_assert!(outcome.result.canonical_item_id.is_none());
            }
        }
    }
}
