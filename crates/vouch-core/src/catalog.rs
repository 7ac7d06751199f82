//! Read-only view of the catalog used by one pipeline pass.
//!
//! A snapshot fixes iteration order (ascending `id`) for items, synonyms and
//! rules, so matching and rule selection are reproducible regardless of how
//! the backing store returns rows.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{BusinessRule, CanonicalItem, PriceRange, Synonym};

/// Immutable catalog state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "CatalogParts", into = "CatalogParts")]
pub struct CatalogSnapshot {
    items: Vec<CanonicalItem>,
    synonyms: Vec<Synonym>,
    ranges: BTreeMap<String, PriceRange>,
    rules: Vec<BusinessRule>,
    item_index: HashMap<String, usize>,
}

/// Serialized form of a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogParts {
    #[serde(default)]
    pub canonical_items: Vec<CanonicalItem>,
    #[serde(default)]
    pub synonyms: Vec<Synonym>,
    #[serde(default)]
    pub price_ranges: Vec<PriceRange>,
    #[serde(default)]
    pub business_rules: Vec<BusinessRule>,
}

impl From<CatalogParts> for CatalogSnapshot {
    fn from(parts: CatalogParts) -> Self {
        CatalogSnapshot::new(
            parts.canonical_items,
            parts.synonyms,
            parts.price_ranges,
            parts.business_rules,
        )
    }
}

impl From<CatalogSnapshot> for CatalogParts {
    fn from(snapshot: CatalogSnapshot) -> Self {
        CatalogParts {
            canonical_items: snapshot.items,
            synonyms: snapshot.synonyms,
            price_ranges: snapshot.ranges.into_values().collect(),
            business_rules: snapshot.rules,
        }
    }
}

/// One range per item: the row with the latest `updated_at`.
pub fn latest_ranges(ranges: impl IntoIterator<Item = PriceRange>) -> BTreeMap<String, PriceRange> {
    let mut latest: BTreeMap<String, PriceRange> = BTreeMap::new();
    for range in ranges {
        match latest.get(&range.canonical_item_id) {
            // Ties keep the later row.
            Some(existing) if existing.updated_at > range.updated_at => {}
            _ => {
                latest.insert(range.canonical_item_id.clone(), range);
            }
        }
    }
    latest
}

impl CatalogSnapshot {
    /// Parse a snapshot from catalog YAML (same layout as a store seed).
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Build a snapshot, sorting by id and keeping the latest range per item.
    pub fn new(
        mut items: Vec<CanonicalItem>,
        mut synonyms: Vec<Synonym>,
        ranges: Vec<PriceRange>,
        mut rules: Vec<BusinessRule>,
    ) -> Self {
        items.sort_by(|a, b| a.id.cmp(&b.id));
        synonyms.sort_by(|a, b| a.id.cmp(&b.id));
        rules.sort_by(|a, b| a.id.cmp(&b.id));

        let item_index = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.clone(), i))
            .collect();

        Self {
            items,
            synonyms,
            ranges: latest_ranges(ranges),
            rules,
            item_index,
        }
    }

    pub fn canonical_items(&self) -> &[CanonicalItem] {
        &self.items
    }

    pub fn synonyms(&self) -> &[Synonym] {
        &self.synonyms
    }

    pub fn rules(&self) -> &[BusinessRule] {
        &self.rules
    }

    pub fn price_ranges(&self) -> impl Iterator<Item = &PriceRange> {
        self.ranges.values()
    }

    pub fn canonical_item(&self, id: &str) -> Option<&CanonicalItem> {
        self.item_index.get(id).map(|&i| &self.items[i])
    }

    pub fn price_range(&self, canonical_item_id: &str) -> Option<&PriceRange> {
        self.ranges.get(canonical_item_id)
    }

    /// Synonyms whose canonical item no longer exists.
    pub fn orphan_synonyms(&self) -> impl Iterator<Item = &Synonym> {
        self.synonyms
            .iter()
            .filter(|s| !self.item_index.contains_key(&s.canonical_item_id))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn item(id: &str, name: &str) -> CanonicalItem {
        CanonicalItem {
            id: id.to_string(),
            name: name.to_string(),
            category: String::new(),
            description: None,
        }
    }

    #[test]
    fn test_items_sorted_by_id() {
        let snapshot = CatalogSnapshot::new(
            vec![item("b", "Beta"), item("a", "Alpha")],
            vec![],
            vec![],
            vec![],
        );
        let ids: Vec<&str> = snapshot.canonical_items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(snapshot.canonical_item("b").map(|i| i.name.as_str()), Some("Beta"));
    }

    #[test]
    fn test_latest_range_wins() {
        let mut old = PriceRange::new("a", 1.0, 2.0);
        old.updated_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut new = PriceRange::new("a", 5.0, 6.0);
        new.updated_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());

        let snapshot = CatalogSnapshot::new(vec![item("a", "A")], vec![], vec![new, old], vec![]);
        assert_eq!(snapshot.price_range("a").map(|r| r.min_price), Some(5.0));
    }

    #[test]
    fn test_orphan_synonyms() {
        let yaml = r#"
canonical_items:
  - id: "chair"
    name: "Office Chair"
synonyms:
  - id: "s1"
    canonical_item_id: "chair"
    synonym: "desk chair"
  - id: "s2"
    canonical_item_id: "deleted"
    synonym: "old thing"
    confidence: 0.9
"#;
        let snapshot = CatalogSnapshot::from_yaml(yaml).unwrap();
        let orphans: Vec<&str> = snapshot.orphan_synonyms().map(|s| s.id.as_str()).collect();
        assert_eq!(orphans, vec!["s2"]);
        assert_eq!(snapshot.synonyms()[0].confidence, 1.0);
    }
}
