//! Core data types shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::judge::JudgementSummary;

/// Final outcome for a line item.
///
/// Variants are declared in ascending severity so `Ord` resolves the most
/// severe outcome: `Deny > NeedsMoreInfo > Allow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    NeedsMoreInfo,
    Deny,
}

impl Decision {
    /// All decisions in severity order.
    pub const ALL: [Decision; 3] = [Decision::Allow, Decision::NeedsMoreInfo, Decision::Deny];

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::NeedsMoreInfo => "NEEDS_MORE_INFO",
            Decision::Deny => "DENY",
        }
    }

    /// Parse the wire form (`ALLOW`, `DENY`, `NEEDS_MORE_INFO`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ALLOW" => Some(Decision::Allow),
            "DENY" => Some(Decision::Deny),
            "NEEDS_MORE_INFO" => Some(Decision::NeedsMoreInfo),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a description was resolved to a canonical item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Synonym,
    Fuzzy,
    #[serde(rename = "none")]
    NoMatch,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchType::Exact => "exact",
            MatchType::Synonym => "synonym",
            MatchType::Fuzzy => "fuzzy",
            MatchType::NoMatch => "none",
        };
        f.write_str(s)
    }
}

/// Reference catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Alternate spelling that resolves to a canonical item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Synonym {
    pub id: String,
    pub canonical_item_id: String,
    pub synonym: String,
    /// Trust in this mapping, in [0, 1]. Reported as the match confidence.
    #[serde(default = "default_synonym_confidence")]
    pub confidence: f64,
}

fn default_synonym_confidence() -> f64 {
    1.0
}

/// Historical price band for a canonical item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRange {
    pub canonical_item_id: String,
    pub min_price: f64,
    pub max_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p50: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u32>,
    /// Latest update wins when several ranges exist for one item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PriceRange {
    pub fn new(canonical_item_id: impl Into<String>, min_price: f64, max_price: f64) -> Self {
        Self {
            canonical_item_id: canonical_item_id.into(),
            min_price,
            max_price,
            p50: None,
            sample_size: None,
            updated_at: None,
        }
    }

    /// Band as `(min, max)`.
    pub fn bounds(&self) -> (f64, f64) {
        (self.min_price, self.max_price)
    }

    pub fn contains(&self, price: f64) -> bool {
        self.min_price <= price && price <= self.max_price
    }
}

/// What a business rule is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeType {
    Vendor,
    Item,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeType::Vendor => f.write_str("VENDOR"),
            ScopeType::Item => f.write_str("ITEM"),
        }
    }
}

/// Outcome a business rule asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleDecision {
    Allow,
    Deny,
}

/// Operator-maintained rule scoped to a vendor or a canonical item.
///
/// - `DENY` on a vendor scope excludes the vendor.
/// - `DENY` on an item scope without `max_quantity` blacklists the item.
/// - An item scope with `max_quantity` caps the quantity per line.
/// - `ALLOW` never changes a decision; it only matters for conflict scans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessRule {
    pub id: String,
    pub scope_type: ScopeType,
    pub scope_value: String,
    pub decision: RuleDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BusinessRule {
    /// Grouping key used to detect contradictory rules.
    pub fn scope_key(&self) -> String {
        format!("{}:{}", self.scope_type, self.scope_value)
    }

    pub fn excludes_vendor(&self, vendor_id: &str) -> bool {
        self.scope_type == ScopeType::Vendor
            && self.decision == RuleDecision::Deny
            && self.max_quantity.is_none()
            && self.scope_value == vendor_id
    }

    pub fn blacklists_item(&self, canonical_item_id: &str) -> bool {
        self.scope_type == ScopeType::Item
            && self.decision == RuleDecision::Deny
            && self.max_quantity.is_none()
            && self.scope_value == canonical_item_id
    }

    /// Quantity cap for this item, if the rule is a limit on it.
    pub fn quantity_limit_for(&self, canonical_item_id: &str) -> Option<f64> {
        if self.scope_type == ScopeType::Item && self.scope_value == canonical_item_id {
            self.max_quantity
        } else {
            None
        }
    }
}

/// Invoice line item as submitted. Never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub id: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
}

impl LineItem {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        quantity: f64,
        unit_price: f64,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            quantity,
            unit_price,
        }
    }

    /// Same constraints as `schema/line_item.schema.json`, for items built
    /// in code rather than parsed from a request.
    pub fn check(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("id must not be empty".to_string());
        }
        if self.description.trim().is_empty() {
            return Err("description must not be blank".to_string());
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(format!("quantity must be a positive number, got {}", self.quantity));
        }
        if !self.unit_price.is_finite() || self.unit_price < 0.0 {
            return Err(format!(
                "unit_price must be a non-negative number, got {}",
                self.unit_price
            ));
        }
        Ok(())
    }
}

/// Decision record for one line item.
///
/// `policy_codes` is empty exactly when `decision` is `ALLOW`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItemDecision {
    pub canonical_item_id: Option<String>,
    pub canonical_name: Option<String>,
    pub match_confidence: f64,
    pub match_type: MatchType,
    pub decision: Decision,
    pub reasons: Vec<String>,
    pub policy_codes: Vec<String>,
    /// Ids of proposals raised while deciding this item.
    pub proposals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgement: Option<JudgementSummary>,
}

/// Ground truth for one line item, keyed by its stable fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoldLabel {
    pub line_item_fingerprint: String,
    pub expected_decision: Decision,
    #[serde(default)]
    pub expected_canonical_id: Option<String>,
    #[serde(default)]
    pub expected_policy_codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One priced purchase of a canonical item, the input to band statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceObservation {
    pub canonical_item_id: String,
    pub unit_price: f64,
    pub observed_at: DateTime<Utc>,
}
