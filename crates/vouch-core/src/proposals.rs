//! Human-reviewable change proposals.
//!
//! Stages and jobs never mutate the catalog directly. They produce a typed
//! [`ProposalPayload`]; the runtime stores it as JSON next to its
//! [`ProposalType`] and only applies it after approval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{RuleDecision, ScopeType};

/// Kind of catalog change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalType {
    NewSynonym,
    PriceRangeAdjust,
    NewRule,
    NewCanonical,
}

impl fmt::Display for ProposalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalType::NewSynonym => "NEW_SYNONYM",
            ProposalType::PriceRangeAdjust => "PRICE_RANGE_ADJUST",
            ProposalType::NewRule => "NEW_RULE",
            ProposalType::NewCanonical => "NEW_CANONICAL",
        };
        f.write_str(s)
    }
}

/// Review state. Moves from `PENDING` to `APPROVED` at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Pending,
    Approved,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStatus::Pending => f.write_str("PENDING"),
            ProposalStatus::Approved => f.write_str("APPROVED"),
        }
    }
}

/// Persisted proposal row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: String,
    pub proposal_type: ProposalType,
    pub payload: serde_json::Value,
    pub status: ProposalStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Decode the stored payload for its declared type.
    pub fn decode(&self) -> Result<ProposalPayload, serde_json::Error> {
        ProposalPayload::decode(self.proposal_type, &self.payload)
    }
}

/// Suggest a new synonym for an existing canonical item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSynonym {
    pub canonical_item_id: String,
    /// Normalized description that should resolve to the item.
    pub synonym: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

/// Relative drift of a recomputed band from the current one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BandComparison {
    pub current_min: f64,
    pub current_max: f64,
    pub min_delta_pct: f64,
    pub max_delta_pct: f64,
}

/// Replace (or create) the price band of an item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRangeAdjust {
    pub canonical_item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_range: Option<(f64, f64)>,
    pub new_range: (f64, f64),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p50: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u32>,
    pub reason: String,
    /// Fractional distance of the triggering price outside the band.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggering_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<BandComparison>,
    #[serde(default)]
    pub auto_generated: bool,
}

/// Where a proposed rule applies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConditions {
    pub scope_type: ScopeType,
    pub scope_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_quantity: Option<f64>,
}

/// What a proposed rule does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleActions {
    pub decision: RuleDecision,
}

/// Add a business rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRule {
    pub rule_type: String,
    pub conditions: RuleConditions,
    pub actions: RuleActions,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub proposed_by: String,
    /// Existing rules this one is meant to supersede.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<String>,
}

/// Add a canonical item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewCanonical {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphan_synonym_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub auto_generated: bool,
}

/// Typed proposal body.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalPayload {
    NewSynonym(NewSynonym),
    PriceRangeAdjust(PriceRangeAdjust),
    NewRule(NewRule),
    NewCanonical(NewCanonical),
}

impl ProposalPayload {
    pub fn proposal_type(&self) -> ProposalType {
        match self {
            ProposalPayload::NewSynonym(_) => ProposalType::NewSynonym,
            ProposalPayload::PriceRangeAdjust(_) => ProposalType::PriceRangeAdjust,
            ProposalPayload::NewRule(_) => ProposalType::NewRule,
            ProposalPayload::NewCanonical(_) => ProposalType::NewCanonical,
        }
    }

    /// Encode to the stored `(type, json)` pair.
    pub fn encode(&self) -> Result<(ProposalType, serde_json::Value), serde_json::Error> {
        let value = match self {
            ProposalPayload::NewSynonym(p) => serde_json::to_value(p)?,
            ProposalPayload::PriceRangeAdjust(p) => serde_json::to_value(p)?,
            ProposalPayload::NewRule(p) => serde_json::to_value(p)?,
            ProposalPayload::NewCanonical(p) => serde_json::to_value(p)?,
        };
        Ok((self.proposal_type(), value))
    }

    /// Decode a stored payload. Missing required fields are an error.
    pub fn decode(
        proposal_type: ProposalType,
        value: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        let payload = match proposal_type {
            ProposalType::NewSynonym => {
                ProposalPayload::NewSynonym(serde_json::from_value(value.clone())?)
            }
            ProposalType::PriceRangeAdjust => {
                ProposalPayload::PriceRangeAdjust(serde_json::from_value(value.clone())?)
            }
            ProposalType::NewRule => ProposalPayload::NewRule(serde_json::from_value(value.clone())?),
            ProposalType::NewCanonical => {
                ProposalPayload::NewCanonical(serde_json::from_value(value.clone())?)
            }
        };
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_range_adjust_wire_shape() {
        let payload = ProposalPayload::PriceRangeAdjust(PriceRangeAdjust {
            canonical_item_id: "chair".to_string(),
            old_range: Some((100.0, 200.0)),
            new_range: (100.0, 472.5),
            p50: None,
            sample_size: None,
            reason: "Price 450 above current max 200".to_string(),
            variance_percent: Some(1.25),
            triggering_price: Some(450.0),
            comparison: None,
            auto_generated: false,
        });

        let (kind, value) = payload.encode().unwrap();
        assert_eq!(kind, ProposalType::PriceRangeAdjust);
        assert_eq!(value["new_range"], serde_json::json!([100.0, 472.5]));
        assert_eq!(value["old_range"], serde_json::json!([100.0, 200.0]));
        assert!(value.get("p50").is_none());

        let decoded = ProposalPayload::decode(kind, &value).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_new_rule_requires_fields() {
        let missing_actions = serde_json::json!({
            "rule_type": "ITEM_BLACKLIST",
            "conditions": { "scope_type": "ITEM", "scope_value": "chair" }
        });
        let err = ProposalPayload::decode(ProposalType::NewRule, &missing_actions).unwrap_err();
        assert!(err.to_string().contains("actions"));
    }

    #[test]
    fn test_new_synonym_defaults_confidence() {
        let value = serde_json::json!({ "canonical_item_id": "chair", "synonym": "seat" });
        match ProposalPayload::decode(ProposalType::NewSynonym, &value).unwrap() {
            ProposalPayload::NewSynonym(s) => assert_eq!(s.confidence, 1.0),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_proposal_type_display() {
        assert_eq!(ProposalType::NewCanonical.to_string(), "NEW_CANONICAL");
        assert_eq!(
            serde_json::to_string(&ProposalStatus::Approved).unwrap(),
            "\"APPROVED\""
        );
    }
}
