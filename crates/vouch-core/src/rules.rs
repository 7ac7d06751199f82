//! Deterministic rule engine.
//!
//! ## Checks
//!
//! All checks run in a fixed order and accumulate codes; the decision is the
//! most severe outcome among them (`DENY > NEEDS_MORE_INFO > ALLOW`).
//!
//! | Code | Fires when | Severity |
//! |------|------------|----------|
//! | `NO_CANONICAL_MATCH` | no canonical item | NEEDS_MORE_INFO |
//! | `NO_PRICE_BAND` | item has no band | NEEDS_MORE_INFO |
//! | `PRICE_EXCEEDS_MAX_150` | price > max × 1.5 | DENY |
//! | `PRICE_BELOW_MIN_50` | min > 0 and price < min × 0.5 | DENY |
//! | `VENDOR_EXCLUDED_BY_RULE:<id>` | vendor exclusion rule | DENY |
//! | `QUANTITY_OVER_LIMIT:<id>` | quantity above an item limit | DENY |
//! | `BLACKLISTED_ITEM:<id>` | item blacklist rule | DENY |
//!
//! The two price checks are exclusive: a price over the cap is never also
//! reported as below the floor. Each rule-backed check reports at most one
//! code, from the first matching rule in ascending id order.
//!
//! No codes ⇔ `ALLOW`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogSnapshot;
use crate::proposals::{NewRule, RuleActions, RuleConditions};
use crate::types::{Decision, RuleDecision, ScopeType};

/// Multiplier over the band max above which a price is denied.
pub const PRICE_CAP_FACTOR: f64 = 1.5;

/// Multiplier under the band min below which a price is denied.
pub const PRICE_FLOOR_FACTOR: f64 = 0.5;

/// Stable policy code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PolicyCode {
    NoCanonicalMatch,
    NoPriceBand,
    PriceExceedsMax150,
    PriceBelowMin50,
    VendorExcluded(String),
    QuantityOverLimit(String),
    BlacklistedItem(String),
    /// The pipeline is switched off.
    AgentDisabled,
    /// The line item failed request validation.
    InvalidLineItem,
    /// A collaborator failed while deciding the item.
    InternalError,
}

#[derive(Debug, Error)]
#[error("unknown policy code: {0}")]
pub struct UnknownPolicyCode(pub String);

impl PolicyCode {
    pub fn severity(&self) -> Decision {
        match self {
            PolicyCode::PriceExceedsMax150
            | PolicyCode::PriceBelowMin50
            | PolicyCode::VendorExcluded(_)
            | PolicyCode::QuantityOverLimit(_)
            | PolicyCode::BlacklistedItem(_) => Decision::Deny,
            PolicyCode::NoCanonicalMatch
            | PolicyCode::NoPriceBand
            | PolicyCode::AgentDisabled
            | PolicyCode::InvalidLineItem
            | PolicyCode::InternalError => Decision::NeedsMoreInfo,
        }
    }

    /// Confidence the code carries when it decides the outcome.
    pub fn confidence(&self) -> f64 {
        match self {
            PolicyCode::NoCanonicalMatch => 0.9,
            PolicyCode::NoPriceBand => 0.8,
            PolicyCode::PriceExceedsMax150 | PolicyCode::PriceBelowMin50 => 0.95,
            _ => 1.0,
        }
    }

    pub fn is_price_code(&self) -> bool {
        matches!(self, PolicyCode::PriceExceedsMax150 | PolicyCode::PriceBelowMin50)
    }

    pub fn parse(value: &str) -> Result<Self, UnknownPolicyCode> {
        let code = match value {
            "NO_CANONICAL_MATCH" => PolicyCode::NoCanonicalMatch,
            "NO_PRICE_BAND" => PolicyCode::NoPriceBand,
            "PRICE_EXCEEDS_MAX_150" => PolicyCode::PriceExceedsMax150,
            "PRICE_BELOW_MIN_50" => PolicyCode::PriceBelowMin50,
            "AGENT_DISABLED" => PolicyCode::AgentDisabled,
            "INVALID_LINE_ITEM" => PolicyCode::InvalidLineItem,
            "INTERNAL_ERROR" => PolicyCode::InternalError,
            other => match other.split_once(':') {
                Some(("VENDOR_EXCLUDED_BY_RULE", id)) if !id.is_empty() => {
                    PolicyCode::VendorExcluded(id.to_string())
                }
                Some(("QUANTITY_OVER_LIMIT", id)) if !id.is_empty() => {
                    PolicyCode::QuantityOverLimit(id.to_string())
                }
                Some(("BLACKLISTED_ITEM", id)) if !id.is_empty() => {
                    PolicyCode::BlacklistedItem(id.to_string())
                }
                _ => return Err(UnknownPolicyCode(other.to_string())),
            },
        };
        Ok(code)
    }
}

impl fmt::Display for PolicyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyCode::NoCanonicalMatch => f.write_str("NO_CANONICAL_MATCH"),
            PolicyCode::NoPriceBand => f.write_str("NO_PRICE_BAND"),
            PolicyCode::PriceExceedsMax150 => f.write_str("PRICE_EXCEEDS_MAX_150"),
            PolicyCode::PriceBelowMin50 => f.write_str("PRICE_BELOW_MIN_50"),
            PolicyCode::VendorExcluded(id) => write!(f, "VENDOR_EXCLUDED_BY_RULE:{}", id),
            PolicyCode::QuantityOverLimit(id) => write!(f, "QUANTITY_OVER_LIMIT:{}", id),
            PolicyCode::BlacklistedItem(id) => write!(f, "BLACKLISTED_ITEM:{}", id),
            PolicyCode::AgentDisabled => f.write_str("AGENT_DISABLED"),
            PolicyCode::InvalidLineItem => f.write_str("INVALID_LINE_ITEM"),
            PolicyCode::InternalError => f.write_str("INTERNAL_ERROR"),
        }
    }
}

impl From<PolicyCode> for String {
    fn from(code: PolicyCode) -> Self {
        code.to_string()
    }
}

impl TryFrom<String> for PolicyCode {
    type Error = UnknownPolicyCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PolicyCode::parse(&value)
    }
}

/// Values captured while checking, the only input to reason rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleFacts {
    pub unit_price: f64,
    pub quantity: f64,
    pub match_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_band_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_band_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allowed_150: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_allowed_50: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RuleFacts {
    /// Names of the populated facts, for the audit log.
    pub fn keys(&self) -> Vec<String> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

/// Inputs for one line item.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub canonical_item_id: Option<&'a str>,
    pub unit_price: f64,
    pub quantity: f64,
    pub match_confidence: f64,
    pub vendor_id: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleResult {
    pub decision: Decision,
    pub reasons: Vec<String>,
    pub policy_codes: Vec<PolicyCode>,
    pub facts: RuleFacts,
    pub confidence: f64,
}

impl RuleResult {
    /// Build a result from accumulated codes.
    pub fn from_codes(policy_codes: Vec<PolicyCode>, facts: RuleFacts) -> Self {
        let decision = policy_codes
            .iter()
            .map(PolicyCode::severity)
            .max()
            .unwrap_or(Decision::Allow);

        let confidence = if policy_codes.is_empty() {
            1.0
        } else {
            policy_codes
                .iter()
                .filter(|code| code.severity() == decision)
                .map(PolicyCode::confidence)
                .fold(0.0, f64::max)
        };

        let reasons = policy_codes.iter().map(|code| explain(code, &facts)).collect();

        Self {
            decision,
            reasons,
            policy_codes,
            facts,
            confidence,
        }
    }

    /// `NEEDS_MORE_INFO` result for a pipeline-level condition.
    pub fn pipeline(code: PolicyCode, detail: Option<String>) -> Self {
        let facts = RuleFacts {
            detail,
            ..RuleFacts::default()
        };
        Self::from_codes(vec![code], facts)
    }

    pub fn code_strings(&self) -> Vec<String> {
        self.policy_codes.iter().map(ToString::to_string).collect()
    }
}

/// Render one reason sentence. Total over all codes and pure.
pub fn explain(code: &PolicyCode, facts: &RuleFacts) -> String {
    let amount = |value: Option<f64>| value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v));

    match code {
        PolicyCode::NoCanonicalMatch => {
            format!("{}: no matching catalog item found for this description.", code)
        }
        PolicyCode::NoPriceBand => format!(
            "{}: no price range data available for item {}.",
            code,
            facts.canonical_item_id.as_deref().unwrap_or("unknown")
        ),
        PolicyCode::PriceExceedsMax150 => format!(
            "{}: price {:.2} exceeds 1.5x band max (cap {}, band max {}).",
            code,
            facts.unit_price,
            amount(facts.max_allowed_150),
            amount(facts.price_band_max)
        ),
        PolicyCode::PriceBelowMin50 => format!(
            "{}: price {:.2} is below 0.5x band min (floor {}, band min {}).",
            code,
            facts.unit_price,
            amount(facts.min_allowed_50),
            amount(facts.price_band_min)
        ),
        PolicyCode::VendorExcluded(rule_id) => {
            format!("{}: vendor excluded by business rule {}.", code, rule_id)
        }
        PolicyCode::QuantityOverLimit(rule_id) => format!(
            "{}: quantity {} exceeds limit {} defined in rule {}.",
            code,
            facts.quantity,
            facts
                .quantity_limit
                .map_or_else(|| "n/a".to_string(), |limit| limit.to_string()),
            rule_id
        ),
        PolicyCode::BlacklistedItem(rule_id) => {
            format!("{}: item blacklisted by rule {}.", code, rule_id)
        }
        PolicyCode::AgentDisabled => "Agent pipeline disabled".to_string(),
        PolicyCode::InvalidLineItem => format!(
            "{}: {}.",
            code,
            facts.detail.as_deref().unwrap_or("line item failed validation")
        ),
        PolicyCode::InternalError => format!(
            "{}: {}.",
            code,
            facts
                .detail
                .as_deref()
                .unwrap_or("processing failed, manual review required")
        ),
    }
}

/// Multi-line rendering of a result for operators.
pub fn explain_decision(result: &RuleResult) -> String {
    let label = result
        .decision
        .as_str()
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_string() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    let mut lines = vec![format!(
        "Decision: {} (Confidence: {:.1}%)",
        label,
        result.confidence * 100.0
    )];

    if !result.reasons.is_empty() {
        lines.push("Reasons:".to_string());
        for (i, reason) in result.reasons.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, reason));
        }
    }

    if !result.policy_codes.is_empty() {
        lines.push(format!("Policy Codes: {}", result.code_strings().join(", ")));
    }

    lines.join("\n")
}

/// `NEW_RULE` payload proposed by the engine itself.
pub fn rule_proposal(
    rule_type: impl Into<String>,
    conditions: RuleConditions,
    decision: RuleDecision,
    description: impl Into<String>,
) -> NewRule {
    NewRule {
        rule_type: rule_type.into(),
        conditions,
        actions: RuleActions { decision },
        description: description.into(),
        proposed_by: "rules_engine".to_string(),
        supersedes: Vec::new(),
    }
}

/// Evaluates the fixed check list against a catalog snapshot.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&self, catalog: &CatalogSnapshot, input: &RuleInput<'_>) -> RuleResult {
        let mut codes = Vec::new();
        let mut facts = RuleFacts {
            unit_price: input.unit_price,
            quantity: input.quantity,
            match_confidence: input.match_confidence,
            ..RuleFacts::default()
        };

        match input.canonical_item_id {
            None => codes.push(PolicyCode::NoCanonicalMatch),
            Some(item_id) => {
                facts.canonical_item_id = Some(item_id.to_string());
                match catalog.price_range(item_id) {
                    None => codes.push(PolicyCode::NoPriceBand),
                    Some(band) => {
                        facts.price_band_min = Some(band.min_price);
                        facts.price_band_max = Some(band.max_price);

                        let cap = band.max_price * PRICE_CAP_FACTOR;
                        let floor = band.min_price * PRICE_FLOOR_FACTOR;
                        if input.unit_price > cap {
                            facts.max_allowed_150 = Some(cap);
                            codes.push(PolicyCode::PriceExceedsMax150);
                        } else if band.min_price > 0.0 && input.unit_price < floor {
                            facts.min_allowed_50 = Some(floor);
                            codes.push(PolicyCode::PriceBelowMin50);
                        }
                    }
                }
            }
        }

        let rules = catalog.rules();

        if let Some(rule) = rules.iter().find(|r| r.excludes_vendor(input.vendor_id)) {
            codes.push(PolicyCode::VendorExcluded(rule.id.clone()));
        }

        if let Some(item_id) = input.canonical_item_id {
            let over_limit = rules.iter().find_map(|r| {
                r.quantity_limit_for(item_id)
                    .filter(|limit| input.quantity > *limit)
                    .map(|limit| (r, limit))
            });
            if let Some((rule, limit)) = over_limit {
                facts.quantity_limit = Some(limit);
                codes.push(PolicyCode::QuantityOverLimit(rule.id.clone()));
            }

            if let Some(rule) = rules.iter().find(|r| r.blacklists_item(item_id)) {
                codes.push(PolicyCode::BlacklistedItem(rule.id.clone()));
            }
        }

        RuleResult::from_codes(codes, facts)
    }
}

/// Conditions for a rule that scopes a single item.
pub fn item_conditions(canonical_item_id: &str, max_quantity: Option<f64>) -> RuleConditions {
    RuleConditions {
        scope_type: ScopeType::Item,
        scope_value: canonical_item_id.to_string(),
        max_quantity,
    }
}
