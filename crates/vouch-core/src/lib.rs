//! # vouch-core
//!
//! Deterministic invoice line-item verification.
//!
//! This crate answers, for every line item on a vendor invoice:
//! - Which catalog item is this?
//! - Is the price inside the item's historical band?
//! - Should it be allowed, denied, or sent back for more information?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same catalog and input always produce the same decision
//! 2. **No I/O**: Stages are pure functions over a [`CatalogSnapshot`]
//! 3. **Traceable**: Every non-ALLOW decision carries stable policy codes and reasons
//! 4. **Proposal-only**: Stages suggest catalog changes, they never apply them
//!
//! ## Example
//!
//! ```rust,ignore
//! use vouch_core::{evaluate_item, CatalogSnapshot, LineItem};
//!
//! let catalog = CatalogSnapshot::from_yaml(&std::fs::read_to_string("catalog.yaml")?)?;
//! let item = LineItem::new("li-1", "Office Chair Standard", 2.0, 150.0);
//! let evaluation = evaluate_item(&catalog, "acme", &item);
//!
//! match evaluation.rules.decision {
//!     Decision::Allow => println!("OK"),
//!     Decision::Deny => println!("DENY: {:?}", evaluation.rules.policy_codes),
//!     Decision::NeedsMoreInfo => println!("REVIEW: {}", evaluation.rules.reasons.join(" ")),
//! }
//! ```

pub mod catalog;
pub mod eval;
pub mod judge;
pub mod matching;
pub mod normalize;
pub mod pricing;
pub mod proposals;
pub mod request;
pub mod rules;
pub mod similarity;
pub mod stats;
pub mod types;

// Re-export main types at crate root
pub use catalog::{CatalogParts, CatalogSnapshot};
pub use judge::{DeterministicJudge, Judgement, JudgementScores, JudgementSummary, Verdict};
pub use matching::{MatchOutcome, MatchResult, Matcher, Suggestion};
pub use normalize::{fingerprint, normalize};
pub use pricing::{PriceOutcome, PriceValidationResult, PriceValidator};
pub use proposals::{Proposal, ProposalPayload, ProposalStatus, ProposalType};
pub use request::{dedupe_ids, InvoiceRequest, ItemInput, RequestError};
pub use rules::{PolicyCode, RuleEngine, RuleInput, RuleResult};
pub use stats::{PipelineStats, RobustStats};
pub use types::{
    BusinessRule, CanonicalItem, Decision, GoldLabel, LineItem, LineItemDecision, MatchType,
    PriceObservation, PriceRange, RuleDecision, ScopeType, Synonym,
};

/// Stage outputs for one line item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemEvaluation {
    pub matched: MatchOutcome,
    pub price: PriceOutcome,
    pub rules: RuleResult,
}

impl ItemEvaluation {
    /// Proposals the stages asked for, in stage order.
    pub fn proposals(&self) -> Vec<ProposalPayload> {
        let mut out = Vec::new();
        if let Some(synonym) = &self.matched.synonym_proposal {
            out.push(ProposalPayload::NewSynonym(synonym.clone()));
        }
        if let Some(adjust) = &self.price.adjust_proposal {
            out.push(ProposalPayload::PriceRangeAdjust(adjust.clone()));
        }
        out
    }

    /// Final decision record, given the ids under which proposals were filed.
    pub fn to_decision(&self, proposal_ids: Vec<String>) -> LineItemDecision {
        let result = &self.matched.result;
        LineItemDecision {
            canonical_item_id: result.canonical_item_id.clone(),
            canonical_name: result.canonical_name.clone(),
            match_confidence: result.confidence,
            match_type: result.match_type,
            decision: self.rules.decision,
            reasons: self.rules.reasons.clone(),
            policy_codes: self.rules.code_strings(),
            proposals: proposal_ids,
            judgement: None,
        }
    }
}

/// Run matching, price validation and rules for one line item.
///
/// This is the pure core of the pipeline; the runtime wraps it with
/// proposal filing, event logging and judging.
pub fn evaluate_item(catalog: &CatalogSnapshot, vendor_id: &str, item: &LineItem) -> ItemEvaluation {
    let matched = Matcher::new().match_description(catalog, &item.description);
    let canonical_item_id = matched.result.canonical_item_id.as_deref();

    let price = PriceValidator::new().validate(catalog, canonical_item_id, item.unit_price);

    let rules = RuleEngine::new().apply(
        catalog,
        &RuleInput {
            canonical_item_id,
            unit_price: item.unit_price,
            quantity: item.quantity,
            match_confidence: matched.result.confidence,
            vendor_id,
        },
    );

    ItemEvaluation {
        matched,
        price,
        rules,
    }
}

/// Decision for an item the pipeline could not evaluate.
pub fn fallback_decision(code: PolicyCode, detail: Option<String>) -> LineItemDecision {
    let rules = RuleResult::pipeline(code, detail);
    LineItemDecision {
        canonical_item_id: None,
        canonical_name: None,
        match_confidence: 0.0,
        match_type: MatchType::NoMatch,
        decision: rules.decision,
        reasons: rules.reasons.clone(),
        policy_codes: rules.code_strings(),
        proposals: Vec::new(),
        judgement: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> CatalogSnapshot {
        let yaml = r#"
canonical_items:
  - id: "item-chair"
    name: "Office Chair Standard"
    category: "furniture"
  - id: "item-stapler"
    name: "Heavy Duty Stapler"
    category: "supplies"
price_ranges:
  - canonical_item_id: "item-chair"
    min_price: 100.0
    max_price: 200.0
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_exact_match_allowed() {
        let item = LineItem::new("li-1", "Office Chair Standard", 2.0, 150.0);
        let evaluation = evaluate_item(&catalog(), "acme", &item);
        let decision = evaluation.to_decision(vec![]);

        assert_eq!(decision.decision, Decision::Allow);
        assert_eq!(decision.match_type, MatchType::Exact);
        assert!(decision.policy_codes.is_empty());
        assert!(evaluation.proposals().is_empty());
    }

    #[test]
    fn test_price_exceeds_max_denied() {
        let item = LineItem::new("li-1", "office chair standard", 1.0, 450.0);
        let evaluation = evaluate_item(&catalog(), "acme", &item);

        assert_eq!(evaluation.rules.decision, Decision::Deny);
        assert_eq!(
            evaluation.to_decision(vec![]).policy_codes,
            vec!["PRICE_EXCEEDS_MAX_150".to_string()]
        );
        assert!(!evaluation.price.result.is_valid);

        let proposals = evaluation.proposals();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].proposal_type(), ProposalType::PriceRangeAdjust);
    }

    #[test]
    fn test_no_band_needs_review() {
        let item = LineItem::new("li-1", "Heavy Duty Stapler", 1.0, 25.0);
        let decision = evaluate_item(&catalog(), "acme", &item).to_decision(vec![]);
        assert_eq!(decision.decision, Decision::NeedsMoreInfo);
        assert_eq!(decision.policy_codes, vec!["NO_PRICE_BAND".to_string()]);
    }

    #[test]
    fn test_medium_fuzzy_proposes_synonym() {
        let item = LineItem::new("li-1", "chair office black", 1.0, 150.0);
        let evaluation = evaluate_item(&catalog(), "acme", &item);

        assert_eq!(evaluation.matched.result.match_type, MatchType::Fuzzy);
        assert!((evaluation.matched.result.confidence - 0.80).abs() < 1e-9);
        match evaluation.proposals().first() {
            Some(ProposalPayload::NewSynonym(s)) => {
                assert_eq!(s.canonical_item_id, "item-chair");
                assert_eq!(s.synonym, "chair office black");
            }
            other => panic!("expected synonym proposal, got {:?}", other),
        }

        let decision = evaluation.to_decision(vec!["p-1".to_string()]);
        assert_eq!(decision.proposals, vec!["p-1".to_string()]);
        assert_eq!(decision.decision, Decision::Allow);
    }

    #[test]
    fn test_fallback_decision() {
        let decision = fallback_decision(PolicyCode::AgentDisabled, None);
        assert_eq!(decision.decision, Decision::NeedsMoreInfo);
        assert_eq!(decision.reasons, vec!["Agent pipeline disabled".to_string()]);
        assert_eq!(decision.policy_codes, vec!["AGENT_DISABLED".to_string()]);
    }
}
