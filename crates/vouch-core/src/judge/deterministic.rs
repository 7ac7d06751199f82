//! Gold-label and consistency scoring.

use std::collections::HashSet;

use crate::rules::{PRICE_CAP_FACTOR, PRICE_FLOOR_FACTOR};
use crate::types::{Decision, GoldLabel, PriceRange};

use super::JudgementScores;

const PRICE_EXCEEDS: &str = "PRICE_EXCEEDS_MAX_150";
const PRICE_BELOW: &str = "PRICE_BELOW_MIN_50";

/// The decision under review, as the pipeline produced it.
#[derive(Debug, Clone, Copy)]
pub struct DecisionView<'a> {
    pub decision: Decision,
    pub canonical_item_id: Option<&'a str>,
    pub policy_codes: &'a [String],
    pub unit_price: f64,
}

/// Scores a decision against an optional gold label and its price band.
#[derive(Debug, Clone, Default)]
pub struct DeterministicJudge;

impl DeterministicJudge {
    pub fn new() -> Self {
        Self
    }

    /// All deterministic scores. `reason_quality` is left unset.
    pub fn score(
        &self,
        view: &DecisionView<'_>,
        gold: Option<&GoldLabel>,
        band: Option<&PriceRange>,
    ) -> JudgementScores {
        JudgementScores {
            decision_correct: gold.map(|g| score_decision(view.decision, g)),
            policy_justified: gold.map(|g| score_policy(view.policy_codes, g)),
            match_correct: gold.map(|g| score_match(view.canonical_item_id, g)),
            price_check_correct: band
                .map(|b| score_price_check(view.unit_price, b, view.decision, view.policy_codes)),
            reason_quality: None,
        }
    }
}

pub fn score_decision(actual: Decision, gold: &GoldLabel) -> f64 {
    if actual == gold.expected_decision {
        1.0
    } else {
        0.0
    }
}

/// Jaccard similarity of code sets; two empty sets agree.
pub fn score_policy(actual: &[String], gold: &GoldLabel) -> f64 {
    let actual: HashSet<&str> = actual.iter().map(String::as_str).collect();
    let expected: HashSet<&str> = gold.expected_policy_codes.iter().map(String::as_str).collect();

    let union = actual.union(&expected).count();
    if union == 0 {
        return 1.0;
    }
    actual.intersection(&expected).count() as f64 / union as f64
}

/// Exact equality, including both absent.
pub fn score_match(actual: Option<&str>, gold: &GoldLabel) -> f64 {
    if actual == gold.expected_canonical_id.as_deref() {
        1.0
    } else {
        0.0
    }
}

/// Re-derive the price checks and compare with what the engine reported.
pub fn score_price_check(
    unit_price: f64,
    band: &PriceRange,
    decision: Decision,
    policy_codes: &[String],
) -> f64 {
    let expected: Option<&str> = if unit_price > band.max_price * PRICE_CAP_FACTOR {
        Some(PRICE_EXCEEDS)
    } else if band.min_price > 0.0 && unit_price < band.min_price * PRICE_FLOOR_FACTOR {
        Some(PRICE_BELOW)
    } else {
        None
    };

    let actual: HashSet<&str> = policy_codes
        .iter()
        .map(String::as_str)
        .filter(|c| *c == PRICE_EXCEEDS || *c == PRICE_BELOW)
        .collect();

    let consistent = match expected {
        Some(code) => decision == Decision::Deny && actual.len() == 1 && actual.contains(code),
        None => actual.is_empty(),
    };

    if consistent {
        1.0
    } else {
        0.0
    }
}
