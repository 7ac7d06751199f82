//! Post-decision quality scoring.
//!
//! ## Scores
//!
//! | Score | Source | Absent when |
//! |-------|--------|-------------|
//! | `decision_correct` | gold label | no gold |
//! | `policy_justified` | gold label (Jaccard) | no gold |
//! | `match_correct` | gold label | no gold |
//! | `price_check_correct` | re-derived price checks | no price band |
//! | `reason_quality` | explanation judge | no reasons |
//!
//! The verdict is driven by the lowest present score, so a missing gold label
//! lowers coverage but never lowers the verdict.

pub mod deterministic;
pub mod explanation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::GoldLabel;

pub use deterministic::DeterministicJudge;
pub use explanation::{heuristic_score, parse_llm_score};

/// Scores below this fail.
pub const FAIL_BELOW: f64 = 0.6;

/// Scores below this warn.
pub const WARN_BELOW: f64 = 0.8;

/// Stage recorded on every judgement written by the pipeline.
pub const POST_DECISION_STAGE: &str = "post_decision";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Fail,
    Warn,
    Pass,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Warn => "WARN",
            Verdict::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Individual scores in [0, 1]; `None` means "not applicable".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JudgementScores {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_correct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_justified: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_correct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_check_correct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_quality: Option<f64>,
}

impl JudgementScores {
    /// Present scores in a fixed order.
    pub fn present(&self) -> Vec<(&'static str, f64)> {
        [
            ("decision_correct", self.decision_correct),
            ("policy_justified", self.policy_justified),
            ("match_correct", self.match_correct),
            ("price_check_correct", self.price_check_correct),
            ("reason_quality", self.reason_quality),
        ]
        .into_iter()
        .filter_map(|(name, score)| score.map(|s| (name, s)))
        .collect()
    }
}

/// Verdict from the lowest present score. No scores pass.
pub fn verdict(scores: &JudgementScores) -> Verdict {
    let lowest = scores
        .present()
        .into_iter()
        .map(|(_, score)| score)
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.min(s))));

    match lowest {
        None => Verdict::Pass,
        Some(s) if s < FAIL_BELOW => Verdict::Fail,
        Some(s) if s < WARN_BELOW => Verdict::Warn,
        Some(_) => Verdict::Pass,
    }
}

/// Short operator-facing comment on a verdict.
pub fn comments(scores: &JudgementScores, verdict: Verdict, has_gold: bool) -> String {
    let mut parts = Vec::new();

    if !has_gold {
        parts.push("No gold label available for comparison".to_string());
    }

    let low: Vec<&str> = scores
        .present()
        .into_iter()
        .filter(|(_, score)| *score < FAIL_BELOW)
        .map(|(name, _)| name)
        .collect();
    if !low.is_empty() {
        parts.push(format!("Low scores: {}", low.join(", ")));
    }

    if verdict == Verdict::Pass && has_gold {
        parts.push("All available criteria met".to_string());
    }

    if parts.is_empty() {
        verdict.as_str().to_lowercase()
    } else {
        parts.join("; ")
    }
}

/// What the gold label expected, copied onto the judgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpectedOutcome {
    pub decision: crate::types::Decision,
    pub canonical_item_id: Option<String>,
    pub policy_codes: Vec<String>,
}

impl From<&GoldLabel> for ExpectedOutcome {
    fn from(gold: &GoldLabel) -> Self {
        Self {
            decision: gold.expected_decision,
            canonical_item_id: gold.expected_canonical_id.clone(),
            policy_codes: gold.expected_policy_codes.clone(),
        }
    }
}

/// Append-only audit record for one judged decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Judgement {
    pub invoice_id: String,
    pub line_item_id: String,
    pub stage: String,
    pub scores: JudgementScores,
    pub verdict: Verdict,
    pub comments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<ExpectedOutcome>,
    pub created_at: DateTime<Utc>,
}

impl Judgement {
    pub fn summary(&self) -> JudgementSummary {
        JudgementSummary {
            scores: self.scores.clone(),
            verdict: self.verdict,
        }
    }
}

/// Judgement fields attached to a line-item decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgementSummary {
    pub scores: JudgementScores,
    pub verdict: Verdict,
}
